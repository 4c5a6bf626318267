//! Shared-token authorization for the manual refresh trigger.
//!
//! A caller presents the token either as a `token` query parameter or as an
//! `Authorization: Bearer <token>` header. The query parameter wins when both
//! are present.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::Request;

/// The configured refresh token.
///
/// Never printed: `Debug` is redacted.
///
/// # Examples
///
/// ```
/// use trendmap::security::SharedSecret;
///
/// let secret = SharedSecret::new("s3cret");
/// assert!(secret.matches("s3cret"));
/// assert!(!secret.matches("S3CRET"));
/// assert_eq!(format!("{secret:?}"), "SharedSecret([REDACTED])");
/// ```
#[derive(Clone)]
pub struct SharedSecret(SecretString);

impl SharedSecret {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self(SecretString::new(token.into()))
    }

    /// Exact, case-sensitive comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.expose_secret() == presented
    }
}

impl From<SecretString> for SharedSecret {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// The token a request presents, if any.
pub fn presented_token(request: &Request) -> Option<&str> {
    if let Some(token) = request.query_param("token") {
        return Some(token);
    }
    let value = request.headers().get("authorization")?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn token_from_query() {
        let req = request("POST /refresh?token=abc HTTP/1.1\r\n\r\n");
        assert_eq!(presented_token(&req), Some("abc"));
    }

    #[test]
    fn token_from_bearer_header() {
        let req = request("POST /refresh HTTP/1.1\r\nAuthorization: bearer  abc \r\n\r\n");
        assert_eq!(presented_token(&req), Some("abc"));
    }

    #[test]
    fn query_wins_over_header() {
        let req = request("GET /refresh?token=q HTTP/1.1\r\nAuthorization: Bearer h\r\n\r\n");
        assert_eq!(presented_token(&req), Some("q"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let req = request("POST /refresh HTTP/1.1\r\nAuthorization: Basic YWJj\r\n\r\n");
        assert_eq!(presented_token(&req), None);
        let req = request("POST /refresh HTTP/1.1\r\n\r\n");
        assert_eq!(presented_token(&req), None);
    }

    #[test]
    fn empty_token_never_matches_a_real_secret() {
        let secret = SharedSecret::new("abc");
        assert!(!secret.matches(""));
        assert!(!secret.matches("abcd"));
    }
}
