//! Order-preserving header list with case-insensitive lookup (RFC 9110 §5).

/// A case-insensitive, multi-value HTTP header map.
///
/// # Examples
///
/// ```
/// use trendmap::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Authorization", "Bearer abc");
/// assert_eq!(headers.get("authorization"), Some("Bearer abc"));
/// assert!(!headers.contains("x-missing"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry; earlier values for the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_returns_first() {
        let mut h = Headers::new();
        h.insert("X-Refresh-Token", "one");
        h.insert("x-refresh-token", "two");
        assert_eq!(h.get("X-REFRESH-TOKEN"), Some("one"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn iteration_preserves_order() {
        let mut h = Headers::with_capacity(2);
        h.insert("B", "2");
        h.insert("A", "1");
        let names: Vec<_> = h.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
