//! Feed source backed by an HTTP GET per region.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Url};
use tracing::trace;

use super::{FeedSource, FetchError, parse};
use crate::regions::RegionCode;

/// Browser identity sent with every feed request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0 Safari/537.36";

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

pub const DEFAULT_FEED_URL: &str = "https://trends.google.com/trending/rss";

pub const DEFAULT_GEO_PREFIX: &str = "US-";

/// Where and how feed requests are sent.
#[derive(Debug, Clone)]
pub struct FeedEndpoint {
    pub base_url: String,
    pub geo_prefix: String,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for FeedEndpoint {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FEED_URL.to_owned(),
            geo_prefix: DEFAULT_GEO_PREFIX.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_owned(),
        }
    }
}

/// Issues one GET per attempt against `{base_url}?geo={geo_prefix}{code}`.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: Client,
    base_url: Url,
    geo_prefix: String,
}

impl HttpFeedSource {
    /// Builds a source whose client carries the endpoint's fixed headers.
    ///
    /// `connect_timeout` bounds connection setup only; the whole-attempt
    /// timeout is enforced by the caller.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Config`]: the base URL or a header value is invalid.
    /// - [`FetchError::Http`]: the HTTP client could not be constructed.
    pub fn new(endpoint: &FeedEndpoint, connect_timeout: Duration) -> Result<Self, FetchError> {
        let base_url = Url::parse(&endpoint.base_url)
            .map_err(|err| FetchError::Config(format!("invalid feed URL {}: {err}", endpoint.base_url)))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&endpoint.user_agent)?);
        headers.insert(ACCEPT_LANGUAGE, header_value(&endpoint.accept_language)?);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            geo_prefix: endpoint.geo_prefix.clone(),
        })
    }

    /// The URL requested for `region`.
    pub fn url_for(&self, region: &RegionCode) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("geo", &format!("{}{}", self.geo_prefix, region));
        url
    }
}

fn header_value(value: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value)
        .map_err(|err| FetchError::Config(format!("invalid header value {value:?}: {err}")))
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn top_title(&self, region: &RegionCode) -> Result<String, FetchError> {
        let url = self.url_for(region);
        trace!(%region, %url, "requesting feed");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse::top_entry_title(&body)
    }
}
