//! FeedFetcher trait definition.
//!
//! A fetcher turns a calendar source URL into parsed events. Every failure
//! comes back as a [`ProviderError`] for that one source; nothing here
//! panics or aborts sibling fetches.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use roomsync_core::{ParsedEvent, parse_ics};
use url::Url;

use crate::error::{ProviderError, ProviderResult};

/// A boxed future for async trait methods.
///
/// Boxed futures keep [`FeedFetcher`] usable as a trait object.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetches ICS documents for calendar sources.
pub trait FeedFetcher: Send + Sync {
    /// Downloads the raw ICS text at `url`.
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ProviderResult<String>>;

    /// Downloads and parses the feed at `url`.
    ///
    /// A body that is not ICS yields an empty list, not an error.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ProviderResult<Vec<ParsedEvent>>> {
        Box::pin(async move {
            let body = self.fetch_text(url).await?;
            Ok(parse_ics(&body))
        })
    }
}

/// Settings for HTTP feed fetching.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
    /// Bodies larger than this are rejected.
    pub max_body_bytes: usize,
}

impl FetcherConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Default body limit (10 MiB).
    pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the body size limit.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("roomsync/{}", env!("CARGO_PKG_VERSION")),
            max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Checks that `url` is an absolute http(s) URL with a host.
pub fn validate_feed_url(url: &str) -> ProviderResult<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| {
        ProviderError::configuration(format!("invalid feed URL '{url}': {e}")).with_source(e)
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProviderError::configuration(format!(
            "feed URL must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ProviderError::configuration(format!(
            "feed URL '{url}' has no host"
        )));
    }
    Ok(parsed)
}

/// Serves fixed feed bodies from memory, keyed by URL.
///
/// Unknown URLs fail with a not-found error.
#[derive(Default)]
pub struct StaticFeedFetcher {
    feeds: Mutex<HashMap<String, Result<String, String>>>,
}

impl StaticFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` for `url`.
    pub fn with_feed(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.set_feed(url, body);
        self
    }

    /// Makes `url` fail with a network error.
    pub fn with_failure(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.set_failure(url, message);
        self
    }

    /// Replaces the body served for `url`.
    pub fn set_feed(&self, url: impl Into<String>, body: impl Into<String>) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.insert(url.into(), Ok(body.into()));
        }
    }

    /// Makes `url` fail from now on.
    pub fn set_failure(&self, url: impl Into<String>, message: impl Into<String>) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.insert(url.into(), Err(message.into()));
        }
    }
}

impl FeedFetcher for StaticFeedFetcher {
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ProviderResult<String>> {
        let entry = self
            .feeds
            .lock()
            .map_err(|_| ProviderError::configuration("feed table poisoned"))
            .map(|feeds| feeds.get(url).cloned());
        Box::pin(async move {
            match entry? {
                Some(Ok(body)) => Ok(body),
                Some(Err(message)) => Err(ProviderError::network(message)),
                None => Err(ProviderError::not_found(format!("no feed at {url}"))),
            }
        })
    }
}
