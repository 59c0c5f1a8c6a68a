//! Calendar feed fetching.
//!
//! - [`FeedFetcher`] - fetches a feed URL and parses it into events
//! - [`HttpFeedFetcher`] - the reqwest-backed implementation
//! - [`StaticFeedFetcher`] - in-memory feeds, for wiring and tests
//! - [`ProviderError`] - per-source failure classification
//!
//! ```text
//! CalendarSource.url ──GET──▶ ICS text ──parse_ics──▶ Vec<ParsedEvent>
//! ```

pub mod error;
pub mod fetcher;
pub mod http;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use fetcher::{BoxFuture, FeedFetcher, FetcherConfig, StaticFeedFetcher, validate_feed_url};
pub use http::HttpFeedFetcher;
