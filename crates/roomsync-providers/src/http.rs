//! HTTP feed fetcher.
//!
//! One unauthenticated GET per fetch. Status codes are mapped onto
//! [`ProviderErrorCode`](crate::ProviderErrorCode) so callers can tell a
//! dead URL from a flaky host.

use reqwest::{Client, Response, StatusCode, header};
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::fetcher::{BoxFuture, FeedFetcher, FetcherConfig, validate_feed_url};

/// Fetches ICS feeds over HTTP(S).
pub struct HttpFeedFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFeedFetcher {
    /// Creates a new fetcher with the given configuration.
    pub fn new(config: FetcherConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("Failed to create HTTP client: {}", e))
                    .with_source(e)
            })?;

        Ok(Self { client, config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    async fn get(&self, url: &str) -> ProviderResult<String> {
        let parsed = validate_feed_url(url)?;
        trace!(url = %parsed, "Fetching feed");

        let response = self
            .client
            .get(parsed)
            .header(header::ACCEPT, "text/calendar, text/plain;q=0.9, */*;q=0.1")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::timeout(format!("Request timed out: {}", e)).with_source(e)
                } else {
                    ProviderError::network(format!("Request failed: {}", e)).with_source(e)
                }
            })?;

        self.handle_response(response).await
    }

    /// Handles the HTTP response and extracts the body.
    async fn handle_response(&self, response: Response) -> ProviderResult<String> {
        let status = response.status();
        trace!(status = %status, "Received response");

        match status {
            s if s.is_success() => self.read_body(response).await,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                ProviderError::access_denied(format!("Feed rejected its access token ({})", status)),
            ),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(ProviderError::not_found(format!(
                "Feed no longer exists ({})",
                status
            ))),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(ProviderError::rate_limited("Too many requests to feed host"))
            }
            s if s.is_server_error() => Err(ProviderError::server(format!("Server error ({})", s))),
            s => {
                warn!(status = %s, "Unexpected response status");
                Err(ProviderError::unexpected_status(format!(
                    "Unexpected status {}",
                    s
                )))
            }
        }
    }
}

impl HttpFeedFetcher {
    /// Reads the body chunk by chunk, giving up as soon as it passes
    /// `max_body_bytes`. Chunked responses carry no length up front.
    async fn read_body(&self, mut response: Response) -> ProviderResult<String> {
        let limit = self.config.max_body_bytes;
        if let Some(len) = response.content_length()
            && len > limit as u64
        {
            return Err(ProviderError::invalid_response(format!(
                "Feed too large: {} bytes (max: {})",
                len, limit
            )));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::timeout(format!("Timed out reading response: {}", e)).with_source(e)
            } else {
                ProviderError::invalid_response(format!("Failed to read response: {}", e))
                    .with_source(e)
            }
        })? {
            if body.len() + chunk.len() > limit {
                return Err(ProviderError::invalid_response(format!(
                    "Feed too large: more than {} bytes",
                    limit
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(bytes = body.len(), "Feed downloaded");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

impl FeedFetcher for HttpFeedFetcher {
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use roomsync_core::EventTime;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\n\
                        DTSTART;VALUE=DATE:20240301\r\nDTEND;VALUE=DATE:20240305\r\n\
                        SUMMARY:Reserved\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    /// Answers one request with a chunked body and no Content-Length.
    async fn serve_chunked(chunks: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let mut response = String::from(
                "HTTP/1.1 200 OK\r\nContent-Type: text/calendar\r\n\
                 Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
            );
            for chunk in &chunks {
                response.push_str(&format!("{:x}\r\n{}\r\n", chunk.len(), chunk));
            }
            response.push_str("0\r\n\r\n");
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/feed.ics")
    }

    fn fetcher() -> HttpFeedFetcher {
        HttpFeedFetcher::new(FetcherConfig::default().with_timeout(Duration::from_secs(2))).unwrap()
    }

    #[tokio::test]
    async fn fetches_and_parses_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar.ics"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/calendar.ics", server.uri());
        let events = fetcher().fetch(&url).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].end,
            EventTime::AllDay(chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
        );
    }

    #[tokio::test]
    async fn html_body_yields_no_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let events = fetcher().fetch(&server.uri()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let cases = [
            (404, ProviderErrorCode::NotFound),
            (403, ProviderErrorCode::AccessDenied),
            (429, ProviderErrorCode::RateLimited),
            (503, ProviderErrorCode::ServerError),
            (418, ProviderErrorCode::UnexpectedStatus),
        ];
        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = fetcher().fetch(&server.uri()).await.unwrap_err();
            assert_eq!(err.code(), expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn slow_feed_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(FEED)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let fetcher =
            HttpFeedFetcher::new(FetcherConfig::default().with_timeout(Duration::from_millis(200)))
                .unwrap();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn oversized_feed_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let fetcher =
            HttpFeedFetcher::new(FetcherConfig::default().with_max_body_bytes(16)).unwrap();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::InvalidResponse);
    }

    #[tokio::test]
    async fn chunked_feed_within_limit_is_read() {
        let url = serve_chunked(FEED.split_inclusive("\r\n").map(String::from).collect()).await;
        let events = fetcher().fetch(&url).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn oversized_chunked_feed_is_rejected() {
        let url = serve_chunked(vec!["X".repeat(64); 8]).await;
        let fetcher =
            HttpFeedFetcher::new(FetcherConfig::default().with_max_body_bytes(256)).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::InvalidResponse);
        assert!(err.to_string().contains("too large"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        // Nothing listens on port 9 on loopback.
        let err = fetcher()
            .fetch("http://127.0.0.1:9/feed.ics")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::NetworkError);
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let err = fetcher().fetch("file:///etc/passwd").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::ConfigurationError);
    }
}
