//! Photo search provider client.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, ACCEPT};
use serde::Deserialize;

use crate::rate_limit::{Clock, SlidingWindowLimiter, SystemClock, HOUR};

/// Provider calls allowed per rolling hour.
pub const DEFAULT_CALLS_PER_HOUR: usize = 50;
/// Results requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 30;
/// Pause after a failed search before the scheduler moves on.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.unsplash.com";
/// Source label stored on every record fetched through this client.
pub const SOURCE_NAME: &str = "unsplash";

/// Orientation filter accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Wider than tall.
    Landscape,
    /// Taller than wide.
    Portrait,
    /// Roughly square.
    Squarish,
}

impl Orientation {
    /// Every orientation, in the order random picks index into.
    pub const ALL: [Orientation; 3] = [
        Orientation::Landscape,
        Orientation::Portrait,
        Orientation::Squarish,
    ];

    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Squarish => "squarish",
        }
    }
}

/// One outbound search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Free-text query.
    pub term: String,
    /// 1-based result page.
    pub page: u32,
    /// Results per page.
    pub per_page: u32,
    /// Optional orientation restriction.
    pub orientation: Option<Orientation>,
}

impl SearchQuery {
    /// Query string pairs, without credentials.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", self.term.clone()),
            ("page", self.page.to_string()),
            ("per_page", self.per_page.to_string()),
        ];
        if let Some(orientation) = self.orientation {
            params.push(("orientation", orientation.as_str().to_string()));
        }
        params
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    /// Photos in provider order.
    #[serde(default)]
    pub results: Vec<Photo>,
}

/// Photo metadata as returned by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Photo {
    /// Provider identifier.
    #[serde(default)]
    pub id: String,
    /// Rendition URLs.
    #[serde(default)]
    pub urls: PhotoUrls,
    /// Related pages.
    #[serde(default)]
    pub links: PhotoLinks,
    /// Photographer.
    #[serde(default)]
    pub user: PhotoUser,
    /// Provider tags.
    #[serde(default)]
    pub tags: Vec<PhotoTag>,
}

impl Photo {
    /// Non-empty tag titles.
    pub fn tag_titles(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter_map(|tag| tag.title.as_deref())
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoUrls {
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub full: String,
    #[serde(default)]
    pub regular: String,
    #[serde(default)]
    pub small: String,
    #[serde(default)]
    pub thumb: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoLinks {
    #[serde(default)]
    pub html: String,
}

/// Photographer block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoUser {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Handle.
    #[serde(default)]
    pub username: String,
    /// Profile links.
    #[serde(default)]
    pub links: PhotoLinks,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoTag {
    #[serde(default)]
    pub title: Option<String>,
}

/// Anything that can answer a [`SearchQuery`].
///
/// Implementations never fail: transient errors yield an empty page.
pub trait PhotoSearch {
    /// Runs one search call.
    fn search(&mut self, query: &SearchQuery) -> SearchPage;
}

/// Blocking client for the Unsplash search endpoint.
pub struct UnsplashClient<C: Clock = SystemClock> {
    client: Client,
    endpoint: String,
    access_key: String,
    limiter: SlidingWindowLimiter<C>,
    error_backoff: Duration,
}

impl UnsplashClient<SystemClock> {
    /// Builds a client throttled to `calls_per_hour` on the wall clock.
    pub fn new(access_key: String, base_url: &str, calls_per_hour: usize) -> Result<Self> {
        Self::with_limiter(
            access_key,
            base_url,
            SlidingWindowLimiter::with_clock(calls_per_hour, HOUR, SystemClock::new()),
        )
    }
}

impl<C: Clock> UnsplashClient<C> {
    /// Builds a client around an existing limiter.
    pub fn with_limiter(
        access_key: String,
        base_url: &str,
        limiter: SlidingWindowLimiter<C>,
    ) -> Result<Self> {
        anyhow::ensure!(!access_key.trim().is_empty(), "missing Unsplash access key");
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("Accept-Version", HeaderValue::from_static("v1"));
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/search/photos", base_url.trim_end_matches('/')),
            access_key: access_key.trim().to_string(),
            limiter,
            error_backoff: ERROR_BACKOFF,
        })
    }

    /// Overrides the pause taken after a failed call.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    fn fetch_page(&self, query: &SearchQuery) -> Result<SearchPage> {
        let mut params = query.query_params();
        params.push(("client_id", self.access_key.clone()));
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .context("search request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("search returned {}: {}", status, body);
        }
        resp.json().context("failed to parse search response")
    }
}

impl<C: Clock> PhotoSearch for UnsplashClient<C> {
    fn search(&mut self, query: &SearchQuery) -> SearchPage {
        let waited = self.limiter.acquire();
        if !waited.is_zero() {
            tracing::debug!(waited_secs = waited.as_secs_f64(), "search throttled");
        }
        match self.fetch_page(query) {
            Ok(page) => {
                tracing::debug!(
                    term = %query.term,
                    page = query.page,
                    results = page.results.len(),
                    "search page fetched"
                );
                page
            }
            Err(err) => {
                tracing::warn!(term = %query.term, page = query.page, "search failed: {:#}", err);
                thread::sleep(self.error_backoff);
                SearchPage::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::ManualClock;
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    const SAMPLE: &str = r#"{
        "total": 2,
        "total_pages": 1,
        "results": [
            {
                "id": "abc123",
                "width": 4000,
                "urls": {
                    "raw": "https://images.example/abc123?ixid=raw",
                    "full": "https://images.example/abc123?q=full",
                    "regular": "https://images.example/abc123?w=1080",
                    "small": "https://images.example/abc123?w=400",
                    "thumb": "https://images.example/abc123?w=200"
                },
                "links": {"html": "https://unsplash.com/photos/abc123"},
                "user": {
                    "name": "Ada Example",
                    "username": "ada",
                    "links": {"html": "https://unsplash.com/@ada"}
                },
                "tags": [{"title": "vintage"}, {"title": "  "}, {"type": "search"}]
            },
            {"id": "bare"}
        ]
    }"#;

    #[test]
    fn parses_provider_payload() {
        let page: SearchPage = serde_json::from_str(SAMPLE).expect("parse sample");
        assert_eq!(page.results.len(), 2);
        let photo = &page.results[0];
        assert_eq!(photo.id, "abc123");
        assert_eq!(photo.urls.raw, "https://images.example/abc123?ixid=raw");
        assert_eq!(photo.user.links.html, "https://unsplash.com/@ada");
        assert_eq!(photo.tag_titles(), vec!["vintage".to_string()]);

        let bare = &page.results[1];
        assert!(bare.urls.raw.is_empty());
        assert!(bare.tag_titles().is_empty());
    }

    #[test]
    fn missing_results_is_an_empty_page() {
        let page: SearchPage = serde_json::from_str("{}").expect("parse empty");
        assert!(page.results.is_empty());
    }

    #[test]
    fn query_params_include_orientation_only_when_set() {
        let mut query = SearchQuery {
            term: "modern architecture".into(),
            page: 4,
            per_page: DEFAULT_PAGE_SIZE,
            orientation: None,
        };
        assert_eq!(
            query.query_params(),
            vec![
                ("query", "modern architecture".to_string()),
                ("page", "4".to_string()),
                ("per_page", "30".to_string()),
            ]
        );
        query.orientation = Some(Orientation::Squarish);
        assert_eq!(
            query.query_params().last(),
            Some(&("orientation", "squarish".to_string()))
        );
    }

    #[test]
    fn rejects_blank_access_key() {
        assert!(UnsplashClient::new("  ".into(), DEFAULT_BASE_URL, 50).is_err());
    }

    fn offline_client(base_url: &str) -> UnsplashClient<ManualClock> {
        let limiter = SlidingWindowLimiter::with_clock(5, HOUR, ManualClock::new());
        UnsplashClient::with_limiter("key".into(), base_url, limiter)
            .expect("client")
            .with_error_backoff(Duration::ZERO)
    }

    fn sample_query() -> SearchQuery {
        SearchQuery {
            term: "forest".into(),
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
            orientation: None,
        }
    }

    #[test]
    fn unreachable_endpoint_yields_empty_page() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let mut client = offline_client(&format!("http://127.0.0.1:{port}"));
        let page = client.search(&sample_query());
        assert!(page.results.is_empty());
        assert_eq!(client.limiter.in_window(), 1);
    }

    #[test]
    fn server_error_yields_empty_page() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            stream
                .write_all(
                    b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbusy",
                )
                .expect("write response");
        });
        let mut client = offline_client(&format!("http://{addr}"));
        let page = client.search(&sample_query());
        assert!(page.results.is_empty());
        server.join().expect("server thread");
    }
}
