//! Raw byte downloads for originals and stored derivatives.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use url::Url;

/// Downloads the bytes behind a URL.
pub trait Fetcher: Send + Sync {
    /// Fetches the full body. Any error is treated as transient by callers.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// `reqwest`-backed fetcher that also understands `file://` URLs.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build download HTTP client")?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).with_context(|| format!("invalid url {url}"))?;
        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("invalid file url {url}"))?;
            return fs::read(&path).with_context(|| format!("failed to read {:?}", path));
        }
        let resp = self
            .client
            .get(parsed)
            .send()
            .with_context(|| format!("download failed for {url}"))?;
        let status = resp.status();
        anyhow::ensure!(status.is_success(), "download of {url} returned {status}");
        let bytes = resp
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(bytes.to_vec())
    }
}
