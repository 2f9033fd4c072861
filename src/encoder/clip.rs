//! HTTP client for a CLIP inference server.

use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageFormat, RgbImage};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::EmbeddingModel;

/// Blocking client for a server exposing `POST /embed/text` and
/// `POST /embed/image`.
#[derive(Clone)]
pub struct ClipHttpEncoder {
    client: Client,
    text_endpoint: String,
    image_endpoint: String,
    model: String,
    dimensions: usize,
    max_retries: usize,
}

impl ClipHttpEncoder {
    /// Builds a new encoder client.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: String,
        dimensions: usize,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!model.trim().is_empty(), "missing encoder model name");
        anyhow::ensure!(dimensions > 0, "encoder dimensions must be positive");
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "encoder endpoint must be an http(s) URL"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .context("invalid encoder API key")?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build encoder HTTP client")?;
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            text_endpoint: format!("{base}/embed/text"),
            image_endpoint: format!("{base}/embed/image"),
            model,
            dimensions,
            max_retries: max_retries.max(1),
        })
    }

    fn post<T: Serialize>(&self, endpoint: &str, request: &T) -> Result<Vec<f32>> {
        let mut attempt = 0usize;
        loop {
            let response = self.client.post(endpoint).json(request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EncodeResponse = resp
                            .json()
                            .context("failed to parse encoder response")?;
                        return self.single_vector(parsed);
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if self.should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("encoder request failed ({}): {}", status, body);
                }
                Err(err) => {
                    if self.is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(self.retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    fn single_vector(&self, parsed: EncodeResponse) -> Result<Vec<f32>> {
        if let Some(model) = parsed.model.as_deref() {
            anyhow::ensure!(
                model == self.model,
                "encoder answered with model {model}, expected {}",
                self.model
            );
        }
        let mut embeddings = parsed.embeddings.into_iter();
        let vector = embeddings
            .next()
            .context("encoder returned no embeddings")?;
        anyhow::ensure!(
            vector.len() == self.dimensions,
            "encoder returned {} dimensions, expected {}",
            vector.len(),
            self.dimensions
        );
        Ok(vector)
    }

    fn should_retry(&self, status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

impl EmbeddingModel for ClipHttpEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        let request = TextRequest {
            model: &self.model,
            inputs: [text],
        };
        self.post(&self.text_endpoint, &request)
    }

    fn encode_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let payload = png_base64(image)?;
        let request = ImageRequest {
            model: &self.model,
            images: [payload.as_str()],
        };
        self.post(&self.image_endpoint, &request)
    }
}

fn png_base64(image: &RgbImage) -> Result<String> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .context("failed to encode image as PNG")?;
    Ok(BASE64.encode(&buf))
}

#[derive(Serialize)]
struct TextRequest<'a> {
    model: &'a str,
    inputs: [&'a str; 1],
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    images: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    #[serde(default)]
    model: Option<String>,
    embeddings: Vec<Vec<f32>>,
}
