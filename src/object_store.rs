//! Blob storage for derivative images.
//!
//! Keys follow `domain/subcategory/size/id.jpg`, with the labels slugified so
//! they are safe as path segments on every backend.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use url::Url;
use uuid::Uuid;

/// Content type used for every derivative.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Blob store for derivatives. Errors are fatal to the caller.
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the URL it can be read from.
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String>;

    /// Removes `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Builds the object key for one derivative.
pub fn object_key(domain: &str, subcategory: &str, size: &str, id: &Uuid) -> String {
    format!(
        "{}/{}/{}/{}.jpg",
        slugify(domain),
        slugify(subcategory),
        slugify(size),
        id
    )
}

/// Lowercases and collapses every non-alphanumeric run to a single `-`.
pub fn slugify(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_dash = false;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Stores blobs below a local directory.
pub struct FsObjectStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl FsObjectStore {
    /// Creates the root directory if needed. URLs use `public_base` when set,
    /// otherwise a `file://` URL to the written path.
    pub fn new(root: impl Into<PathBuf>, public_base: Option<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create object store root {:?}", root))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve object store root {:?}", root))?;
        Ok(Self {
            root,
            public_base: public_base.map(|base| base.trim_end_matches('/').to_string()),
        })
    }
}

impl FsObjectStore {
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        anyhow::ensure!(
            !key.split('/').any(|segment| segment == ".." || segment.is_empty()),
            "invalid object key {key}"
        );
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {:?}", parent))?;
        }
        fs::write(&path, bytes).with_context(|| format!("failed to write {:?}", path))?;
        match &self.public_base {
            Some(base) => Ok(format!("{base}/{key}")),
            None => Url::from_file_path(&path)
                .map(String::from)
                .map_err(|_| anyhow::anyhow!("cannot express {:?} as a file url", path)),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete {:?}", path)),
        }
    }
}

/// S3-compatible store reached with plain HTTP `PUT`.
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    public_base: String,
}

impl HttpObjectStore {
    /// Objects are written to `{endpoint}/{bucket}/{key}`; returned URLs are
    /// `{public_base}/{key}`, defaulting to the write location.
    pub fn new(
        endpoint: &str,
        bucket: &str,
        token: Option<&str>,
        public_base: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!bucket.trim().is_empty(), "missing object store bucket");
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Url::parse(&endpoint).with_context(|| format!("invalid object store endpoint {endpoint}"))?;
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("invalid object store token")?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build object store HTTP client")?;
        let bucket = bucket.trim().to_string();
        let public_base = match public_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("{endpoint}/{bucket}"),
        };
        Ok(Self {
            client,
            endpoint,
            bucket,
            public_base,
        })
    }
}

impl ObjectStore for HttpObjectStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let target = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        let resp = self
            .client
            .put(&target)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .with_context(|| format!("upload to {target} failed"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("upload to {} returned {}: {}", target, status, body);
        }
        Ok(format!("{}/{}", self.public_base, key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let target = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        let resp = self
            .client
            .delete(&target)
            .send()
            .with_context(|| format!("delete of {target} failed"))?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            anyhow::bail!("delete of {} returned {}", target, status);
        }
        Ok(())
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{key}"))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}
