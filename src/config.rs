//! Command-line configuration shared by the binaries.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::catalog::{CatalogSchema, PgCatalog};
use crate::encoder::{ClipHttpEncoder, DEFAULT_DIMENSIONS, DEFAULT_MODEL_ID};
use crate::object_store::{FsObjectStore, HttpObjectStore, MemoryObjectStore, ObjectStore};

/// Installs a stderr `fmt` subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber installed earlier (e.g. by a test harness) stays in place.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

/// Postgres connection flags.
#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Schema holding the images and image_embeddings tables
    #[arg(long, env = "MOODBOARD_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Create the vector extension and tables if missing (defaults to true
    /// for the writers, false for the read-only query paths)
    #[arg(long, env = "MOODBOARD_PREPARE", action = clap::ArgAction::Set)]
    pub prepare: Option<bool>,
}

impl DatabaseArgs {
    /// Connects for writing; bootstraps the schema for `dims`-wide vectors
    /// unless `--prepare false`.
    pub fn connect(&self, dims: usize) -> Result<PgCatalog> {
        self.open(dims, true)
    }

    /// Connects for reading; runs no DDL unless `--prepare true`.
    pub fn connect_existing(&self, dims: usize) -> Result<PgCatalog> {
        self.open(dims, false)
    }

    fn open(&self, dims: usize, prepare_by_default: bool) -> Result<PgCatalog> {
        let catalog = PgCatalog::connect(&self.database_url, CatalogSchema::new(&self.schema)?)?;
        if self.should_prepare(prepare_by_default) {
            catalog.prepare(dims)?;
        }
        Ok(catalog)
    }

    fn should_prepare(&self, prepare_by_default: bool) -> bool {
        self.prepare.unwrap_or(prepare_by_default)
    }
}

/// CLIP inference server flags.
#[derive(Args, Debug, Clone)]
pub struct EncoderArgs {
    /// Base URL of the inference server
    #[arg(long, env = "MOODBOARD_ENCODER_URL", default_value = "http://127.0.0.1:8001")]
    pub encoder_url: String,

    /// Optional bearer token for the inference server
    #[arg(long, env = "MOODBOARD_ENCODER_API_KEY")]
    pub encoder_api_key: Option<String>,

    /// Model identifier stored with every embedding
    #[arg(long, env = "MOODBOARD_ENCODER_MODEL", default_value = DEFAULT_MODEL_ID)]
    pub encoder_model: String,

    /// Embedding width produced by the model
    #[arg(long, env = "MOODBOARD_ENCODER_DIMENSIONS", default_value_t = DEFAULT_DIMENSIONS)]
    pub encoder_dimensions: usize,

    /// Seconds before encoder requests time out
    #[arg(long, env = "MOODBOARD_ENCODER_TIMEOUT_SECS", default_value_t = 30)]
    pub encoder_timeout_secs: u64,

    /// Retry attempts for transient encoder errors
    #[arg(long, env = "MOODBOARD_ENCODER_MAX_RETRIES", default_value_t = 5)]
    pub encoder_max_retries: usize,
}

impl EncoderArgs {
    /// Builds the HTTP encoder client.
    pub fn build(&self) -> Result<ClipHttpEncoder> {
        ClipHttpEncoder::new(
            &self.encoder_url,
            self.encoder_api_key.as_deref(),
            self.encoder_model.clone(),
            self.encoder_dimensions,
            Duration::from_secs(self.encoder_timeout_secs.max(1)),
            self.encoder_max_retries,
        )
    }
}

/// Where derivatives are written.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StorageBackend {
    /// Local directory.
    Fs,
    /// S3-compatible HTTP endpoint.
    Http,
    /// Process memory; nothing survives the run.
    Memory,
}

/// Object storage flags.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Storage backend for derivatives
    #[arg(long, env = "MOODBOARD_STORAGE", value_enum, default_value = "fs")]
    pub storage: StorageBackend,

    /// Root directory for the fs backend
    #[arg(long, env = "MOODBOARD_STORAGE_ROOT", default_value = "moodboard-images")]
    pub storage_root: PathBuf,

    /// Endpoint for the http backend
    #[arg(long, env = "MOODBOARD_STORAGE_ENDPOINT")]
    pub storage_endpoint: Option<String>,

    /// Bucket for the http backend
    #[arg(long, env = "MOODBOARD_STORAGE_BUCKET", default_value = "moodboard")]
    pub storage_bucket: String,

    /// Bearer token for the http backend
    #[arg(long, env = "MOODBOARD_STORAGE_TOKEN")]
    pub storage_token: Option<String>,

    /// Public URL prefix returned for stored objects
    #[arg(long, env = "MOODBOARD_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,
}

impl StorageArgs {
    /// Builds the configured backend.
    pub fn build(&self) -> Result<Box<dyn ObjectStore>> {
        Ok(match self.storage {
            StorageBackend::Fs => Box::new(FsObjectStore::new(
                &self.storage_root,
                self.public_base_url.clone(),
            )?),
            StorageBackend::Http => {
                let endpoint = self
                    .storage_endpoint
                    .as_deref()
                    .context("--storage-endpoint is required for the http backend")?;
                Box::new(HttpObjectStore::new(
                    endpoint,
                    &self.storage_bucket,
                    self.storage_token.as_deref(),
                    self.public_base_url.as_deref(),
                    Duration::from_secs(30),
                )?)
            }
            StorageBackend::Memory => Box::new(MemoryObjectStore::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        storage: StorageArgs,
        #[command(flatten)]
        encoder: EncoderArgs,
    }

    #[derive(Parser)]
    struct DbHarness {
        #[command(flatten)]
        database: DatabaseArgs,
    }

    #[test]
    fn schema_bootstrap_defaults_per_access_mode() {
        let implicit = DbHarness::parse_from(["t", "--database-url", "postgres://db"]);
        assert!(implicit.database.should_prepare(true));
        assert!(!implicit.database.should_prepare(false));

        let forced = DbHarness::parse_from(["t", "--database-url", "postgres://db", "--prepare", "true"]);
        assert!(forced.database.should_prepare(false));

        let skipped = DbHarness::parse_from(["t", "--database-url", "postgres://db", "--prepare", "false"]);
        assert!(!skipped.database.should_prepare(true));
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
        tracing::info!("still logging");
    }

    #[test]
    fn http_storage_requires_endpoint() {
        let harness = Harness::parse_from(["t", "--storage", "http"]);
        assert!(harness.storage.build().is_err());
    }

    #[test]
    fn fs_storage_and_encoder_build_from_flags() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().join("objects");
        let harness = Harness::parse_from([
            "t",
            "--storage-root",
            root.to_str().expect("utf8 path"),
            "--encoder-dimensions",
            "8",
        ]);
        let store = harness.storage.build().expect("fs store");
        let url = store.put("a/b.jpg", b"x", "image/jpeg").expect("put");
        assert!(url.starts_with("file://"));
        assert!(root.join("a/b.jpg").exists());

        let encoder = harness.encoder.build().expect("encoder");
        assert_eq!(crate::encoder::EmbeddingModel::dimensions(&encoder), 8);
    }
}
