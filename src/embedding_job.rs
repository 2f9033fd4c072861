//! Batch job that fills in missing image embeddings.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::catalog::CatalogStore;
use crate::encoder::EmbeddingModel;
use crate::fetch::Fetcher;
use crate::model::{EmbeddingRecord, PendingImage};

/// Images pulled per batch by the CLI.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Derivative the encoder looks at.
pub const EMBEDDING_SOURCE_SIZE: &str = "medium";

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Images selected for the batch.
    pub attempted: usize,
    /// Embeddings inserted.
    pub succeeded: usize,
    /// Images whose download, decode or encode failed.
    pub failed: usize,
}

/// Totals across every batch of a drain run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Batches executed, including the final unproductive one.
    pub batches: usize,
    /// Embeddings inserted.
    pub succeeded: usize,
    /// Per-image failures.
    pub failed: usize,
}

/// Embedding coverage relative to the current model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmbeddingCoverage {
    /// Every stored image.
    pub total_images: u64,
    /// Images with an embedding from the current model.
    pub images_with_embeddings: u64,
    /// `images_with_embeddings / total_images * 100`, two decimals.
    pub completion_percentage: f64,
    /// Embeddings left behind by other models.
    pub stale_embeddings: u64,
}

/// Drives an [`EmbeddingModel`] over images that lack a vector.
pub struct EmbeddingGenerator<'a> {
    catalog: &'a dyn CatalogStore,
    fetcher: &'a dyn Fetcher,
    model: &'a dyn EmbeddingModel,
}

impl<'a> EmbeddingGenerator<'a> {
    /// Builds a generator.
    pub fn new(
        catalog: &'a dyn CatalogStore,
        fetcher: &'a dyn Fetcher,
        model: &'a dyn EmbeddingModel,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            model,
        }
    }

    /// Embeds up to `batch_size` images. Per-image failures are logged and
    /// counted; catalog errors abort.
    pub fn process_batch(&self, batch_size: usize) -> Result<BatchReport> {
        let pending = self.catalog.images_missing_embeddings(batch_size.max(1))?;
        let mut report = BatchReport {
            attempted: pending.len(),
            ..BatchReport::default()
        };
        if pending.is_empty() {
            tracing::info!("no images are waiting for embeddings");
            return Ok(report);
        }
        for image in &pending {
            let vector = match self.embed(image) {
                Ok(vector) => vector,
                Err(err) => {
                    tracing::warn!(image_id = %image.id, "embedding failed: {:#}", err);
                    report.failed += 1;
                    continue;
                }
            };
            let record = EmbeddingRecord {
                image_id: image.id,
                model: self.model.model_id().to_string(),
                vector,
                created_at: Utc::now(),
            };
            if self.catalog.insert_embedding(&record)? {
                report.succeeded += 1;
            } else {
                tracing::debug!(image_id = %image.id, "embedding already present");
            }
        }
        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "embedding batch finished"
        );
        Ok(report)
    }

    /// Runs batches until one inserts nothing.
    pub fn run_until_drained(&self, batch_size: usize) -> Result<DrainReport> {
        let mut drain = DrainReport::default();
        loop {
            let report = self.process_batch(batch_size)?;
            drain.batches += 1;
            drain.succeeded += report.succeeded;
            drain.failed += report.failed;
            if report.succeeded == 0 {
                return Ok(drain);
            }
        }
    }

    /// Current coverage for this generator's model.
    pub fn coverage(&self) -> Result<EmbeddingCoverage> {
        let counts = self.catalog.embedding_counts(self.model.model_id())?;
        Ok(EmbeddingCoverage {
            total_images: counts.total_images,
            images_with_embeddings: counts.current_model,
            completion_percentage: completion_percentage(counts.current_model, counts.total_images),
            stale_embeddings: counts.other_models,
        })
    }

    /// Deletes embeddings from other models so the next run regenerates them.
    pub fn purge_stale(&self) -> Result<u64> {
        let removed = self.catalog.delete_stale_embeddings(self.model.model_id())?;
        tracing::info!(removed, model = self.model.model_id(), "purged stale embeddings");
        Ok(removed)
    }

    fn embed(&self, image: &PendingImage) -> Result<Vec<f32>> {
        let url = image
            .urls
            .get(EMBEDDING_SOURCE_SIZE)
            .with_context(|| format!("no {EMBEDDING_SOURCE_SIZE} derivative"))?;
        let bytes = self.fetcher.fetch(url)?;
        let rgb = image_palette::decode(&bytes)
            .context("failed to decode derivative")?
            .to_rgb8();
        let vector = self.model.encode_image(&rgb)?;
        anyhow::ensure!(
            vector.len() == self.model.dimensions(),
            "model returned {} dimensions, expected {}",
            vector.len(),
            self.model.dimensions()
        );
        Ok(vector)
    }
}

/// Percentage rounded to two decimals; 0 when there is nothing to cover.
pub fn completion_percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = done as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
