//! Persistent image metadata and embeddings.
//!
//! [`CatalogStore`] is the single seam between the pipeline and storage.
//! Every error it returns is fatal to the caller; benign outcomes such as a
//! duplicate insert are reported through the `bool` return values instead.

mod memory;
mod postgres;
mod schema;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;
pub use schema::{quote_ident, CatalogSchema, TableName};

use anyhow::Result;

use crate::model::{
    EmbeddingCounts, EmbeddingRecord, ImageFilter, ImageRecord, PendingImage, ScoredImage,
    SubcategoryCount,
};

/// Metadata table, dedup index and embedding store in one interface.
pub trait CatalogStore: Send + Sync {
    /// Whether an image from `source` with that native id is already stored.
    fn source_exists(&self, source: &str, original_id: &str) -> Result<bool>;

    /// Whether an image with this content hash is already stored.
    fn hash_exists(&self, hash: &str) -> Result<bool>;

    /// Inserts a new record. Returns `false` when a uniqueness constraint
    /// (hash, or source + native id) rejected it.
    fn insert_image(&self, record: &ImageRecord) -> Result<bool>;

    /// Stored image counts grouped by (domain, subcategory).
    fn subcategory_counts(&self) -> Result<Vec<SubcategoryCount>>;

    /// Count of every stored image.
    fn total_images(&self) -> Result<u64>;

    /// Up to `limit` images with no embedding row at all, oldest first.
    fn images_missing_embeddings(&self, limit: usize) -> Result<Vec<PendingImage>>;

    /// Inserts an embedding. Returns `false` if the image already has one.
    fn insert_embedding(&self, record: &EmbeddingRecord) -> Result<bool>;

    /// Image and embedding counts relative to `model`.
    fn embedding_counts(&self, model: &str) -> Result<EmbeddingCounts>;

    /// Deletes embeddings produced by any model other than `model`.
    fn delete_stale_embeddings(&self, model: &str) -> Result<u64>;

    /// Top `limit` images by cosine similarity to `query`, considering only
    /// vectors tagged with `model`. Ordered by similarity descending, then id.
    fn nearest(
        &self,
        query: &[f32],
        model: &str,
        filter: &ImageFilter,
        limit: usize,
    ) -> Result<Vec<ScoredImage>>;
}

/// Sorts hits by similarity descending, then id ascending, and keeps `limit`.
pub fn rank_hits(hits: &mut Vec<ScoredImage>, limit: usize) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
}
