#![warn(missing_docs)]
//! Core library for the moodboard image corpus: allocation-driven ingestion,
//! embedding generation and text-to-image retrieval.

pub mod allocation;
pub mod catalog;
pub mod config;
pub mod controls;
pub mod dedup;
pub mod embedding_job;
pub mod encoder;
pub mod fetch;
pub mod model;
pub mod object_store;
pub mod processor;
pub mod random;
pub mod rate_limit;
pub mod retrieval;
pub mod scheduler;
pub mod search;
pub mod similarity;

#[cfg(test)]
mod test_support;

pub use allocation::{AllocationPlan, DomainAllocation, SubcategoryTarget};
pub use catalog::{CatalogSchema, CatalogStore, MemoryCatalog, PgCatalog, TableName};
pub use controls::{IngestArgs, IngestControls};
pub use embedding_job::{BatchReport, DrainReport, EmbeddingCoverage, EmbeddingGenerator};
pub use encoder::{ClipHttpEncoder, EmbeddingModel};
pub use model::{ImageFilter, ImageRecord, ScoredImage};
pub use processor::{ImageProcessor, IngestOutcome, SkipReason};
pub use random::{RandomSource, SeededRandom};
pub use rate_limit::SlidingWindowLimiter;
pub use retrieval::{Moodboard, Retriever};
pub use scheduler::{IngestScheduler, IngestSummary, StopReason};
pub use search::{PhotoSearch, SearchQuery, UnsplashClient};
