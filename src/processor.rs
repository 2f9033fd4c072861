//! Turns one provider photo into a stored, deduplicated [`ImageRecord`].

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use chrono::Utc;
use image::GenericImageView;
use image_palette::{aspect_ratio, decode, dominant_colors, encode_jpeg, fit_exact, JPEG_QUALITY};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::dedup::{content_hash, DedupIndex};
use crate::fetch::Fetcher;
use crate::model::{Attribution, Dimensions, ImageRecord};
use crate::object_store::{object_key, ObjectStore, JPEG_CONTENT_TYPE};
use crate::search::{Photo, SOURCE_NAME};

/// Why a candidate photo was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Source-native id already stored.
    DuplicateSource,
    /// Byte-identical content already stored, or a concurrent writer won the insert.
    DuplicateContent,
    /// The provider record lacks a required field.
    MissingField(&'static str),
    /// Network or transport failure while downloading the original.
    Download(String),
    /// The downloaded bytes are not a decodable image.
    Decode(String),
    /// A derivative could not be produced.
    Processing(String),
}

impl SkipReason {
    /// Whether the skip is an expected duplicate rather than a failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SkipReason::DuplicateSource | SkipReason::DuplicateContent)
    }

    /// Short stable label, suitable for log fields and tallies.
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::DuplicateSource => "duplicate_source",
            SkipReason::DuplicateContent => "duplicate_content",
            SkipReason::MissingField(_) => "missing_field",
            SkipReason::Download(_) => "download",
            SkipReason::Decode(_) => "decode",
            SkipReason::Processing(_) => "processing",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DuplicateSource => write!(f, "source id already stored"),
            SkipReason::DuplicateContent => write!(f, "content hash already stored"),
            SkipReason::MissingField(field) => write!(f, "photo is missing `{field}`"),
            SkipReason::Download(err) => write!(f, "download failed: {err}"),
            SkipReason::Decode(err) => write!(f, "decode failed: {err}"),
            SkipReason::Processing(err) => write!(f, "derivative failed: {err}"),
        }
    }
}

/// Result of processing one candidate. Fatal errors travel separately as `Err`.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The record was persisted.
    Stored(Box<ImageRecord>),
    /// The candidate was skipped.
    Skipped(SkipReason),
}

/// Receives every skip the pipeline swallows.
pub trait SkipSink {
    /// Called once per skipped candidate.
    fn skipped(&mut self, photo_id: &str, reason: &SkipReason);
}

/// Sends skips to `tracing`: duplicates at debug, failures at warn.
#[derive(Debug, Default)]
pub struct TracingSkipSink;

impl SkipSink for TracingSkipSink {
    fn skipped(&mut self, photo_id: &str, reason: &SkipReason) {
        if reason.is_duplicate() {
            tracing::debug!(photo_id, kind = reason.kind(), "skipped: {reason}");
        } else {
            tracing::warn!(photo_id, kind = reason.kind(), "skipped: {reason}");
        }
    }
}

/// Named derivative with exact output dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeSize {
    /// Key in [`ImageRecord::urls`] and the storage path.
    pub name: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

impl DerivativeSize {
    /// Builds a size entry.
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
        }
    }

    /// `full` 1920x1080, `medium` 1024x768, `thumbnail` 256x256.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("full", 1920, 1080),
            Self::new("medium", 1024, 768),
            Self::new("thumbnail", 256, 256),
        ]
    }
}

/// Runs the download / dedup / derive / upload / persist pipeline.
pub struct ImageProcessor<'a> {
    catalog: &'a dyn CatalogStore,
    dedup: DedupIndex<'a>,
    fetcher: &'a dyn Fetcher,
    store: &'a dyn ObjectStore,
    sizes: Vec<DerivativeSize>,
}

impl<'a> ImageProcessor<'a> {
    /// Processor writing the default derivative sizes.
    pub fn new(
        catalog: &'a dyn CatalogStore,
        fetcher: &'a dyn Fetcher,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self::with_sizes(catalog, fetcher, store, DerivativeSize::defaults())
    }

    /// Processor writing a custom list of derivative sizes.
    pub fn with_sizes(
        catalog: &'a dyn CatalogStore,
        fetcher: &'a dyn Fetcher,
        store: &'a dyn ObjectStore,
        sizes: Vec<DerivativeSize>,
    ) -> Self {
        Self {
            catalog,
            dedup: DedupIndex::new(catalog),
            fetcher,
            store,
            sizes,
        }
    }

    /// Processes one photo for `domain` / `subcategory`.
    ///
    /// Returns `Err` only for catalog or object-store failures.
    pub fn process(&mut self, photo: &Photo, domain: &str, subcategory: &str) -> Result<IngestOutcome> {
        let photo_id = photo.id.trim();
        if photo_id.is_empty() {
            return Ok(IngestOutcome::Skipped(SkipReason::MissingField("id")));
        }
        let download_url = photo.urls.raw.trim();
        if download_url.is_empty() {
            return Ok(IngestOutcome::Skipped(SkipReason::MissingField("urls.raw")));
        }
        if self.dedup.has_source(SOURCE_NAME, photo_id)? {
            return Ok(IngestOutcome::Skipped(SkipReason::DuplicateSource));
        }

        let bytes = match self.fetcher.fetch(download_url) {
            Ok(bytes) => bytes,
            Err(err) => return Ok(IngestOutcome::Skipped(SkipReason::Download(format!("{err:#}")))),
        };
        let hash = content_hash(&bytes);
        if self.dedup.has_hash(&hash)? {
            return Ok(IngestOutcome::Skipped(SkipReason::DuplicateContent));
        }

        let image = match decode(&bytes) {
            Ok(image) => image,
            Err(err) => return Ok(IngestOutcome::Skipped(SkipReason::Decode(err.to_string()))),
        };
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(IngestOutcome::Skipped(SkipReason::Decode(
                "image has zero area".to_string(),
            )));
        }
        let dimensions = Dimensions {
            width,
            height,
            aspect_ratio: aspect_ratio(&image),
        };
        let colors = dominant_colors(&image);

        let mut derivatives = Vec::with_capacity(self.sizes.len());
        for size in &self.sizes {
            let resized = fit_exact(&image, size.width, size.height);
            match encode_jpeg(&resized, JPEG_QUALITY) {
                Ok(jpeg) => derivatives.push((size, jpeg)),
                Err(err) => {
                    return Ok(IngestOutcome::Skipped(SkipReason::Processing(format!(
                        "{}: {err}",
                        size.name
                    ))))
                }
            }
        }

        let id = Uuid::new_v4();
        let mut urls = BTreeMap::new();
        let mut keys = Vec::with_capacity(derivatives.len());
        for (size, jpeg) in &derivatives {
            let key = object_key(domain, subcategory, &size.name, &id);
            let url = self.store.put(&key, jpeg, JPEG_CONTENT_TYPE)?;
            urls.insert(size.name.clone(), url);
            keys.push(key);
        }

        let record = ImageRecord {
            id,
            original_id: photo_id.to_string(),
            source: SOURCE_NAME.to_string(),
            source_url: photo.links.html.clone(),
            download_url: download_url.to_string(),
            dimensions,
            hash,
            colors,
            urls,
            attribution: Attribution {
                name: photo.user.name.clone(),
                username: photo.user.username.clone(),
                link: photo.user.links.html.clone(),
            },
            domain: domain.to_string(),
            subcategory: subcategory.to_string(),
            tags: photo.tag_titles(),
            date_imported: Utc::now(),
        };

        if !self.catalog.insert_image(&record)? {
            // Lost a uniqueness race; the uploaded derivatives belong to no record.
            for key in &keys {
                self.store.delete(key)?;
            }
            return Ok(IngestOutcome::Skipped(SkipReason::DuplicateContent));
        }
        self.dedup
            .remember(&record.source, &record.original_id, &record.hash);
        tracing::debug!(photo_id, id = %record.id, domain, subcategory, "stored image");
        Ok(IngestOutcome::Stored(Box::new(record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::object_store::MemoryObjectStore;
    use crate::test_support::{photo, png_bytes, FailingStore, StubFetcher};
    use pretty_assertions::assert_eq;

    fn small_sizes() -> Vec<DerivativeSize> {
        vec![DerivativeSize::new("medium", 32, 24), DerivativeSize::new("thumbnail", 16, 16)]
    }

    #[test]
    fn stores_record_with_derivatives_and_palette() {
        let catalog = MemoryCatalog::new();
        let store = MemoryObjectStore::new();
        let fetcher = StubFetcher::new().with("https://img/p1", png_bytes([200, 10, 10], 120, 80));
        let mut processor = ImageProcessor::with_sizes(&catalog, &fetcher, &store, small_sizes());

        let outcome = processor
            .process(&photo("p1", "https://img/p1", &["vintage"]), "Visual Design", "UI/UX")
            .expect("process");
        let record = match outcome {
            IngestOutcome::Stored(record) => record,
            other => panic!("expected stored, got {other:?}"),
        };
        assert_eq!(record.dimensions.width, 120);
        assert_eq!(record.dimensions.height, 80);
        assert!((record.dimensions.aspect_ratio - 1.5).abs() < 1e-9);
        assert_eq!(record.colors.len(), 1);
        assert_eq!(record.colors[0].hex, "#c80a0a");
        assert_eq!(record.tags, vec!["vintage".to_string()]);
        assert_eq!(record.urls.len(), 2);
        assert_eq!(
            record.urls["thumbnail"],
            format!("memory://visual-design/ui-ux/thumbnail/{}.jpg", record.id)
        );

        let thumb = store
            .get(&format!("visual-design/ui-ux/thumbnail/{}.jpg", record.id))
            .expect("uploaded thumbnail");
        let decoded = image::load_from_memory(&thumb).expect("jpeg");
        assert_eq!(decoded.dimensions(), (16, 16));
        assert_eq!(catalog.image(&record.id).map(|r| r.hash), Some(record.hash.clone()));
    }

    #[test]
    fn identical_bytes_under_new_source_id_are_stored_once() {
        let catalog = MemoryCatalog::new();
        let store = MemoryObjectStore::new();
        let bytes = png_bytes([1, 2, 3], 20, 20);
        let fetcher = StubFetcher::new()
            .with("https://img/a", bytes.clone())
            .with("https://img/b", bytes);
        let mut processor = ImageProcessor::with_sizes(&catalog, &fetcher, &store, small_sizes());

        let first = processor.process(&photo("a", "https://img/a", &[]), "D", "S").expect("a");
        assert!(matches!(first, IngestOutcome::Stored(_)));
        let second = processor.process(&photo("b", "https://img/b", &[]), "D", "S").expect("b");
        assert!(matches!(
            second,
            IngestOutcome::Skipped(SkipReason::DuplicateContent)
        ));
        assert_eq!(catalog.total_images().expect("count"), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn repeated_source_id_is_a_no_op_without_download() {
        let catalog = MemoryCatalog::new();
        let store = MemoryObjectStore::new();
        let fetcher = StubFetcher::new().with("https://img/a", png_bytes([9, 9, 9], 20, 20));
        let mut processor = ImageProcessor::with_sizes(&catalog, &fetcher, &store, small_sizes());

        processor.process(&photo("a", "https://img/a", &[]), "D", "S").expect("first");
        let uploads = store.len();
        let again = processor.process(&photo("a", "https://img/a", &[]), "D", "S").expect("again");
        assert!(matches!(again, IngestOutcome::Skipped(SkipReason::DuplicateSource)));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(store.len(), uploads);
        assert_eq!(catalog.total_images().expect("count"), 1);
    }

    #[test]
    fn transient_and_decode_failures_are_skips() {
        let catalog = MemoryCatalog::new();
        let store = MemoryObjectStore::new();
        let fetcher = StubFetcher::new().with("https://img/garbage", b"not an image".to_vec());
        let mut processor = ImageProcessor::with_sizes(&catalog, &fetcher, &store, small_sizes());

        let missing = processor.process(&photo("x", "https://img/404", &[]), "D", "S").expect("x");
        assert!(matches!(missing, IngestOutcome::Skipped(SkipReason::Download(_))));

        let garbage = processor
            .process(&photo("y", "https://img/garbage", &[]), "D", "S")
            .expect("y");
        assert!(matches!(garbage, IngestOutcome::Skipped(SkipReason::Decode(_))));

        let no_url = processor.process(&photo("z", "", &[]), "D", "S").expect("z");
        assert!(matches!(
            no_url,
            IngestOutcome::Skipped(SkipReason::MissingField("urls.raw"))
        ));
        assert_eq!(
            SkipReason::MissingField("urls.raw").to_string(),
            "photo is missing `urls.raw`"
        );
        assert!(store.is_empty());
        assert_eq!(catalog.total_images().expect("count"), 0);
    }

    #[test]
    fn object_store_failure_is_fatal() {
        let catalog = MemoryCatalog::new();
        let store = FailingStore;
        let fetcher = StubFetcher::new().with("https://img/a", png_bytes([5, 5, 5], 20, 20));
        let mut processor = ImageProcessor::with_sizes(&catalog, &fetcher, &store, small_sizes());
        assert!(processor.process(&photo("a", "https://img/a", &[]), "D", "S").is_err());
        assert_eq!(catalog.total_images().expect("count"), 0);
    }

    /// Answers lookups from memory but reports every insert as a conflict,
    /// as if another writer stored the same image first.
    struct ConflictingCatalog(MemoryCatalog);

    impl CatalogStore for ConflictingCatalog {
        fn source_exists(&self, source: &str, original_id: &str) -> Result<bool> {
            self.0.source_exists(source, original_id)
        }
        fn hash_exists(&self, hash: &str) -> Result<bool> {
            self.0.hash_exists(hash)
        }
        fn insert_image(&self, _record: &ImageRecord) -> Result<bool> {
            Ok(false)
        }
        fn subcategory_counts(&self) -> Result<Vec<crate::model::SubcategoryCount>> {
            self.0.subcategory_counts()
        }
        fn total_images(&self) -> Result<u64> {
            self.0.total_images()
        }
        fn images_missing_embeddings(&self, limit: usize) -> Result<Vec<crate::model::PendingImage>> {
            self.0.images_missing_embeddings(limit)
        }
        fn insert_embedding(&self, record: &crate::model::EmbeddingRecord) -> Result<bool> {
            self.0.insert_embedding(record)
        }
        fn embedding_counts(&self, model: &str) -> Result<crate::model::EmbeddingCounts> {
            self.0.embedding_counts(model)
        }
        fn delete_stale_embeddings(&self, model: &str) -> Result<u64> {
            self.0.delete_stale_embeddings(model)
        }
        fn nearest(
            &self,
            query: &[f32],
            model: &str,
            filter: &crate::model::ImageFilter,
            limit: usize,
        ) -> Result<Vec<crate::model::ScoredImage>> {
            self.0.nearest(query, model, filter, limit)
        }
    }

    #[test]
    fn lost_insert_race_removes_uploaded_derivatives() {
        let catalog = ConflictingCatalog(MemoryCatalog::new());
        let store = MemoryObjectStore::new();
        let fetcher = StubFetcher::new().with("https://img/a", png_bytes([40, 80, 120], 20, 20));
        let mut processor = ImageProcessor::with_sizes(&catalog, &fetcher, &store, small_sizes());

        let outcome = processor.process(&photo("a", "https://img/a", &[]), "D", "S").expect("a");
        assert!(matches!(
            outcome,
            IngestOutcome::Skipped(SkipReason::DuplicateContent)
        ));
        assert!(store.is_empty(), "orphaned keys: {:?}", store.keys());
    }
}
