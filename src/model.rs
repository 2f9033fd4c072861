//! Records shared by the ingestion, embedding, and retrieval stages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use image_palette::PaletteColor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pixel dimensions captured from the decoded original.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// `width / height`.
    pub aspect_ratio: f64,
}

/// Photographer credit carried over from the search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// Display name.
    pub name: String,
    /// Provider handle.
    pub username: String,
    /// Profile page URL.
    pub link: String,
}

/// A stored, deduplicated image and everything derived from it at ingest time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// System-generated identifier.
    pub id: Uuid,
    /// Identifier assigned by the source provider.
    pub original_id: String,
    /// Provider name (`unsplash`).
    pub source: String,
    /// Provider page for the photo.
    pub source_url: String,
    /// URL the original bytes were downloaded from.
    pub download_url: String,
    /// Original pixel dimensions.
    pub dimensions: Dimensions,
    /// Hex SHA-256 of the downloaded bytes.
    pub hash: String,
    /// Dominant colors, largest share first.
    pub colors: Vec<PaletteColor>,
    /// Derivative size name to stored URL.
    pub urls: BTreeMap<String, String>,
    /// Photographer credit.
    pub attribution: Attribution,
    /// Allocation domain the image was fetched for.
    pub domain: String,
    /// Allocation subcategory the image was fetched for.
    pub subcategory: String,
    /// Free-form provider tags.
    pub tags: Vec<String>,
    /// Ingest time.
    pub date_imported: DateTime<Utc>,
}

/// One embedding row. The model tag pins the vector space it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Image the vector describes.
    pub image_id: Uuid,
    /// Identifier of the encoder that produced the vector.
    pub model: String,
    /// Raw encoder output.
    pub vector: Vec<f32>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

/// Image still waiting for an embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingImage {
    /// Image identifier.
    pub id: Uuid,
    /// Stored derivative URLs.
    pub urls: BTreeMap<String, String>,
}

/// Retrieval hit returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredImage {
    /// Image identifier.
    pub id: Uuid,
    /// Allocation domain.
    pub domain: String,
    /// Allocation subcategory.
    pub subcategory: String,
    /// Derivative size name to stored URL.
    pub urls: BTreeMap<String, String>,
    /// Dominant colors.
    pub colors: Vec<PaletteColor>,
    /// Provider tags.
    pub tags: Vec<String>,
    /// Cosine similarity between query and image vectors.
    pub similarity: f64,
}

impl ScoredImage {
    /// Projects a stored record into a retrieval hit.
    pub fn from_record(record: &ImageRecord, similarity: f64) -> Self {
        Self {
            id: record.id,
            domain: record.domain.clone(),
            subcategory: record.subcategory.clone(),
            urls: record.urls.clone(),
            colors: record.colors.clone(),
            tags: record.tags.clone(),
            similarity,
        }
    }
}

/// Stored image count for one (domain, subcategory) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubcategoryCount {
    /// Allocation domain.
    pub domain: String,
    /// Allocation subcategory.
    pub subcategory: String,
    /// Number of stored images.
    pub count: u64,
}

/// Raw embedding counts as reported by a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmbeddingCounts {
    /// Every stored image.
    pub total_images: u64,
    /// Embeddings produced by the current model.
    pub current_model: u64,
    /// Embeddings tagged with any other model.
    pub other_models: u64,
}

/// Optional domain/subcategory restriction applied to retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
    /// Exact domain match when set.
    pub domain: Option<String>,
    /// Exact subcategory match when set.
    pub subcategory: Option<String>,
}

impl ImageFilter {
    /// Builds a filter, treating blank strings as unset.
    pub fn new(domain: Option<&str>, subcategory: Option<&str>) -> Self {
        Self {
            domain: non_blank(domain),
            subcategory: non_blank(subcategory),
        }
    }

    /// Whether a record with the given labels passes the filter.
    pub fn matches(&self, domain: &str, subcategory: &str) -> bool {
        self.domain.as_deref().map_or(true, |d| d == domain)
            && self.subcategory.as_deref().map_or(true, |s| s == subcategory)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filter_values_are_ignored() {
        let filter = ImageFilter::new(Some("  "), None);
        assert_eq!(filter, ImageFilter::default());
        assert!(filter.matches("Anything", "Goes"));
    }

    #[test]
    fn filter_requires_exact_labels() {
        let filter = ImageFilter::new(Some("Nature & Landscapes"), Some("Seasons"));
        assert!(filter.matches("Nature & Landscapes", "Seasons"));
        assert!(!filter.matches("Nature & Landscapes", "Weather & atmospheric"));
        assert!(!filter.matches("Visual Design", "Seasons"));
    }
}
