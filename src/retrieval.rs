//! Text-to-image nearest-neighbour retrieval.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::catalog::CatalogStore;
use crate::encoder::EmbeddingModel;
use crate::model::{ImageFilter, ScoredImage};

/// Phrase prepended to moodboard prompts before encoding.
pub const QUALITY_PREFIX: &str = "high quality, professional ";
/// Results returned when the caller does not ask for a count.
pub const DEFAULT_NUM_IMAGES: usize = 16;
/// Colors reported in a moodboard summary.
pub const PALETTE_LIMIT: usize = 6;
/// Style tags reported in a moodboard summary.
pub const STYLE_LIMIT: usize = 3;
/// Tags containing one of these (case-insensitive) count as style hints.
pub const STYLE_KEYWORDS: [&str; 5] = ["vintage", "modern", "minimal", "cinematic", "abstract"];

/// Ranked images plus the summary a moodboard UI shows next to them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Moodboard {
    /// Hits, best first.
    pub images: Vec<ScoredImage>,
    /// Most frequent palette colors across all hits.
    pub color_palette: Vec<String>,
    /// Tags that look like style descriptors.
    pub suggested_styles: Vec<String>,
}

impl Moodboard {
    /// Builds the summary for a ranked hit list.
    pub fn from_images(images: Vec<ScoredImage>) -> Self {
        let color_palette = frequent_colors(&images, PALETTE_LIMIT);
        let suggested_styles = style_tags(&images, STYLE_LIMIT);
        Self {
            images,
            color_palette,
            suggested_styles,
        }
    }
}

/// Couples one encoder with the catalog it was used to populate.
#[derive(Clone)]
pub struct Retriever {
    catalog: Arc<dyn CatalogStore>,
    model: Arc<dyn EmbeddingModel>,
}

impl Retriever {
    /// Builds a retriever.
    pub fn new(catalog: Arc<dyn CatalogStore>, model: Arc<dyn EmbeddingModel>) -> Self {
        Self { catalog, model }
    }

    /// Model whose vectors this retriever ranks.
    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Top `k` images for a raw text query.
    pub fn find_similar(&self, query: &str, filter: &ImageFilter, k: usize) -> Result<Vec<ScoredImage>> {
        let vector = self.model.encode_text(query)?;
        self.search_vector(&vector, filter, k)
    }

    /// Top `k` images for an already encoded query.
    pub fn search_vector(&self, vector: &[f32], filter: &ImageFilter, k: usize) -> Result<Vec<ScoredImage>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        anyhow::ensure!(
            vector.len() == self.model.dimensions(),
            "query vector has {} dimensions, expected {}",
            vector.len(),
            self.model.dimensions()
        );
        self.catalog
            .nearest(vector, self.model.model_id(), filter, k)
    }

    /// Encodes a moodboard prompt, quality prefix included.
    pub fn embed_prompt(&self, prompt: &str) -> Result<Vec<f32>> {
        self.model.encode_text(&enhance_prompt(prompt))
    }

    /// Moodboard for a prompt already run through [`Retriever::embed_prompt`].
    pub fn moodboard_for_vector(&self, vector: &[f32], filter: &ImageFilter, k: usize) -> Result<Moodboard> {
        Ok(Moodboard::from_images(self.search_vector(vector, filter, k)?))
    }

    /// Full moodboard for a user prompt.
    pub fn create_moodboard(&self, prompt: &str, filter: &ImageFilter, k: usize) -> Result<Moodboard> {
        anyhow::ensure!(!prompt.trim().is_empty(), "prompt is required");
        let vector = self.embed_prompt(prompt)?;
        let board = self.moodboard_for_vector(&vector, filter, k)?;
        tracing::debug!(prompt, hits = board.images.len(), "moodboard created");
        Ok(board)
    }
}

/// `prompt` with [`QUALITY_PREFIX`] in front.
pub fn enhance_prompt(prompt: &str) -> String {
    format!("{QUALITY_PREFIX}{}", prompt.trim())
}

fn frequent_colors(images: &[ScoredImage], limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut seen = 0usize;
    for color in images.iter().flat_map(|image| &image.colors) {
        let entry = counts.entry(color.hex.as_str()).or_insert_with(|| {
            seen += 1;
            (0, seen)
        });
        entry.0 += 1;
    }
    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(hex, (count, first))| (hex, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(hex, _, _)| hex.to_string())
        .collect()
}

fn style_tags(images: &[ScoredImage], limit: usize) -> Vec<String> {
    let mut styles: Vec<String> = Vec::new();
    for tag in images.iter().flat_map(|image| &image.tags) {
        if styles.len() == limit {
            break;
        }
        let lower = tag.to_lowercase();
        if STYLE_KEYWORDS.iter().any(|kw| lower.contains(kw)) && !styles.contains(tag) {
            styles.push(tag.clone());
        }
    }
    styles
}
