use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use uuid::Uuid;

use super::{rank_hits, CatalogStore};
use crate::model::{
    EmbeddingCounts, EmbeddingRecord, ImageFilter, ImageRecord, PendingImage, ScoredImage,
    SubcategoryCount,
};
use crate::similarity::cosine_similarity;

/// Catalog held entirely in process memory.
///
/// Enforces the same uniqueness rules as the Postgres schema. Used by tests
/// and by dry runs that should not touch a database.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    images: Vec<ImageRecord>,
    by_id: HashMap<Uuid, usize>,
    embeddings: BTreeMap<Uuid, EmbeddingRecord>,
}

impl MemoryCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record by id.
    pub fn image(&self, id: &Uuid) -> Option<ImageRecord> {
        let state = self.lock();
        state.by_id.get(id).map(|idx| state.images[*idx].clone())
    }

    /// Every stored record, in insertion order.
    pub fn images(&self) -> Vec<ImageRecord> {
        self.lock().images.clone()
    }

    /// Stored embedding for an image.
    pub fn embedding(&self, id: &Uuid) -> Option<EmbeddingRecord> {
        self.lock().embeddings.get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CatalogStore for MemoryCatalog {
    fn source_exists(&self, source: &str, original_id: &str) -> Result<bool> {
        Ok(self
            .lock()
            .images
            .iter()
            .any(|image| image.source == source && image.original_id == original_id))
    }

    fn hash_exists(&self, hash: &str) -> Result<bool> {
        Ok(self.lock().images.iter().any(|image| image.hash == hash))
    }

    fn insert_image(&self, record: &ImageRecord) -> Result<bool> {
        let mut state = self.lock();
        let conflict = state.by_id.contains_key(&record.id)
            || state.images.iter().any(|image| {
                image.hash == record.hash
                    || (image.source == record.source && image.original_id == record.original_id)
            });
        if conflict {
            return Ok(false);
        }
        let idx = state.images.len();
        state.by_id.insert(record.id, idx);
        state.images.push(record.clone());
        Ok(true)
    }

    fn subcategory_counts(&self) -> Result<Vec<SubcategoryCount>> {
        let mut grouped: BTreeMap<(String, String), u64> = BTreeMap::new();
        for image in &self.lock().images {
            *grouped
                .entry((image.domain.clone(), image.subcategory.clone()))
                .or_default() += 1;
        }
        Ok(grouped
            .into_iter()
            .map(|((domain, subcategory), count)| SubcategoryCount {
                domain,
                subcategory,
                count,
            })
            .collect())
    }

    fn total_images(&self) -> Result<u64> {
        Ok(self.lock().images.len() as u64)
    }

    fn images_missing_embeddings(&self, limit: usize) -> Result<Vec<PendingImage>> {
        let state = self.lock();
        Ok(state
            .images
            .iter()
            .filter(|image| !state.embeddings.contains_key(&image.id))
            .take(limit)
            .map(|image| PendingImage {
                id: image.id,
                urls: image.urls.clone(),
            })
            .collect())
    }

    fn insert_embedding(&self, record: &EmbeddingRecord) -> Result<bool> {
        let mut state = self.lock();
        anyhow::ensure!(
            state.by_id.contains_key(&record.image_id),
            "embedding references unknown image {}",
            record.image_id
        );
        if state.embeddings.contains_key(&record.image_id) {
            return Ok(false);
        }
        state.embeddings.insert(record.image_id, record.clone());
        Ok(true)
    }

    fn embedding_counts(&self, model: &str) -> Result<EmbeddingCounts> {
        let state = self.lock();
        let current_model = state
            .embeddings
            .values()
            .filter(|embedding| embedding.model == model)
            .count() as u64;
        Ok(EmbeddingCounts {
            total_images: state.images.len() as u64,
            current_model,
            other_models: state.embeddings.len() as u64 - current_model,
        })
    }

    fn delete_stale_embeddings(&self, model: &str) -> Result<u64> {
        let mut state = self.lock();
        let before = state.embeddings.len();
        state.embeddings.retain(|_, embedding| embedding.model == model);
        Ok((before - state.embeddings.len()) as u64)
    }

    fn nearest(
        &self,
        query: &[f32],
        model: &str,
        filter: &ImageFilter,
        limit: usize,
    ) -> Result<Vec<ScoredImage>> {
        let state = self.lock();
        let mut scored: Vec<ScoredImage> = state
            .embeddings
            .values()
            .filter(|embedding| embedding.model == model)
            .filter_map(|embedding| {
                let image = &state.images[*state.by_id.get(&embedding.image_id)?];
                filter
                    .matches(&image.domain, &image.subcategory)
                    .then(|| ScoredImage::from_record(image, cosine_similarity(query, &embedding.vector)))
            })
            .collect();
        rank_hits(&mut scored, limit);
        Ok(scored)
    }
}
