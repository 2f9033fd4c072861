//! Duplicate detection by source id and content hash.

use std::collections::HashSet;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::catalog::CatalogStore;

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Read-through view over the catalog's uniqueness keys.
///
/// Positive answers are cached for the lifetime of the index; negative answers
/// always go back to the catalog because another writer may have inserted.
pub struct DedupIndex<'a> {
    catalog: &'a dyn CatalogStore,
    known_sources: HashSet<(String, String)>,
    known_hashes: HashSet<String>,
}

impl<'a> DedupIndex<'a> {
    /// Index backed by `catalog`.
    pub fn new(catalog: &'a dyn CatalogStore) -> Self {
        Self {
            catalog,
            known_sources: HashSet::new(),
            known_hashes: HashSet::new(),
        }
    }

    /// Whether `source` + `original_id` is already stored.
    pub fn has_source(&mut self, source: &str, original_id: &str) -> Result<bool> {
        let key = (source.to_string(), original_id.to_string());
        if self.known_sources.contains(&key) {
            return Ok(true);
        }
        let found = self.catalog.source_exists(source, original_id)?;
        if found {
            self.known_sources.insert(key);
        }
        Ok(found)
    }

    /// Whether `hash` is already stored.
    pub fn has_hash(&mut self, hash: &str) -> Result<bool> {
        if self.known_hashes.contains(hash) {
            return Ok(true);
        }
        let found = self.catalog.hash_exists(hash)?;
        if found {
            self.known_hashes.insert(hash.to_string());
        }
        Ok(found)
    }

    /// Records keys of a record this process just stored.
    pub fn remember(&mut self, source: &str, original_id: &str, hash: &str) {
        self.known_sources
            .insert((source.to_string(), original_id.to_string()));
        self.known_hashes.insert(hash.to_string());
    }
}
