//! Deterministic stand-ins for the network-facing collaborators.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use chrono::Utc;
use image::{ImageFormat, RgbImage};
use uuid::Uuid;

use crate::encoder::EmbeddingModel;
use crate::fetch::Fetcher;
use crate::model::{Attribution, Dimensions, ImageRecord};
use crate::object_store::ObjectStore;
use crate::random::RandomSource;
use crate::search::{Photo, PhotoLinks, PhotoSearch, PhotoTag, PhotoUrls, PhotoUser, SearchPage, SearchQuery};

pub fn sample_record(original_id: &str, hash: &str, domain: &str, subcategory: &str) -> ImageRecord {
    let mut urls = BTreeMap::new();
    urls.insert("thumbnail".to_string(), format!("memory://thumb/{original_id}"));
    ImageRecord {
        id: Uuid::new_v4(),
        original_id: original_id.to_string(),
        source: "unsplash".to_string(),
        source_url: format!("https://unsplash.com/photos/{original_id}"),
        download_url: format!("https://images.example/{original_id}"),
        dimensions: Dimensions {
            width: 4,
            height: 3,
            aspect_ratio: 4.0 / 3.0,
        },
        hash: hash.to_string(),
        colors: Vec::new(),
        urls,
        attribution: Attribution {
            name: "Test Author".to_string(),
            username: "tester".to_string(),
            link: "https://unsplash.com/@tester".to_string(),
        },
        domain: domain.to_string(),
        subcategory: subcategory.to_string(),
        tags: Vec::new(),
        date_imported: Utc::now(),
    }
}

pub fn photo(id: &str, raw_url: &str, tags: &[&str]) -> Photo {
    Photo {
        id: id.to_string(),
        urls: PhotoUrls {
            raw: raw_url.to_string(),
            ..PhotoUrls::default()
        },
        links: PhotoLinks {
            html: format!("https://unsplash.com/photos/{id}"),
        },
        user: PhotoUser {
            name: "Ada Example".to_string(),
            username: "ada".to_string(),
            links: PhotoLinks {
                html: "https://unsplash.com/@ada".to_string(),
            },
        },
        tags: tags
            .iter()
            .map(|title| PhotoTag {
                title: Some(title.to_string()),
            })
            .collect(),
    }
}

pub fn png_bytes(rgb: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    buf
}

#[derive(Default)]
pub struct StubFetcher {
    responses: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), bytes);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for StubFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 for {url}"))
    }
}

pub struct FailingStore;

impl ObjectStore for FailingStore {
    fn put(&self, key: &str, _bytes: &[u8], _content_type: &str) -> Result<String> {
        anyhow::bail!("bucket unavailable for {key}")
    }

    fn delete(&self, key: &str) -> Result<()> {
        anyhow::bail!("bucket unavailable for {key}")
    }
}

/// Three-dimensional "RGB" space: text counts colour words, images average pixels.
pub struct ColorWordModel;

impl EmbeddingModel for ColorWordModel {
    fn model_id(&self) -> &str {
        "color-words"
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 3];
        for word in text
            .split(|ch: char| !ch.is_alphanumeric())
            .map(str::to_lowercase)
        {
            match word.as_str() {
                "red" => vector[0] += 1.0,
                "green" => vector[1] += 1.0,
                "blue" => vector[2] += 1.0,
                _ => {}
            }
        }
        Ok(vector)
    }

    fn encode_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let mut sums = [0f64; 3];
        for pixel in image.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += f64::from(channel);
            }
        }
        let count = f64::from(image.width() * image.height()).max(1.0);
        Ok(sums.iter().map(|sum| (sum / count / 255.0) as f32).collect())
    }
}

pub struct ScriptedSearch {
    pages: VecDeque<SearchPage>,
    queries: Vec<SearchQuery>,
}

impl ScriptedSearch {
    pub fn new(pages: Vec<SearchPage>) -> Self {
        Self {
            pages: pages.into(),
            queries: Vec::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.queries.len()
    }
}

impl PhotoSearch for ScriptedSearch {
    fn search(&mut self, query: &SearchQuery) -> SearchPage {
        self.queries.push(query.clone());
        self.pages.pop_front().unwrap_or_default()
    }
}

/// Replays fixed answers; exhausted scripts fall back to the lowest choice.
pub struct ScriptedRandom {
    numbers: VecDeque<u32>,
    coins: VecDeque<bool>,
}

impl ScriptedRandom {
    pub fn new(numbers: Vec<u32>, coins: Vec<bool>) -> Self {
        Self {
            numbers: numbers.into(),
            coins: coins.into(),
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn index(&mut self, len: usize) -> usize {
        let next = self.numbers.pop_front().unwrap_or(0) as usize;
        next.min(len.saturating_sub(1))
    }

    fn range_inclusive(&mut self, low: u32, high: u32) -> u32 {
        self.numbers.pop_front().unwrap_or(low).clamp(low, high.max(low))
    }

    fn chance(&mut self, _probability: f64) -> bool {
        self.coins.pop_front().unwrap_or(false)
    }
}
