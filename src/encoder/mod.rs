//! Joint text/image embedding models.

mod clip;

pub use clip::ClipHttpEncoder;

use anyhow::Result;
use image::RgbImage;

/// Identifier of the default CLIP checkpoint.
pub const DEFAULT_MODEL_ID: &str = "clip-vit-base-patch32";
/// Output width of [`DEFAULT_MODEL_ID`].
pub const DEFAULT_DIMENSIONS: usize = 512;

/// A model that maps text and images into one vector space.
///
/// Vectors from different `model_id`s are never compared.
pub trait EmbeddingModel: Send + Sync {
    /// Tag stored next to every vector this model produces.
    fn model_id(&self) -> &str;
    /// Length of every returned vector.
    fn dimensions(&self) -> usize;
    /// Embeds a text prompt.
    fn encode_text(&self, text: &str) -> Result<Vec<f32>>;
    /// Embeds an RGB image.
    fn encode_image(&self, image: &RgbImage) -> Result<Vec<f32>>;
}
