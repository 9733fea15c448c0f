//! Cross-modal embedding extraction
//!
//! Provides a single [`EmbeddingService`] contract that maps text and image bytes
//! into the same fixed-length vector space, so sections and photographs can be
//! compared with cosine similarity. The production implementation is a CLIP
//! ONNX model loaded once per process ([`ClipEmbeddingService`]).

pub mod clip;

pub use clip::{ClipConfig, ClipEmbeddingService, ClipModel};

use async_trait::async_trait;
use thiserror::Error;

/// Embedding errors
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Failed to decode image: {0}")]
    Decode(String),
}

/// Maps text or image bytes to a fixed-length, cosine-comparable vector.
///
/// Implementations are shared read-only across stages and jobs.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a piece of text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed encoded image bytes (JPEG, PNG, ...)
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimensionality shared by text and image vectors
    fn dimension(&self) -> usize;

    /// Embed several texts, one vector per input in order
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(embeddings)
    }
}

/// Normalize a vector to unit length (L2 normalization)
pub fn normalize_vector(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity in [-1, 1].
///
/// Returns 0.0 for vectors of different length or zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 1e-12 || norm_b <= 1e-12 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
