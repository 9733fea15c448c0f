//! Section to image affinity scoring

use crate::FusionError;
use magazine_common::{AffinityMatrix, ImageAsset, Section};
use magazine_embeddings::{cosine_similarity, EmbeddingService};
use std::sync::Arc;
use tracing::{debug, info};

/// Scores every section against every image by cosine similarity.
///
/// Each section is embedded once; image vectors come from analysis. Images
/// without an embedding score 0.0 everywhere.
#[derive(Clone)]
pub struct SemanticMatcher {
    embeddings: Arc<dyn EmbeddingService>,
    representative_chars: usize,
}

impl SemanticMatcher {
    pub fn new(embeddings: Arc<dyn EmbeddingService>, representative_chars: usize) -> Self {
        Self {
            embeddings,
            representative_chars,
        }
    }

    /// Build the `sections x images` matrix.
    ///
    /// # Errors
    /// Returns [`FusionError::Embedding`] when a section cannot be embedded.
    pub async fn score(
        &self,
        sections: &[Section],
        images: &[ImageAsset],
    ) -> Result<AffinityMatrix, FusionError> {
        if images.is_empty() {
            return Ok(AffinityMatrix::empty(sections.len()));
        }

        let texts: Vec<String> = sections
            .iter()
            .map(|s| s.representative_text(self.representative_chars))
            .collect();
        let section_vectors = self
            .embeddings
            .embed_texts(&texts)
            .await
            .map_err(|e| FusionError::Embedding(e.to_string()))?;
        if section_vectors.len() != sections.len() {
            return Err(FusionError::Embedding(format!(
                "expected {} section vectors, got {}",
                sections.len(),
                section_vectors.len()
            )));
        }

        let missing = images.iter().filter(|i| i.embedding.is_none()).count();
        if missing > 0 {
            debug!("{} images have no embedding and score 0.0", missing);
        }

        let scores: Vec<Vec<f32>> = section_vectors
            .iter()
            .map(|section_vector| {
                images
                    .iter()
                    .map(|image| {
                        image
                            .embedding
                            .as_deref()
                            .map_or(0.0, |v| cosine_similarity(section_vector, v))
                    })
                    .collect()
            })
            .collect();

        info!(
            "Scored {} sections against {} images",
            sections.len(),
            images.len()
        );
        Ok(AffinityMatrix {
            image_ids: images.iter().map(|i| i.id.clone()).collect(),
            scores,
        })
    }
}
