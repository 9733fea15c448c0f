//! Image analysis stage
//!
//! For every uploaded image, independently of the text:
//! - fetch bytes from object storage and take a blake3 digest
//! - decode, compute a gradient perceptual hash and quality metrics
//! - embed with the shared [`EmbeddingService`]
//! - optionally ask an [`ImageDescriber`] for scene and location
//!
//! Images are processed concurrently up to a configured limit. Failures are
//! per image: an unreadable image is dropped, a failed embedding or description
//! leaves that field empty. Only losing every image to fetch errors fails the stage.

pub mod geo;
pub mod inspect;

pub use geo::parse_geo_description;

use magazine_common::{ImageAsset, ImageSetRef, PipelineError, Warning};
use magazine_embeddings::EmbeddingService;
use magazine_llm::{call_with_retry, ImageDescriber, RetryPolicy};
use magazine_storage::ObjectStorage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const COMPONENT: &str = "image-analysis";

/// Image analysis configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Images analyzed at the same time
    pub concurrency: usize,
    /// Ask the vision model for location and description
    pub describe_images: bool,
    /// Perceptual hash side length in bits (8 = 64-bit hash)
    pub hash_size: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            describe_images: true,
            hash_size: 8,
        }
    }
}

/// Assets in input order, minus images that could not be read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutcome {
    pub assets: Vec<ImageAsset>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug)]
enum ImageFailure {
    Fetch(String),
    Decode(String),
}

/// Produces [`ImageAsset`]s from object storage keys
#[derive(Clone)]
pub struct ImageAnalysisStage {
    storage: Arc<dyn ObjectStorage>,
    embeddings: Arc<dyn EmbeddingService>,
    describer: Option<Arc<dyn ImageDescriber>>,
    config: AnalysisConfig,
    retry: RetryPolicy,
}

impl ImageAnalysisStage {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        embeddings: Arc<dyn EmbeddingService>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            storage,
            embeddings,
            describer: None,
            config,
            retry: RetryPolicy::default(),
        }
    }

    /// Attach a vision model for geo and description attributes
    #[must_use]
    pub fn with_describer(mut self, describer: Arc<dyn ImageDescriber>, retry: RetryPolicy) -> Self {
        self.describer = Some(describer);
        self.retry = retry;
        self
    }

    /// Analyze every referenced image.
    ///
    /// # Errors
    /// Returns [`PipelineError::Upstream`] when no image could be fetched at all.
    pub async fn analyze(&self, refs: &ImageSetRef) -> Result<AnalysisOutcome, PipelineError> {
        if refs.is_empty() {
            info!("No images to analyze");
            return Ok(AnalysisOutcome::default());
        }
        info!(
            "Analyzing {} images (concurrency {})",
            refs.len(),
            self.config.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(refs.len());
        for (index, key) in refs.keys.iter().enumerate() {
            let stage = self.clone();
            let semaphore = semaphore.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ImageFailure::Fetch(e.to_string()))?;
                stage.analyze_one(index, &key).await
            }));
        }

        let mut outcome = AnalysisOutcome::default();
        let mut fetch_failures = 0usize;
        let mut last_fetch_error = String::new();
        for (handle, key) in handles.into_iter().zip(&refs.keys) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ImageFailure::Decode(format!("analysis task failed: {e}"))),
            };
            match result {
                Ok((asset, warnings)) => {
                    outcome.assets.push(asset);
                    outcome.warnings.extend(warnings);
                }
                Err(ImageFailure::Fetch(message)) => {
                    warn!("Dropping image {}: {}", key, message);
                    fetch_failures += 1;
                    outcome
                        .warnings
                        .push(Warning::skipped(COMPONENT, format!("{key}: fetch failed: {message}")));
                    last_fetch_error = message;
                }
                Err(ImageFailure::Decode(message)) => {
                    warn!("Dropping image {}: {}", key, message);
                    outcome
                        .warnings
                        .push(Warning::skipped(COMPONENT, format!("{key}: {message}")));
                }
            }
        }

        if fetch_failures == refs.len() {
            return Err(PipelineError::upstream(
                "object-storage",
                format!("no image could be fetched ({last_fetch_error})"),
            ));
        }

        info!(
            "Image analysis finished: {} of {} images usable, {} warnings",
            outcome.assets.len(),
            refs.len(),
            outcome.warnings.len()
        );
        Ok(outcome)
    }

    async fn analyze_one(
        &self,
        index: usize,
        key: &str,
    ) -> Result<(ImageAsset, Vec<Warning>), ImageFailure> {
        let bytes = Arc::new(
            self.storage
                .retrieve(key)
                .await
                .map_err(|e| ImageFailure::Fetch(e.to_string()))?,
        );
        debug!("Fetched {} ({} bytes)", key, bytes.len());

        let hash_size = self.config.hash_size;
        let cpu_bytes = bytes.clone();
        let (digest, perceptual_hash, quality) = tokio::task::spawn_blocking(move || {
            let digest = inspect::content_digest(&cpu_bytes);
            let image = inspect::decode(&cpu_bytes)?;
            let hash = inspect::perceptual_hash(&image, hash_size)?;
            Ok::<_, String>((digest, hash, inspect::assess_quality(&image)))
        })
        .await
        .map_err(|e| ImageFailure::Decode(e.to_string()))?
        .map_err(ImageFailure::Decode)?;

        let mut asset = ImageAsset::new(format!("image-{index}"), key, digest);
        asset.perceptual_hash = Some(perceptual_hash);
        asset.quality = Some(quality);

        let mut warnings = Vec::new();
        let (embedding, description) =
            tokio::join!(self.embeddings.embed_image(&bytes), self.describe(&bytes, key));

        match embedding {
            Ok(vector) => asset.embedding = Some(vector),
            Err(e) => {
                warn!("Embedding failed for {}: {}", key, e);
                warnings.push(Warning::degraded(
                    COMPONENT,
                    format!("{key}: embedding failed, image will not be matched semantically: {e}"),
                ));
            }
        }

        match description {
            Some(Ok(text)) => asset.attributes = parse_geo_description(&text),
            Some(Err(message)) => {
                warn!("Description failed for {}: {}", key, message);
                warnings.push(Warning::degraded(
                    COMPONENT,
                    format!("{key}: description failed: {message}"),
                ));
            }
            None => {}
        }

        Ok((asset, warnings))
    }

    /// None when no describer is configured or descriptions are switched off
    async fn describe(&self, bytes: &[u8], key: &str) -> Option<Result<String, String>> {
        let describer = self.describer.as_ref().filter(|_| self.config.describe_images)?;
        let mime = inspect::mime_for_key(key);
        Some(
            call_with_retry(self.retry, "image description", || describer.describe(bytes, mime))
                .await
                .map_err(|e| e.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.hash_size, 8);
        assert!(config.describe_images);
    }
}
