//! Fusion - Text and Image Alignment
//!
//! Takes the section drafts from content creation and the analyzed images and
//! decides which images go where.
//!
//! ## Architecture
//!
//! The fusion phase performs:
//! 1. **Duplicate Removal**: Drop byte-identical and near-duplicate images (first seen wins)
//! 2. **Clustering**: Group visually similar survivors
//! 3. **Affinity Scoring**: Cosine similarity between section text and image embeddings
//! 4. **Allocation**: Assign images to sections under capacity and diversity constraints
//!
//! When scoring fails the allocation falls back to dealing images out by
//! position. Duplicates are removed either way.

pub mod diversity;
pub mod matcher;

pub use diversity::{allocate, allocate_round_robin, cluster, deduplicate, Allocation, DedupOutcome};
pub use matcher::SemanticMatcher;

use magazine_common::{AffinityMatrix, ImageAsset, PipelineError, Section, Warning};
use magazine_embeddings::EmbeddingService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const COMPONENT: &str = "fusion";

/// Fusion errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, FusionError>;

impl From<FusionError> for PipelineError {
    fn from(err: FusionError) -> Self {
        match err {
            FusionError::Embedding(message) => PipelineError::upstream("embedding", message),
            FusionError::InvalidInput(message) => PipelineError::Input(message),
        }
    }
}

/// How often one image may be placed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ImageReusePolicy {
    /// Every image appears in at most one section
    #[default]
    Exclusive,
    /// Named exception: an image may appear in up to `max_placements` sections
    ControlledRepeats { max_placements: usize },
}

/// Configuration for the fusion phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Body characters embedded after the section title
    pub representative_chars: usize,
    /// Perceptual hashes closer than this many bits are duplicates
    pub hamming_threshold: u32,
    /// Embeddings more similar than this are duplicates
    pub embedding_duplicate_threshold: f32,
    /// Minimum similarity to join an existing cluster
    pub cluster_threshold: f32,
    /// Capacity of every section
    pub max_images_per_section: usize,
    pub reuse_policy: ImageReusePolicy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            representative_chars: 512,
            hamming_threshold: 6,               // distance 0-5 is a duplicate
            embedding_duplicate_threshold: 0.97, // cosine
            cluster_threshold: 0.85,
            max_images_per_section: 4,
            reuse_policy: ImageReusePolicy::Exclusive,
        }
    }
}

/// Sections with images assigned, plus what happened along the way
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub sections: Vec<Section>,
    /// Deduplicated and clustered image pool
    pub images: Vec<ImageAsset>,
    /// None when scoring was skipped or failed
    pub matrix: Option<AffinityMatrix>,
    /// `(removed_id, kept_id)` pairs from duplicate removal
    pub removed: Vec<(String, String)>,
    /// Allocation used the round-robin fallback
    pub degraded: bool,
    pub warnings: Vec<Warning>,
}

/// Dedup, clustering and allocation with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct DiversityAllocator {
    config: FusionConfig,
}

impl DiversityAllocator {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn deduplicate(&self, images: Vec<ImageAsset>) -> DedupOutcome {
        deduplicate(images, &self.config)
    }

    pub fn cluster(&self, images: &mut [ImageAsset]) -> Vec<usize> {
        cluster(images, self.config.cluster_threshold)
    }

    /// Uniform capacity for `num_sections` sections
    pub fn capacities(&self, num_sections: usize) -> Vec<usize> {
        vec![self.config.max_images_per_section; num_sections]
    }

    pub fn allocate(&self, num_sections: usize, images: &[ImageAsset], matrix: &AffinityMatrix) -> Allocation {
        allocate(
            num_sections,
            images,
            matrix,
            &self.capacities(num_sections),
            self.config.reuse_policy,
        )
    }

    pub fn allocate_round_robin(&self, num_sections: usize, images: &[ImageAsset]) -> Allocation {
        allocate_round_robin(num_sections, images, &self.capacities(num_sections))
    }
}

/// Runs the whole fusion phase for one job
#[derive(Clone)]
pub struct FusionStage {
    matcher: SemanticMatcher,
    allocator: DiversityAllocator,
}

impl FusionStage {
    pub fn new(embeddings: Arc<dyn EmbeddingService>, config: FusionConfig) -> Self {
        Self {
            matcher: SemanticMatcher::new(embeddings, config.representative_chars),
            allocator: DiversityAllocator::new(config),
        }
    }

    pub fn allocator(&self) -> &DiversityAllocator {
        &self.allocator
    }

    /// Assign `images` to `sections`.
    ///
    /// # Errors
    /// Returns [`FusionError::InvalidInput`] when there are no sections. Scoring
    /// failures degrade to round-robin allocation instead of failing.
    pub async fn fuse(&self, mut sections: Vec<Section>, images: Vec<ImageAsset>) -> Result<FusionOutcome> {
        if sections.is_empty() {
            return Err(FusionError::InvalidInput("no sections to fuse".to_string()));
        }
        tracing::info!(
            "Starting fusion: sections={}, images={}",
            sections.len(),
            images.len()
        );
        let mut warnings = Vec::new();

        // Step 1: Remove duplicates
        let DedupOutcome { kept: mut pool, removed } = self.allocator.deduplicate(images);

        // Step 2: Cluster the survivors
        self.allocator.cluster(&mut pool);

        // Step 3: Score sections against images
        let matrix = if pool.is_empty() {
            None
        } else {
            match self.matcher.score(&sections, &pool).await {
                Ok(matrix) => Some(matrix),
                Err(e) => {
                    tracing::warn!("Affinity scoring failed, falling back to round-robin: {}", e);
                    warnings.push(Warning::degraded(
                        COMPONENT,
                        format!("affinity scoring failed, images placed by position: {e}"),
                    ));
                    None
                }
            }
        };
        let degraded = !pool.is_empty() && matrix.is_none();

        // Step 4: Allocate
        let allocation = match &matrix {
            Some(matrix) => self.allocator.allocate(sections.len(), &pool, matrix),
            None => self.allocator.allocate_round_robin(sections.len(), &pool),
        };
        warnings.extend(allocation.warnings);

        // Step 5: Attach images to sections
        for (section, ids) in sections.iter_mut().zip(allocation.assignments) {
            section.assigned_image_ids = ids;
        }

        tracing::info!(
            "Fusion complete: {} images kept, {} duplicates removed, degraded={}",
            pool.len(),
            removed.len(),
            degraded
        );
        Ok(FusionOutcome {
            sections,
            images: pool,
            matrix,
            removed,
            degraded,
            warnings,
        })
    }
}
