//! Storage layer for the magazine pipeline
//!
//! Three external stores, each behind a trait with a networked and a local backend:
//! - **Object storage** (S3/MinIO or a directory): uploaded image bytes, read-only for the pipeline
//! - **Job store** (`PostgreSQL` or memory): job documents checkpointed at phase boundaries
//! - **Pattern index** (Qdrant or a JSON file): historical layout exemplars for vector search
//!
//! # Example
//!
//! ```rust,no_run
//! use magazine_storage::{ObjectStorage, S3ObjectStorage, StorageConfig};
//!
//! # async fn demo() -> Result<(), magazine_storage::StorageError> {
//! let config = StorageConfig::default();
//! let storage = S3ObjectStorage::new(config.s3).await?;
//! let bytes = storage.retrieve("uploads/job123/beach.jpg").await?;
//! # Ok(())
//! # }
//! ```

use magazine_common::PipelineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod job_store;
pub mod object_storage;
pub mod pattern_index;

pub use job_store::{FileJobStore, InMemoryJobStore, JobStore, PostgresConfig, PostgresJobStore};
pub use object_storage::{LocalObjectStorage, ObjectStorage, S3Config, S3ObjectStorage};
pub use pattern_index::{LocalPatternIndex, PatternIndex, QdrantConfig, QdrantPatternIndex};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("Qdrant error: {0}")]
    QdrantError(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Job store failure; ends the job
    #[must_use]
    pub fn into_persistence(self) -> PipelineError {
        PipelineError::Persistence(self.to_string())
    }

    /// Failure of a store the pipeline can work around
    #[must_use]
    pub fn into_upstream(self, service: &str) -> PipelineError {
        PipelineError::upstream(service, self)
    }
}

/// Which backend each store uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// S3, `PostgreSQL`, Qdrant
    Remote,
    /// Directory, memory, JSON file
    #[default]
    Local,
}

/// Complete storage configuration for all backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,

    /// S3/MinIO configuration for object storage
    pub s3: S3Config,

    /// Qdrant configuration for the pattern index
    pub qdrant: QdrantConfig,

    /// `PostgreSQL` configuration for the job store
    pub postgres: PostgresConfig,

    /// Root directory for the local image store
    pub local_images_dir: String,

    /// JSON file holding local layout patterns
    pub local_patterns_file: String,

    /// Directory of job documents for the local job store
    pub local_jobs_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            s3: S3Config::default(),
            qdrant: QdrantConfig::default(),
            postgres: PostgresConfig::default(),
            local_images_dir: "./images".to_string(),
            local_patterns_file: "./patterns.json".to_string(),
            local_jobs_dir: "./jobs".to_string(),
        }
    }
}

/// The three stores a pipeline needs, behind their traits
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectStorage>,
    pub jobs: Arc<dyn JobStore>,
    pub patterns: Arc<dyn PatternIndex>,
}

/// Open every store for the configured backend
///
/// # Errors
/// Returns the first store that fails to open or connect.
pub async fn connect(config: &StorageConfig) -> StorageResult<Backends> {
    match config.backend {
        Backend::Remote => {
            let patterns = QdrantPatternIndex::new(config.qdrant.clone()).await?;
            patterns.init_collection().await?;
            Ok(Backends {
                objects: Arc::new(S3ObjectStorage::new(config.s3.clone()).await?),
                jobs: Arc::new(PostgresJobStore::new(config.postgres.clone()).await?),
                patterns: Arc::new(patterns),
            })
        }
        Backend::Local => Ok(Backends {
            objects: Arc::new(LocalObjectStorage::new(&config.local_images_dir)),
            jobs: Arc::new(FileJobStore::new(&config.local_jobs_dir)),
            patterns: Arc::new(LocalPatternIndex::open(&config.local_patterns_file).await?),
        }),
    }
}

/// Cosine similarity used by the local pattern index
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magazine_common::ErrorKind;

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.s3.bucket, "magazine-images");
        assert_eq!(config.qdrant.collection, "layout_patterns");
        assert_eq!(config.postgres.database, "magazine");
    }

    #[test]
    fn test_error_mapping() {
        let e = StorageError::PostgresError("connection refused".to_string());
        assert_eq!(e.into_persistence().kind(), ErrorKind::Persistence);

        let e = StorageError::NotFound("a.jpg".to_string());
        let mapped = e.into_upstream("object-storage");
        assert_eq!(mapped.kind(), ErrorKind::Upstream);
        assert!(!mapped.is_fatal());
    }

    #[test]
    fn test_backend_yaml_names() {
        let config: StorageConfig = serde_json::from_str(r#"{"backend":"remote"}"#).unwrap();
        assert_eq!(config.backend, Backend::Remote);
        assert_eq!(config.local_images_dir, "./images");
    }

    #[tokio::test]
    async fn test_connect_local_backends() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            local_images_dir: dir.path().join("images").to_string_lossy().into_owned(),
            local_jobs_dir: dir.path().join("jobs").to_string_lossy().into_owned(),
            local_patterns_file: dir.path().join("patterns.json").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let backends = connect(&config).await.unwrap();
        backends.objects.store("a/b.jpg", b"jpeg").await.unwrap();
        assert!(backends.objects.exists("a/b.jpg").await.unwrap());
        assert!(backends.patterns.query(&[1.0; 8], 5).await.unwrap().is_empty());
        assert!(matches!(backends.jobs.get("nope").await, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
