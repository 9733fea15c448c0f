//! Layout pattern index on Qdrant or a local JSON file
//!
//! Patterns are searched by their usage-context vector. The pipeline only reads;
//! `upsert` exists for seeding the index.

use crate::{cosine, StorageError, StorageResult};
use magazine_common::LayoutPattern;
use qdrant_client::{
    qdrant::{
        value::Kind, vectors_config::Config, CreateCollectionBuilder, Distance, PointStruct,
        SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParams, VectorsConfig,
    },
    Qdrant,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Payload field holding the serialized pattern
const PATTERN_FIELD: &str = "pattern";

/// Qdrant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// Qdrant URL (e.g., "<http://localhost:6334>")
    pub url: String,

    /// API key (optional, for cloud deployment)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Collection name
    pub collection: String,

    /// Dimension of the usage-context vectors
    pub vector_dim: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string()),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            collection: "layout_patterns".to_string(),
            vector_dim: 8,
        }
    }
}

/// Vector search over historical layout patterns
#[async_trait::async_trait]
pub trait PatternIndex: Send + Sync {
    /// Up to `top_k` patterns ranked by similarity to `vector`
    async fn query(&self, vector: &[f32], top_k: usize) -> StorageResult<Vec<LayoutPattern>>;

    /// Insert or replace patterns by template id, returning how many were written
    async fn upsert(&self, patterns: &[LayoutPattern]) -> StorageResult<usize>;
}

/// Qdrant pattern index
pub struct QdrantPatternIndex {
    client: Qdrant,
    collection: String,
    vector_dim: u64,
}

impl QdrantPatternIndex {
    /// Create a new Qdrant client
    ///
    /// # Errors
    /// Returns [`StorageError::QdrantError`] when the client cannot be built.
    pub async fn new(config: QdrantConfig) -> StorageResult<Self> {
        let mut builder = Qdrant::from_url(&config.url);
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection,
            vector_dim: config.vector_dim,
        })
    }

    /// Create the collection if it does not exist
    ///
    /// # Errors
    /// Returns [`StorageError::QdrantError`] on any Qdrant failure.
    pub async fn init_collection(&self) -> StorageResult<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        if collections.collections.iter().any(|c| c.name == self.collection) {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(VectorsConfig {
                    config: Some(Config::Params(VectorParams {
                        size: self.vector_dim,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    })),
                }),
            )
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        info!("Created Qdrant collection: {}", self.collection);
        Ok(())
    }

    /// Stable point id for a template id
    fn point_id(template_id: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        template_id.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait::async_trait]
impl PatternIndex for QdrantPatternIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> StorageResult<Vec<LayoutPattern>> {
        let search = SearchPointsBuilder::new(&self.collection, vector.to_vec(), top_k as u64)
            .with_payload(true);

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        let mut patterns = Vec::with_capacity(response.result.len());
        for point in response.result {
            let Some(Kind::StringValue(json)) = point
                .payload
                .get(PATTERN_FIELD)
                .and_then(|v| v.kind.clone())
            else {
                debug!("Skipping pattern point without payload");
                continue;
            };
            let pattern: LayoutPattern = serde_json::from_str(&json)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            patterns.push(pattern);
        }
        Ok(patterns)
    }

    async fn upsert(&self, patterns: &[LayoutPattern]) -> StorageResult<usize> {
        let mut points = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if pattern.usage_context.len() as u64 != self.vector_dim {
                return Err(StorageError::InvalidConfig(format!(
                    "pattern {} has a {}-dim context, index expects {}",
                    pattern.template_id,
                    pattern.usage_context.len(),
                    self.vector_dim
                )));
            }
            let json = serde_json::to_string(pattern)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;

            let mut payload: HashMap<String, Value> = HashMap::with_capacity(2);
            payload.insert("template_id".to_string(), pattern.template_id.clone().into());
            payload.insert(PATTERN_FIELD.to_string(), json.into());

            points.push(PointStruct::new(
                Self::point_id(&pattern.template_id),
                pattern.usage_context.clone(),
                payload,
            ));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await
            .map_err(|e| StorageError::QdrantError(e.to_string()))?;

        Ok(patterns.len())
    }
}

/// Pattern index kept in memory, optionally persisted to a JSON file
#[derive(Debug, Default)]
pub struct LocalPatternIndex {
    path: Option<PathBuf>,
    patterns: RwLock<Vec<LayoutPattern>>,
}

impl LocalPatternIndex {
    /// Index over a fixed set of patterns, not persisted
    pub fn from_patterns(patterns: Vec<LayoutPattern>) -> Self {
        Self {
            path: None,
            patterns: RwLock::new(patterns),
        }
    }

    /// Load from `path`; a missing file is an empty index
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let patterns = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            patterns: RwLock::new(patterns),
        })
    }

    pub async fn len(&self) -> usize {
        self.patterns.read().await.len()
    }
}

#[async_trait::async_trait]
impl PatternIndex for LocalPatternIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> StorageResult<Vec<LayoutPattern>> {
        let patterns = self.patterns.read().await;
        let mut scored: Vec<(f32, &LayoutPattern)> = patterns
            .iter()
            .map(|p| (cosine(vector, &p.usage_context), p))
            .collect();
        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(top_k).map(|(_, p)| p.clone()).collect())
    }

    async fn upsert(&self, new_patterns: &[LayoutPattern]) -> StorageResult<usize> {
        let mut patterns = self.patterns.write().await;
        for pattern in new_patterns {
            match patterns.iter_mut().find(|p| p.template_id == pattern.template_id) {
                Some(existing) => *existing = pattern.clone(),
                None => patterns.push(pattern.clone()),
            }
        }

        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(&*patterns)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, json).await?;
        }
        Ok(new_patterns.len())
    }
}
