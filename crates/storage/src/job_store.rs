//! Job documents in `PostgreSQL`, JSON files or memory
//!
//! The whole [`Job`] (status, checkpoint, warnings, error record) is stored as one
//! JSONB document, with the status mirrored into its own column for queries.

use crate::{StorageError, StorageResult};
use magazine_common::{Job, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls};

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database name
    pub database: String,

    /// Database user
    pub user: String,

    /// Database password
    #[serde(skip_serializing)]
    pub password: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            database: std::env::var("POSTGRES_DB").unwrap_or_else(|_| "magazine".to_string()),
            user: std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or_default(),
        }
    }
}

impl PostgresConfig {
    /// Build connection string
    #[must_use]
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }
}

/// Job store trait, used only at phase boundaries
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Load a job by id
    async fn get(&self, job_id: &str) -> StorageResult<Job>;

    /// Insert or replace the whole job document
    async fn put(&self, job: &Job) -> StorageResult<()>;

    /// Overwrite only the status of an existing job
    async fn update_status(&self, job_id: &str, status: JobStatus) -> StorageResult<()>;
}

/// `PostgreSQL` job store
pub struct PostgresJobStore {
    client: Client,
}

impl PostgresJobStore {
    /// Connect and make sure the jobs table exists
    ///
    /// # Errors
    /// Returns [`StorageError::PostgresError`] when the connection or schema setup fails.
    pub async fn new(config: PostgresConfig) -> StorageResult<Self> {
        let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls)
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        // Spawn connection in background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        let store = Self { client };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        self.client
            .batch_execute(
                r"
                CREATE TABLE IF NOT EXISTS magazine_jobs (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    document JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_magazine_jobs_status ON magazine_jobs(status);
                ",
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    async fn get(&self, job_id: &str) -> StorageResult<Job> {
        let row = self
            .client
            .query_one("SELECT document FROM magazine_jobs WHERE id = $1", &[&job_id])
            .await
            .map_err(|e| {
                if e.to_string().contains("no rows") {
                    StorageError::NotFound(job_id.to_string())
                } else {
                    StorageError::PostgresError(e.to_string())
                }
            })?;

        let document: serde_json::Value = row.get(0);
        serde_json::from_value(document).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    async fn put(&self, job: &Job) -> StorageResult<()> {
        let document =
            serde_json::to_value(job).map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.client
            .execute(
                r"
                INSERT INTO magazine_jobs (id, status, document, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    document = EXCLUDED.document,
                    updated_at = EXCLUDED.updated_at
                ",
                &[
                    &job.id,
                    &job.status.as_str(),
                    &document,
                    &job.created_at,
                    &job.updated_at,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(())
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> StorageResult<()> {
        let updated = self
            .client
            .execute(
                r"
                UPDATE magazine_jobs SET
                    status = $2,
                    document = jsonb_set(document, '{status}', to_jsonb($2::text)),
                    updated_at = now()
                WHERE id = $1
                ",
                &[&job_id, &status.as_str()],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        if updated == 0 {
            return Err(StorageError::NotFound(job_id.to_string()));
        }
        Ok(())
    }
}

/// In-process job store for local runs and tests
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: &str) -> StorageResult<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(job_id.to_string()))
    }

    async fn put(&self, job: &Job) -> StorageResult<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StorageError::NotFound(job_id.to_string()))?;
        job.status = status;
        job.updated_at = chrono::Utc::now();
        Ok(())
    }
}

/// One pretty-printed JSON document per job under a directory
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, job_id: &str) -> StorageResult<PathBuf> {
        if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(StorageError::InvalidConfig(format!("invalid job id: {job_id}")));
        }
        Ok(self.dir.join(format!("{job_id}.json")))
    }
}

#[async_trait::async_trait]
impl JobStore for FileJobStore {
    async fn get(&self, job_id: &str) -> StorageResult<Job> {
        let bytes = tokio::fs::read(self.path_for(job_id)?).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(job_id.to_string())
            } else {
                StorageError::IoError(e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    async fn put(&self, job: &Job) -> StorageResult<()> {
        let path = self.path_for(&job.id)?;
        let json =
            serde_json::to_vec_pretty(job).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        // Readers never see a partially written document
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> StorageResult<()> {
        let mut job = self.get(job_id).await?;
        job.status = status;
        job.updated_at = chrono::Utc::now();
        self.put(&job).await
    }
}
