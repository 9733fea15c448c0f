//! Pipeline error taxonomy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can terminate or degrade a magazine job
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// Empty or malformed user input. Always fatal.
    #[error("Invalid input: {0}")]
    Input(String),

    /// An external collaborator (text transform, embedding, vision, pattern index,
    /// object storage) failed. Stages recover from this locally.
    #[error("Upstream service '{service}' failed: {message}")]
    Upstream { service: String, message: String },

    /// Nothing left to allocate. Recorded as a warning, never fails a job.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Job store read or write failed. Always fatal.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The job was cancelled at a phase boundary
    #[error("Job {0} was cancelled")]
    Cancelled(String),
}

impl PipelineError {
    /// Build an upstream error for the named service
    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Upstream {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Error category used in persisted error records
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::Input,
            PipelineError::Upstream { .. } => ErrorKind::Upstream,
            PipelineError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            PipelineError::Persistence(_) => ErrorKind::Persistence,
            PipelineError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Whether this error ends the job instead of degrading it
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Input(_) | PipelineError::Persistence(_) | PipelineError::Cancelled(_)
        )
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Upstream,
    ResourceExhausted,
    Persistence,
    Cancelled,
}

/// Structured cause attached to a failed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// Phase that was running when the job failed (None before phase 1 started)
    pub phase: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Record an error raised during `phase`
    #[must_use]
    pub fn from_error(error: &PipelineError, phase: Option<&str>) -> Self {
        Self {
            kind: error.kind(),
            phase: phase.map(str::to_string),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Kind of degradation a stage reports instead of failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A collaborator failed and a documented fallback was used
    Degraded,
    /// Images ran out before every section was filled
    ResourceExhausted,
    /// An individual item was dropped (e.g. an undecodable image)
    Skipped,
}

/// Non-fatal marker returned alongside a degraded stage result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    /// Component that produced the warning (e.g. "content", "layout")
    pub component: String,
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn degraded(component: &str, message: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            kind: WarningKind::Degraded,
            message: message.into(),
        }
    }

    pub fn exhausted(component: &str, message: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            kind: WarningKind::ResourceExhausted,
            message: message.into(),
        }
    }

    pub fn skipped(component: &str, message: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            kind: WarningKind::Skipped,
            message: message.into(),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
