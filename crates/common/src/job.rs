//! Job records and their checkpointed state

use crate::{ErrorRecord, ImageAsset, ImageSetRef, MagazinePlan, Section, Warning};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle.
///
/// `created -> phase1_text_done -> phase2_fused -> completed`, with `failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Phase1TextDone,
    Phase2Fused,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` follows the lifecycle
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Created, JobStatus::Phase1TextDone)
            | (JobStatus::Phase1TextDone, JobStatus::Phase2Fused)
            | (JobStatus::Phase2Fused, JobStatus::Completed) => true,
            (current, JobStatus::Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Phase1TextDone => "phase1_text_done",
            JobStatus::Phase2Fused => "phase2_fused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "phase1_text_done" => Ok(JobStatus::Phase1TextDone),
            "phase2_fused" => Ok(JobStatus::Phase2Fused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Stage outputs persisted at each phase boundary so a job can resume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub plan: Option<MagazinePlan>,
    pub sections: Vec<Section>,
    pub images: Vec<ImageAsset>,
    /// Image analysis failed; fusion runs text-only
    #[serde(default)]
    pub image_analysis_degraded: bool,
    /// Fusion fell back to round-robin allocation
    #[serde(default)]
    pub fusion_degraded: bool,
}

/// One magazine generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub raw_user_text: String,
    pub image_set_ref: ImageSetRef,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub checkpoint: JobCheckpoint,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub error: Option<ErrorRecord>,
}

impl Job {
    /// New job in `created` state with a random id
    #[must_use]
    pub fn new(raw_user_text: impl Into<String>, image_set_ref: ImageSetRef) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            raw_user_text: raw_user_text.into(),
            image_set_ref,
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
            checkpoint: JobCheckpoint::default(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Move to `next` and bump `updated_at`. Returns false if the move is illegal.
    #[must_use]
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    /// Mark the job failed with a structured cause
    pub fn fail(&mut self, record: ErrorRecord) {
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        self.error = Some(record);
    }
}

/// What a pipeline run hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub plan: MagazinePlan,
    pub sections: Vec<Section>,
    pub warnings: Vec<Warning>,
}

impl JobResult {
    #[must_use]
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            plan: job.checkpoint.plan.clone().unwrap_or_default(),
            sections: job.checkpoint.sections.clone(),
            warnings: job.warnings.clone(),
        }
    }
}
