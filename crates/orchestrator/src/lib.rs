//! Pipeline coordinator
//!
//! Drives one magazine job through a fixed phase sequence:
//!
//! ```text
//! created --(content + image analysis, concurrently)--> phase1_text_done
//!         --(dedup, clustering, affinity, allocation)--> phase2_fused
//!         --(pattern retrieval, template selection)----> completed
//! ```
//!
//! The job document is written to the job store after every transition, so a
//! job picked up again resumes after its last completed phase. Any phase may
//! move the job to `failed`; only content failures, bad input and job store
//! errors do so. Everything else degrades to a documented fallback.

pub mod config;

pub use config::{CoordinatorConfig, PipelineConfig};

use magazine_common::{
    ErrorKind, ErrorRecord, ImageAttributes, ImageSetRef, Job, JobResult, JobStatus, PipelineError, Warning,
};
use magazine_content::ContentCreationStage;
use magazine_fusion::FusionStage;
use magazine_image_analysis::ImageAnalysisStage;
use magazine_layout::LayoutStage;
use magazine_storage::{JobStore, StorageError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info, warn};

const COMPONENT: &str = "coordinator";

/// The stages a coordinator drives
#[derive(Clone)]
pub struct Stages {
    pub content: ContentCreationStage,
    pub analysis: ImageAnalysisStage,
    pub fusion: FusionStage,
    pub layout: LayoutStage,
}

/// Phase names recorded in error records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Content,
    Fusion,
    Layout,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Content => "phase1_content",
            Phase::Fusion => "phase2_fusion",
            Phase::Layout => "phase3_layout",
        }
    }
}

#[derive(Clone)]
pub struct PipelineCoordinator {
    stages: Stages,
    jobs: Arc<dyn JobStore>,
    config: CoordinatorConfig,
    running: Arc<RwLock<HashSet<String>>>,
    cancel_requests: Arc<RwLock<HashSet<String>>>,
}

impl PipelineCoordinator {
    pub fn new(stages: Stages, jobs: Arc<dyn JobStore>, config: CoordinatorConfig) -> Self {
        Self {
            stages,
            jobs,
            config,
            running: Arc::new(RwLock::new(HashSet::new())),
            cancel_requests: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Create and persist a job in `created` state. Input is validated by `run`.
    ///
    /// # Errors
    /// Returns [`PipelineError::Persistence`] when the job cannot be stored.
    pub async fn create_job(&self, raw_text: impl Into<String>, images: ImageSetRef) -> Result<Job, PipelineError> {
        let job = Job::new(raw_text, images);
        self.persist(&job).await?;
        info!("Created job {} with {} images", job.id, job.image_set_ref.len());
        Ok(job)
    }

    /// Current persisted status
    ///
    /// # Errors
    /// [`PipelineError::Input`] for unknown ids, [`PipelineError::Persistence`] otherwise.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, PipelineError> {
        Ok(self.load(job_id).await?.status)
    }

    /// Cancel a job.
    ///
    /// A running job stops at its next phase boundary. A job that is not
    /// running and not finished is failed right away. Returns the status after
    /// the request.
    ///
    /// # Errors
    /// Propagates job store failures.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus, PipelineError> {
        if self.running.read().await.contains(job_id) {
            self.cancel_requests.write().await.insert(job_id.to_string());
            info!("Cancellation of job {} requested, honoured at next phase boundary", job_id);
            return self.status(job_id).await;
        }
        cancel_stored(self.jobs.as_ref(), job_id).await
    }

    /// Run a job to completion, resuming after its last checkpoint.
    ///
    /// A completed job returns its stored result without running anything.
    ///
    /// # Errors
    /// The error that failed the job, or the stored error of an already failed job.
    pub async fn run(&self, job_id: &str) -> Result<JobResult, PipelineError> {
        if !self.running.write().await.insert(job_id.to_string()) {
            return Err(PipelineError::Input(format!("job {job_id} is already running")));
        }
        let result = self.drive(job_id).await;
        self.running.write().await.remove(job_id);
        self.cancel_requests.write().await.remove(job_id);
        result
    }

    /// Run several jobs concurrently, each as an independent task.
    ///
    /// Results are returned in input order.
    pub async fn run_batch(&self, job_ids: &[String]) -> Vec<Result<JobResult, PipelineError>> {
        info!(
            "Running batch of {} jobs (concurrency {})",
            job_ids.len(),
            self.config.batch_concurrency
        );
        let semaphore = Arc::new(Semaphore::new(self.config.batch_concurrency.max(1)));
        let handles: Vec<_> = job_ids
            .iter()
            .map(|job_id| {
                let coordinator = self.clone();
                let semaphore = semaphore.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| PipelineError::upstream(COMPONENT, e))?;
                    coordinator.run(&job_id).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::upstream(COMPONENT, format!("job task failed: {e}"))),
            });
        }
        results
    }

    async fn drive(&self, job_id: &str) -> Result<JobResult, PipelineError> {
        let mut job = self.load(job_id).await?;
        match job.status {
            JobStatus::Completed => {
                info!("Job {} already completed", job_id);
                return Ok(JobResult::from_job(&job));
            }
            JobStatus::Failed => return Err(stored_error(&job)),
            JobStatus::Created => {
                if job.raw_user_text.trim().is_empty() {
                    let err = PipelineError::Input("raw text is empty".to_string());
                    return self.fail(job, err, None).await;
                }
            }
            status => info!("Resuming job {} from {}", job_id, status.as_str()),
        }

        while !job.status.is_terminal() {
            if self.cancel_requests.read().await.contains(job_id) {
                let err = PipelineError::Cancelled(job_id.to_string());
                return self.fail(job, err, None).await;
            }
            if self.failed_elsewhere(job_id).await? {
                return Err(PipelineError::Cancelled(job_id.to_string()));
            }

            let (phase, next) = match job.status {
                JobStatus::Created => (Phase::Content, JobStatus::Phase1TextDone),
                JobStatus::Phase1TextDone => (Phase::Fusion, JobStatus::Phase2Fused),
                _ => (Phase::Layout, JobStatus::Completed),
            };
            let outcome = match phase {
                Phase::Content => self.phase1(&mut job).await,
                Phase::Fusion => {
                    self.phase2(&mut job).await;
                    Ok(())
                }
                Phase::Layout => {
                    self.phase3(&mut job).await;
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                return self.fail(job, err, Some(phase)).await;
            }

            // Honour a cancel stored while the phase ran instead of writing over it
            if self.failed_elsewhere(job_id).await? {
                return Err(PipelineError::Cancelled(job_id.to_string()));
            }
            if !job.transition(next) {
                let err = PipelineError::Input(format!(
                    "job {} cannot move from {} to {}",
                    job.id,
                    job.status.as_str(),
                    next.as_str()
                ));
                return self.fail(job, err, Some(phase)).await;
            }
            self.persist(&job).await?;
            info!("Job {} reached {}", job.id, job.status.as_str());
        }

        info!(
            "Job {} completed: {} sections, {} warnings",
            job.id,
            job.checkpoint.sections.len(),
            job.warnings.len()
        );
        Ok(JobResult::from_job(&job))
    }

    /// Content and image analysis, joined before planning
    async fn phase1(&self, job: &mut Job) -> Result<(), PipelineError> {
        let (rendered, analysis) = tokio::join!(
            self.stages.content.render(&job.raw_user_text),
            self.stages.analysis.analyze(&job.image_set_ref)
        );
        // No text means no magazine, whatever the cause
        let rendered = rendered.map_err(PipelineError::from)?;

        let images = match analysis {
            Ok(outcome) => {
                job.warnings.extend(outcome.warnings);
                outcome.assets
            }
            Err(e) => {
                warn!("Image analysis failed for job {}, continuing text-only: {}", job.id, e);
                job.checkpoint.image_analysis_degraded = true;
                job.warnings.push(Warning::degraded(
                    COMPONENT,
                    format!("image analysis failed, magazine is text-only: {e}"),
                ));
                Vec::new()
            }
        };

        let attributes: Vec<ImageAttributes> = images.iter().map(|i| i.attributes.clone()).collect();
        let content = self.stages.content.finish(rendered, &attributes);
        job.warnings.extend(content.warnings);
        job.checkpoint.plan = Some(content.plan);
        job.checkpoint.sections = content.sections;
        job.checkpoint.images = images;
        Ok(())
    }

    /// Fusion, falling back to round-robin placement
    async fn phase2(&self, job: &mut Job) {
        let sections = std::mem::take(&mut job.checkpoint.sections);
        let images = std::mem::take(&mut job.checkpoint.images);

        match self.stages.fusion.fuse(sections.clone(), images.clone()).await {
            Ok(outcome) => {
                job.warnings.extend(outcome.warnings);
                job.checkpoint.fusion_degraded = outcome.degraded;
                job.checkpoint.sections = outcome.sections;
                job.checkpoint.images = outcome.images;
            }
            Err(e) => {
                warn!("Fusion failed for job {}, placing images by position: {}", job.id, e);
                let allocator = self.stages.fusion.allocator();
                let pool = allocator.deduplicate(images).kept;
                let allocation = allocator.allocate_round_robin(sections.len(), &pool);
                job.warnings.push(Warning::degraded(
                    COMPONENT,
                    format!("fusion failed, images placed by position: {e}"),
                ));
                job.warnings.extend(allocation.warnings);
                job.checkpoint.fusion_degraded = true;
                job.checkpoint.sections = sections
                    .into_iter()
                    .zip(allocation.assignments)
                    .map(|(mut section, ids)| {
                        section.assigned_image_ids = ids;
                        section
                    })
                    .collect();
                job.checkpoint.images = pool;
            }
        }
    }

    /// Template selection; retrieval problems fall back inside the stage
    async fn phase3(&self, job: &mut Job) {
        let sections = std::mem::take(&mut job.checkpoint.sections);
        let outcome = self.stages.layout.assign(sections).await;
        job.warnings.extend(outcome.warnings);
        job.checkpoint.sections = outcome.sections;
    }

    /// Whether the stored job was failed by someone else, e.g. `cancel_stored` in another process
    async fn failed_elsewhere(&self, job_id: &str) -> Result<bool, PipelineError> {
        let failed = self.load(job_id).await?.status == JobStatus::Failed;
        if failed {
            info!("Job {} was failed elsewhere, stopping", job_id);
        }
        Ok(failed)
    }

    async fn fail(&self, mut job: Job, err: PipelineError, phase: Option<Phase>) -> Result<JobResult, PipelineError> {
        error!("Job {} failed: {}", job.id, err);
        job.fail(ErrorRecord::from_error(&err, phase.map(Phase::name)));
        if !matches!(err, PipelineError::Persistence(_)) {
            self.persist(&job).await?;
        }
        Err(err)
    }

    async fn load(&self, job_id: &str) -> Result<Job, PipelineError> {
        load_job(self.jobs.as_ref(), job_id).await
    }

    async fn persist(&self, job: &Job) -> Result<(), PipelineError> {
        self.jobs.put(job).await.map_err(StorageError::into_persistence)
    }
}

/// Load a job, mapping a missing id to an input error
///
/// # Errors
/// [`PipelineError::Input`] for unknown ids, [`PipelineError::Persistence`] for store failures.
pub async fn load_job(jobs: &dyn JobStore, job_id: &str) -> Result<Job, PipelineError> {
    jobs.get(job_id).await.map_err(|e| match e {
        StorageError::NotFound(_) => PipelineError::Input(format!("unknown job: {job_id}")),
        other => other.into_persistence(),
    })
}

/// Fail a job that is not running in this process.
///
/// Terminal jobs are left alone. Returns the resulting status.
///
/// # Errors
/// [`PipelineError::Input`] for unknown ids, [`PipelineError::Persistence`] for store failures.
pub async fn cancel_stored(jobs: &dyn JobStore, job_id: &str) -> Result<JobStatus, PipelineError> {
    let mut job = load_job(jobs, job_id).await?;
    if job.status.is_terminal() {
        return Ok(job.status);
    }
    job.fail(ErrorRecord::from_error(&PipelineError::Cancelled(job_id.to_string()), None));
    jobs.put(&job).await.map_err(StorageError::into_persistence)?;
    info!("Job {} cancelled", job_id);
    Ok(job.status)
}

/// Rebuild the error of a job that failed earlier
fn stored_error(job: &Job) -> PipelineError {
    let Some(record) = &job.error else {
        return PipelineError::Input(format!("job {} failed without a recorded cause", job.id));
    };
    let message = record.message.clone();
    match record.kind {
        ErrorKind::Input => PipelineError::Input(message),
        ErrorKind::Upstream => {
            PipelineError::upstream(record.phase.as_deref().unwrap_or(COMPONENT), message)
        }
        ErrorKind::ResourceExhausted => PipelineError::ResourceExhausted(message),
        ErrorKind::Persistence => PipelineError::Persistence(message),
        ErrorKind::Cancelled => PipelineError::Cancelled(job.id.clone()),
    }
}
