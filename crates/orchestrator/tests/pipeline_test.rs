//! Full pipeline runs against local stores and deterministic collaborators

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat};
use magazine_common::{
    ErrorKind, ImageSetRef, Job, JobStatus, PipelineError, QaMap, Section, SectionKind, WarningKind,
};
use magazine_content::{ContentConfig, ContentCreationStage};
use magazine_embeddings::{EmbeddingError, EmbeddingService};
use magazine_fusion::{FusionConfig, FusionStage};
use magazine_image_analysis::{AnalysisConfig, ImageAnalysisStage};
use magazine_layout::{LayoutConfig, LayoutStage};
use magazine_llm::{LlmError, PromptTemplate, RetryPolicy, TextTransform};
use magazine_orchestrator::{cancel_stored, CoordinatorConfig, PipelineCoordinator, Stages};
use magazine_storage::{
    InMemoryJobStore, JobStore, LocalObjectStorage, LocalPatternIndex, ObjectStorage, StorageError, StorageResult,
};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

const INTERVIEW: &str = "Q: What did you see?\nA: Mountains at dawn, pink and then gold.";
const ESSAY: &str = "## Dawn\nI woke before the light and watched the ridge change colour.\n\n\
                     The air was thin and very still.";

/// Fixed framings, optionally held at a gate until the test opens it
struct ScriptedTransform {
    interview: Option<String>,
    essay: Option<String>,
    calls: AtomicUsize,
    gate: Option<(Arc<Notify>, Arc<Semaphore>)>,
}

impl ScriptedTransform {
    fn new(interview: Option<&str>, essay: Option<&str>) -> Self {
        Self {
            interview: interview.map(str::to_string),
            essay: essay.map(str::to_string),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn working() -> Self {
        Self::new(Some(INTERVIEW), Some(ESSAY))
    }
}

#[async_trait]
impl TextTransform for ScriptedTransform {
    async fn transform(&self, template: PromptTemplate, _qa: &QaMap) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            let _permit = release.acquire().await;
        }
        let text = match template {
            PromptTemplate::Interview => &self.interview,
            PromptTemplate::Essay => &self.essay,
        };
        text.clone().ok_or(LlmError::Api {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

fn fnv(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x100000001b3)
    })
}

/// Pseudo-random unit vector in [-0.5, 0.5)^64, fixed per seed
fn pseudo_vector(seed: u64) -> Vec<f32> {
    let mut s = seed;
    let mut v: Vec<f32> = (0..64)
        .map(|_| {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((s >> 32) as u32) as f32 / u32::MAX as f32 - 0.5
        })
        .collect();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

/// Content-hashed vectors; identical inputs give identical vectors
struct HashEmbedder {
    fail_text: bool,
}

#[async_trait]
impl EmbeddingService for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.fail_text {
            return Err(EmbeddingError::Inference("text encoder offline".to_string()));
        }
        Ok(pseudo_vector(fnv(text.as_bytes())))
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        Ok(pseudo_vector(fnv(bytes)))
    }

    fn dimension(&self) -> usize {
        64
    }
}

/// In-memory store that records every checkpoint and can start failing
struct RecordingStore {
    inner: InMemoryJobStore,
    puts: Mutex<Vec<JobStatus>>,
    fail_after: Option<usize>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            puts: Mutex::new(Vec::new()),
            fail_after: None,
        }
    }

    fn statuses(&self) -> Vec<JobStatus> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn get(&self, job_id: &str) -> StorageResult<Job> {
        self.inner.get(job_id).await
    }

    async fn put(&self, job: &Job) -> StorageResult<()> {
        {
            let mut puts = self.puts.lock().unwrap();
            if self.fail_after.is_some_and(|n| puts.len() >= n) {
                return Err(StorageError::PostgresError("connection reset".to_string()));
            }
            puts.push(job.status);
        }
        self.inner.put(job).await
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> StorageResult<()> {
        self.inner.update_status(job_id, status).await
    }
}

enum Picture {
    Rising,
    Falling,
    Stripes,
    Peak,
}

/// 72x64 grey PNGs whose gradient hashes are far apart
fn png(picture: Picture) -> Vec<u8> {
    let img = GrayImage::from_fn(72, 64, |x, _| {
        let v = match picture {
            Picture::Rising => x * 255 / 71,
            Picture::Falling => 255 - x * 255 / 71,
            Picture::Stripes => {
                if (x / 8) % 2 == 0 {
                    0
                } else {
                    255
                }
            }
            Picture::Peak => {
                if x < 36 {
                    x * 7
                } else {
                    (71 - x) * 7
                }
            }
        };
        image::Luma([v as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

struct Harness {
    coordinator: PipelineCoordinator,
    transform: Arc<ScriptedTransform>,
    store: Arc<RecordingStore>,
    _dir: tempfile::TempDir,
}

async fn harness_with(transform: ScriptedTransform, embedder: HashEmbedder, store: RecordingStore) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let objects = Arc::new(LocalObjectStorage::new(dir.path()));
    for (key, bytes) in [
        ("trip/rise.png", png(Picture::Rising)),
        ("trip/fall.png", png(Picture::Falling)),
        ("trip/stripes.png", png(Picture::Stripes)),
        ("trip/peak.png", png(Picture::Peak)),
        ("trip/rise-copy.png", png(Picture::Rising)),
    ] {
        objects.store(key, &bytes).await.unwrap();
    }

    let transform = Arc::new(transform);
    let embeddings: Arc<dyn EmbeddingService> = Arc::new(embedder);
    let store = Arc::new(store);
    let retry = RetryPolicy {
        timeout: Duration::from_secs(5),
        max_retries: 1,
    };
    let stages = Stages {
        content: ContentCreationStage::new(transform.clone(), ContentConfig::default(), retry),
        analysis: ImageAnalysisStage::new(objects, embeddings.clone(), AnalysisConfig::default()),
        fusion: FusionStage::new(embeddings, FusionConfig::default()),
        layout: LayoutStage::new(Arc::new(LocalPatternIndex::default()), LayoutConfig::default()),
    };
    Harness {
        coordinator: PipelineCoordinator::new(stages, store.clone(), CoordinatorConfig::default()),
        transform,
        store,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(ScriptedTransform::working(), HashEmbedder { fail_text: false }, RecordingStore::new()).await
}

fn refs(keys: &[&str]) -> ImageSetRef {
    ImageSetRef::new(keys.iter().map(|k| k.to_string()).collect())
}

fn assert_no_duplicate_placement(sections: &[Section]) {
    let mut seen = HashSet::new();
    for id in sections.iter().flat_map(|s| &s.assigned_image_ids) {
        assert!(seen.insert(id.clone()), "{id} placed in two sections");
    }
}

#[tokio::test]
async fn test_single_pair_with_three_images_completes() {
    let h = harness().await;
    let job = h
        .coordinator
        .create_job(
            "Q: What did you see? A: Mountains at dawn.",
            refs(&["trip/rise.png", "trip/fall.png", "trip/stripes.png"]),
        )
        .await
        .unwrap();

    let result = h.coordinator.run(&job.id).await.unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert!(!result.sections.is_empty());
    assert_eq!(result.sections[0].kind, SectionKind::Interview);
    assert!(result.sections.iter().all(|s| s.template_id.is_some()));
    assert!(result.sections.iter().all(|s| s.assigned_image_ids.len() <= 4));
    let placed: usize = result.sections.iter().map(|s| s.assigned_image_ids.len()).sum();
    assert_eq!(placed, 3);
    assert_no_duplicate_placement(&result.sections);

    assert_eq!(
        h.store.statuses(),
        vec![
            JobStatus::Created,
            JobStatus::Phase1TextDone,
            JobStatus::Phase2Fused,
            JobStatus::Completed
        ]
    );
    assert_eq!(h.coordinator.status(&job.id).await.unwrap(), JobStatus::Completed);
}

#[tokio::test]
async fn test_empty_text_fails_with_input_error() {
    let h = harness().await;
    let job = h.coordinator.create_job("", ImageSetRef::default()).await.unwrap();

    let err = h.coordinator.run(&job.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Input(_)));

    let stored = h.store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.checkpoint.sections.is_empty());
    assert_eq!(stored.error.as_ref().map(|e| e.kind), Some(ErrorKind::Input));
    assert_eq!(h.transform.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_images_gives_text_only_sections() {
    let h = harness().await;
    let job = h
        .coordinator
        .create_job("Q: What did you see? A: Mountains at dawn.", ImageSetRef::default())
        .await
        .unwrap();

    let result = h.coordinator.run(&job.id).await.unwrap();
    assert!(result.sections.iter().all(|s| s.assigned_image_ids.is_empty()));
    assert!(result
        .sections
        .iter()
        .all(|s| s.template_id.as_deref() == Some("default-text-only")));
}

#[tokio::test]
async fn test_byte_identical_upload_is_removed() {
    let h = harness().await;
    let job = h
        .coordinator
        .create_job(
            "Q: What did you see? A: Mountains at dawn.",
            refs(&[
                "trip/rise.png",
                "trip/fall.png",
                "trip/stripes.png",
                "trip/peak.png",
                "trip/rise-copy.png",
            ]),
        )
        .await
        .unwrap();

    let result = h.coordinator.run(&job.id).await.unwrap();
    let stored = h.store.get(&job.id).await.unwrap();

    assert_eq!(stored.checkpoint.images.len(), 4);
    assert!(stored.checkpoint.images.iter().all(|i| i.source_url != "trip/rise-copy.png"));
    assert!(stored.checkpoint.images.iter().all(|i| i.cluster_id.is_some()));
    assert_no_duplicate_placement(&result.sections);
    assert!(result
        .sections
        .iter()
        .flat_map(|s| &s.assigned_image_ids)
        .all(|id| id != "image-4"));
}

#[tokio::test]
async fn test_image_analysis_failure_degrades_to_text_only() {
    let h = harness().await;
    let job = h
        .coordinator
        .create_job(
            "Q: What did you see? A: Mountains at dawn.",
            refs(&["missing/a.png", "missing/b.png"]),
        )
        .await
        .unwrap();

    let result = h.coordinator.run(&job.id).await.unwrap();
    let stored = h.store.get(&job.id).await.unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert!(stored.checkpoint.image_analysis_degraded);
    assert!(result.sections.iter().all(|s| s.assigned_image_ids.is_empty()));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.component == "coordinator" && w.kind == WarningKind::Degraded));
}

#[tokio::test]
async fn test_both_framings_failing_fails_the_job() {
    let h = harness_with(
        ScriptedTransform::new(None, None),
        HashEmbedder { fail_text: false },
        RecordingStore::new(),
    )
    .await;
    let job = h
        .coordinator
        .create_job("Q: What did you see? A: Mountains at dawn.", refs(&["trip/rise.png"]))
        .await
        .unwrap();

    let err = h.coordinator.run(&job.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Upstream { .. }));

    let stored = h.store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    let record = stored.error.unwrap();
    assert_eq!(record.phase.as_deref(), Some("phase1_content"));
    assert_eq!(record.kind, ErrorKind::Upstream);

    // Failed is terminal; running again reports the stored cause
    let again = h.coordinator.run(&job.id).await.unwrap_err();
    assert!(matches!(again, PipelineError::Upstream { .. }));
}

#[tokio::test]
async fn test_scoring_failure_falls_back_to_positional_allocation() {
    let h = harness_with(
        ScriptedTransform::working(),
        HashEmbedder { fail_text: true },
        RecordingStore::new(),
    )
    .await;
    let job = h
        .coordinator
        .create_job(
            "Q: What did you see? A: Mountains at dawn.",
            refs(&["trip/rise.png", "trip/fall.png"]),
        )
        .await
        .unwrap();

    let result = h.coordinator.run(&job.id).await.unwrap();
    let stored = h.store.get(&job.id).await.unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert!(stored.checkpoint.fusion_degraded);
    assert_eq!(result.sections[0].assigned_image_ids[0], "image-0");
    assert_no_duplicate_placement(&result.sections);
}

#[tokio::test]
async fn test_completed_job_is_not_run_again() {
    let h = harness().await;
    let job = h
        .coordinator
        .create_job("Q: What did you see? A: Mountains at dawn.", refs(&["trip/peak.png"]))
        .await
        .unwrap();

    let first = h.coordinator.run(&job.id).await.unwrap();
    let calls = h.transform.calls.load(Ordering::SeqCst);
    let second = h.coordinator.run(&job.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.transform.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_resume_skips_finished_phases() {
    let h = harness().await;
    let mut job = Job::new("Q: What did you see? A: Mountains at dawn.", ImageSetRef::default());
    job.checkpoint.sections = vec![Section::draft(
        0,
        SectionKind::Essay,
        "Dawn".to_string(),
        vec!["Mountains at dawn.".to_string()],
    )];
    assert!(job.transition(JobStatus::Phase1TextDone));
    h.store.put(&job).await.unwrap();

    let result = h.coordinator.run(&job.id).await.unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.sections.len(), 1);
    assert_eq!(result.sections[0].title, "Dawn");
    assert_eq!(h.transform.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_idle_and_finished_jobs() {
    let h = harness().await;
    let idle = h.coordinator.create_job("Q: Why? A: Because.", ImageSetRef::default()).await.unwrap();
    assert_eq!(h.coordinator.cancel(&idle.id).await.unwrap(), JobStatus::Failed);
    let stored = h.store.get(&idle.id).await.unwrap();
    assert_eq!(stored.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
    assert!(matches!(
        h.coordinator.run(&idle.id).await,
        Err(PipelineError::Cancelled(_))
    ));

    let done = h.coordinator.create_job("Q: Why? A: Because.", ImageSetRef::default()).await.unwrap();
    h.coordinator.run(&done.id).await.unwrap();
    assert_eq!(h.coordinator.cancel(&done.id).await.unwrap(), JobStatus::Completed);

    assert!(matches!(
        h.coordinator.cancel("no-such-job").await,
        Err(PipelineError::Input(_))
    ));
}

#[tokio::test]
async fn test_cancel_waits_for_phase_boundary() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Semaphore::new(0));
    let mut transform = ScriptedTransform::working();
    transform.gate = Some((entered.clone(), release.clone()));
    let h = harness_with(transform, HashEmbedder { fail_text: false }, RecordingStore::new()).await;

    let job = h
        .coordinator
        .create_job("Q: What did you see? A: Mountains at dawn.", ImageSetRef::default())
        .await
        .unwrap();
    let runner = {
        let coordinator = h.coordinator.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move { coordinator.run(&job_id).await })
    };

    entered.notified().await;
    // Mid-phase: the request is only recorded
    assert_eq!(h.coordinator.cancel(&job.id).await.unwrap(), JobStatus::Created);
    release.add_permits(2);

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled(_)));

    let stored = h.store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    // Phase 1 finished and was checkpointed before the job stopped
    assert!(!stored.checkpoint.sections.is_empty());
    assert_eq!(
        h.store.statuses(),
        vec![JobStatus::Created, JobStatus::Phase1TextDone, JobStatus::Failed]
    );
}

#[tokio::test]
async fn test_cancel_from_another_process_survives_running_phase() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Semaphore::new(0));
    let mut transform = ScriptedTransform::working();
    transform.gate = Some((entered.clone(), release.clone()));
    let h = harness_with(transform, HashEmbedder { fail_text: false }, RecordingStore::new()).await;

    let job = h
        .coordinator
        .create_job("Q: What did you see? A: Mountains at dawn.", ImageSetRef::default())
        .await
        .unwrap();
    let runner = {
        let coordinator = h.coordinator.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move { coordinator.run(&job_id).await })
    };

    entered.notified().await;
    // Written straight to the store, as the CLI does
    assert_eq!(cancel_stored(h.store.as_ref(), &job.id).await.unwrap(), JobStatus::Failed);
    release.add_permits(2);

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled(_)));

    let stored = h.store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
    assert_eq!(h.store.statuses(), vec![JobStatus::Created, JobStatus::Failed]);
}

#[tokio::test]
async fn test_job_store_failure_is_fatal() {
    let mut store = RecordingStore::new();
    store.fail_after = Some(1);
    let h = harness_with(ScriptedTransform::working(), HashEmbedder { fail_text: false }, store).await;

    let job = h
        .coordinator
        .create_job("Q: What did you see? A: Mountains at dawn.", ImageSetRef::default())
        .await
        .unwrap();
    let err = h.coordinator.run(&job.id).await.unwrap_err();

    assert!(matches!(err, PipelineError::Persistence(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_run_batch_keeps_input_order() {
    let h = harness().await;
    let a = h
        .coordinator
        .create_job("Q: What did you see? A: Mountains at dawn.", refs(&["trip/rise.png"]))
        .await
        .unwrap();
    let b = h.coordinator.create_job("   ", ImageSetRef::default()).await.unwrap();
    let c = h
        .coordinator
        .create_job("Q: Where next? A: The coast.", refs(&["trip/fall.png"]))
        .await
        .unwrap();

    let results = h
        .coordinator
        .run_batch(&[a.id.clone(), b.id.clone(), c.id.clone()])
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().job_id, a.id);
    assert!(matches!(results[1], Err(PipelineError::Input(_))));
    assert_eq!(results[2].as_ref().unwrap().job_id, c.id);
}
