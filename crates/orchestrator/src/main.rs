//! Magazine pipeline CLI
//!
//! Creates, runs and inspects magazine jobs against the configured stores.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use magazine_common::{ImageSetRef, LayoutPattern};
use magazine_content::ContentCreationStage;
use magazine_embeddings::{ClipEmbeddingService, EmbeddingService};
use magazine_fusion::FusionStage;
use magazine_image_analysis::ImageAnalysisStage;
use magazine_layout::{BucketSignature, LayoutStage};
use magazine_llm::OpenAIClient;
use magazine_orchestrator::{cancel_stored, load_job, PipelineConfig, PipelineCoordinator, Stages};
use magazine_storage::Backends;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "magazine",
    version,
    about = "Turn travel notes and photos into a laid-out magazine",
    after_help = "EXAMPLES:\n  \
                  magazine create --text notes.txt --image trip/1.jpg --image trip/2.jpg\n  \
                  magazine run 4f0c...\n  \
                  magazine status 4f0c...\n  \
                  magazine seed-patterns patterns.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job from a text file and image keys, printing its id
    Create {
        /// File holding the user's raw text
        #[arg(short, long)]
        text: PathBuf,

        /// Object storage key of an image (repeatable)
        #[arg(short, long = "image")]
        images: Vec<String>,
    },

    /// Run one or more jobs and print their results as JSON
    Run {
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Print a job's current status
    Status { job_id: String },

    /// Cancel a job that has not finished
    Cancel { job_id: String },

    /// Load layout exemplars from a JSON array into the pattern index
    SeedPatterns { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let backends = magazine_storage::connect(&config.storage)
        .await
        .context("Failed to open storage backends")?;

    match cli.command {
        Commands::Create { text, images } => {
            let raw = tokio::fs::read_to_string(&text)
                .await
                .with_context(|| format!("Failed to read {}", text.display()))?;
            let coordinator = build_coordinator(&config, &backends)?;
            let job = coordinator.create_job(raw, ImageSetRef::new(images)).await?;
            println!("{}", job.id);
        }
        Commands::Run { job_ids } => {
            let coordinator = build_coordinator(&config, &backends)?;
            let mut failed = 0usize;
            for (job_id, result) in job_ids.iter().zip(coordinator.run_batch(&job_ids).await) {
                match result {
                    Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{job_id}: {e}");
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} jobs failed", job_ids.len());
            }
        }
        Commands::Status { job_id } => {
            let job = load_job(backends.jobs.as_ref(), &job_id).await?;
            println!("{}", job.status.as_str());
            if let Some(error) = &job.error {
                println!("error: {}", error.message);
            }
        }
        Commands::Cancel { job_id } => {
            let status = cancel_stored(backends.jobs.as_ref(), &job_id).await?;
            println!("{}", status.as_str());
        }
        Commands::SeedPatterns { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut patterns: Vec<LayoutPattern> =
                serde_json::from_slice(&bytes).context("Pattern file must be a JSON array of patterns")?;
            for pattern in &mut patterns {
                if pattern.usage_context.is_empty() {
                    pattern.usage_context = BucketSignature::of_pattern(pattern).query_vector();
                }
            }
            let written = backends.patterns.upsert(&patterns).await?;
            tracing::info!("Seeded {} layout patterns", written);
        }
    }

    Ok(())
}

fn build_coordinator(config: &PipelineConfig, backends: &Backends) -> Result<PipelineCoordinator> {
    let llm = Arc::new(OpenAIClient::new(config.llm.clone()).context("Failed to create LLM client")?);
    let embeddings: Arc<dyn EmbeddingService> = Arc::new(ClipEmbeddingService::new(config.embeddings.clone()));
    let retry = config.llm.retry_policy();

    let stages = Stages {
        content: ContentCreationStage::new(llm.clone(), config.content.clone(), retry),
        analysis: ImageAnalysisStage::new(backends.objects.clone(), embeddings.clone(), config.analysis.clone())
            .with_describer(llm, retry),
        fusion: FusionStage::new(embeddings, config.fusion.clone()),
        layout: LayoutStage::new(backends.patterns.clone(), config.layout.clone()),
    };
    Ok(PipelineCoordinator::new(
        stages,
        backends.jobs.clone(),
        config.coordinator.clone(),
    ))
}
