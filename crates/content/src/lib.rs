//! Content creation stage
//!
//! Raw user text goes through four steps:
//! 1. [`parse_qa`] normalizes it into question/answer pairs
//! 2. interview and essay framings are rendered concurrently by a [`TextTransform`]
//! 3. the planner decides section count and contents from both framings
//! 4. the refiner splits sections that exceed the length ceiling
//!
//! Losing one framing degrades the stage; losing both fails it.

mod framing;
mod parser;
mod planner;
mod refiner;
pub mod segment;

pub use framing::Framings;
pub use parser::parse_qa;

use magazine_common::{ImageAttributes, MagazinePlan, PipelineError, QaMap, Section, Warning};
use magazine_llm::{call_with_retry, LlmError, PromptTemplate, RetryPolicy, TextTransform};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const COMPONENT: &str = "content";

/// Content stage errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContentError {
    #[error("Raw user text is empty")]
    EmptyInput,

    #[error("Both framings failed (interview: {interview}; essay: {essay})")]
    AllFramingsFailed { interview: String, essay: String },
}

impl From<ContentError> for PipelineError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::EmptyInput => PipelineError::Input(e.to_string()),
            ContentError::AllFramingsFailed { .. } => PipelineError::upstream("text-transform", e),
        }
    }
}

/// Section planning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Sections longer than this many characters are split
    pub section_char_ceiling: usize,
    /// Images one section is expected to carry when sizing the plan
    pub target_images_per_section: usize,
    pub min_sections: usize,
    pub max_sections: usize,
    pub title_max_chars: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            section_char_ceiling: 1000,
            target_images_per_section: 3,
            min_sections: 3,
            max_sections: 10,
            title_max_chars: 60,
        }
    }
}

/// Result of the content stage
#[derive(Debug, Clone, PartialEq)]
pub struct ContentOutcome {
    pub plan: MagazinePlan,
    /// Ordered drafts, never empty
    pub sections: Vec<Section>,
    pub warnings: Vec<Warning>,
}

/// Rendered framings awaiting the planner, see [`ContentCreationStage::render`]
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedContent {
    pub qa: QaMap,
    pub framings: Framings,
    pub warnings: Vec<Warning>,
}

/// Turns raw user text into section drafts
#[derive(Clone)]
pub struct ContentCreationStage {
    transform: Arc<dyn TextTransform>,
    config: ContentConfig,
    retry: RetryPolicy,
}

impl ContentCreationStage {
    pub fn new(transform: Arc<dyn TextTransform>, config: ContentConfig, retry: RetryPolicy) -> Self {
        Self {
            transform,
            config,
            retry,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    /// Parse and render both framings, without planning.
    ///
    /// Split from [`Self::finish`] so the caller can run this alongside image
    /// analysis and feed the image summaries into planning.
    ///
    /// # Errors
    /// [`ContentError::EmptyInput`] for blank text, [`ContentError::AllFramingsFailed`]
    /// when neither framing could be rendered.
    pub async fn render(&self, raw: &str) -> Result<RenderedContent, ContentError> {
        let qa = parse_qa(raw)?;
        info!(
            "Parsed user text: structured={}, words={}",
            qa.is_structured(),
            qa.word_count()
        );
        let (framings, warnings) = self.render_framings(&qa).await?;
        Ok(RenderedContent {
            qa,
            framings,
            warnings,
        })
    }

    /// Run the interview and essay transforms concurrently and wait for both
    ///
    /// # Errors
    /// [`ContentError::AllFramingsFailed`] when neither produced usable text.
    pub async fn render_framings(&self, qa: &QaMap) -> Result<(Framings, Vec<Warning>), ContentError> {
        let (interview, essay) = tokio::join!(
            self.render_one(PromptTemplate::Interview, qa),
            self.render_one(PromptTemplate::Essay, qa),
        );

        let mut warnings = Vec::new();
        let mut framings = Framings::default();
        let mut failures = Vec::with_capacity(2);
        for (template, result) in [
            (PromptTemplate::Interview, interview),
            (PromptTemplate::Essay, essay),
        ] {
            match result {
                Ok(text) => match template {
                    PromptTemplate::Interview => framings.interview = Some(text),
                    PromptTemplate::Essay => framings.essay = Some(text),
                },
                Err(message) => {
                    warn!("{} framing failed: {}", template.id(), message);
                    failures.push(message);
                }
            }
        }

        match failures.len() {
            0 => {}
            1 => {
                let message = if framings.interview.is_none() {
                    format!("interview framing failed, continuing with essay only: {}", failures[0])
                } else {
                    format!("essay framing failed, continuing with interview only: {}", failures[0])
                };
                warnings.push(Warning::degraded(COMPONENT, message));
            }
            _ => {
                let essay = failures.pop().unwrap_or_default();
                let interview = failures.pop().unwrap_or_default();
                return Err(ContentError::AllFramingsFailed { interview, essay });
            }
        }
        Ok((framings, warnings))
    }

    /// One framing; output that yields no blocks counts as a failure
    async fn render_one(&self, template: PromptTemplate, qa: &QaMap) -> Result<String, String> {
        let operation = format!("{} transform", template.id());
        let text = call_with_retry(self.retry, &operation, || self.transform.transform(template, qa))
            .await
            .map_err(|e: LlmError| e.to_string())?;

        let blocks = match template {
            PromptTemplate::Interview => framing::interview_blocks(&text, self.config.title_max_chars),
            PromptTemplate::Essay => framing::essay_blocks(&text, self.config.title_max_chars),
        };
        if blocks.is_empty() {
            return Err("transform returned no usable text".to_string());
        }
        Ok(text)
    }

    /// Plan sections from rendered framings and image summaries, then refine them
    #[must_use]
    pub fn plan(&self, framings: &Framings, images: &[ImageAttributes]) -> (MagazinePlan, Vec<Section>) {
        let max_chars = self.config.title_max_chars;
        let interview = framings
            .interview
            .as_deref()
            .map(|t| framing::interview_blocks(t, max_chars))
            .unwrap_or_default();
        let essay = framings
            .essay
            .as_deref()
            .map(|t| framing::essay_blocks(t, max_chars))
            .unwrap_or_default();

        let plan = planner::magazine_plan(images);
        let sections = planner::plan_sections(interview, essay, images.len(), &self.config);
        (plan, self.refine(sections))
    }

    /// Split sections over the length ceiling
    #[must_use]
    pub fn refine(&self, sections: Vec<Section>) -> Vec<Section> {
        refiner::refine(sections, self.config.section_char_ceiling)
    }

    /// Finish a [`RenderedContent`] into section drafts.
    ///
    /// Falls back to one section holding the user's own text if the framings
    /// produced nothing plannable, so the outcome always has a section.
    #[must_use]
    pub fn finish(&self, rendered: RenderedContent, images: &[ImageAttributes]) -> ContentOutcome {
        let RenderedContent {
            qa,
            framings,
            mut warnings,
        } = rendered;
        let (plan, mut sections) = self.plan(&framings, images);

        if sections.is_empty() {
            warnings.push(Warning::degraded(
                COMPONENT,
                "framings produced no sections, using the original text",
            ));
            let body = segment::paragraphs(&qa.to_prompt_text());
            let title = body
                .first()
                .map(|p| segment::headline(p, self.config.title_max_chars))
                .unwrap_or_else(|| plan.title.clone());
            sections = self.refine(vec![Section::draft(0, magazine_common::SectionKind::Mixed, title, body)]);
        }

        info!(
            "Content stage produced {} sections ({} warnings)",
            sections.len(),
            warnings.len()
        );
        ContentOutcome {
            plan,
            sections,
            warnings,
        }
    }

    /// Full stage: parse, render both framings, plan and refine
    ///
    /// # Errors
    /// See [`Self::render`].
    pub async fn create(&self, raw: &str, images: &[ImageAttributes]) -> Result<ContentOutcome, ContentError> {
        let rendered = self.render(raw).await?;
        Ok(self.finish(rendered, images))
    }
}
