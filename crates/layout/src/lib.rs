//! Layout phase: pattern retrieval and template selection
//!
//! Every finalized section is described by a [`BucketSignature`] (length
//! bucket, image count, section kind). The signature is turned into a query
//! vector for the pattern index, the top candidates are ranked by
//! [`TemplateSelector`] and the winner is written into the section.
//!
//! Retrieval failures never fail a job. The section gets the built-in template
//! for its image count and the job gets a warning.

pub mod retriever;
pub mod selector;

pub use retriever::{BucketSignature, LayoutRetriever, QUERY_DIM};
pub use selector::{default_template, TemplateChoice, TemplateSelector, TemplateSource};

use magazine_common::{PipelineError, Section, Warning};
use magazine_storage::PatternIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const COMPONENT: &str = "layout";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("Pattern retrieval failed: {0}")]
    Retrieval(String),
}

pub type Result<T> = std::result::Result<T, LayoutError>;

impl From<LayoutError> for PipelineError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::Retrieval(message) => PipelineError::upstream("pattern-index", message),
        }
    }
}

/// Layout phase configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Candidates fetched per signature
    pub top_k: usize,
    /// Bodies longer than this prefer text-led templates
    pub text_led_min_chars: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            text_led_min_chars: 500,
        }
    }
}

/// Sections with templates, plus fallback warnings
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOutcome {
    pub sections: Vec<Section>,
    pub choices: Vec<TemplateChoice>,
    pub warnings: Vec<Warning>,
}

impl LayoutOutcome {
    /// Sections that ended up on a built-in template
    #[must_use]
    pub fn defaulted(&self) -> usize {
        self.choices
            .iter()
            .filter(|c| c.source == TemplateSource::Default)
            .count()
    }
}

#[derive(Clone)]
pub struct LayoutStage {
    index: Arc<dyn PatternIndex>,
    selector: TemplateSelector,
    config: LayoutConfig,
}

impl LayoutStage {
    pub fn new(index: Arc<dyn PatternIndex>, config: LayoutConfig) -> Self {
        Self {
            index,
            selector: TemplateSelector::new(config.text_led_min_chars),
            config,
        }
    }

    /// Assign a template to every section of one job
    pub async fn assign(&self, mut sections: Vec<Section>) -> LayoutOutcome {
        info!("Selecting templates for {} sections", sections.len());
        let retriever = LayoutRetriever::new(self.index.clone(), self.config.top_k);
        let mut choices = Vec::with_capacity(sections.len());
        let mut warnings = Vec::new();

        for section in &mut sections {
            let candidates = match retriever.retrieve(section).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Section {}: {}, using default template", section.index, e);
                    warnings.push(Warning::degraded(
                        COMPONENT,
                        format!("section {}: {e}, default template used", section.index),
                    ));
                    Vec::new()
                }
            };
            let choice = self.selector.select(section, &candidates);
            choice.clone().apply_to(section);
            choices.push(choice);
        }

        let outcome = LayoutOutcome {
            sections,
            choices,
            warnings,
        };
        info!(
            "Templates selected: {} retrieved, {} default, {} distinct queries",
            outcome.choices.len() - outcome.defaulted(),
            outcome.defaulted(),
            retriever.memo_len().await
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(LayoutConfig::default().top_k, 5);
    }
}
