//! Pipeline configuration, loaded from YAML

use magazine_content::ContentConfig;
use magazine_embeddings::ClipConfig;
use magazine_fusion::FusionConfig;
use magazine_image_analysis::AnalysisConfig;
use magazine_layout::LayoutConfig;
use magazine_llm::LlmConfig;
use magazine_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Coordinator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Jobs run at once by `run_batch`
    pub batch_concurrency: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { batch_concurrency: 4 }
    }
}

/// Every section is optional in the file; missing ones take their defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub content: ContentConfig,
    pub analysis: AnalysisConfig,
    pub fusion: FusionConfig,
    pub layout: LayoutConfig,
    pub llm: LlmConfig,
    pub embeddings: ClipConfig,
    pub storage: StorageConfig,
    pub coordinator: CoordinatorConfig,
}

impl PipelineConfig {
    /// Parse YAML text
    ///
    /// # Errors
    /// Returns the YAML error for malformed input or unknown enum values.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Read and parse a YAML file
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        Self::from_yaml(&text).map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magazine_fusion::ImageReusePolicy;
    use magazine_storage::Backend;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = PipelineConfig::from_yaml("").unwrap();
        assert_eq!(config.coordinator.batch_concurrency, 4);
        assert_eq!(config.layout.top_k, 5);
        assert_eq!(config.fusion.max_images_per_section, 4);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r"
content:
  section_char_ceiling: 800
fusion:
  hamming_threshold: 4
  reuse_policy:
    mode: controlled_repeats
    max_placements: 2
storage:
  backend: remote
coordinator:
  batch_concurrency: 2
";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.content.section_char_ceiling, 800);
        assert_eq!(config.content.max_sections, 10);
        assert_eq!(config.fusion.hamming_threshold, 4);
        assert_eq!(
            config.fusion.reuse_policy,
            ImageReusePolicy::ControlledRepeats { max_placements: 2 }
        );
        assert_eq!(config.storage.backend, Backend::Remote);
        assert_eq!(config.coordinator.batch_concurrency, 2);
        assert_eq!(config.analysis.concurrency, 5);
    }

    #[test]
    fn test_unknown_backend_is_an_error() {
        assert!(PipelineConfig::from_yaml("storage:\n  backend: ftp\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
