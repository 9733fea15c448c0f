//! Historical layout exemplars

use crate::SectionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse text-length class used to match sections against templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthBucket {
    /// Under 400 characters
    Short,
    /// 400-999 characters
    Medium,
    /// 1000 characters and up
    Long,
}

impl LengthBucket {
    #[must_use]
    pub fn from_chars(chars: usize) -> Self {
        match chars {
            0..=399 => LengthBucket::Short,
            400..=999 => LengthBucket::Medium,
            _ => LengthBucket::Long,
        }
    }

    /// Position on the short..long scale, for distance computations
    #[must_use]
    pub fn ordinal(&self) -> usize {
        match self {
            LengthBucket::Short => 0,
            LengthBucket::Medium => 1,
            LengthBucket::Long => 2,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LengthBucket::Short => "short",
            LengthBucket::Medium => "medium",
            LengthBucket::Long => "long",
        }
    }
}

/// A template exemplar retrieved read-only from the pattern index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPattern {
    pub template_id: String,
    /// Style descriptor (e.g. "magazine-gallery", "text-column")
    pub style: String,
    /// Text length the template was designed for
    pub length_bucket: LengthBucket,
    /// Number of images the template holds
    pub image_count: usize,
    #[serde(default = "default_columns")]
    pub columns: u8,
    /// Section kind the exemplar was used with, if recorded
    #[serde(default)]
    pub section_kind: Option<SectionKind>,
    /// Vector describing the context the exemplar was used in
    #[serde(default)]
    pub usage_context: Vec<f32>,
    #[serde(default)]
    pub popularity: Option<u64>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

fn default_columns() -> u8 {
    1
}
