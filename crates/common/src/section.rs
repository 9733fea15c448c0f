//! Section drafts and their layout records

use serde::{Deserialize, Serialize};

/// Which rendering of the user's answers a section comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Interview,
    Essay,
    Mixed,
}

impl SectionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Interview => "interview",
            SectionKind::Essay => "essay",
            SectionKind::Mixed => "mixed",
        }
    }
}

/// Visual emphasis switches for a section layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmphasisFlags {
    /// First image spans the full width above the text
    pub hero_image: bool,
    /// A sentence is lifted out as a pull quote
    pub pull_quote: bool,
    /// First paragraph starts with a drop cap
    pub drop_cap: bool,
}

/// Structured layout decision attached to a finalized section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutStrategy {
    /// Number of text columns
    pub columns: u8,
    /// Fraction of the page area given to images (0.0-1.0)
    pub image_text_ratio: f32,
    pub emphasis: EmphasisFlags,
}

/// One content + layout unit of the final magazine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Position in the magazine, starting at 0
    pub index: usize,
    pub kind: SectionKind,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    /// First sentence of the body, used by planners and renderers
    #[serde(default)]
    pub summary: String,
    /// Body pre-split into paragraphs
    pub body: Vec<String>,
    /// Ordered, duplicate-free image ids (bounded by template capacity)
    #[serde(default)]
    pub assigned_image_ids: Vec<String>,
    /// Set once in the layout phase
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub layout_strategy: Option<LayoutStrategy>,
}

impl Section {
    /// Create a section draft with no images or template yet
    #[must_use]
    pub fn draft(index: usize, kind: SectionKind, title: String, body: Vec<String>) -> Self {
        let summary = body
            .first()
            .map(|p| first_sentence(p).to_string())
            .unwrap_or_default();
        Self {
            index,
            kind,
            title,
            subtitle: None,
            summary,
            body,
            assigned_image_ids: Vec::new(),
            template_id: None,
            layout_strategy: None,
        }
    }

    /// Body paragraphs joined with blank lines
    #[must_use]
    pub fn body_text(&self) -> String {
        self.body.join("\n\n")
    }

    /// Body length in characters (not bytes)
    #[must_use]
    pub fn char_len(&self) -> usize {
        let separators = self.body.len().saturating_sub(1) * 2;
        self.body.iter().map(|p| p.chars().count()).sum::<usize>() + separators
    }

    /// Title followed by at most `max_body_chars` characters of the body
    #[must_use]
    pub fn representative_text(&self, max_body_chars: usize) -> String {
        let body: String = self.body_text().chars().take(max_body_chars).collect();
        if body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, body)
        }
    }
}

fn first_sentence(paragraph: &str) -> &str {
    let end = paragraph
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map_or(paragraph.len(), |(i, c)| i + c.len_utf8());
    paragraph[..end].trim()
}

/// Magazine-level header produced by the structure planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagazinePlan {
    pub title: String,
    pub subtitle: String,
}

impl Default for MagazinePlan {
    fn default() -> Self {
        Self {
            title: "Travel Notes".to_string(),
            subtitle: "Moments worth keeping".to_string(),
        }
    }
}
