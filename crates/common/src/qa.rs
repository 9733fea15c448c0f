//! Normalized question/answer content

use serde::{Deserialize, Serialize};

/// A question and the user's answer to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// The user's raw text after parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "content")]
pub enum QaMap {
    /// Question/answer pairs in input order
    Pairs(Vec<QaPair>),
    /// No pairs could be recognised; the whole text as one block
    Unstructured(String),
}

impl QaMap {
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, QaMap::Pairs(_))
    }

    #[must_use]
    pub fn word_count(&self) -> usize {
        match self {
            QaMap::Pairs(pairs) => pairs
                .iter()
                .map(|p| p.question.split_whitespace().count() + p.answer.split_whitespace().count())
                .sum(),
            QaMap::Unstructured(text) => text.split_whitespace().count(),
        }
    }

    /// Plain-text rendering handed to text-transform prompts
    #[must_use]
    pub fn to_prompt_text(&self) -> String {
        match self {
            QaMap::Pairs(pairs) => pairs
                .iter()
                .map(|p| format!("Q: {}\nA: {}", p.question, p.answer))
                .collect::<Vec<_>>()
                .join("\n\n"),
            QaMap::Unstructured(text) => text.clone(),
        }
    }
}
