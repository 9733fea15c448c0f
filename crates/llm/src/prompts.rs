//! Prompt templates for the two content framings and image descriptions

use magazine_common::QaMap;
use serde::{Deserialize, Serialize};

/// Named prompt template for a text transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTemplate {
    /// Candid Q&A interview
    Interview,
    /// Reflective first-person essay
    Essay,
}

impl PromptTemplate {
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            PromptTemplate::Interview => "interview",
            PromptTemplate::Essay => "essay",
        }
    }

    /// System message establishing the editor persona
    #[must_use]
    pub fn system_prompt(&self) -> &'static str {
        match self {
            PromptTemplate::Interview => {
                "You are a travel interview editor. You refine a traveller's answers into a \
                 natural, candid magazine interview while keeping every fact they gave."
            }
            PromptTemplate::Essay => {
                "You are a travel essayist. You turn a traveller's answers into a warm, \
                 reflective first-person magazine essay while keeping every fact they gave."
            }
        }
    }

    /// User message carrying the QA content and output contract
    #[must_use]
    pub fn render(&self, qa: &QaMap) -> String {
        let content = qa.to_prompt_text();
        match self {
            PromptTemplate::Interview => format!(
                "Refine the following material into an interview.\n\n\
                 Material:\n{content}\n\n\
                 Guidelines:\n\
                 - Keep the tone soft, plain and conversational\n\
                 - Split sentences that run too long but keep the emotional flow\n\
                 - Tidy repeated or vague wording\n\
                 - Keep each answer focused on its question\n\n\
                 Output format: one block per topic, separated by a blank line, each block written as\n\
                 Q: <question>\n\
                 A: <refined answer>"
            ),
            PromptTemplate::Essay => format!(
                "Write a magazine essay from the following material.\n\n\
                 Material:\n{content}\n\n\
                 Guidelines:\n\
                 - First person, past tense, vivid sensory detail\n\
                 - One topic per part, in the order the material gives them\n\
                 - Paragraphs separated by a blank line\n\n\
                 Output format: each part starts with a heading line '## <title>' followed by its paragraphs."
            ),
        }
    }
}

/// Prompt for the vision model; answers are parsed line by line
pub const IMAGE_DESCRIPTION_PROMPT: &str = "Look at this travel photograph and answer in exactly \
four lines:\n\
Country: <country or Unknown>\n\
City: <city or Unknown>\n\
Location: <landmark or specific place or Unknown>\n\
Description: <one sentence describing the scene>";
