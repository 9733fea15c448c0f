//! Turning transformed framings into plannable blocks

use crate::parser::parse_qa;
use crate::segment::{char_len, headline, paragraphs};
use magazine_common::{QaMap, SectionKind};

/// Output of the two concurrent text transforms. A `None` framing failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Framings {
    pub interview: Option<String>,
    pub essay: Option<String>,
}

/// Smallest unit the planner moves between sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub kind: SectionKind,
    /// Title candidate when a section starts with this block
    pub heading: Option<String>,
    pub paragraphs: Vec<String>,
}

impl Block {
    pub fn chars(&self) -> usize {
        self.paragraphs.iter().map(|p| char_len(p)).sum()
    }
}

/// One block per interview exchange; Q and A stay together
pub(crate) fn interview_blocks(text: &str, title_max_chars: usize) -> Vec<Block> {
    match parse_qa(text) {
        Ok(QaMap::Pairs(pairs)) => pairs
            .into_iter()
            .map(|pair| {
                let mut block_paragraphs = vec![format!("Q: {}", pair.question)];
                if !pair.answer.is_empty() {
                    block_paragraphs.push(format!("A: {}", pair.answer));
                }
                Block {
                    kind: SectionKind::Interview,
                    heading: Some(headline(&pair.question, title_max_chars)),
                    paragraphs: block_paragraphs,
                }
            })
            .collect(),
        Ok(QaMap::Unstructured(text)) => paragraphs(&text)
            .into_iter()
            .map(|p| Block {
                kind: SectionKind::Interview,
                heading: None,
                paragraphs: vec![p],
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// One block per essay paragraph; `#` heading lines title the next paragraph
pub(crate) fn essay_blocks(text: &str, title_max_chars: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut heading: Option<String> = None;
    let mut buffer = String::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            flush(&mut buffer, &mut heading, &mut blocks);
            let title = trimmed.trim_start_matches('#').trim();
            heading = (!title.is_empty()).then(|| headline(title, title_max_chars));
        } else {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }
    flush(&mut buffer, &mut heading, &mut blocks);
    blocks
}

fn flush(buffer: &mut String, heading: &mut Option<String>, blocks: &mut Vec<Block>) {
    for paragraph in paragraphs(buffer) {
        blocks.push(Block {
            kind: SectionKind::Essay,
            heading: heading.take(),
            paragraphs: vec![paragraph],
        });
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interview_blocks_keep_pairs_together() {
        let text = "Q: What did you see?\nA: Mountains at dawn.\n\nQ: And then?\nA: Breakfast.";
        let blocks = interview_blocks(text, 60);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].heading.as_deref(), Some("What did you see"));
        assert_eq!(
            blocks[0].paragraphs,
            vec!["Q: What did you see?", "A: Mountains at dawn."]
        );
    }

    #[test]
    fn test_essay_blocks_attach_heading_to_first_paragraph() {
        let text = "## Arrival\nWe landed late.\n\nThe city was asleep.\n\n## Morning\nCoffee first.";
        let blocks = essay_blocks(text, 60);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].heading.as_deref(), Some("Arrival"));
        assert_eq!(blocks[1].heading, None);
        assert_eq!(blocks[2].heading.as_deref(), Some("Morning"));
        assert_eq!(blocks[2].paragraphs, vec!["Coffee first."]);
    }

    #[test]
    fn test_essay_without_headings() {
        let blocks = essay_blocks("One.\n\nTwo.", 60);
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.heading.is_none()));
    }
}
