//! Length refiner: splits sections that run past the character ceiling

use crate::segment::{char_len, sentences};
use magazine_common::Section;
use tracing::debug;

/// Split every section longer than `ceiling` characters and renumber the result.
///
/// Splits fall between paragraphs where possible, otherwise between sentences.
/// A single sentence longer than the ceiling is kept whole.
pub(crate) fn refine(sections: Vec<Section>, ceiling: usize) -> Vec<Section> {
    let mut refined = Vec::with_capacity(sections.len());
    for section in sections {
        if section.char_len() <= ceiling {
            refined.push(section);
            continue;
        }

        let chunks = pack(&units(&section.body, ceiling), ceiling);
        let total = chunks.len();
        debug!(
            "Splitting section '{}' ({} chars) into {} parts",
            section.title,
            section.char_len(),
            total
        );
        if total <= 1 {
            refined.push(section);
            continue;
        }
        for (k, body) in chunks.into_iter().enumerate() {
            let mut part = Section::draft(0, section.kind, section.title.clone(), body);
            part.subtitle = Some(format!("Part {} of {}", k + 1, total));
            refined.push(part);
        }
    }

    for (index, section) in refined.iter_mut().enumerate() {
        section.index = index;
    }
    refined
}

/// Paragraphs, with any paragraph over the ceiling broken into sentence runs
fn units(body: &[String], ceiling: usize) -> Vec<String> {
    let mut out = Vec::new();
    for paragraph in body {
        if char_len(paragraph) <= ceiling {
            out.push(paragraph.clone());
            continue;
        }
        let mut run = String::new();
        for sentence in sentences(paragraph) {
            if !run.is_empty() && char_len(&run) + 1 + char_len(&sentence) > ceiling {
                out.push(std::mem::take(&mut run));
            }
            if !run.is_empty() {
                run.push(' ');
            }
            run.push_str(&sentence);
        }
        if !run.is_empty() {
            out.push(run);
        }
    }
    out
}

/// Greedy packing of units into bodies; chunk length counts the blank-line joins
fn pack(units: &[String], ceiling: usize) -> Vec<Vec<String>> {
    let mut chunks: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;
    for unit in units {
        let len = char_len(unit);
        let joined = if current.is_empty() { len } else { current_len + 2 + len };
        if !current.is_empty() && joined > ceiling {
            chunks.push(std::mem::take(&mut current));
            current_len = len;
        } else {
            current_len = joined;
        }
        current.push(unit.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use magazine_common::SectionKind;

    fn section(body: &[&str]) -> Section {
        Section::draft(
            0,
            SectionKind::Essay,
            "Harbour".to_string(),
            body.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_short_sections_untouched() {
        let input = vec![section(&["Short."]), section(&["Also short."])];
        let out = refine(input, 100);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].index, 1);
        assert_eq!(out[0].subtitle, None);
    }

    #[test]
    fn test_split_at_paragraphs() {
        let p = "a".repeat(60);
        let out = refine(vec![section(&[&p, &p, &p])], 130);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].body.len(), 2);
        assert_eq!(out[1].body.len(), 1);
        assert_eq!(out[0].subtitle.as_deref(), Some("Part 1 of 2"));
        assert_eq!(out[1].title, "Harbour");
        assert!(out.iter().all(|s| s.char_len() <= 130));
    }

    #[test]
    fn test_long_paragraph_split_at_sentences() {
        let paragraph = "The boats came in at six. Gulls followed every one of them. \
                         We bought mackerel from a man in a yellow coat.";
        let out = refine(vec![section(&[paragraph])], 60);
        assert!(out.len() >= 2);
        for part in &out {
            for p in &part.body {
                assert!(p.ends_with('.'), "split mid-sentence: {p}");
            }
        }
        let rejoined: Vec<String> = out.iter().flat_map(|s| s.body.clone()).collect();
        assert_eq!(rejoined.join(" "), paragraph);
    }

    #[test]
    fn test_overlong_sentence_kept_whole() {
        let sentence = format!("{}.", "word ".repeat(40).trim_end());
        let out = refine(vec![section(&[&sentence])], 50);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body, vec![sentence]);
    }
}
