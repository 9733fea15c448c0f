//! Raw user text to question/answer pairs
//!
//! Recognition order:
//! 1. Explicit markers (`Q:` / `A:`, `Question:` / `Answer:`), anywhere a word starts
//! 2. Question sentences (ending in `?`) followed by answer sentences
//! 3. Otherwise the whole text is one unstructured block

use crate::segment::sentences;
use crate::ContentError;
use magazine_common::{QaMap, QaPair};

/// Question label used for text that precedes the first question
const PREAMBLE_QUESTION: &str = "Introduction";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Question,
    Answer,
}

const MARKERS: [(&str, Marker); 4] = [
    ("question:", Marker::Question),
    ("answer:", Marker::Answer),
    ("q:", Marker::Question),
    ("a:", Marker::Answer),
];

/// Parse raw text into a [`QaMap`].
///
/// # Errors
/// Returns [`ContentError::EmptyInput`] when the text is empty or whitespace.
pub fn parse_qa(raw: &str) -> Result<QaMap, ContentError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ContentError::EmptyInput);
    }

    if let Some(pairs) = parse_markers(text) {
        return Ok(QaMap::Pairs(pairs));
    }
    if let Some(pairs) = parse_question_sentences(text) {
        return Ok(QaMap::Pairs(pairs));
    }
    Ok(QaMap::Unstructured(text.to_string()))
}

/// Byte offset, marker kind and marker length of every marker in `text`
fn find_markers(text: &str) -> Vec<(usize, Marker, usize)> {
    let mut found = Vec::new();
    let mut prev: Option<char> = None;
    for (i, c) in text.char_indices() {
        if prev.map_or(true, char::is_whitespace) && c.is_alphabetic() {
            for (label, marker) in MARKERS {
                let matches = text
                    .get(i..i + label.len())
                    .is_some_and(|s| s.eq_ignore_ascii_case(label));
                if matches {
                    found.push((i, marker, label.len()));
                    break;
                }
            }
        }
        prev = Some(c);
    }
    found
}

fn parse_markers(text: &str) -> Option<Vec<QaPair>> {
    let markers = find_markers(text);
    if !markers.iter().any(|(_, m, _)| *m == Marker::Question) {
        return None;
    }

    let mut pairs = Vec::new();
    let preamble = text[..markers[0].0].trim();
    let mut pending_question: Option<String> = None;
    let mut orphan_answers = String::from(preamble);

    for (idx, &(start, marker, len)) in markers.iter().enumerate() {
        let end = markers.get(idx + 1).map_or(text.len(), |m| m.0);
        let content = text[start + len..end].trim().to_string();
        match marker {
            Marker::Question => {
                if let Some(question) = pending_question.take() {
                    pairs.push(QaPair {
                        question,
                        answer: String::new(),
                    });
                }
                pending_question = Some(content);
            }
            Marker::Answer => match pending_question.take() {
                Some(question) => pairs.push(QaPair {
                    question,
                    answer: content,
                }),
                None => match pairs.last_mut() {
                    Some(last) => {
                        last.answer.push(' ');
                        last.answer.push_str(&content);
                    }
                    None => {
                        if !orphan_answers.is_empty() {
                            orphan_answers.push(' ');
                        }
                        orphan_answers.push_str(&content);
                    }
                },
            },
        }
    }
    if let Some(question) = pending_question {
        pairs.push(QaPair {
            question,
            answer: String::new(),
        });
    }

    if !orphan_answers.is_empty() {
        pairs.insert(
            0,
            QaPair {
                question: PREAMBLE_QUESTION.to_string(),
                answer: orphan_answers,
            },
        );
    }

    pairs.retain(|p| !(p.question.is_empty() && p.answer.is_empty()));
    if pairs.iter().any(|p| !p.answer.is_empty()) {
        Some(pairs)
    } else {
        None
    }
}

fn parse_question_sentences(text: &str) -> Option<Vec<QaPair>> {
    let mut pairs: Vec<QaPair> = Vec::new();
    let mut preamble: Vec<String> = Vec::new();

    for sentence in sentences(text) {
        if sentence.ends_with('?') {
            pairs.push(QaPair {
                question: sentence,
                answer: String::new(),
            });
        } else if let Some(last) = pairs.last_mut() {
            if !last.answer.is_empty() {
                last.answer.push(' ');
            }
            last.answer.push_str(&sentence);
        } else {
            preamble.push(sentence);
        }
    }

    // Consecutive questions without answers fold into the next question
    let mut merged: Vec<QaPair> = Vec::with_capacity(pairs.len());
    let mut carry = String::new();
    for mut pair in pairs {
        if pair.answer.is_empty() {
            if !carry.is_empty() {
                carry.push(' ');
            }
            carry.push_str(&pair.question);
            continue;
        }
        if !carry.is_empty() {
            pair.question = format!("{} {}", std::mem::take(&mut carry), pair.question);
        }
        merged.push(pair);
    }

    if merged.is_empty() {
        return None;
    }
    if !preamble.is_empty() {
        merged.insert(
            0,
            QaPair {
                question: PREAMBLE_QUESTION.to_string(),
                answer: preamble.join(" "),
            },
        );
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(map: QaMap) -> Vec<QaPair> {
        match map {
            QaMap::Pairs(p) => p,
            QaMap::Unstructured(t) => panic!("expected pairs, got unstructured: {t}"),
        }
    }

    #[test]
    fn test_inline_markers() {
        let p = pairs(parse_qa("Q: What did you see? A: Mountains at dawn.").unwrap());
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].question, "What did you see?");
        assert_eq!(p[0].answer, "Mountains at dawn.");
    }

    #[test]
    fn test_multiline_markers_and_long_labels() {
        let raw = "Question: Where did you go?\nAnswer: Kyoto.\n\nQ: Best meal?\nA: Ramen\nat midnight.";
        let p = pairs(parse_qa(raw).unwrap());
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].answer, "Kyoto.");
        assert_eq!(p[1].question, "Best meal?");
        assert_eq!(p[1].answer, "Ramen\nat midnight.");
    }

    #[test]
    fn test_marker_preamble_kept() {
        let raw = "Some context first. Q: Why go? A: Curiosity.";
        let p = pairs(parse_qa(raw).unwrap());
        assert_eq!(p[0].question, "Introduction");
        assert_eq!(p[0].answer, "Some context first.");
        assert_eq!(p[1].question, "Why go?");
    }

    #[test]
    fn test_question_sentence_heuristic() {
        let raw = "Where did we start? In Lisbon. The trams were loud. What surprised you? The light.";
        let p = pairs(parse_qa(raw).unwrap());
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].question, "Where did we start?");
        assert_eq!(p[0].answer, "In Lisbon. The trams were loud.");
        assert_eq!(p[1].answer, "The light.");
    }

    #[test]
    fn test_unstructured_fallback() {
        let raw = "We walked along the river all afternoon.";
        assert_eq!(
            parse_qa(raw).unwrap(),
            QaMap::Unstructured("We walked along the river all afternoon.".to_string())
        );
    }

    #[test]
    fn test_questions_without_answers_are_unstructured() {
        let raw = "Why? How?";
        assert!(!parse_qa(raw).unwrap().is_structured());
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(parse_qa("   \n "), Err(ContentError::EmptyInput));
    }

    #[test]
    fn test_words_containing_marker_letters_are_not_markers() {
        // "Qa:" and "pizza:" must not be read as markers
        let raw = "Qatar trip notes: pizza: great. Q: Favourite stop? A: Doha.";
        let p = pairs(parse_qa(raw).unwrap());
        assert_eq!(p.last().map(|x| x.answer.as_str()), Some("Doha."));
    }
}
