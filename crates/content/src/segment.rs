//! Paragraph and sentence segmentation

use unicode_segmentation::UnicodeSegmentation;

/// Split on blank lines, trimming each paragraph and dropping empty ones
pub fn paragraphs(text: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(line.trim());
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

/// Unicode sentence boundaries (UAX #29), trimmed
pub fn sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Shorten to at most `max_chars`, cutting at a word boundary
pub fn headline(text: &str, max_chars: usize) -> String {
    let text = text.trim().trim_end_matches(['.', '!', '?', ':']);
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let mut out = String::new();
    for word in text.split_whitespace() {
        if char_len(&out) + char_len(word) + 1 > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        out = text.chars().take(max_chars).collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_join_wrapped_lines() {
        let text = "First line\ncontinues here.\n\n\nSecond paragraph.\n";
        assert_eq!(
            paragraphs(text),
            vec!["First line continues here.", "Second paragraph."]
        );
    }

    #[test]
    fn test_sentences() {
        let s = sentences("We left early. Was it cold? Very!");
        assert_eq!(s, vec!["We left early.", "Was it cold?", "Very!"]);
    }

    #[test]
    fn test_headline() {
        assert_eq!(headline("What did you see?", 60), "What did you see");
        assert_eq!(headline("one two three four", 9), "one two");
    }
}
