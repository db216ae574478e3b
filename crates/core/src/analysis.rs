//! Content analysis used to enrich document metadata at ingestion time
//! and to extract keywords for retrieval.

use crate::models::StructureSignals;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const ENGLISH_STOP_WORDS: [&str; 32] = [
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "has", "his", "how", "its", "this", "that", "with", "from", "they",
    "have", "what", "been", "were", "when", "which", "their",
];

const LANGUAGE_MARKERS: [(&str, &[&str]); 4] = [
    ("en", &["the", "and", "of", "to", "is", "that", "with"]),
    ("de", &["der", "die", "das", "und", "ist", "nicht", "mit"]),
    ("fr", &["le", "la", "les", "et", "est", "pas", "pour"]),
    ("es", &["el", "la", "los", "que", "es", "por", "para"]),
];

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic identity derived from (content, title, source).
pub fn derive_document_id(content: &str, title: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(title.as_bytes());
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stop-word frequency comparison over a small fixed language set.
/// Falls back to "en" when nothing matches.
pub fn detect_language(content: &str) -> String {
    let lowered = content.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().take(500).collect();
    if words.is_empty() {
        return "en".to_string();
    }

    let mut best = ("en", 0usize);
    for (code, markers) in LANGUAGE_MARKERS {
        let hits = words
            .iter()
            .filter(|word| markers.contains(&word.trim_matches(|c: char| !c.is_alphanumeric())))
            .count();
        if hits > best.1 {
            best = (code, hits);
        }
    }
    best.0.to_string()
}

pub fn structure_signals(content: &str) -> StructureSignals {
    let mut signals = StructureSignals::default();

    signals.paragraph_count = content
        .split("\n\n")
        .filter(|paragraph| !paragraph.trim().is_empty())
        .count();

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || is_heading_line(trimmed) {
            signals.has_headers = true;
        }
        if trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("• ") {
            signals.has_bullets = true;
        }
        if is_numbered_item(trimmed) {
            signals.has_numbered_lists = true;
        }
    }

    signals
}

fn is_heading_line(line: &str) -> bool {
    // Short all-caps lines read as headings in institutional documents.
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    !letters.is_empty()
        && letters.len() >= 3
        && line.len() <= 80
        && letters.iter().all(|c| c.is_uppercase())
}

fn is_numbered_item(line: &str) -> bool {
    let mut chars = line.chars();
    let mut saw_digit = false;
    for c in chars.by_ref() {
        if c.is_ascii_digit() {
            saw_digit = true;
        } else {
            return saw_digit && (c == '.' || c == ')');
        }
    }
    false
}

/// Frequency-ranked words of 4+ letters, stop-words removed.
pub fn key_terms(content: &str, limit: usize) -> Vec<String> {
    let lowered = content.to_lowercase();
    let mut frequency: HashMap<&str, usize> = HashMap::new();

    for token in lowered.split(|c: char| !c.is_alphanumeric()) {
        if token.len() >= 4 && !ENGLISH_STOP_WORDS.contains(&token) {
            *frequency.entry(token).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = frequency.into_iter().collect();
    ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(right.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(term, _)| term.to_string())
        .collect()
}

/// Query keywords: 3+ letter tokens with stop-words removed, order kept,
/// duplicates dropped.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut seen = Vec::new();
    for token in lowered.split(|c: char| !c.is_alphanumeric()) {
        if token.len() >= 3
            && !ENGLISH_STOP_WORDS.contains(&token)
            && !seen.iter().any(|existing: &String| existing == token)
        {
            seen.push(token.to_string());
        }
    }
    seen
}

/// Split text into sentences on terminal punctuation followed by
/// whitespace. Newline-separated fragments without punctuation are kept
/// as their own sentences so no content is dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let terminal = matches!(c, '.' | '!' | '?');
        let boundary = terminal && chars.peek().map_or(true, |next| next.is_whitespace());
        if boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(checksum("credit policy"), checksum("credit policy"));
        assert_ne!(checksum("credit policy"), checksum("risk model"));
    }

    #[test]
    fn derived_id_depends_on_all_parts() {
        let base = derive_document_id("content", "title", "source");
        assert_ne!(base, derive_document_id("content2", "title", "source"));
        assert_ne!(base, derive_document_id("content", "title2", "source"));
        assert_ne!(base, derive_document_id("content", "title", "source2"));
    }

    #[test]
    fn english_is_detected_from_stop_words() {
        let text = "The applicant must provide proof of the income and the employment history.";
        assert_eq!(detect_language(text), "en");
    }

    #[test]
    fn german_markers_win_over_english() {
        let text = "Der Antrag ist nicht vollständig und die Unterlagen sind mit der Bank zu klären.";
        assert_eq!(detect_language(text), "de");
    }

    #[test]
    fn structure_signals_find_bullets_and_numbers() {
        let text = "INTRODUCTION\n\n- first rule\n- second rule\n\n1. step one\n2. step two";
        let signals = structure_signals(text);
        assert_eq!(signals.paragraph_count, 3);
        assert!(signals.has_headers);
        assert!(signals.has_bullets);
        assert!(signals.has_numbered_lists);
    }

    #[test]
    fn key_terms_are_frequency_ranked() {
        let text = "credit credit credit score score income";
        let terms = key_terms(text, 2);
        assert_eq!(terms, vec!["credit".to_string(), "score".to_string()]);
    }

    #[test]
    fn short_and_stop_words_are_not_key_terms() {
        let terms = key_terms("the and for a an is to of cat", 5);
        assert!(terms.is_empty());
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let text = "First rule. Second rule! Third rule? Trailing fragment";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0], "First rule.");
        assert_eq!(sentences[3], "Trailing fragment");
    }

    #[test]
    fn decimal_numbers_do_not_split_sentences() {
        let sentences = split_sentences("The ratio is 3.5 at most. Second sentence.");
        assert_eq!(sentences.len(), 2);
    }
}
