//! Sentence-aligned chunking with bounded overlap.
//!
//! Sentences are accumulated greedily until the next one would push the
//! chunk past the configured size; the following chunk is seeded with
//! the trailing words of the chunk just closed. No content is dropped
//! between chunks and no chunk exceeds the configured size.

use crate::analysis::split_sentences;

/// Rough characters-per-word figure used to convert the configured
/// character overlap into a word count for seeding.
const APPROX_CHARS_PER_WORD: usize = 6;

/// A chunk of source text. Offsets point at the first and last byte of
/// the chunk's own sentences in the original content; seeded overlap
/// text is not part of the offset range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

struct LocatedSentence {
    text: String,
    start: usize,
    end: usize,
}

pub fn overlap_word_count(overlap_chars: usize) -> usize {
    if overlap_chars == 0 {
        0
    } else {
        (overlap_chars / APPROX_CHARS_PER_WORD).max(1)
    }
}

pub fn chunk_text(content: &str, max_chars: usize, overlap_chars: usize) -> Vec<ChunkPiece> {
    let max_chars = max_chars.max(1);
    let sentences = locate_sentences(content, max_chars);
    if sentences.is_empty() {
        return Vec::new();
    }

    let overlap_words = overlap_word_count(overlap_chars.min(max_chars.saturating_sub(1)));
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chunk_start: Option<usize> = None;
    let mut chunk_end = 0usize;

    for sentence in sentences {
        if !current.is_empty() && current.len() + 1 + sentence.text.len() > max_chars {
            pieces.push(ChunkPiece {
                content: current.clone(),
                start_offset: chunk_start.unwrap_or(chunk_end),
                end_offset: chunk_end,
            });
            let seed = trailing_words(&current, overlap_words);
            // A seed that would push the incoming sentence past the
            // limit is dropped rather than shrunk.
            current = if !seed.is_empty() && seed.len() + 1 + sentence.text.len() <= max_chars {
                seed
            } else {
                String::new()
            };
            chunk_start = None;
        }

        if chunk_start.is_none() {
            chunk_start = Some(sentence.start);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence.text);
        chunk_end = sentence.end;
    }

    pieces.push(ChunkPiece {
        content: current,
        start_offset: chunk_start.unwrap_or(chunk_end),
        end_offset: chunk_end,
    });

    pieces
}

/// Split into sentences and resolve each back to its byte range in the
/// original content. Sentences longer than `max_chars` are hard-split on
/// character boundaries so the chunk size invariant holds.
fn locate_sentences(content: &str, max_chars: usize) -> Vec<LocatedSentence> {
    let mut located = Vec::new();
    let mut cursor = 0usize;

    for sentence in split_sentences(content) {
        let found = content[cursor..]
            .find(&sentence)
            .map(|offset| cursor + offset);
        let start = match found {
            Some(start) => start,
            None => continue,
        };
        let end = start + sentence.len();
        cursor = end;

        if sentence.len() <= max_chars {
            located.push(LocatedSentence {
                text: sentence,
                start,
                end,
            });
            continue;
        }

        // Oversized sentence: cut into max-sized pieces.
        let mut piece_start = 0usize;
        let bytes = sentence.len();
        while piece_start < bytes {
            let mut piece_end = (piece_start + max_chars).min(bytes);
            while piece_end < bytes && !sentence.is_char_boundary(piece_end) {
                piece_end -= 1;
            }
            located.push(LocatedSentence {
                text: sentence[piece_start..piece_end].to_string(),
                start: start + piece_start,
                end: start + piece_end,
            });
            piece_start = piece_end;
        }
    }

    located
}

fn trailing_words(text: &str, count: usize) -> String {
    if count == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let skip = words.len().saturating_sub(count);
    words[skip..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = "Credit applications require proof of income. The minimum score is 650 for personal loans. Business loans require 700. Debt ratios above forty percent need extra review. Manual review applies above one hundred thousand dollars.";

    #[test]
    fn small_document_yields_single_chunk() {
        let pieces = chunk_text("One rule. Two rules. Three rules.", 500, 100);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].start_offset, 0);
        assert_eq!(pieces[0].end_offset, "One rule. Two rules. Three rules.".len());
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 500, 100).is_empty());
        assert!(chunk_text("   \n\t ", 500, 100).is_empty());
    }

    #[test]
    fn no_chunk_exceeds_max_size() {
        for max in [40usize, 80, 120] {
            for piece in chunk_text(POLICY, max, 24) {
                assert!(
                    piece.content.len() <= max,
                    "chunk of {} chars exceeds max {}",
                    piece.content.len(),
                    max
                );
            }
        }
    }

    #[test]
    fn chunks_are_gap_free_and_ordered() {
        let pieces = chunk_text(POLICY, 90, 24);
        assert!(pieces.len() > 1);

        let mut reconstructed = String::new();
        for (index, piece) in pieces.iter().enumerate() {
            if index > 0 {
                // Next chunk starts where the previous one ended, modulo
                // inter-sentence whitespace.
                let gap = &POLICY[pieces[index - 1].end_offset..piece.start_offset];
                assert!(gap.trim().is_empty(), "content dropped between chunks: {gap:?}");
            }
            reconstructed.push_str(POLICY[piece.start_offset..piece.end_offset].trim());
            reconstructed.push(' ');
        }

        let normalized_original = POLICY.split_whitespace().collect::<Vec<_>>().join(" ");
        let normalized_rebuilt = reconstructed.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalized_rebuilt, normalized_original);
    }

    #[test]
    fn adjacent_chunks_share_overlap_words() {
        let pieces = chunk_text(POLICY, 90, 24);
        assert!(pieces.len() > 1);
        let expected_words = overlap_word_count(24);
        let seed = trailing_words(&pieces[0].content, expected_words);
        assert!(!seed.is_empty());
        assert!(
            pieces[1].content.starts_with(&seed),
            "second chunk {:?} does not start with seed {:?}",
            pieces[1].content,
            seed
        );
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        let long = "a".repeat(250);
        let pieces = chunk_text(&long, 100, 20);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| p.content.len() <= 100));
        let total: usize = pieces.iter().map(|p| p.content.len()).sum();
        assert_eq!(total, 250);
    }

    #[test]
    fn zero_overlap_produces_no_seed() {
        let pieces = chunk_text(POLICY, 90, 0);
        assert!(pieces.len() > 1);
        assert_eq!(
            pieces[1].content,
            POLICY[pieces[1].start_offset..pieces[1].end_offset].trim()
        );
    }
}
