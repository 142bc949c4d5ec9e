//! Transcript reassembly across overlapping chunks.
//!
//! Two modes: word-level when every chunk carries word timings (sort by
//! start, drop words that rewind past the previous word's end), text-level
//! otherwise (drop a word-count share of each chunk proportional to the
//! overlap). The merged word list never steps back more than the tolerance.

use super::{TranscribedChunk, TranscriptBundle, WordTiming};

/// A retained word may start up to this much before the previous word's end.
pub const WORD_DEDUP_TOLERANCE_SECS: f64 = 0.1;

/// Assemble one transcript from per-chunk transcriptions.
///
/// Chunks must be sorted by `index`; gaps from failed chunks are fine.
pub fn merge_chunks(chunks: &[TranscribedChunk], overlap_secs: u32) -> TranscriptBundle {
    if chunks.is_empty() {
        return TranscriptBundle::default();
    }

    let language = chunks
        .iter()
        .filter_map(|c| c.metadata.as_ref())
        .find_map(|m| m.language.clone());

    let word_level = chunks.iter().all(|c| !c.words.is_empty());
    let (text, words) = if word_level {
        merge_words(chunks)
    } else {
        (merge_text(chunks, overlap_secs), Vec::new())
    };

    let total_words = text.split_whitespace().count();
    TranscriptBundle {
        text,
        total_words,
        words,
        language,
    }
}

/// Word-level merge: global sort by start, then boundary dedup.
fn merge_words(chunks: &[TranscribedChunk]) -> (String, Vec<WordTiming>) {
    let mut all: Vec<WordTiming> = chunks.iter().flat_map(|c| c.words.iter().cloned()).collect();
    all.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut retained: Vec<WordTiming> = Vec::with_capacity(all.len());
    for word in all {
        let keep = match retained.last() {
            Some(prev) => word.start >= prev.end - WORD_DEDUP_TOLERANCE_SECS,
            None => true,
        };
        if keep {
            retained.push(word);
        }
    }

    let text = retained
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    (text, retained)
}

/// Text-level merge: drop the overlapped share of each chunk's leading words.
///
/// `prev` tracks the last chunk that contributed text, so an empty chunk
/// does not skew the overlap ratio for its successor.
fn merge_text(chunks: &[TranscribedChunk], overlap_secs: u32) -> String {
    let mut merged = String::new();
    let mut prev: Option<&TranscribedChunk> = None;

    for chunk in chunks {
        let trimmed = match prev {
            None => chunk.text.trim().to_string(),
            Some(prev) => {
                let overlap = (prev.end_secs - chunk.start_secs).min(f64::from(overlap_secs));
                let duration = chunk.end_secs - chunk.start_secs;
                let ratio = if duration > 0.0 { overlap / duration } else { 0.0 };
                drop_leading_words(&chunk.text, ratio)
            }
        };

        if !trimmed.is_empty() {
            if !merged.is_empty() {
                merged.push(' ');
            }
            merged.push_str(&trimmed);
            prev = Some(chunk);
        }
    }

    merged
}

/// Drop the first `ceil(ratio * word_count)` words; verbatim when `ratio <= 0`.
fn drop_leading_words(text: &str, ratio: f64) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if ratio <= 0.0 || words.is_empty() {
        return words.join(" ");
    }
    let drop = (ratio * words.len() as f64).ceil() as usize;
    words.iter().skip(drop.min(words.len())).copied().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text_chunk(index: usize, start: f64, end: f64, text: &str) -> TranscribedChunk {
        TranscribedChunk {
            index,
            start_secs: start,
            end_secs: end,
            text: text.to_string(),
            words: Vec::new(),
            metadata: None,
        }
    }

    fn word_chunk(index: usize, start: f64, words: &[(&str, f64, f64)]) -> TranscribedChunk {
        let words: Vec<WordTiming> = words
            .iter()
            .map(|(w, s, e)| WordTiming {
                word: w.to_string(),
                start: *s,
                end: *e,
            })
            .collect();
        let end = words.last().map(|w| w.end).unwrap_or(start);
        let text = words.iter().map(|w| w.word.clone()).collect::<Vec<_>>().join(" ");
        TranscribedChunk {
            index,
            start_secs: start,
            end_secs: end,
            text,
            words,
            metadata: None,
        }
    }

    #[test]
    fn test_empty_input() {
        let bundle = merge_chunks(&[], 2);
        assert!(bundle.text.is_empty());
        assert_eq!(bundle.total_words, 0);
    }

    #[test]
    fn test_text_merge_drops_overlap_words() {
        // 75s of audio in 30s chunks with 2s overlap
        let chunks = vec![
            text_chunk(0, 0.0, 32.0, "a b c"),
            text_chunk(1, 30.0, 62.0, "c d e"),
            text_chunk(2, 60.0, 75.0, "e f"),
        ];

        let bundle = merge_chunks(&chunks, 2);
        assert_eq!(bundle.text, "a b c d e f");
        assert_eq!(bundle.total_words, 6);
        assert!(bundle.words.is_empty());
    }

    #[test]
    fn test_text_merge_verbatim_when_no_overlap() {
        let chunks = vec![
            text_chunk(0, 0.0, 30.0, "hello world"),
            text_chunk(2, 60.0, 75.0, "goodbye"),
        ];

        // prev.end < cur.start, ratio <= 0: concatenate with a single space
        let bundle = merge_chunks(&chunks, 2);
        assert_eq!(bundle.text, "hello world goodbye");
    }

    #[test]
    fn test_text_merge_skips_empty_chunks() {
        let chunks = vec![
            text_chunk(0, 0.0, 32.0, "only text"),
            text_chunk(1, 30.0, 62.0, ""),
            text_chunk(2, 60.0, 75.0, "more"),
        ];
        let bundle = merge_chunks(&chunks, 2);
        assert_eq!(bundle.text, "only text more");
    }

    #[test]
    fn test_word_merge_dedups_boundary() {
        let chunks = vec![
            word_chunk(0, 0.0, &[("a", 0.0, 0.4), ("b", 0.5, 0.9), ("c", 30.5, 31.0)]),
            word_chunk(1, 30.0, &[("c", 30.5, 31.0), ("d", 31.2, 31.6)]),
        ];

        let bundle = merge_chunks(&chunks, 2);
        assert_eq!(bundle.text, "a b c d");
        assert_eq!(bundle.total_words, 4);
        assert_eq!(bundle.words.len(), 4);
    }

    #[test]
    fn test_word_merge_keeps_words_within_tolerance() {
        // Second word starts 0.05s before the first ends: inside tolerance
        let chunks = vec![word_chunk(0, 0.0, &[("a", 0.0, 1.0), ("b", 0.95, 1.5)])];
        let bundle = merge_chunks(&chunks, 2);
        assert_eq!(bundle.words.len(), 2);
    }

    #[test]
    fn test_mixed_chunks_fall_back_to_text_merge() {
        let chunks = vec![
            word_chunk(0, 0.0, &[("a", 0.0, 0.4)]),
            text_chunk(1, 30.0, 62.0, "plain tail"),
        ];
        let bundle = merge_chunks(&chunks, 2);
        assert!(bundle.words.is_empty());
        assert_eq!(bundle.text, "a plain tail");
    }

    #[test]
    fn test_language_taken_from_metadata() {
        let mut chunk = text_chunk(0, 0.0, 30.0, "hola");
        chunk.metadata = Some(crate::transcript::ChunkMetadata {
            language: Some("es".to_string()),
            ..Default::default()
        });
        let bundle = merge_chunks(&[chunk], 2);
        assert_eq!(bundle.language.as_deref(), Some("es"));
    }

    proptest! {
        /// Merged starts never decrease.
        #[test]
        fn prop_word_merge_monotonic(words in word_lists()) {
            let chunks = chunks_from(words);
            let bundle = merge_chunks(&chunks, 30);
            for pair in bundle.words.windows(2) {
                prop_assert!(pair[1].start >= pair[0].start);
            }
        }

        /// No retained word starts earlier than the previous retained word's
        /// end minus the tolerance.
        #[test]
        fn prop_word_merge_dedup(words in word_lists()) {
            let chunks = chunks_from(words);
            let bundle = merge_chunks(&chunks, 30);
            for pair in bundle.words.windows(2) {
                prop_assert!(pair[1].start >= pair[0].end - WORD_DEDUP_TOLERANCE_SECS - 1e-9);
            }
        }
    }

    /// Per-chunk word lists with >= 0.1s spacing inside each chunk.
    fn word_lists() -> impl Strategy<Value = Vec<Vec<WordTiming>>> {
        prop::collection::vec(
            (0.0f64..600.0, prop::collection::vec(0.1f64..2.0, 1..40)),
            1..6,
        )
        .prop_map(|chunks| {
            chunks
                .into_iter()
                .map(|(start, gaps)| {
                    let mut at = start;
                    gaps.into_iter()
                        .enumerate()
                        .map(|(i, gap)| {
                            let word = WordTiming {
                                word: format!("w{i}"),
                                start: at,
                                end: at + gap * 0.8,
                            };
                            at += gap.max(0.1);
                            word
                        })
                        .collect()
                })
                .collect()
        })
    }

    fn chunks_from(words: Vec<Vec<WordTiming>>) -> Vec<TranscribedChunk> {
        words
            .into_iter()
            .enumerate()
            .map(|(index, words)| {
                let start = words.first().map(|w| w.start).unwrap_or(0.0);
                word_chunk_from(index, start, words)
            })
            .collect()
    }

    fn word_chunk_from(index: usize, start: f64, words: Vec<WordTiming>) -> TranscribedChunk {
        let end = words.last().map(|w| w.end).unwrap_or(start);
        let text = words.iter().map(|w| w.word.clone()).collect::<Vec<_>>().join(" ");
        TranscribedChunk {
            index,
            start_secs: start,
            end_secs: end,
            text,
            words,
            metadata: None,
        }
    }
}
