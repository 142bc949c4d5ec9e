//! Optional post-transcription enhancement.
//!
//! When the structured speech engine already produced paragraphs, speakers,
//! and keywords, those are preferred and chapters fall out of speaker
//! change-points. Otherwise the merged text goes through an LLM in
//! overlapping segments. Enhancement failures degrade to partial output and
//! never fail the pipeline.

pub mod llm;

pub use llm::{HttpLlmClient, LlmClient};

use crate::transcript::{Paragraph, TranscribedChunk, TranscriptBundle};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Maximum characters per LLM segment.
const MAX_SEGMENT_CHARS: usize = 4000;
/// Overlap carried between adjacent segments.
const SEGMENT_OVERLAP_CHARS: usize = 200;
/// LLM calls in flight at once.
const LLM_CONCURRENCY: usize = 6;
/// Boundary-duplicate matching window, in words.
const BOUNDARY_MATCH_WORDS: std::ops::RangeInclusive<usize> = 3..=15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterMark {
    pub title: String,
    pub start_secs: f64,
}

/// Artifacts of one enhancement pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedTranscript {
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub chapters: Vec<ChapterMark>,
    pub persons: Vec<String>,
    pub places: Vec<String>,
    pub speakers: Vec<u32>,
    pub language: Option<String>,
    pub markdown: Option<String>,
    pub corrected_text: Option<String>,
}

impl EnhancedTranscript {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.keywords.is_empty()
            && self.chapters.is_empty()
            && self.persons.is_empty()
            && self.places.is_empty()
            && self.markdown.is_none()
            && self.corrected_text.is_none()
    }
}

pub struct Enhancer {
    llm: Option<Arc<dyn LlmClient>>,
}

impl Enhancer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// Produce enhancement artifacts for a merged transcript.
    ///
    /// Returns `None` when there is nothing to enhance with: no structured
    /// metadata and no LLM configured.
    pub async fn enhance(
        &self,
        bundle: &TranscriptBundle,
        chunks: &[TranscribedChunk],
        duration_secs: f64,
    ) -> Option<EnhancedTranscript> {
        let structured = chunks
            .iter()
            .any(|c| c.metadata.as_ref().is_some_and(|m| !m.paragraphs.is_empty()));

        if structured {
            debug!("deriving enhancement from structured transcription metadata");
            return Some(derive_from_structured(chunks));
        }

        let llm = self.llm.as_ref()?;
        if bundle.text.trim().is_empty() {
            return None;
        }
        Some(enhance_with_llm(llm.clone(), &bundle.text, duration_secs).await)
    }
}

/// Derive artifacts from what the structured engine already produced.
fn derive_from_structured(chunks: &[TranscribedChunk]) -> EnhancedTranscript {
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut keywords: Vec<String> = Vec::new();
    let mut speakers: Vec<u32> = Vec::new();
    let mut summary: Option<String> = None;
    let mut language: Option<String> = None;

    for chunk in chunks {
        let Some(metadata) = &chunk.metadata else { continue };
        paragraphs.extend(metadata.paragraphs.iter().cloned());
        for keyword in &metadata.keywords {
            if !keywords.contains(keyword) {
                keywords.push(keyword.clone());
            }
        }
        for speaker in &metadata.speakers {
            if !speakers.contains(speaker) {
                speakers.push(*speaker);
            }
        }
        if summary.is_none() {
            summary = metadata.summary.clone();
        }
        if language.is_none() {
            language = metadata.language.clone();
        }
    }

    EnhancedTranscript {
        chapters: chapters_from_speaker_changes(&paragraphs),
        markdown: markdown_from_paragraphs(&paragraphs),
        summary,
        keywords,
        persons: Vec::new(),
        places: Vec::new(),
        speakers,
        language,
        corrected_text: None,
    }
}

/// A chapter opens wherever the speaker changes.
fn chapters_from_speaker_changes(paragraphs: &[Paragraph]) -> Vec<ChapterMark> {
    let mut chapters = Vec::new();
    let mut current_speaker: Option<u32> = None;

    for paragraph in paragraphs {
        if paragraph.speaker == current_speaker && !chapters.is_empty() {
            continue;
        }
        current_speaker = paragraph.speaker;
        chapters.push(ChapterMark {
            title: chapter_title(&paragraph.text),
            start_secs: paragraph.start,
        });
    }
    chapters
}

fn chapter_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(8).collect();
    let mut title = words.join(" ");
    if text.split_whitespace().count() > 8 {
        title.push('…');
    }
    title
}

fn markdown_from_paragraphs(paragraphs: &[Paragraph]) -> Option<String> {
    if paragraphs.is_empty() {
        return None;
    }
    let mut out = String::new();
    let mut current_speaker: Option<u32> = None;
    for paragraph in paragraphs {
        if paragraph.speaker != current_speaker {
            current_speaker = paragraph.speaker;
            if let Some(speaker) = paragraph.speaker {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(&format!("## Speaker {speaker}"));
            }
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(paragraph.text.trim());
    }
    Some(out)
}

/// Run the concurrent generation tasks over segmented text.
async fn enhance_with_llm(
    llm: Arc<dyn LlmClient>,
    text: &str,
    duration_secs: f64,
) -> EnhancedTranscript {
    let segments = split_with_overlap(text, MAX_SEGMENT_CHARS, SEGMENT_OVERLAP_CHARS);
    let total_chars: usize = text.chars().count().max(1);
    let semaphore = Arc::new(Semaphore::new(LLM_CONCURRENCY));

    #[derive(Debug)]
    enum TaskOutput {
        Summary(String),
        Keywords(Vec<String>),
        Chapters(Vec<ChapterMark>),
        Persons(Vec<String>),
        Places(Vec<String>),
        Correction { index: usize, text: String },
    }

    let mut futures = FuturesUnordered::new();

    // List-type tasks see the full transcript segment by segment; estimated
    // chapter starts are proportional to the segment's character offset.
    let mut offset_chars = 0usize;
    for (index, segment) in segments.iter().enumerate() {
        let start_secs = offset_chars as f64 / total_chars as f64 * duration_secs;
        offset_chars += segment.chars().count().saturating_sub(if index + 1 < segments.len() {
            SEGMENT_OVERLAP_CHARS
        } else {
            0
        });

        let mut kinds = vec!["keywords", "chapters", "persons", "places", "correction"];
        if index == 0 {
            // One summary over the leading segment keeps the call count bounded.
            kinds.push("summary");
        }

        for kind in kinds {
            let llm = llm.clone();
            let semaphore = semaphore.clone();
            let segment = segment.clone();
            futures.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let prompt = prompt_for(kind, &segment);
                match llm.complete(&prompt).await {
                    Ok(response) => Some(match kind {
                        "keywords" => TaskOutput::Keywords(parse_list(&response)),
                        "chapters" => TaskOutput::Chapters(
                            parse_list(&response)
                                .into_iter()
                                .map(|title| ChapterMark {
                                    title,
                                    start_secs,
                                })
                                .collect(),
                        ),
                        "persons" => TaskOutput::Persons(parse_list(&response)),
                        "places" => TaskOutput::Places(parse_list(&response)),
                        "summary" => TaskOutput::Summary(response.trim().to_string()),
                        _ => TaskOutput::Correction {
                            index,
                            text: response.trim().to_string(),
                        },
                    }),
                    Err(e) => {
                        warn!(task = kind, segment = index, "enhancement call failed: {e}");
                        None
                    }
                }
            });
        }
    }

    let mut enhanced = EnhancedTranscript::default();
    let mut corrections: Vec<(usize, String)> = Vec::new();

    while let Some(output) = futures.next().await {
        match output {
            Some(TaskOutput::Summary(s)) if !s.is_empty() => enhanced.summary = Some(s),
            Some(TaskOutput::Keywords(list)) => merge_unique(&mut enhanced.keywords, list),
            Some(TaskOutput::Chapters(list)) => enhanced.chapters.extend(list),
            Some(TaskOutput::Persons(list)) => merge_unique(&mut enhanced.persons, list),
            Some(TaskOutput::Places(list)) => merge_unique(&mut enhanced.places, list),
            Some(TaskOutput::Correction { index, text }) if !text.is_empty() => {
                corrections.push((index, text))
            }
            _ => {}
        }
    }

    enhanced
        .chapters
        .sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

    if corrections.len() == segments.len() {
        corrections.sort_by_key(|(index, _)| *index);
        enhanced.corrected_text = Some(join_deduping_boundaries(
            corrections.into_iter().map(|(_, text)| text),
        ));
    } else if !corrections.is_empty() {
        warn!(
            "only {} of {} correction segments came back, keeping original text",
            corrections.len(),
            segments.len()
        );
    }

    enhanced
}

fn prompt_for(kind: &str, segment: &str) -> String {
    match kind {
        "keywords" => format!(
            "List up to 10 topical keywords for this podcast transcript segment, \
             one per line, no numbering:\n\n{segment}"
        ),
        "chapters" => format!(
            "Suggest up to 3 short chapter titles for this podcast transcript \
             segment, one per line, no numbering:\n\n{segment}"
        ),
        "persons" => format!(
            "List the people mentioned in this transcript segment, one per line, \
             no numbering. Answer with nothing when there are none:\n\n{segment}"
        ),
        "places" => format!(
            "List the places mentioned in this transcript segment, one per line, \
             no numbering. Answer with nothing when there are none:\n\n{segment}"
        ),
        "summary" => format!(
            "Summarize this podcast transcript in at most three sentences:\n\n{segment}"
        ),
        _ => format!(
            "Fix transcription errors in this text. Return only the corrected \
             text, with no commentary:\n\n{segment}"
        ),
    }
}

fn parse_list(response: &str) -> Vec<String> {
    response
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*', '•']).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn merge_unique(into: &mut Vec<String>, from: Vec<String>) {
    for item in from {
        if !into.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
            into.push(item);
        }
    }
}

/// Split text into segments of at most `max` chars, overlapping by `overlap`.
fn split_with_overlap(text: &str, max: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return vec![text.to_string()];
    }

    let step = max - overlap;
    let mut segments = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max).min(chars.len());
        segments.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    segments
}

/// Join corrected segments, dropping words duplicated across the boundary.
fn join_deduping_boundaries(segments: impl Iterator<Item = String>) -> String {
    let mut merged = String::new();
    for segment in segments {
        if merged.is_empty() {
            merged = segment;
            continue;
        }
        let deduped = strip_duplicate_prefix(&merged, &segment);
        if !deduped.is_empty() {
            merged.push(' ');
            merged.push_str(&deduped);
        }
    }
    merged
}

/// Remove `cur`'s leading words that repeat `prev`'s trailing words.
///
/// Longest suffix/prefix match within the window wins.
fn strip_duplicate_prefix(prev: &str, cur: &str) -> String {
    let prev_words: Vec<&str> = prev.split_whitespace().collect();
    let cur_words: Vec<&str> = cur.split_whitespace().collect();

    for n in BOUNDARY_MATCH_WORDS.rev() {
        if n > prev_words.len() || n > cur_words.len() {
            continue;
        }
        let suffix = &prev_words[prev_words.len() - n..];
        let prefix = &cur_words[..n];
        let matches = suffix
            .iter()
            .zip(prefix.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if matches {
            return cur_words[n..].join(" ");
        }
    }
    cur_words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, Result};
    use crate::transcript::ChunkMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedLlm {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PipelineError::TransientIo("llm down".to_string()));
            }
            Ok(if prompt.starts_with("List up to 10") {
                "rust\npodcasts".to_string()
            } else if prompt.starts_with("Suggest") {
                "Intro".to_string()
            } else if prompt.starts_with("Summarize") {
                "A chat about Rust.".to_string()
            } else if prompt.starts_with("List the people") {
                "Grace Hopper".to_string()
            } else if prompt.starts_with("List the places") {
                String::new()
            } else {
                "corrected text".to_string()
            })
        }
    }

    fn paragraph(text: &str, start: f64, speaker: Option<u32>) -> Paragraph {
        Paragraph {
            text: text.to_string(),
            start,
            end: start + 5.0,
            speaker,
        }
    }

    fn structured_chunk(paragraphs: Vec<Paragraph>) -> TranscribedChunk {
        TranscribedChunk {
            index: 0,
            start_secs: 0.0,
            end_secs: 600.0,
            text: paragraphs.iter().map(|p| p.text.clone()).collect::<Vec<_>>().join(" "),
            words: Vec::new(),
            metadata: Some(ChunkMetadata {
                speakers: vec![0, 1],
                paragraphs,
                keywords: vec!["audio".to_string()],
                summary: Some("Two people talk.".to_string()),
                language: Some("en".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn test_structured_metadata_preferred_over_llm() {
        let llm = Arc::new(ScriptedLlm {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let enhancer = Enhancer::new(Some(llm.clone()));

        let chunks = vec![structured_chunk(vec![
            paragraph("Welcome to the show everyone listening today", 0.0, Some(0)),
            paragraph("Thanks for having me on", 12.0, Some(1)),
            paragraph("Let us get started", 20.0, Some(1)),
        ])];
        let bundle = TranscriptBundle {
            text: "irrelevant".to_string(),
            total_words: 1,
            words: Vec::new(),
            language: None,
        };

        let enhanced = enhancer.enhance(&bundle, &chunks, 600.0).await.unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 0, "no LLM calls");
        assert_eq!(enhanced.keywords, vec!["audio".to_string()]);
        assert_eq!(enhanced.summary.as_deref(), Some("Two people talk."));
        assert_eq!(enhanced.speakers, vec![0, 1]);
        // Chapters at speaker change-points: speaker 0 then speaker 1
        assert_eq!(enhanced.chapters.len(), 2);
        assert_eq!(enhanced.chapters[0].start_secs, 0.0);
        assert_eq!(enhanced.chapters[1].start_secs, 12.0);
        assert!(enhanced.markdown.as_deref().unwrap().contains("## Speaker 1"));
    }

    #[tokio::test]
    async fn test_llm_path_collects_all_tasks() {
        let llm = Arc::new(ScriptedLlm {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let enhancer = Enhancer::new(Some(llm));

        let bundle = TranscriptBundle {
            text: "a plain transcript with no structure".to_string(),
            total_words: 6,
            words: Vec::new(),
            language: None,
        };

        let enhanced = enhancer.enhance(&bundle, &[], 300.0).await.unwrap();
        assert_eq!(enhanced.keywords, vec!["rust".to_string(), "podcasts".to_string()]);
        assert_eq!(enhanced.summary.as_deref(), Some("A chat about Rust."));
        assert_eq!(enhanced.persons, vec!["Grace Hopper".to_string()]);
        assert!(enhanced.places.is_empty());
        assert_eq!(enhanced.chapters.len(), 1);
        assert_eq!(enhanced.corrected_text.as_deref(), Some("corrected text"));
    }

    #[tokio::test]
    async fn test_llm_failures_degrade_to_partial() {
        let llm = Arc::new(ScriptedLlm {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let enhancer = Enhancer::new(Some(llm));

        let bundle = TranscriptBundle {
            text: "some text".to_string(),
            total_words: 2,
            words: Vec::new(),
            language: None,
        };

        // Everything failed; the pass still returns (empty) artifacts.
        let enhanced = enhancer.enhance(&bundle, &[], 300.0).await.unwrap();
        assert!(enhanced.is_empty());
    }

    #[tokio::test]
    async fn test_no_llm_no_metadata_yields_none() {
        let enhancer = Enhancer::new(None);
        let bundle = TranscriptBundle::default();
        assert!(enhancer.enhance(&bundle, &[], 0.0).await.is_none());
    }

    #[test]
    fn test_split_with_overlap() {
        let text = "x".repeat(10_000);
        let segments = split_with_overlap(&text, 4000, 200);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), 4000);
        assert_eq!(segments[1].len(), 4000);
        // 10000 - 2*3800 = 2400 remaining
        assert_eq!(segments[2].len(), 2400);

        let short = split_with_overlap("tiny", 4000, 200);
        assert_eq!(short, vec!["tiny".to_string()]);
    }

    #[test]
    fn test_strip_duplicate_prefix() {
        let prev = "one two three four five six";
        let cur = "four five six seven eight";
        assert_eq!(strip_duplicate_prefix(prev, cur), "seven eight");

        // Below the 3-word window: kept verbatim
        let cur = "six seven";
        assert_eq!(strip_duplicate_prefix(prev, cur), "six seven");

        // No overlap at all
        assert_eq!(strip_duplicate_prefix(prev, "nine ten"), "nine ten");
    }

    #[test]
    fn test_join_deduping_boundaries() {
        let merged = join_deduping_boundaries(
            vec![
                "alpha beta gamma delta".to_string(),
                "beta gamma delta epsilon".to_string(),
            ]
            .into_iter(),
        );
        assert_eq!(merged, "alpha beta gamma delta epsilon");
    }

    #[test]
    fn test_chapter_title_truncates() {
        let title = chapter_title("one two three four five six seven eight nine ten");
        assert!(title.ends_with('…'));
        assert!(title.starts_with("one two"));
    }
}
