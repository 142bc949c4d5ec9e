pub mod merge;

pub use merge::{merge_chunks, WORD_DEDUP_TOLERANCE_SECS};

use serde::{Deserialize, Serialize};

/// A word with its absolute timing in the source audio, seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A paragraph from a structured speech engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub speaker: Option<u32>,
}

/// Rich metadata a structured speech engine attaches to a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub speakers: Vec<u32>,
    pub paragraphs: Vec<Paragraph>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
    pub language: Option<String>,
}

/// Transcription of one audio chunk, timings already offset to the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribedChunk {
    pub index: usize,
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
    /// Empty for plain backends.
    #[serde(default)]
    pub words: Vec<WordTiming>,
    #[serde(default)]
    pub metadata: Option<ChunkMetadata>,
}

/// The single transcript assembled from all chunk transcriptions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptBundle {
    pub text: String,
    /// Whitespace-split length of `text`.
    pub total_words: usize,
    /// Merged word timings; empty when any chunk lacked word-level output.
    pub words: Vec<WordTiming>,
    pub language: Option<String>,
}
