//! Object-key layout for pipeline inputs, intermediates, and outputs.
//!
//! Keys under `processing/` and `chunks/` are intermediates owned by the
//! pipeline and deleted on success; `encoded/` and `transcripts/` keys are
//! owned by the episode and survive. UUID-bearing keys are allocated once
//! per step invocation (never per retry) and persisted with the step output,
//! so neither in-step retries nor replays orphan objects.

use crate::config::{AudioCodec, EncodingFormat};
use uuid::Uuid;

/// Strip a storage-scheme prefix from a caller-supplied key.
///
/// Episode records may carry `r2://`-prefixed keys; object-store calls take
/// bare keys.
pub fn strip_scheme(key: &str) -> &str {
    key.strip_prefix("r2://").unwrap_or(key)
}

/// Low-bitrate mono copy used only for chunking and transcription.
pub fn processing_copy(episode_id: Uuid) -> String {
    format!("processing/{episode_id}/{}_24k_mono.ogg", Uuid::new_v4())
}

/// One chunk object, extension matching the chunk codec.
pub fn chunk(episode_id: Uuid, codec: AudioCodec) -> String {
    format!("chunks/{episode_id}/{}.{}", Uuid::new_v4(), codec.extension())
}

/// Final rendition for one codec/bitrate pair.
pub fn rendition(episode_id: Uuid, format: &EncodingFormat) -> String {
    format!(
        "encoded/{episode_id}/{}_{}.{}",
        format.codec,
        format.bitrate_kbps,
        format.codec.extension()
    )
}

/// Plain-text transcript.
pub fn transcript(episode_id: Uuid) -> String {
    format!("transcripts/{episode_id}/{}.txt", Uuid::new_v4())
}

/// Enhanced transcript JSON.
pub fn enhanced_transcript(episode_id: Uuid) -> String {
    format!("transcripts/{episode_id}/{}-enhanced.json", Uuid::new_v4())
}

/// Raw per-chunk transcription dump for one workflow run.
pub fn chunk_transcriptions(episode_id: Uuid, workflow_id: Uuid) -> String {
    format!("transcriptions/{episode_id}/{workflow_id}/chunk-transcriptions.json")
}
