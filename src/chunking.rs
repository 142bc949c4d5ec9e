//! Chunk planning for long audio files.
//!
//! A plan covers `[0, duration]` with exactly `ceil(duration / chunk)` slots;
//! indices are dense in `[0, N)`. Each non-final slot carries the configured
//! overlap into the next chunk so the merger can drop duplicated words at the
//! boundary. Actual trimming is delegated to the transcoder worker.

use serde::{Deserialize, Serialize};

/// One planned chunk slot, before any object key is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkSlot {
    pub index: usize,
    /// Nominal start offset in the source audio, seconds.
    pub start_secs: f64,
    /// Nominal end offset including overlap, clamped to the source duration.
    pub end_secs: f64,
}

impl ChunkSlot {
    pub fn duration_secs(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }
}

/// A planned chunk bound to its object-store key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChunk {
    pub index: usize,
    pub key: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Compute the chunk slots for a file of `duration_secs`.
///
/// `ceil(duration / chunk)` slots; slot `i` nominally covers
/// `[i*chunk, min((i+1)*chunk + overlap, duration)]`.
pub fn plan_chunks(duration_secs: f64, chunk_secs: u32, overlap_secs: u32) -> Vec<ChunkSlot> {
    if duration_secs <= 0.0 || chunk_secs == 0 {
        return Vec::new();
    }

    let chunk = f64::from(chunk_secs);
    let overlap = f64::from(overlap_secs);
    let count = (duration_secs / chunk).ceil() as usize;

    (0..count)
        .map(|index| {
            let start = index as f64 * chunk;
            let end = (start + chunk + overlap).min(duration_secs);
            ChunkSlot {
                index,
                start_secs: start,
                end_secs: end,
            }
        })
        .collect()
}
