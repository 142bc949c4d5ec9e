//! Persistence seams: object store, task store, episode store.
//!
//! The pipeline only ever talks to these traits. In-memory implementations
//! back the test suite; filesystem-backed ones let the CLI run a whole
//! pipeline against a local directory.

pub mod fs;
pub mod memory;

pub use fs::{FsObjectStore, JsonEpisodeStore, JsonTaskStore};
pub use memory::{MemoryEpisodeStore, MemoryObjectStore, MemoryTaskStore};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Blob storage addressed by bare keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Lifecycle of one externally visible pipeline run.
///
/// `queued → processing → {done, failed}`; terminal states are sticky. A
/// same-state write on a terminal task is accepted so replayed finalization
/// stays idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Processing)
                | (Processing, Done)
                | (Processing, Failed)
                | (Done, Done)
                | (Failed, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The task row external readers observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub step: Option<String>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub payload: serde_json::Value,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub step: Option<String>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(
        &self,
        kind: &str,
        payload: serde_json::Value,
        owner_id: Option<String>,
    ) -> Result<Uuid>;

    async fn get(&self, id: Uuid) -> Result<Task>;

    /// Rejects transitions the state machine forbids.
    async fn update_status(&self, id: Uuid, status: TaskStatus, update: StatusUpdate)
        -> Result<()>;

    async fn update_progress(&self, id: Uuid, percent: u8, message: Option<String>) -> Result<()>;

    async fn update_step(&self, id: Uuid, step: &str, percent: Option<u8>) -> Result<()>;
}

/// Episode fields the pipeline owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub transcript_url: Option<String>,
    #[serde(default)]
    pub encoded_audio_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Partial update; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct EpisodePatch {
    pub transcript_url: Option<String>,
    pub encoded_audio_urls: Option<BTreeMap<String, String>>,
    pub keywords: Option<Vec<String>>,
}

#[async_trait]
pub trait EpisodeStore: Send + Sync {
    async fn update(&self, episode_id: Uuid, patch: EpisodePatch) -> Result<()>;
    async fn get(&self, episode_id: Uuid) -> Result<Option<Episode>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(Queued.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Failed));

        // Terminal states are sticky
        assert!(!Done.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Done));
        assert!(!Queued.can_transition_to(Done));

        // Idempotent terminal rewrite is allowed
        assert!(Done.can_transition_to(Done));
        assert!(Failed.can_transition_to(Failed));
    }
}
