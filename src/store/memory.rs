//! In-memory store implementations for tests and embedded runs.

use super::{Episode, EpisodePatch, EpisodeStore, ObjectStore, StatusUpdate, Task, TaskStatus, TaskStore};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().expect("store poisoned").keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().expect("store poisoned").contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .expect("store poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: Option<&str>) -> Result<()> {
        self.objects
            .lock()
            .expect("store poisoned")
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().expect("store poisoned").remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.tasks.lock().expect("store poisoned").keys().copied().collect()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(
        &self,
        kind: &str,
        payload: serde_json::Value,
        owner_id: Option<String>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let task = Task {
            id,
            kind: kind.to_string(),
            status: TaskStatus::Queued,
            progress: 0,
            step: None,
            message: None,
            result: None,
            payload,
            owner_id,
            created_at: now,
            updated_at: now,
        };
        self.tasks.lock().expect("store poisoned").insert(id, task);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Task> {
        self.tasks
            .lock()
            .expect("store poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("task {id}")))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        update: StatusUpdate,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("store poisoned");
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| PipelineError::NotFound(format!("task {id}")))?;

        if !task.status.can_transition_to(status) {
            return Err(PipelineError::TaskState(format!(
                "task {id} cannot move from {} to {}",
                task.status, status
            )));
        }

        task.status = status;
        if let Some(message) = update.message {
            task.message = Some(message);
        }
        if let Some(result) = update.result {
            task.result = Some(result);
        }
        if let Some(step) = update.step {
            task.step = Some(step);
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, percent: u8, message: Option<String>) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("store poisoned");
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| PipelineError::NotFound(format!("task {id}")))?;
        if task.status.is_terminal() {
            return Err(PipelineError::TaskState(format!(
                "task {id} is {}, progress writes are rejected",
                task.status
            )));
        }
        task.progress = percent.min(100);
        if let Some(message) = message {
            task.message = Some(message);
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_step(&self, id: Uuid, step: &str, percent: Option<u8>) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("store poisoned");
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| PipelineError::NotFound(format!("task {id}")))?;
        if task.status.is_terminal() {
            return Err(PipelineError::TaskState(format!(
                "task {id} is {}, step writes are rejected",
                task.status
            )));
        }
        task.step = Some(step.to_string());
        if let Some(percent) = percent {
            task.progress = percent.min(100);
        }
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEpisodeStore {
    episodes: Mutex<HashMap<Uuid, Episode>>,
}

impl MemoryEpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodeStore for MemoryEpisodeStore {
    async fn update(&self, episode_id: Uuid, patch: EpisodePatch) -> Result<()> {
        let mut episodes = self.episodes.lock().expect("store poisoned");
        let episode = episodes.entry(episode_id).or_insert_with(|| Episode {
            id: episode_id,
            ..Default::default()
        });

        if let Some(transcript_url) = patch.transcript_url {
            episode.transcript_url = Some(transcript_url);
        }
        if let Some(urls) = patch.encoded_audio_urls {
            episode.encoded_audio_urls = urls;
        }
        if let Some(keywords) = patch.keywords {
            episode.keywords = keywords;
        }
        Ok(())
    }

    async fn get(&self, episode_id: Uuid) -> Result<Option<Episode>> {
        Ok(self
            .episodes
            .lock()
            .expect("store poisoned")
            .get(&episode_id)
            .cloned())
    }
}
