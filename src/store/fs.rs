//! Filesystem-backed stores for local CLI runs.
//!
//! Object keys map to files under a root directory; tasks and episodes live
//! in single JSON documents, read-modify-written under a lock.

use super::{Episode, EpisodePatch, EpisodeStore, ObjectStore, StatusUpdate, Task, TaskStatus, TaskStore};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Object store rooted at a local directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let sane = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !sane {
            return Err(PipelineError::Config(format!("Invalid object key: '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::NotFound(key.to_string()))
            }
            Err(e) => Err(PipelineError::Io(e)),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: Option<&str>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Io(e)),
        }
    }
}

async fn read_json_map<T: serde::de::DeserializeOwned>(path: &Path) -> Result<HashMap<Uuid, T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(PipelineError::Io(e)),
    }
}

async fn write_json_map<T: serde::Serialize>(path: &Path, map: &HashMap<Uuid, T>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(map)?).await?;
    Ok(())
}

/// Task store persisted to one JSON file.
pub struct JsonTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn create(
        &self,
        kind: &str,
        payload: serde_json::Value,
        owner_id: Option<String>,
    ) -> Result<Uuid> {
        let _guard = self.lock.lock().await;
        let mut tasks: HashMap<Uuid, Task> = read_json_map(&self.path).await?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        tasks.insert(
            id,
            Task {
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
            },
        );
        write_json_map(&self.path, &tasks).await?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Task> {
        let _guard = self.lock.lock().await;
        let tasks: HashMap<Uuid, Task> = read_json_map(&self.path).await?;
        tasks
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
        let _guard = self.lock.lock().await;
        let mut tasks: HashMap<Uuid, Task> = read_json_map(&self.path).await?;
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
        write_json_map(&self.path, &tasks).await
    }

    async fn update_progress(&self, id: Uuid, percent: u8, message: Option<String>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tasks: HashMap<Uuid, Task> = read_json_map(&self.path).await?;
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
        write_json_map(&self.path, &tasks).await
    }

    async fn update_step(&self, id: Uuid, step: &str, percent: Option<u8>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tasks: HashMap<Uuid, Task> = read_json_map(&self.path).await?;
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
        write_json_map(&self.path, &tasks).await
    }
}

/// Episode store persisted to one JSON file.
pub struct JsonEpisodeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonEpisodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl EpisodeStore for JsonEpisodeStore {
    async fn update(&self, episode_id: Uuid, patch: EpisodePatch) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut episodes: HashMap<Uuid, Episode> = read_json_map(&self.path).await?;
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
        write_json_map(&self.path, &episodes).await
    }

    async fn get(&self, episode_id: Uuid) -> Result<Option<Episode>> {
        let _guard = self.lock.lock().await;
        let episodes: HashMap<Uuid, Episode> = read_json_map(&self.path).await?;
        Ok(episodes.get(&episode_id).cloned())
    }
}
