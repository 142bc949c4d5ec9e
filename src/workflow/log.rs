//! Persistence for step outputs, keyed by `(workflow_id, step_name)`.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// One persisted step outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn completed(output: serde_json::Value, attempts: u32) -> Self {
        Self {
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            attempts,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(error: String, attempts: u32) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            attempts,
            finished_at: Utc::now(),
        }
    }
}

/// Storage seam for the step kernel.
#[async_trait]
pub trait StepLog: Send + Sync {
    async fn load(&self, workflow_id: Uuid, step: &str) -> Result<Option<StepRecord>>;
    async fn save(&self, workflow_id: Uuid, step: &str, record: StepRecord) -> Result<()>;
}

/// In-memory step log for tests and embedded runs.
#[derive(Default)]
pub struct MemoryStepLog {
    records: Mutex<HashMap<(Uuid, String), StepRecord>>,
}

impl MemoryStepLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepLog for MemoryStepLog {
    async fn load(&self, workflow_id: Uuid, step: &str) -> Result<Option<StepRecord>> {
        let records = self.records.lock().expect("step log poisoned");
        Ok(records.get(&(workflow_id, step.to_string())).cloned())
    }

    async fn save(&self, workflow_id: Uuid, step: &str, record: StepRecord) -> Result<()> {
        let mut records = self.records.lock().expect("step log poisoned");
        records.insert((workflow_id, step.to_string()), record);
        Ok(())
    }
}

/// File-backed step log: one JSON document per workflow.
///
/// Lets a crashed CLI run resume with the same workflow id.
pub struct JsonStepLog {
    dir: PathBuf,
}

impl JsonStepLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn workflow_path(&self, workflow_id: Uuid) -> PathBuf {
        self.dir.join(format!("{workflow_id}.json"))
    }

    async fn read_all(&self, workflow_id: Uuid) -> Result<HashMap<String, StepRecord>> {
        let path = self.workflow_path(workflow_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(PipelineError::Io(e)),
        }
    }
}

#[async_trait]
impl StepLog for JsonStepLog {
    async fn load(&self, workflow_id: Uuid, step: &str) -> Result<Option<StepRecord>> {
        Ok(self.read_all(workflow_id).await?.remove(step))
    }

    async fn save(&self, workflow_id: Uuid, step: &str, record: StepRecord) -> Result<()> {
        let mut records = self.read_all(workflow_id).await?;
        records.insert(step.to_string(), record);
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.workflow_path(workflow_id);
        let bytes = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_log_round_trip() {
        let log = MemoryStepLog::new();
        let wf = Uuid::new_v4();

        assert!(log.load(wf, "initialize").await.unwrap().is_none());

        log.save(
            wf,
            "initialize",
            StepRecord::completed(serde_json::json!({"ok": true}), 1),
        )
        .await
        .unwrap();

        let record = log.load(wf, "initialize").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.output, Some(serde_json::json!({"ok": true})));

        // Records are scoped per workflow
        assert!(log.load(Uuid::new_v4(), "initialize").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_log_round_trip() {
        let dir = std::env::temp_dir().join(format!("podpipe-steplog-{}", Uuid::new_v4()));
        let log = JsonStepLog::new(&dir);
        let wf = Uuid::new_v4();

        log.save(wf, "transcribe", StepRecord::failed("stt down".to_string(), 3))
            .await
            .unwrap();
        log.save(
            wf,
            "initialize",
            StepRecord::completed(serde_json::json!(1), 1),
        )
        .await
        .unwrap();

        let record = log.load(wf, "transcribe").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("stt down"));
        assert!(log.load(wf, "initialize").await.unwrap().is_some());
        assert!(log.load(wf, "enhance").await.unwrap().is_none());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
