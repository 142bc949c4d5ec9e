//! Best-effort progress reporting to the task store.
//!
//! Progress writes are fire-and-forget: a failed write logs a warning and
//! never fails the step. Terminal transitions do not go through here; they
//! are owned by the pipeline driver.

use crate::store::{StatusUpdate, TaskStatus, TaskStore};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct ProgressReporter {
    tasks: Arc<dyn TaskStore>,
    task_id: Uuid,
}

impl ProgressReporter {
    pub fn new(tasks: Arc<dyn TaskStore>, task_id: Uuid) -> Self {
        Self { tasks, task_id }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Record the current step and percent, with an optional message.
    pub async fn step(&self, step: &str, percent: u8, message: Option<&str>) {
        if let Err(e) = self.tasks.update_step(self.task_id, step, Some(percent)).await {
            warn!(step, "progress write failed: {e}");
            return;
        }
        if let Some(message) = message {
            if let Err(e) = self
                .tasks
                .update_progress(self.task_id, percent, Some(message.to_string()))
                .await
            {
                warn!(step, "progress message write failed: {e}");
            }
        }
    }

    /// Store a structured result fragment; last writer wins across steps.
    pub async fn result_fragment(&self, step: &str, fragment: serde_json::Value) {
        let update = StatusUpdate {
            message: None,
            result: Some(fragment),
            step: Some(step.to_string()),
        };
        if let Err(e) = self
            .tasks
            .update_status(self.task_id, TaskStatus::Processing, update)
            .await
        {
            warn!(step, "result fragment write failed: {e}");
        }
    }

    /// Non-terminal status nudge.
    pub async fn status(&self, status: TaskStatus, message: &str) {
        if status.is_terminal() {
            warn!("terminal status {status} must go through the driver, ignoring");
            return;
        }
        let update = StatusUpdate {
            message: Some(message.to_string()),
            result: None,
            step: None,
        };
        if let Err(e) = self.tasks.update_status(self.task_id, status, update).await {
            warn!("status nudge failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryTaskStore, TaskStore};

    #[tokio::test]
    async fn test_step_updates_task() {
        let tasks = Arc::new(MemoryTaskStore::new());
        let id = tasks
            .create("process-episode", serde_json::json!({}), None)
            .await
            .unwrap();
        tasks
            .update_status(id, TaskStatus::Processing, StatusUpdate::default())
            .await
            .unwrap();

        let reporter = ProgressReporter::new(tasks.clone(), id);
        reporter.step("transcribe", 45, Some("transcribing chunks")).await;

        let task = tasks.get(id).await.unwrap();
        assert_eq!(task.step.as_deref(), Some("transcribe"));
        assert_eq!(task.progress, 45);
        assert_eq!(task.message.as_deref(), Some("transcribing chunks"));
    }

    #[tokio::test]
    async fn test_failed_write_is_swallowed() {
        let tasks = Arc::new(MemoryTaskStore::new());
        let id = tasks
            .create("process-episode", serde_json::json!({}), None)
            .await
            .unwrap();
        tasks
            .update_status(id, TaskStatus::Processing, StatusUpdate::default())
            .await
            .unwrap();
        tasks
            .update_status(id, TaskStatus::Failed, StatusUpdate::default())
            .await
            .unwrap();

        // Task is terminal: every write is rejected by the store, and the
        // reporter must not propagate that.
        let reporter = ProgressReporter::new(tasks.clone(), id);
        reporter.step("cleanup", 95, Some("late write")).await;
        reporter
            .result_fragment("cleanup", serde_json::json!({"late": true}))
            .await;

        let task = tasks.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 0);
    }

    #[tokio::test]
    async fn test_result_fragment_last_writer_wins() {
        let tasks = Arc::new(MemoryTaskStore::new());
        let id = tasks
            .create("process-episode", serde_json::json!({}), None)
            .await
            .unwrap();
        tasks
            .update_status(id, TaskStatus::Processing, StatusUpdate::default())
            .await
            .unwrap();

        let reporter = ProgressReporter::new(tasks.clone(), id);
        reporter
            .result_fragment("encode-for-processing", serde_json::json!({"stage": 1}))
            .await;
        reporter
            .result_fragment("transcribe", serde_json::json!({"stage": 2}))
            .await;

        let task = tasks.get(id).await.unwrap();
        assert_eq!(task.result, Some(serde_json::json!({"stage": 2})));
    }

    #[tokio::test]
    async fn test_terminal_nudge_rejected_locally() {
        let tasks = Arc::new(MemoryTaskStore::new());
        let id = tasks
            .create("process-episode", serde_json::json!({}), None)
            .await
            .unwrap();

        let reporter = ProgressReporter::new(tasks.clone(), id);
        reporter.status(TaskStatus::Done, "not allowed here").await;

        assert_eq!(tasks.get(id).await.unwrap().status, TaskStatus::Queued);
    }
}
