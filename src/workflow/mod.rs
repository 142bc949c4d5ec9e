pub mod log;

pub use log::{JsonStepLog, MemoryStepLog, StepLog, StepRecord, StepStatus};

use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Retry policy for one named step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepPolicy {
    /// Re-runs of the body after the first failed attempt.
    pub retries: u32,
    /// Delay before a re-run.
    pub delay: Duration,
    /// Double the delay on every subsequent attempt.
    pub exponential: bool,
    /// Wall-clock limit for a single attempt.
    pub timeout: Duration,
}

impl StepPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.exponential {
            self.delay * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            self.delay
        }
    }
}

/// Durable step executor.
///
/// Each named step runs at most once per workflow: a completed step's output
/// is persisted to the [`StepLog`] and replayed on subsequent calls, so a
/// restarted run resumes at the first step without a persisted output. A
/// failed step is also recorded, but re-running the workflow retries it.
pub struct StepKernel {
    workflow_id: Uuid,
    log: Arc<dyn StepLog>,
}

impl StepKernel {
    pub fn new(workflow_id: Uuid, log: Arc<dyn StepLog>) -> Self {
        Self { workflow_id, log }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Whether a step already has a persisted, successful output.
    pub async fn is_completed(&self, name: &str) -> Result<bool> {
        Ok(self
            .log
            .load(self.workflow_id, name)
            .await?
            .map(|r| r.status == StepStatus::Completed)
            .unwrap_or(false))
    }

    /// Run `name` under `policy`, persisting its output.
    ///
    /// The body is a closure so retries re-run it from the top; everything it
    /// allocates (object keys included) is either regenerated per attempt or
    /// carried in the returned output, never leaked across replays.
    pub async fn run<T, F, Fut>(&self, name: &str, policy: &StepPolicy, mut body: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(record) = self.log.load(self.workflow_id, name).await? {
            if record.status == StepStatus::Completed {
                if let Some(output) = record.output {
                    debug!(step = name, "replaying persisted step output");
                    return Ok(serde_json::from_value(output)?);
                }
            }
            debug!(step = name, "previous run failed here, re-running");
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = match tokio::time::timeout(policy.timeout, body()).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::TransientIo(format!(
                    "step '{}' attempt timed out after {:?}",
                    name, policy.timeout
                ))),
            };

            match result {
                Ok(value) => {
                    let output = serde_json::to_value(&value)?;
                    self.log
                        .save(
                            self.workflow_id,
                            name,
                            StepRecord::completed(output, attempt),
                        )
                        .await?;
                    return Ok(value);
                }
                Err(e) => {
                    if attempt > policy.retries {
                        let record = StepRecord::failed(e.to_string(), attempt);
                        if let Err(log_err) =
                            self.log.save(self.workflow_id, name, record).await
                        {
                            warn!(step = name, "failed to persist step failure: {log_err}");
                        }
                        return Err(PipelineError::at_step(name, e));
                    }
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        step = name,
                        attempt, "step attempt failed: {e}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
