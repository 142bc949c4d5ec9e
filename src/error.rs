use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Unrecognized speech-to-text response: {0}")]
    SttDecode(String),

    #[error("All {total} chunks failed transcription: {detail}")]
    AllChunksFailed { total: usize, detail: String },

    #[error("Retry budget exhausted after {elapsed:?}")]
    BudgetExhausted { elapsed: Duration },

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Invalid task transition: {0}")]
    TaskState(String),

    #[error("Pipeline run cancelled")]
    Cancelled,

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Wrap an error as a step failure, preserving the failed step's name.
    pub fn at_step(step: &str, source: PipelineError) -> Self {
        PipelineError::Step {
            step: step.to_string(),
            source: Box::new(source),
        }
    }

    /// The name of the failed step, when this is a step failure.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            PipelineError::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The underlying cause of a step failure, or the error itself.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wrapping() {
        let err = PipelineError::at_step(
            "transcribe",
            PipelineError::AllChunksFailed {
                total: 3,
                detail: "timeout".to_string(),
            },
        );
        assert_eq!(err.step_name(), Some("transcribe"));
        assert!(matches!(
            err.root_cause(),
            PipelineError::AllChunksFailed { total: 3, .. }
        ));
    }

    #[test]
    fn test_root_cause_unwraps_nested_steps() {
        let inner = PipelineError::Encoding("bad bitrate".to_string());
        let err = PipelineError::at_step("final-encode", inner);
        assert!(matches!(err.root_cause(), PipelineError::Encoding(_)));
    }
}
