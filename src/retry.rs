//! Bounded-time retry loop with exponential backoff.
//!
//! All external I/O goes through [`run_within_budget`]; call sites supply a
//! classifier instead of hand-rolling retry loops, and every tunable comes
//! from [`RetrySettings`].

use crate::config::RetrySettings;
use crate::error::{PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Headroom an upcoming attempt is assumed to need; sleeping is refused when
/// `sleep + HEADROOM` no longer fits in the remaining budget.
const ATTEMPT_HEADROOM: Duration = Duration::from_secs(30);

/// Classifier verdict for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Not retryable; the error is returned as-is.
    Fatal,
    /// Retryable. `sleep` overrides the backoff delay (rate-limit hints).
    Retry { sleep: Option<Duration> },
}

/// Default classification: transient I/O backs off exponentially, rate
/// limits honor the server-provided delay, everything else is fatal.
pub fn default_classify(error: &PipelineError) -> RetryClass {
    match error {
        PipelineError::TransientIo(_) => RetryClass::Retry { sleep: None },
        PipelineError::RateLimited { retry_after } => RetryClass::Retry {
            sleep: Some(*retry_after),
        },
        _ => RetryClass::Fatal,
    }
}

/// Run `op` until it succeeds, the classifier declares the failure fatal, or
/// the wall-clock budget is exhausted.
pub async fn run_within_budget<T, F, Fut, C>(
    mut op: F,
    classify: C,
    settings: &RetrySettings,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&PipelineError) -> RetryClass,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let sleep = match classify(&error) {
            RetryClass::Fatal => return Err(error),
            RetryClass::Retry { sleep } => sleep.unwrap_or_else(|| {
                let exp = settings
                    .base_delay()
                    .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
                exp.min(settings.max_delay())
            }),
        };

        let elapsed = started.elapsed();
        if elapsed + sleep + ATTEMPT_HEADROOM > settings.budget() {
            warn!(
                attempt,
                ?elapsed,
                "retry budget exhausted, giving up: {error}"
            );
            return Err(PipelineError::BudgetExhausted { elapsed });
        }

        debug!(attempt, ?sleep, "attempt failed, backing off: {error}");
        tokio::time::sleep(sleep).await;
    }
}
