//! Single-task execution with validation and bounded retry.
//!
//! [`TaskExecutor::execute`] runs one task invocation:
//!
//! 1. `validate_input`. A failure is returned at once and never retried.
//! 2. Up to `max_retries + 1` attempts of `run` followed by `validate_output`.
//!    Either failing counts as a failed attempt.
//! 3. Between attempts the executor waits `retry_delay * 2^attempt`. The wait
//!    is a timer await, so the thread is free to drive other runs meanwhile.
//! 4. When every attempt fails, the last error is wrapped in
//!    [`PipelineError::TaskFailed`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use entraflow_config::OrchestratorSection;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::task::{Task, TaskError, TaskStats};
use crate::value::ValueMap;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubles for each retry after it.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before the retry following zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl From<&OrchestratorSection> for RetryPolicy {
    fn from(section: &OrchestratorSection) -> Self {
        let retry_delay = Duration::try_from_secs_f64(section.retry_delay_secs).unwrap_or_else(|e| {
            warn!(
                "Unusable retry_delay_secs {}: {}; retrying without delay",
                section.retry_delay_secs, e
            );
            Duration::ZERO
        });
        Self {
            max_retries: section.max_retries,
            retry_delay,
        }
    }
}

/// A successful task execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub result: ValueMap,
    /// Duration of the successful attempt.
    pub duration: Duration,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// A registered task plus its execution counters.
#[derive(Clone)]
pub struct TaskExecutor {
    name: String,
    task: Arc<dyn Task>,
    stats: Arc<Mutex<TaskStats>>,
}

impl TaskExecutor {
    pub fn new(name: impl Into<String>, task: Arc<dyn Task>) -> Self {
        Self {
            name: name.into(),
            task,
            stats: Arc::new(Mutex::new(TaskStats::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the execution counters.
    pub fn stats(&self) -> TaskStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = TaskStats::default();
    }

    /// Run the task once under `policy`.
    pub async fn execute(&self, inputs: &ValueMap, policy: &RetryPolicy) -> Result<TaskOutcome> {
        let keys: Vec<&str> = inputs.keys().map(String::as_str).collect();
        info!("[{}] Starting execution with inputs: {:?}", self.name, keys);

        self.task
            .validate_input(inputs)
            .map_err(|e| PipelineError::Validation {
                agent: self.name.clone(),
                message: format!("Input validation failed: {}", validation_message(e)),
            })?;

        let max_attempts = policy.max_attempts();
        let mut last_error = TaskError::execution("no attempt made");

        for attempt in 0..max_attempts {
            let started = Instant::now();

            match self.attempt(inputs).await {
                Ok(result) => {
                    let duration = started.elapsed();
                    {
                        let mut stats = self.stats.lock();
                        stats.execution_count += 1;
                        stats.last_duration = Some(duration);
                        stats.last_result = Some(result.clone());
                    }
                    info!(
                        "[{}] Execution completed in {:.2}s (attempt {}/{})",
                        self.name,
                        duration.as_secs_f64(),
                        attempt + 1,
                        max_attempts
                    );
                    return Ok(TaskOutcome {
                        result,
                        duration,
                        attempts: attempt + 1,
                    });
                }
                Err(e) => {
                    warn!(
                        "[{}] Execution failed on attempt {}/{}: {}",
                        self.name,
                        attempt + 1,
                        max_attempts,
                        e
                    );
                    last_error = e;
                }
            }

            if attempt + 1 < max_attempts {
                let delay = policy.delay_for(attempt);
                info!("[{}] Retrying in {:.2}s...", self.name, delay.as_secs_f64());
                tokio::time::sleep(delay).await;
            }
        }

        error!(
            "[{}] Execution failed after {} attempts: {}",
            self.name, max_attempts, last_error
        );
        Err(PipelineError::TaskFailed {
            agent: self.name.clone(),
            attempts: max_attempts,
            source: last_error,
        })
    }

    async fn attempt(&self, inputs: &ValueMap) -> std::result::Result<ValueMap, TaskError> {
        let result = self.task.run(inputs).await?;
        self.task.validate_output(&result)?;
        Ok(result)
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("name", &self.name)
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

fn validation_message(err: TaskError) -> String {
    match err {
        TaskError::Validation(msg) | TaskError::Execution(msg) => msg,
    }
}
