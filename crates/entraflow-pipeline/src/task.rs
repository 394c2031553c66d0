//! The task contract every pluggable agent implements.
//!
//! A [`Task`] is a unit of work identified by the agent name it is registered
//! under. The scheduler only calls the three contract methods; what the body
//! does (HTTP fetches, scoring, report rendering) is opaque to it.
//!
//! [`FnTask`] builds a task from an async closure, so small steps and test
//! doubles don't need a dedicated type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::value::ValueMap;

/// Error returned by a task's contract methods.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// The mapping handed to or produced by the task has the wrong shape.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The task body failed; the executor may retry it.
    #[error("{0}")]
    Execution(String),
}

impl TaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        TaskError::Execution(message.into())
    }
}

/// A pluggable unit of work.
#[async_trait]
pub trait Task: Send + Sync {
    /// Reject malformed inputs before the body runs. Accepts anything by default.
    fn validate_input(&self, _inputs: &ValueMap) -> Result<(), TaskError> {
        Ok(())
    }

    /// The task body.
    async fn run(&self, inputs: &ValueMap) -> Result<ValueMap, TaskError>;

    /// Reject a malformed result. Accepts anything by default.
    fn validate_output(&self, _outputs: &ValueMap) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Type alias for the async function behind a [`FnTask`].
///
/// Takes an owned copy of the inputs, returns the output mapping or error.
pub type TaskFn = Arc<
    dyn Fn(ValueMap) -> Pin<Box<dyn Future<Output = Result<ValueMap, TaskError>> + Send>>
        + Send
        + Sync,
>;

/// Type alias for a mapping validator.
pub type ValidatorFn = Arc<dyn Fn(&ValueMap) -> Result<(), TaskError> + Send + Sync>;

/// A task assembled from closures.
#[derive(Clone)]
pub struct FnTask {
    run_fn: TaskFn,
    input_validator: Option<ValidatorFn>,
    output_validator: Option<ValidatorFn>,
}

impl FnTask {
    /// Create a task from an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ValueMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ValueMap, TaskError>> + Send + 'static,
    {
        let run_fn: TaskFn = Arc::new(
            move |inputs| -> Pin<Box<dyn Future<Output = Result<ValueMap, TaskError>> + Send>> {
                Box::pin(f(inputs))
            },
        );
        Self {
            run_fn,
            input_validator: None,
            output_validator: None,
        }
    }

    /// Add an input validator.
    pub fn with_input_validator(
        mut self,
        f: impl Fn(&ValueMap) -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> Self {
        self.input_validator = Some(Arc::new(f));
        self
    }

    /// Add an output validator.
    pub fn with_output_validator(
        mut self,
        f: impl Fn(&ValueMap) -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> Self {
        self.output_validator = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for FnTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask")
            .field("validates_input", &self.input_validator.is_some())
            .field("validates_output", &self.output_validator.is_some())
            .finish()
    }
}

#[async_trait]
impl Task for FnTask {
    fn validate_input(&self, inputs: &ValueMap) -> Result<(), TaskError> {
        match &self.input_validator {
            Some(validate) => validate(inputs),
            None => Ok(()),
        }
    }

    async fn run(&self, inputs: &ValueMap) -> Result<ValueMap, TaskError> {
        (self.run_fn)(inputs.clone()).await
    }

    fn validate_output(&self, outputs: &ValueMap) -> Result<(), TaskError> {
        match &self.output_validator {
            Some(validate) => validate(outputs),
            None => Ok(()),
        }
    }
}

/// Helper for validators: fail unless every key is present.
pub fn require_keys(map: &ValueMap, keys: &[&str]) -> Result<(), TaskError> {
    let missing: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|k| !map.contains_key(*k))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TaskError::validation(format!(
            "missing required keys: {}",
            missing.join(", ")
        )))
    }
}

/// Execution counters kept per registered task.
///
/// Updated only when an execution returns a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStats {
    pub execution_count: u64,
    pub last_duration: Option<Duration>,
    pub last_result: Option<ValueMap>,
}
