//! Error types for the workflow scheduler.

use thiserror::Error;

use crate::task::TaskError;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step's inputs or outputs were malformed. Never retried.
    #[error("[{agent}] Validation failed: {message}")]
    Validation { agent: String, message: String },

    /// A step failed on every attempt.
    #[error("[{agent}] Execution failed after {attempts} attempts: {source}")]
    TaskFailed {
        agent: String,
        attempts: u32,
        #[source]
        source: TaskError,
    },

    /// Workflow not found.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A workflow with this name is already registered.
    #[error("Workflow already registered: {0}")]
    WorkflowExists(String),

    /// Invalid workflow definition.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Two steps in one workflow share an agent name.
    #[error("Duplicate agent name in workflow '{workflow}': {agent}")]
    DuplicateAgent { workflow: String, agent: String },

    /// A step depends on an agent that is not part of the workflow.
    #[error("Agent '{agent}' depends on unknown agent '{dependency}'")]
    UnknownDependency { agent: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected: {}", agents.join(" -> "))]
    CircularDependency { agents: Vec<String> },

    /// No task is registered under this agent name.
    #[error("Unknown agent: {0}")]
    UnknownTask(String),

    /// Snapshot storage error.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO error while reading or writing snapshots.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration values that parse but cannot be used.
    #[error("Configuration error: {0}")]
    Config(#[from] entraflow_config::ConfigError),

    /// Failed to initialize tracing output.
    #[error("Initialization failed: {0}")]
    InitFailed(String),
}

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed step input or output.
    Validation,
    /// Task body failed and retries were exhausted.
    Task,
    /// Workflow could not be planned or started.
    Scheduling,
    /// Snapshot save or load failed.
    Persistence,
    /// Process-level setup failed.
    Init,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation { .. } => ErrorKind::Validation,
            PipelineError::TaskFailed { .. } => ErrorKind::Task,
            PipelineError::WorkflowNotFound(_)
            | PipelineError::WorkflowExists(_)
            | PipelineError::InvalidWorkflow(_)
            | PipelineError::DuplicateAgent { .. }
            | PipelineError::UnknownDependency { .. }
            | PipelineError::CircularDependency { .. }
            | PipelineError::UnknownTask(_) => ErrorKind::Scheduling,
            PipelineError::Persistence(_) | PipelineError::Io(_) | PipelineError::Serde(_) => {
                ErrorKind::Persistence
            }
            PipelineError::Config(_) | PipelineError::InitFailed(_) => ErrorKind::Init,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let validation = PipelineError::Validation {
            agent: "A".into(),
            message: "missing key".into(),
        };
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert!(!validation.is_retryable());

        let exhausted = PipelineError::TaskFailed {
            agent: "A".into(),
            attempts: 3,
            source: TaskError::Execution("boom".into()),
        };
        assert_eq!(exhausted.kind(), ErrorKind::Task);
        assert!(exhausted.is_retryable());

        let cycle = PipelineError::CircularDependency {
            agents: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(cycle.kind(), ErrorKind::Scheduling);
        assert_eq!(cycle.to_string(), "Circular dependency detected: a -> b -> a");

        let persistence = PipelineError::Persistence("disk full".into());
        assert_eq!(persistence.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_task_failed_message_wraps_last_error() {
        let err = PipelineError::TaskFailed {
            agent: "Fetcher".into(),
            attempts: 4,
            source: TaskError::Execution("timeout".into()),
        };
        assert_eq!(
            err.to_string(),
            "[Fetcher] Execution failed after 4 attempts: timeout"
        );
    }
}
