//! Dependency-driven workflow scheduler for EntraFlow.
//!
//! A workflow is a set of named steps ("agents") that declare the namespace
//! keys they read and write and the agents they depend on. The scheduler
//! validates the graph, groups the steps into execution levels, runs each
//! step through its registered [`Task`] with bounded exponential-backoff
//! retry, and persists the terminal state of every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Orchestrator                                           │
//! │  - Walks the execution plan level by level              │
//! │  - Binds inputs, merges outputs at level boundaries     │
//! │  - Critical-failure escalation + conditional gate       │
//! ├───────────────────┬──────────────────┬──────────────────┤
//! │ DependencyResolver│ TaskExecutor     │ StateStore       │
//! │ validate + levels │ validate + retry │ JSON snapshots   │
//! └───────────────────┴──────────────────┴──────────────────┘
//! ```

pub mod definition;
pub mod error;
pub mod executor;
pub mod namespace;
pub mod orchestrator;
pub mod resolver;
pub mod state;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod value;

pub use definition::{StepSpec, WorkflowDefinition};
pub use entraflow_config::InputBinding;
pub use error::{ErrorKind, PipelineError, Result};
pub use executor::{RetryPolicy, TaskExecutor, TaskOutcome};
pub use namespace::{LevelWrites, Namespace};
pub use orchestrator::{
    ConditionalGate, Orchestrator, OrchestratorConfig, RunSummary, WorkflowInfo,
};
pub use resolver::{DependencyResolver, ExecutionPlan};
pub use state::{BranchLabel, RunState, RunStatus, new_run_id};
pub use store::{FileStateStore, MemoryStateStore, RunSnapshot, SnapshotSummary, StateStore};
pub use task::{FnTask, Task, TaskError, TaskStats, require_keys};
pub use telemetry::init_tracing;
pub use value::{Value, ValueMap, lookup_path, map_from_json};
