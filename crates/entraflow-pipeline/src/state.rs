//! Run state: what one execution of a workflow did.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::namespace::Namespace;

/// Lifecycle of a run. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Advisory tag set from the conditional gate step's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchLabel {
    CriticalAlert,
    HeightenedMonitoring,
    Normal,
}

impl std::fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BranchLabel::CriticalAlert => "critical_alert",
            BranchLabel::HeightenedMonitoring => "heightened_monitoring",
            BranchLabel::Normal => "normal",
        };
        f.write_str(s)
    }
}

/// Everything recorded about one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub workflow_name: String,
    pub run_id: String,
    pub status: RunStatus,
    pub namespace: Namespace,
    /// Agents that produced a result, in completion order.
    pub completed: Vec<String>,
    /// Agents whose step failed, in failure order.
    pub failed: Vec<String>,
    /// Failure message per failed agent.
    #[serde(default)]
    pub step_errors: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub execution_time_secs: Option<f64>,
    pub conditional_branch: Option<BranchLabel>,
    /// Why the run failed, when it did.
    pub error: Option<String>,
    /// Where the terminal snapshot was written. Never persisted itself.
    #[serde(skip)]
    pub snapshot_location: Option<String>,
}

impl RunState {
    /// A fresh run in the `Running` state.
    pub fn start(workflow_name: impl Into<String>, run_id: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            run_id: run_id.into(),
            status: RunStatus::Running,
            namespace,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Record a step failure.
    pub fn record_failure(&mut self, agent: &str, message: impl Into<String>) {
        self.failed.push(agent.to_string());
        self.step_errors.insert(agent.to_string(), message.into());
    }

    /// Move to a terminal status and stamp the end time.
    ///
    /// Has no effect once the run is already terminal.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        let ended = Utc::now();
        self.status = status;
        self.error = error;
        self.execution_time_secs = self
            .started_at
            .map(|start| (ended - start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0);
        self.ended_at = Some(ended);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Generate a run id: `YYYYmmdd_HHMMSS_<8 hex>`.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}
