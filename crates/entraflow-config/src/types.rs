//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [orchestrator]                    # retry policy, critical steps, binding mode
//! [orchestrator.conditional_gate]   # advisory branch tagging
//! [state]                           # run snapshot directory
//! [logging]                         # tracing output
//! [workflows.daily_report]          # named workflow descriptors
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Maps to the full TOML config file. All sections are optional so that
/// partial configs (e.g., project-local overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntraflowConfig {
    /// Orchestrator behaviour.
    pub orchestrator: Option<OrchestratorSection>,

    /// Run-state persistence.
    pub state: Option<StateSection>,

    /// Tracing output.
    pub logging: Option<LoggingSection>,

    /// Workflow descriptors keyed by workflow name.
    pub workflows: BTreeMap<String, WorkflowSection>,
}

impl EntraflowConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale; workflows are merged by name.
    pub fn merge(&mut self, other: EntraflowConfig) {
        if other.orchestrator.is_some() {
            self.orchestrator = other.orchestrator;
        }

        if other.state.is_some() {
            self.state = other.state;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }

        for (name, workflow) in other.workflows {
            self.workflows.insert(name, workflow);
        }
    }

    /// Orchestrator section, or defaults when absent.
    pub fn orchestrator(&self) -> OrchestratorSection {
        self.orchestrator.clone().unwrap_or_default()
    }

    /// State section, or defaults when absent.
    pub fn state(&self) -> StateSection {
        self.state.clone().unwrap_or_default()
    }

    /// Logging section, or defaults when absent.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Check values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        let orchestrator = self.orchestrator();

        if std::time::Duration::try_from_secs_f64(orchestrator.retry_delay_secs).is_err() {
            return Err(ConfigError::Invalid {
                field: "orchestrator.retry_delay_secs".into(),
                message: format!(
                    "must be a non-negative number of seconds, got {}",
                    orchestrator.retry_delay_secs
                ),
            });
        }

        if let Some(gate) = &orchestrator.conditional_gate {
            if gate.step.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "orchestrator.conditional_gate.step".into(),
                    message: "cannot be empty".into(),
                });
            }
            if gate.critical_below > gate.heightened_below {
                return Err(ConfigError::Invalid {
                    field: "orchestrator.conditional_gate".into(),
                    message: format!(
                        "critical_below ({}) must not exceed heightened_below ({})",
                        gate.critical_below, gate.heightened_below
                    ),
                });
            }
        }

        for (name, workflow) in &self.workflows {
            for (idx, step) in workflow.steps.iter().enumerate() {
                if step.agent.is_empty() {
                    return Err(ConfigError::Invalid {
                        field: format!("workflows.{name}.steps[{idx}].agent"),
                        message: "cannot be empty".into(),
                    });
                }
            }
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// How a step's declared inputs are bound from the run namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputBinding {
    /// Keys missing from the namespace are omitted from the step's inputs.
    #[default]
    Lenient,
    /// A missing key fails the step before its task runs.
    Strict,
}

/// Orchestrator configuration (`[orchestrator]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Retries after the first attempt of each step.
    pub max_retries: u32,
    /// Base backoff delay in seconds; doubles on each retry.
    pub retry_delay_secs: f64,
    /// Steps whose exhausted failure aborts the whole run.
    pub critical_steps: Vec<String>,
    /// Binding mode for step inputs.
    pub input_binding: InputBinding,
    /// Run the steps of one level concurrently.
    pub parallel_levels: bool,
    /// Persist the terminal run state.
    pub persist_state: bool,
    /// Optional advisory branch tagging.
    pub conditional_gate: Option<ConditionalGateSection>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 2.0,
            critical_steps: Vec::new(),
            input_binding: InputBinding::Lenient,
            parallel_levels: false,
            persist_state: true,
            conditional_gate: None,
        }
    }
}

/// Conditional gate configuration (`[orchestrator.conditional_gate]`).
///
/// The named step's output is searched for a numeric `signal` (dot path) and
/// compared against the two thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionalGateSection {
    pub step: String,
    pub signal: String,
    pub critical_below: f64,
    pub heightened_below: f64,
}

impl Default for ConditionalGateSection {
    fn default() -> Self {
        Self {
            step: "Analyzer".into(),
            signal: "sentiment.news.overall_sentiment".into(),
            critical_below: -0.5,
            heightened_below: -0.3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State / Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Run-state persistence configuration (`[state]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// Directory holding one subdirectory of snapshots per workflow.
    pub dir: PathBuf,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/outputs/state"),
        }
    }
}

/// Logging configuration (`[logging]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter level (`RUST_LOG` takes precedence when set).
    pub level: String,
    /// Emit human-readable logs to stderr.
    pub console: bool,
    /// Use JSON formatting for the console layer.
    pub json: bool,
    /// Daily-rotated JSON log file. Disabled when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            console: true,
            json: false,
            file: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflows
// ─────────────────────────────────────────────────────────────────────────────

/// A named workflow descriptor (`[workflows.<name>]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub description: String,
    pub steps: Vec<StepSection>,
}

/// One step of a workflow descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSection {
    /// Name of the registered task that runs this step.
    pub agent: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}
