//! Workflow definitions and their validation.
//!
//! A [`WorkflowDefinition`] is an ordered list of [`StepSpec`]s. Each step
//! names the agent that runs it, the namespace keys it reads and writes, and
//! the agents it depends on. Definitions are usually built from the
//! `[workflows.<name>]` section of the config file:
//!
//! ```toml
//! [workflows.daily_report]
//! description = "Fetch, analyse and report"
//!
//! [[workflows.daily_report.steps]]
//! agent = "DataFetcher"
//! outputs = ["raw_data"]
//!
//! [[workflows.daily_report.steps]]
//! agent = "Analyzer"
//! inputs = ["raw_data"]
//! outputs = ["analysis"]
//! depends_on = ["DataFetcher"]
//! ```

use std::collections::{HashMap, HashSet};

use entraflow_config::{StepSection, WorkflowSection};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the workflow; also the name of the task that runs it.
    pub agent_name: String,
    /// Namespace keys read by this step.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Namespace keys written by this step. Empty means the default key.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Agents that must have an outcome before this step starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StepSpec {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Namespace key used when no outputs are declared: `<agent>_output`, lowercased.
    pub fn default_output_key(&self) -> String {
        format!("{}_output", self.agent_name.to_lowercase())
    }

    /// Keys this step's result is written under.
    pub fn output_keys(&self) -> Vec<String> {
        if self.outputs.is_empty() {
            vec![self.default_output_key()]
        } else {
            self.outputs.clone()
        }
    }
}

impl From<&StepSection> for StepSpec {
    fn from(section: &StepSection) -> Self {
        Self {
            agent_name: section.agent.clone(),
            inputs: section.inputs.clone(),
            outputs: section.outputs.clone(),
            depends_on: section.depends_on.clone(),
        }
    }
}

/// A named, ordered set of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps,
        }
    }

    /// Build from a config descriptor.
    pub fn from_section(name: &str, section: &WorkflowSection) -> Self {
        Self::new(
            name,
            section.description.clone(),
            section.steps.iter().map(StepSpec::from).collect(),
        )
    }

    pub fn step(&self, agent_name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.agent_name == agent_name)
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.agent_name.clone()).collect()
    }

    /// Validate the workflow definition.
    ///
    /// Checks, each reported as its own error:
    /// - No duplicate agent names
    /// - All dependency references point to steps of this workflow
    /// - No cycles in the dependency graph
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.is_empty() {
            return Err(PipelineError::InvalidWorkflow(
                "Workflow name cannot be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.agent_name.is_empty() {
                return Err(PipelineError::InvalidWorkflow(format!(
                    "Workflow '{}' has a step with an empty agent name",
                    self.name
                )));
            }
            if !seen.insert(step.agent_name.as_str()) {
                return Err(PipelineError::DuplicateAgent {
                    workflow: self.name.clone(),
                    agent: step.agent_name.clone(),
                });
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(PipelineError::UnknownDependency {
                        agent: step.agent_name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.detect_cycles()
    }

    /// Depth-first cycle detection with per-node three-state marking.
    ///
    /// A node is only reported as cyclic when it is reached again while still
    /// on the current path. Nodes finished through one branch are skipped by
    /// the others, so shared subgraphs (diamonds) are not mistaken for cycles.
    fn detect_cycles(&self) -> Result<(), PipelineError> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.agent_name.as_str(), i))
            .collect();

        let mut marks = vec![Mark::Unvisited; self.steps.len()];
        let mut path = Vec::new();

        for start in 0..self.steps.len() {
            if marks[start] == Mark::Unvisited
                && let Some(cycle) = self.visit(start, &index, &mut marks, &mut path)
            {
                return Err(PipelineError::CircularDependency { agents: cycle });
            }
        }

        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        index: &HashMap<&str, usize>,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[node] = Mark::InProgress;
        path.push(node);

        for dep in &self.steps[node].depends_on {
            let Some(&next) = index.get(dep.as_str()) else {
                continue;
            };
            match marks[next] {
                Mark::Done => {}
                Mark::InProgress => {
                    // Report the path from the first occurrence back to itself.
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|&n| self.steps[n].agent_name.clone())
                        .collect();
                    cycle.push(self.steps[next].agent_name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(next, index, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}
