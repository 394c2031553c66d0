//! Workflow registry and execution planning.
//!
//! The [`DependencyResolver`] owns every registered [`WorkflowDefinition`]
//! and turns one into an [`ExecutionPlan`]: an ordered list of levels where
//! each level holds the steps whose dependencies are all satisfied by earlier
//! levels.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::definition::WorkflowDefinition;
use crate::error::{PipelineError, Result};

/// Steps grouped into dependency levels.
///
/// Within a level, steps keep their declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    levels: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Compute the plan for a definition.
    ///
    /// Each pass collects every unscheduled step whose dependencies are all
    /// scheduled. A pass that collects nothing while steps remain means the
    /// graph has a cycle; the remaining agents are reported.
    pub fn compute(definition: &WorkflowDefinition) -> Result<Self> {
        let mut scheduled: HashSet<&str> = HashSet::new();
        let mut levels = Vec::new();

        while scheduled.len() < definition.steps.len() {
            let ready: Vec<&str> = definition
                .steps
                .iter()
                .filter(|step| !scheduled.contains(step.agent_name.as_str()))
                .filter(|step| {
                    step.depends_on
                        .iter()
                        .all(|dep| scheduled.contains(dep.as_str()))
                })
                .map(|step| step.agent_name.as_str())
                .collect();

            if ready.is_empty() {
                let remaining = definition
                    .steps
                    .iter()
                    .filter(|step| !scheduled.contains(step.agent_name.as_str()))
                    .map(|step| step.agent_name.clone())
                    .collect();
                return Err(PipelineError::CircularDependency { agents: remaining });
            }

            scheduled.extend(ready.iter().copied());
            levels.push(ready.into_iter().map(String::from).collect());
        }

        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Zero-based level index of an agent.
    pub fn level_of(&self, agent_name: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|a| a == agent_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &[String]> {
        self.levels.iter().map(Vec::as_slice)
    }

    pub fn into_levels(self) -> Vec<Vec<String>> {
        self.levels
    }
}

/// Registry of validated workflows.
///
/// Definitions are immutable once registered; plans are computed on first
/// request and cached.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    plans: RwLock<HashMap<String, Arc<ExecutionPlan>>>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a workflow.
    ///
    /// Fails if the definition is invalid or the name is taken.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<()> {
        definition.validate()?;

        let mut workflows = self.workflows.write();
        if workflows.contains_key(&definition.name) {
            return Err(PipelineError::WorkflowExists(definition.name));
        }

        info!(
            "Registered workflow '{}' with {} steps",
            definition.name,
            definition.steps.len()
        );
        workflows.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<WorkflowDefinition>> {
        self.workflows
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::WorkflowNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.read().contains_key(name)
    }

    /// Registered workflow names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Execution plan for a registered workflow.
    pub fn execution_plan(&self, name: &str) -> Result<Arc<ExecutionPlan>> {
        if let Some(plan) = self.plans.read().get(name) {
            return Ok(plan.clone());
        }

        let definition = self.get(name)?;
        let plan = Arc::new(ExecutionPlan::compute(&definition)?);
        debug!(
            "Computed plan for '{}': {} level(s) {:?}",
            name,
            plan.len(),
            plan.levels()
        );

        self.plans
            .write()
            .insert(name.to_string(), plan.clone());
        Ok(plan)
    }
}
