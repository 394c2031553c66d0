//! Orchestrator: walks an execution plan and drives every step of a run.
//!
//! For each level of the plan the orchestrator binds every step's inputs
//! from the namespace as it stood when the level started, runs the steps
//! (one after another, or concurrently with `parallel_levels`), and merges
//! their outputs into the namespace once the level is done. A failed step
//! in the critical set aborts the run; any other failure is recorded and
//! the run carries on.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use entraflow_config::{ConditionalGateSection, EntraflowConfig, InputBinding, OrchestratorSection};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::definition::{StepSpec, WorkflowDefinition};
use crate::error::{PipelineError, Result};
use crate::executor::{RetryPolicy, TaskExecutor, TaskOutcome};
use crate::namespace::{LevelWrites, Namespace};
use crate::resolver::DependencyResolver;
use crate::state::{BranchLabel, RunState, RunStatus, new_run_id};
use crate::store::{FileStateStore, SnapshotSummary, StateStore};
use crate::task::{Task, TaskStats};
use crate::value::{Value, ValueMap, lookup_path};

/// Tags a run from one step's numeric output signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalGate {
    /// Agent whose result is inspected.
    pub step: String,
    /// Dot path of the signal inside the result.
    pub signal: String,
    pub critical_below: f64,
    pub heightened_below: f64,
}

impl ConditionalGate {
    pub fn new(step: impl Into<String>, signal: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            signal: signal.into(),
            critical_below: -0.5,
            heightened_below: -0.3,
        }
    }

    pub fn with_thresholds(mut self, critical_below: f64, heightened_below: f64) -> Self {
        self.critical_below = critical_below;
        self.heightened_below = heightened_below;
        self
    }

    /// Label for a step result, or `None` when the signal is absent or not a number.
    pub fn evaluate(&self, result: &ValueMap) -> Option<BranchLabel> {
        let score = lookup_path(result, &self.signal)?.as_f64()?;
        Some(if score < self.critical_below {
            BranchLabel::CriticalAlert
        } else if score < self.heightened_below {
            BranchLabel::HeightenedMonitoring
        } else {
            BranchLabel::Normal
        })
    }
}

impl From<&ConditionalGateSection> for ConditionalGate {
    fn from(section: &ConditionalGateSection) -> Self {
        Self::new(&section.step, &section.signal)
            .with_thresholds(section.critical_below, section.heightened_below)
    }
}

/// Run-wide settings for an [`Orchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    /// Agents whose failure aborts the run.
    pub critical_steps: HashSet<String>,
    pub input_binding: InputBinding,
    /// Run the steps of a level concurrently.
    pub parallel_levels: bool,
    /// Save the terminal state of every run.
    pub persist_state: bool,
    pub conditional_gate: Option<ConditionalGate>,
    /// Run summaries kept in memory; the oldest are dropped first.
    pub history_limit: usize,
}

/// Default for [`OrchestratorConfig::history_limit`].
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            critical_steps: HashSet::new(),
            input_binding: InputBinding::Lenient,
            parallel_levels: false,
            persist_state: true,
            conditional_gate: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_critical_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input_binding(mut self, binding: InputBinding) -> Self {
        self.input_binding = binding;
        self
    }

    pub fn with_parallel_levels(mut self, parallel: bool) -> Self {
        self.parallel_levels = parallel;
        self
    }

    pub fn with_persist_state(mut self, persist: bool) -> Self {
        self.persist_state = persist;
        self
    }

    pub fn with_conditional_gate(mut self, gate: ConditionalGate) -> Self {
        self.conditional_gate = Some(gate);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn is_critical(&self, agent_name: &str) -> bool {
        self.critical_steps.contains(agent_name)
    }
}

impl From<&OrchestratorSection> for OrchestratorConfig {
    fn from(section: &OrchestratorSection) -> Self {
        Self {
            retry: RetryPolicy::from(section),
            critical_steps: section.critical_steps.iter().cloned().collect(),
            input_binding: section.input_binding,
            parallel_levels: section.parallel_levels,
            persist_state: section.persist_state,
            conditional_gate: section.conditional_gate.as_ref().map(ConditionalGate::from),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// One entry of the orchestrator's execution history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub workflow_name: String,
    pub run_id: String,
    pub status: RunStatus,
    pub execution_time_secs: Option<f64>,
}

/// Description of a registered workflow and its plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub execution_order: Vec<Vec<String>>,
    pub total_levels: usize,
}

/// Drives workflow runs over a registry of tasks.
pub struct Orchestrator {
    config: OrchestratorConfig,
    resolver: DependencyResolver,
    tasks: RwLock<HashMap<String, TaskExecutor>>,
    store: Arc<dyn StateStore>,
    history: Mutex<VecDeque<RunSummary>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn StateStore>) -> Self {
        info!(
            "Orchestrator initialized (max_retries={}, parallel_levels={}, binding={:?})",
            config.retry.max_retries, config.parallel_levels, config.input_binding
        );
        Self {
            config,
            resolver: DependencyResolver::new(),
            tasks: RwLock::new(HashMap::new()),
            store,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Build an orchestrator from a loaded config file.
    ///
    /// Snapshots go to a [`FileStateStore`] under `[state].dir`. Unusable
    /// orchestrator settings are an error; workflows that fail validation are
    /// logged and skipped.
    pub fn from_config<I, S>(config: &EntraflowConfig, tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Arc<dyn Task>)>,
        S: Into<String>,
    {
        config.validate()?;

        let store = Arc::new(FileStateStore::new(config.state().dir));
        let orchestrator = Self::new(OrchestratorConfig::from(&config.orchestrator()), store);

        for (name, task) in tasks {
            orchestrator.register_task(name, task);
        }

        for (name, section) in &config.workflows {
            let definition = WorkflowDefinition::from_section(name, section);
            if let Err(e) = orchestrator.register_workflow(definition) {
                error!("Failed to load workflow '{}': {}", name, e);
            }
        }

        Ok(orchestrator)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register a task under an agent name, replacing any previous one.
    pub fn register_task(&self, name: impl Into<String>, task: Arc<dyn Task>) {
        let name = name.into();
        debug!("Registered task '{}'", name);
        self.tasks
            .write()
            .insert(name.clone(), TaskExecutor::new(name, task));
    }

    /// Registered agent names, sorted.
    pub fn registered_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<()> {
        self.resolver.register(definition)
    }

    /// Execute a workflow from start to finish.
    ///
    /// Returns `Err` only when the run cannot start: unknown workflow, an
    /// unplannable graph, or a step with no registered task. Step failures
    /// are reported through the returned [`RunState`].
    pub async fn execute_workflow(&self, name: &str, initial_inputs: ValueMap) -> Result<RunState> {
        let definition = self.resolver.get(name)?;
        let plan = self.resolver.execution_plan(name)?;
        let levels = self.bind_executors(&definition, plan.levels())?;

        let mut state = RunState::start(name, new_run_id(), Namespace::from(initial_inputs));

        info!("Starting workflow '{}' (run {})", name, state.run_id);
        info!("Execution plan: {} level(s)", plan.len());
        for (i, level) in plan.iter().enumerate() {
            info!("  Level {}: {}", i + 1, level.join(", "));
        }

        let total = levels.len();
        for (i, level) in levels.iter().enumerate() {
            info!("Executing level {}/{}", i + 1, total);

            let mut writes = LevelWrites::new();
            let abort = if self.config.parallel_levels {
                self.run_level_parallel(level, &mut state, &mut writes).await
            } else {
                self.run_level_sequential(level, &mut state, &mut writes).await
            };
            state.namespace.merge(writes);

            if let Some(reason) = abort {
                state.finish(RunStatus::Failed, Some(reason));
                break;
            }
        }

        state.finish(RunStatus::Completed, None);
        let elapsed = state.execution_time_secs.unwrap_or_default();
        match state.status {
            RunStatus::Failed => error!(
                "Workflow '{}' failed after {:.2}s: {}",
                name,
                elapsed,
                state.error.as_deref().unwrap_or("unknown error")
            ),
            _ => info!(
                "Workflow '{}' completed in {:.2}s ({} succeeded, {} failed)",
                name,
                elapsed,
                state.completed.len(),
                state.failed.len()
            ),
        }

        if self.config.persist_state {
            match self.store.save(name, &state.run_id, &state) {
                Ok(location) => {
                    debug!("Run {} saved to {}", state.run_id, location);
                    state.snapshot_location = Some(location);
                }
                Err(e) => warn!("Failed to save state for run {}: {}", state.run_id, e),
            }
        }

        self.record_history(RunSummary {
            workflow_name: name.to_string(),
            run_id: state.run_id.clone(),
            status: state.status,
            execution_time_secs: state.execution_time_secs,
        });

        Ok(state)
    }

    /// Run one task outside of any workflow, under the configured retry policy.
    pub async fn execute_task_standalone(
        &self,
        agent_name: &str,
        inputs: &ValueMap,
    ) -> Result<TaskOutcome> {
        let executor = self.executor(agent_name)?;
        info!("Executing task standalone: {}", agent_name);
        executor.execute(inputs, &self.config.retry).await
    }

    pub fn get_execution_plan_info(&self, name: &str) -> Result<WorkflowInfo> {
        let definition = self.resolver.get(name)?;
        let plan = self.resolver.execution_plan(name)?;
        Ok(WorkflowInfo {
            name: definition.name.clone(),
            description: definition.description.clone(),
            steps: definition.agent_names(),
            execution_order: plan.levels().to_vec(),
            total_levels: plan.len(),
        })
    }

    pub fn list_workflows(&self) -> Vec<String> {
        self.resolver.list()
    }

    pub fn workflow_description(&self, name: &str) -> Result<String> {
        Ok(self.resolver.get(name)?.description.clone())
    }

    /// Execution counters of one task.
    pub fn task_status(&self, agent_name: &str) -> Result<TaskStats> {
        Ok(self.executor(agent_name)?.stats())
    }

    /// Execution counters of every registered task.
    pub fn all_task_status(&self) -> BTreeMap<String, TaskStats> {
        self.tasks
            .read()
            .iter()
            .map(|(name, exec)| (name.clone(), exec.stats()))
            .collect()
    }

    pub fn reset_all_tasks(&self) {
        for executor in self.tasks.read().values() {
            executor.reset_stats();
        }
        info!("All task counters reset");
    }

    /// The most recent runs executed by this orchestrator, oldest first.
    ///
    /// At most `history_limit` entries are kept.
    pub fn history(&self) -> Vec<RunSummary> {
        self.history.lock().iter().cloned().collect()
    }

    fn record_history(&self, summary: RunSummary) {
        let mut history = self.history.lock();
        history.push_back(summary);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    pub fn load_run(&self, workflow_name: &str, run_id: Option<&str>) -> Result<RunState> {
        self.store.load(workflow_name, run_id)
    }

    pub fn list_runs(&self, workflow_name: Option<&str>) -> Result<Vec<SnapshotSummary>> {
        self.store.list(workflow_name)
    }

    fn executor(&self, agent_name: &str) -> Result<TaskExecutor> {
        self.tasks
            .read()
            .get(agent_name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownTask(agent_name.to_string()))
    }

    /// Pair every planned step with its executor, failing on the first
    /// step that has no registered task.
    fn bind_executors<'a>(
        &self,
        definition: &'a WorkflowDefinition,
        levels: &[Vec<String>],
    ) -> Result<Vec<Vec<(&'a StepSpec, TaskExecutor)>>> {
        levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .map(|agent| {
                        let step = definition.step(agent).ok_or_else(|| {
                            PipelineError::InvalidWorkflow(format!(
                                "step configuration not found for agent: {agent}"
                            ))
                        })?;
                        Ok((step, self.executor(agent)?))
                    })
                    .collect()
            })
            .collect()
    }

    async fn run_level_sequential(
        &self,
        level: &[(&StepSpec, TaskExecutor)],
        state: &mut RunState,
        writes: &mut LevelWrites,
    ) -> Option<String> {
        for (step, executor) in level {
            let result = self.run_step(step, executor, &state.namespace).await;
            if let Some(reason) = self.record_outcome(step, result, state, writes) {
                return Some(reason);
            }
        }
        None
    }

    async fn run_level_parallel(
        &self,
        level: &[(&StepSpec, TaskExecutor)],
        state: &mut RunState,
        writes: &mut LevelWrites,
    ) -> Option<String> {
        let namespace = &state.namespace;
        let results = join_all(
            level
                .iter()
                .map(move |(step, executor)| self.run_step(step, executor, namespace)),
        )
        .await;

        let mut abort = None;
        for ((step, _), result) in level.iter().zip(results) {
            if let Some(reason) = self.record_outcome(step, result, state, writes)
                && abort.is_none()
            {
                abort = Some(reason);
            }
        }
        abort
    }

    async fn run_step(
        &self,
        step: &StepSpec,
        executor: &TaskExecutor,
        namespace: &Namespace,
    ) -> Result<TaskOutcome> {
        info!("Executing agent: {}", step.agent_name);

        let inputs = match namespace.bind(&step.inputs, self.config.input_binding) {
            Ok(inputs) => inputs,
            Err(missing) => {
                return Err(PipelineError::Validation {
                    agent: step.agent_name.clone(),
                    message: format!("missing inputs: {}", missing.join(", ")),
                });
            }
        };
        let omitted = omitted_inputs(&step.inputs, &inputs);
        if !omitted.is_empty() {
            warn!(
                "[{}] Inputs not available, omitted: {}",
                step.agent_name,
                omitted.join(", ")
            );
        }

        executor.execute(&inputs, &self.config.retry).await
    }

    /// Record a step's outcome. Returns the abort reason when a critical step failed.
    fn record_outcome(
        &self,
        step: &StepSpec,
        result: Result<TaskOutcome>,
        state: &mut RunState,
        writes: &mut LevelWrites,
    ) -> Option<String> {
        let agent = step.agent_name.as_str();
        match result {
            Ok(outcome) => {
                if let Some(gate) = &self.config.conditional_gate
                    && gate.step == agent
                {
                    self.apply_gate(gate, &outcome.result, state);
                }
                writes.stage(agent, &step.output_keys(), &Value::Map(outcome.result));
                state.completed.push(agent.to_string());
                None
            }
            Err(e) => {
                error!("Agent {} failed: {}", agent, e);
                state.record_failure(agent, e.to_string());
                if self.config.is_critical(agent) {
                    Some(format!("Critical agent '{agent}' failed: {e}"))
                } else {
                    None
                }
            }
        }
    }

    fn apply_gate(&self, gate: &ConditionalGate, result: &ValueMap, state: &mut RunState) {
        let Some(label) = gate.evaluate(result) else {
            debug!(
                "Conditional gate: no numeric '{}' in {} result",
                gate.signal, gate.step
            );
            return;
        };

        match label {
            BranchLabel::CriticalAlert => {
                warn!("Critical signal from {} - triggering alert branch", gate.step)
            }
            BranchLabel::HeightenedMonitoring => {
                warn!("Negative signal from {} - heightened monitoring", gate.step)
            }
            BranchLabel::Normal => info!("Conditional check from {}: normal", gate.step),
        }
        state.conditional_branch = Some(label);
    }
}

/// Declared inputs that did not make it into `bound`, each named once.
fn omitted_inputs<'a>(declared: &'a [String], bound: &ValueMap) -> Vec<&'a str> {
    let mut omitted: Vec<&str> = Vec::new();
    for key in declared {
        if !bound.contains_key(key) && !omitted.contains(&key.as_str()) {
            omitted.push(key);
        }
    }
    omitted
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("workflows", &self.resolver.list())
            .field("tasks", &self.registered_tasks())
            .finish()
    }
}
