//! The tool-synthesis state machine.
//!
//! Per request: analyze → plan → for each subtask (search → reuse or
//! generate → safety check → execute → register) → aggregate → format.
//! Regeneration is a bounded loop over `generation_attempt`, shared by
//! safety and execution failures.

use super::analysis;
use super::generator::{self, Attempt};
use super::planner;
use super::routing;
use super::state::{Step, WorkflowState};
use crate::config::SelfToolConfig;
use crate::directory::ToolDirectory;
use crate::inference::LanguageModel;
use crate::policy::{self, PolicyAnalyzer};
use crate::sandbox::{ConstrainedExecutor, ExecutionFault, SandboxLimits};
use crate::types::{SafetyStatus, TaskResult, ToolSpec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Engine knobs and the two pure services.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Total generations per subtask, across safety and execution retries.
    pub max_generation_attempts: u32,
    pub policy: PolicyAnalyzer,
    pub executor: ConstrainedExecutor,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::from_config(&SelfToolConfig::default())
    }
}

impl WorkflowConfig {
    pub fn from_config(config: &SelfToolConfig) -> Self {
        Self {
            max_generation_attempts: config.max_generation_attempts.max(1),
            policy: PolicyAnalyzer::from_config(config),
            executor: ConstrainedExecutor::new(SandboxLimits::from_config(config)),
        }
    }
}

pub struct WorkflowEngine {
    llm: Arc<dyn LanguageModel>,
    directory: Arc<dyn ToolDirectory>,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        directory: Arc<dyn ToolDirectory>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            llm,
            directory,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run one request to completion. Never fails; problems end up in
    /// per-subtask results or `state.error`.
    pub async fn run(&self, user_request: &str) -> WorkflowState {
        let mut state = WorkflowState::new(user_request);
        let mut step = Step::Analyze;
        info!("Request {} started", state.request_id);

        loop {
            state.enter(step);
            debug!("Step: {}", step);
            step = match step {
                Step::Analyze => self.analyze(&mut state).await,
                Step::PlanTasks => self.plan_tasks(&mut state).await,
                Step::PrepareTask => self.prepare_task(&mut state),
                Step::Search => self.search(&mut state).await,
                Step::UseExisting => self.use_existing(&mut state).await,
                Step::Generate => self.generate(&mut state).await,
                Step::SafetyCheck => self.safety_check(&mut state),
                Step::Execute => self.execute(&mut state).await,
                Step::Register => self.register(&mut state).await,
                Step::Regenerate => self.regenerate(&mut state),
                Step::Reject => self.reject(&mut state),
                Step::Fail => self.fail(&mut state),
                Step::SaveResult => self.save_result(&mut state),
                Step::Aggregate => self.aggregate(&mut state),
                Step::FormatResponse => self.format_response(&mut state).await,
                Step::End => break,
            };
        }

        info!(
            "Request {} finished after {} steps",
            state.request_id,
            state.trace.len()
        );
        state
    }

    // -----------------------------------------------------------------------
    // Request level
    // -----------------------------------------------------------------------

    async fn analyze(&self, state: &mut WorkflowState) -> Step {
        info!("Analyzing request: {}", state.user_request);
        let analysis = analysis::analyze(self.llm.as_ref(), &state.user_request).await;

        state.need_tool = analysis.need_tool;
        state.task_description = analysis.task_description;
        state.task_category = analysis.task_category;

        if !state.need_tool {
            state.response = if analysis.direct_answer.is_empty() {
                analysis::reply(self.llm.as_ref(), &state.user_request)
                    .await
                    .unwrap_or_default()
            } else {
                analysis.direct_answer
            };
            info!("No tool needed, answering directly");
        }
        routing::after_analyze(state)
    }

    async fn plan_tasks(&self, state: &mut WorkflowState) -> Step {
        match planner::plan(
            self.llm.as_ref(),
            &state.user_request,
            &state.task_description,
            state.task_category,
        )
        .await
        {
            Ok(tasks) => {
                state.task_list = tasks;
                state.current_task_index = 0;
                state.task_results.clear();
                Step::PrepareTask
            }
            Err(e) => {
                error!("Cannot proceed: {}", e);
                state.error = Some(e.to_string());
                Step::End
            }
        }
    }

    fn aggregate(&self, state: &mut WorkflowState) -> Step {
        state.aggregated = state
            .task_results
            .iter()
            .map(aggregate_line)
            .collect::<Vec<_>>()
            .join("\n");
        info!("Aggregated results:\n{}", state.aggregated);
        Step::FormatResponse
    }

    async fn format_response(&self, state: &mut WorkflowState) -> Step {
        state.response =
            analysis::polish(self.llm.as_ref(), &state.user_request, &state.aggregated).await;
        Step::End
    }

    // -----------------------------------------------------------------------
    // Subtask level
    // -----------------------------------------------------------------------

    fn prepare_task(&self, state: &mut WorkflowState) -> Step {
        let total = state.task_list.len();
        match state.begin_task() {
            Some(task) => {
                info!("Subtask {}/{}: {}", task.id, total, task.description);
                Step::Search
            }
            None => Step::Aggregate,
        }
    }

    async fn search(&self, state: &mut WorkflowState) -> Step {
        match self
            .directory
            .lookup_by_category_keywords(&state.task_description, state.task_category)
            .await
        {
            Ok(Some(tool)) => {
                info!("Reusing registered tool '{}'", tool.name);
                state.matched_tool = Some(tool);
            }
            Ok(None) => info!("No reusable tool, generating one"),
            Err(e) => warn!("Tool lookup unavailable, generating instead: {}", e),
        }
        routing::after_search(state)
    }

    async fn use_existing(&self, state: &mut WorkflowState) -> Step {
        let Some(tool) = state.matched_tool.clone() else {
            return Step::Generate;
        };

        // Policy may have tightened since the tool was stored.
        let issues = self.config.policy.check(&tool.code);
        if !issues.is_empty() {
            warn!("Stored tool '{}' no longer passes the safety policy", tool.name);
            state.execution_error = Some(format!(
                "stored tool '{}' no longer passes the safety policy:\n{}",
                tool.name,
                policy::summarize(&issues)
            ));
            state.safety_issues = issues;
            state.safety_status = SafetyStatus::Failed;
            return Step::SaveResult;
        }
        state.safety_status = SafetyStatus::Passed;

        match self.run_sandboxed(&tool, state).await {
            Ok(output) => {
                info!("Tool '{}' returned: {}", tool.name, output);
                state.execution_result = Some(output);
            }
            Err(fault) => {
                warn!("Stored tool '{}' failed: {}", tool.name, fault);
                state.execution_error = Some(fault.to_string());
            }
        }
        Step::SaveResult
    }

    async fn generate(&self, state: &mut WorkflowState) -> Step {
        state.begin_attempt();
        state.generation_attempt += 1;
        info!(
            "Generation attempt {}/{}",
            state.generation_attempt, self.config.max_generation_attempts
        );

        let allowed = self.config.executor.module_names();
        let forbidden = self.config.policy.denied_names();
        let attempt = Attempt {
            task_description: &state.task_description,
            category: state.task_category,
            feedback: &state.generation_feedback,
            number: state.generation_attempt,
            allowed_modules: &allowed,
            forbidden: &forbidden,
        };

        match generator::generate(self.llm.as_ref(), &attempt).await {
            Ok(spec) => state.generated_spec = Some(spec),
            Err(e) => {
                warn!("Generation produced no usable spec: {}", e);
                state.generated_spec = None;
                state.generation_error = Some(e.to_string());
            }
        }
        Step::SafetyCheck
    }

    fn safety_check(&self, state: &mut WorkflowState) -> Step {
        match &state.generated_spec {
            None => {
                state.safety_status = SafetyStatus::Failed;
                state.safety_issues.clear();
            }
            Some(spec) => {
                let issues = self.config.policy.check(&spec.code);
                if issues.is_empty() {
                    info!("Safety check passed for '{}'", spec.name);
                    state.safety_status = SafetyStatus::Passed;
                    state.safety_issues.clear();
                } else {
                    warn!("Safety check found {} issue(s) in '{}'", issues.len(), spec.name);
                    for issue in &issues {
                        warn!("  {}", issue);
                    }
                    state.safety_status = SafetyStatus::Failed;
                    state.safety_issues = issues;
                }
            }
        }
        routing::after_safety(state, self.config.max_generation_attempts)
    }

    async fn execute(&self, state: &mut WorkflowState) -> Step {
        let Some(spec) = state.generated_spec.clone() else {
            state.execution_error = Some("no tool spec to execute".to_string());
            return routing::after_execute(state, self.config.max_generation_attempts);
        };

        match self.run_sandboxed(&spec, state).await {
            Ok(output) => {
                info!(
                    "Tool '{}' returned in {:.3}ms: {}",
                    spec.name, state.execution_time_ms, output
                );
                state.execution_result = Some(output);
            }
            Err(fault) => {
                warn!("Tool '{}' failed: {}", spec.name, fault);
                state.execution_error = Some(fault.to_string());
            }
        }
        routing::after_execute(state, self.config.max_generation_attempts)
    }

    async fn register(&self, state: &mut WorkflowState) -> Step {
        let Some(spec) = state.generated_spec.clone() else {
            return Step::SaveResult;
        };

        match self.directory.persist_as_file(&spec).await {
            Ok(path) => state.tool_file = Some(path.display().to_string()),
            Err(e) => warn!("Could not write audit copy of '{}': {}", spec.name, e),
        }

        match self.directory.register(&spec).await {
            Ok(registration) => {
                state.tool_registered = registration.stored;
                state.tool_cached = registration.cached;
            }
            Err(e) => warn!(
                "Tool directory unavailable, '{}' will not be reusable: {}",
                spec.name, e
            ),
        }
        info!(
            "Tool '{}': stored={} cached={} file={}",
            spec.name,
            state.tool_registered,
            state.tool_cached,
            state.tool_file.as_deref().unwrap_or("-")
        );
        Step::SaveResult
    }

    fn regenerate(&self, state: &mut WorkflowState) -> Step {
        state.generation_feedback = failure_summary(state);
        info!(
            "Retrying generation ({} of {} attempts used)",
            state.generation_attempt, self.config.max_generation_attempts
        );
        Step::Generate
    }

    fn reject(&self, state: &mut WorkflowState) -> Step {
        let reason = format!(
            "tool generation rejected after {} attempt(s): {}",
            state.generation_attempt,
            failure_summary(state)
        );
        warn!("{}", reason);
        state.execution_result = None;
        state.execution_error = Some(reason);
        Step::SaveResult
    }

    fn fail(&self, state: &mut WorkflowState) -> Step {
        let reason = format!(
            "execution failed after {} attempt(s): {}",
            state.generation_attempt,
            state.execution_error.as_deref().unwrap_or("unknown error")
        );
        warn!("{}", reason);
        state.execution_result = None;
        state.execution_error = Some(reason);
        Step::SaveResult
    }

    fn save_result(&self, state: &mut WorkflowState) -> Step {
        if let Some(task) = state.current_task().cloned() {
            let result = match &state.execution_error {
                Some(error) => TaskResult::failure(&task, error.clone()),
                None => TaskResult::success(
                    &task,
                    state.execution_result.clone().unwrap_or_default(),
                    state.tool_file.clone(),
                ),
            };
            state.task_results.push(result);
        }
        state.current_task_index += 1;
        routing::after_save(state)
    }

    /// Execute on the blocking pool, timing the call.
    async fn run_sandboxed(
        &self,
        spec: &ToolSpec,
        state: &mut WorkflowState,
    ) -> Result<String, ExecutionFault> {
        let executor = self.config.executor.clone();
        let code = spec.code.clone();
        let entry = spec.name.clone();
        debug!("Executing '{}':\n{}", entry, code);

        let started = Instant::now();
        let outcome = run_with_deadline(executor, code, entry, DEADLINE_GRACE).await;
        state.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        outcome
    }
}

/// Slack past the sandbox timeout before the step stops waiting.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Run on the blocking pool, giving up once the sandbox timeout plus `grace`
/// has passed. An abandoned run finishes on its own thread.
async fn run_with_deadline(
    executor: ConstrainedExecutor,
    code: String,
    entry: String,
    grace: Duration,
) -> Result<String, ExecutionFault> {
    let timeout = executor.limits().timeout;
    let handle = tokio::task::spawn_blocking(move || executor.run(&code, &entry));

    match tokio::time::timeout(timeout + grace, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ExecutionFault::Runtime(format!("sandbox task failed: {}", e))),
        Err(_) => {
            warn!("Sandbox run outlived its {:?} deadline; abandoning it", timeout);
            Err(ExecutionFault::Timeout(timeout))
        }
    }
}

/// What went wrong in the latest attempt, phrased for the generator.
fn failure_summary(state: &WorkflowState) -> String {
    if state.safety_status == SafetyStatus::Failed {
        if state.generated_spec.is_none() {
            return format!(
                "No usable tool spec was produced: {}",
                state.generation_error.as_deref().unwrap_or("unknown reason")
            );
        }
        return format!(
            "Safety check failed:\n{}",
            policy::summarize(&state.safety_issues)
        );
    }
    match &state.execution_error {
        Some(error) => format!("Execution failed: {}", error),
        None => "Unknown failure".to_string(),
    }
}

fn aggregate_line(result: &TaskResult) -> String {
    match &result.error {
        Some(error) => format!(
            "Task {} ({}) failed: {}",
            result.task_id, result.description, error
        ),
        None => format!(
            "Task {} ({}): {}",
            result.task_id,
            result.description,
            result.result.as_deref().unwrap_or_default()
        ),
    }
}
