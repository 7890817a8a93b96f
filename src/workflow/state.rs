//! The per-request record threaded through the workflow.

use crate::policy::PolicyIssue;
use crate::types::{SafetyStatus, Subtask, TaskResult, ToolCategory, ToolSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow steps, in the order they usually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Analyze,
    PlanTasks,
    PrepareTask,
    Search,
    UseExisting,
    Generate,
    SafetyCheck,
    Execute,
    Register,
    Regenerate,
    Reject,
    Fail,
    SaveResult,
    Aggregate,
    FormatResponse,
    End,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Analyze => "analyze",
            Self::PlanTasks => "plan_tasks",
            Self::PrepareTask => "prepare_task",
            Self::Search => "search",
            Self::UseExisting => "use_existing",
            Self::Generate => "generate",
            Self::SafetyCheck => "safety_check",
            Self::Execute => "execute",
            Self::Register => "register",
            Self::Regenerate => "regenerate",
            Self::Reject => "reject",
            Self::Fail => "fail",
            Self::SaveResult => "save_result",
            Self::Aggregate => "aggregate",
            Self::FormatResponse => "format_response",
            Self::End => "end",
        };
        f.write_str(name)
    }
}

/// Everything one request accumulates on its way through the steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// ULID, for correlating log lines of one request.
    pub request_id: String,
    pub user_request: String,
    pub need_tool: bool,

    // Planning
    pub task_list: Vec<Subtask>,
    pub current_task_index: usize,
    pub task_results: Vec<TaskResult>,

    // Current subtask, reset by `begin_task`
    pub task_description: String,
    pub task_category: ToolCategory,
    pub matched_tool: Option<ToolSpec>,
    pub generated_spec: Option<ToolSpec>,
    pub generation_attempt: u32,
    /// Why the previous attempt failed; fed into the next generation prompt.
    pub generation_feedback: String,
    /// Why the latest generation produced no spec.
    pub generation_error: Option<String>,
    pub safety_status: SafetyStatus,
    pub safety_issues: Vec<PolicyIssue>,
    pub execution_result: Option<String>,
    pub execution_error: Option<String>,
    pub execution_time_ms: f64,

    // Outcome of the current subtask's registration
    pub tool_registered: bool,
    pub tool_cached: bool,
    pub tool_file: Option<String>,

    // Request outcome
    pub aggregated: String,
    pub response: String,
    /// Whole-request failure; set only when no subtask could run.
    pub error: Option<String>,

    pub current_step: Step,
    pub trace: Vec<Step>,
}

impl WorkflowState {
    pub fn new(user_request: &str) -> Self {
        Self {
            request_id: ulid::Ulid::new().to_string(),
            user_request: user_request.to_string(),
            need_tool: true,
            task_list: Vec::new(),
            current_task_index: 0,
            task_results: Vec::new(),
            task_description: String::new(),
            task_category: ToolCategory::Other,
            matched_tool: None,
            generated_spec: None,
            generation_attempt: 0,
            generation_feedback: String::new(),
            generation_error: None,
            safety_status: SafetyStatus::Pending,
            safety_issues: Vec::new(),
            execution_result: None,
            execution_error: None,
            execution_time_ms: 0.0,
            tool_registered: false,
            tool_cached: false,
            tool_file: None,
            aggregated: String::new(),
            response: String::new(),
            error: None,
            current_step: Step::Analyze,
            trace: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, step: Step) {
        self.current_step = step;
        self.trace.push(step);
    }

    pub fn current_task(&self) -> Option<&Subtask> {
        self.task_list.get(self.current_task_index)
    }

    /// Load the subtask at the cursor and clear every per-subtask field.
    pub(crate) fn begin_task(&mut self) -> Option<Subtask> {
        let task = self.current_task()?.clone();
        self.task_description = task.description.clone();
        self.task_category = task.category;
        self.matched_tool = None;
        self.generated_spec = None;
        self.generation_attempt = 0;
        self.generation_feedback.clear();
        self.safety_issues.clear();
        self.begin_attempt();
        self.tool_registered = false;
        self.tool_cached = false;
        self.tool_file = None;
        Some(task)
    }

    /// Clear the outputs of the previous generation attempt.
    ///
    /// `safety_issues` survive until the next safety check replaces them.
    pub(crate) fn begin_attempt(&mut self) {
        self.generation_error = None;
        self.safety_status = SafetyStatus::Pending;
        self.execution_result = None;
        self.execution_error = None;
        self.execution_time_ms = 0.0;
    }

    /// How many times `step` was entered.
    pub fn visits(&self, step: Step) -> usize {
        self.trace.iter().filter(|s| **s == step).count()
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.task_results.iter().all(TaskResult::is_success)
    }
}
