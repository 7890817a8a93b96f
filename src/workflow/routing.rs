//! Transition rules between workflow steps.
//!
//! Pure functions of the state so they can be tested without a model.

use super::state::{Step, WorkflowState};
use crate::types::SafetyStatus;

pub fn after_analyze(state: &WorkflowState) -> Step {
    if state.need_tool {
        Step::PlanTasks
    } else {
        Step::End
    }
}

pub fn after_search(state: &WorkflowState) -> Step {
    if state.matched_tool.is_some() {
        Step::UseExisting
    } else {
        Step::Generate
    }
}

pub fn after_safety(state: &WorkflowState, max_attempts: u32) -> Step {
    if state.safety_status == SafetyStatus::Passed {
        Step::Execute
    } else if state.generation_attempt < max_attempts {
        Step::Regenerate
    } else {
        Step::Reject
    }
}

pub fn after_execute(state: &WorkflowState, max_attempts: u32) -> Step {
    if state.execution_error.is_none() {
        Step::Register
    } else if state.generation_attempt < max_attempts {
        Step::Regenerate
    } else {
        Step::Fail
    }
}

/// Expects the cursor to be advanced already.
pub fn after_save(state: &WorkflowState) -> Step {
    if state.current_task_index < state.task_list.len() {
        Step::PrepareTask
    } else {
        Step::Aggregate
    }
}
