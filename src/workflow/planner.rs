//! Decomposition of one request into ordered subtasks.

use super::prompts;
use crate::inference::{extract_json, LanguageModel};
use crate::types::{Subtask, ToolCategory};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("the request produced no subtasks")]
    Empty,
}

/// Plan `request`; degrades to one subtask built from the fallbacks.
///
/// Only fails when there is nothing at all to do.
pub async fn plan(
    llm: &dyn LanguageModel,
    request: &str,
    fallback_description: &str,
    fallback_category: ToolCategory,
) -> Result<Vec<Subtask>, PlanError> {
    let mut tasks = Vec::new();

    if !request.trim().is_empty() {
        let prompt = prompts::plan(request);
        debug!("Planning prompt:\n{}", prompt);
        match llm.complete(&prompt).await {
            Ok(response) => {
                debug!("Planning response:\n{}", response);
                tasks = parse_plan(&response);
            }
            Err(e) => warn!("Planning call failed: {}", e),
        }
    }

    if tasks.is_empty() {
        let description = fallback_description.trim();
        if description.is_empty() {
            return Err(PlanError::Empty);
        }
        info!("Planning degraded to a single subtask");
        tasks.push(Subtask {
            id: 1,
            description: description.to_string(),
            category: fallback_category,
        });
    }

    info!("Planned {} subtask(s)", tasks.len());
    for task in &tasks {
        info!("  [{}] {} ({})", task.id, task.description, task.category);
    }
    Ok(tasks)
}

/// Extract subtasks from a planning response. Model-supplied ids are
/// ignored; ids are dense from 1 in order of appearance.
pub fn parse_plan(response: &str) -> Vec<Subtask> {
    let Some(json) = extract_json(response) else {
        return Vec::new();
    };
    let Some(items) = json.get("tasks").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let description = match item {
                Value::String(s) => s.as_str(),
                _ => item.get("description").and_then(Value::as_str)?,
            };
            let description = description.trim();
            if description.is_empty() {
                return None;
            }
            let category = item
                .get("category")
                .and_then(Value::as_str)
                .map(ToolCategory::parse_lenient)
                .unwrap_or_default();
            Some((description.to_string(), category))
        })
        .zip(1u32..)
        .map(|((description, category), id)| Subtask {
            id,
            description,
            category,
        })
        .collect()
}
