//! Need-tool decision and the cosmetic model calls around it.

use super::prompts;
use crate::inference::{extract_json, LanguageModel};
use crate::types::ToolCategory;
use serde_json::Value;
use tracing::{debug, info, warn};

/// The model's verdict on a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub need_tool: bool,
    pub task_description: String,
    pub task_category: ToolCategory,
    pub direct_answer: String,
}

impl Analysis {
    /// Assume a tool is needed for the whole request.
    pub fn conservative(request: &str) -> Self {
        Self {
            need_tool: true,
            task_description: request.trim().to_string(),
            task_category: ToolCategory::Other,
            direct_answer: String::new(),
        }
    }

    /// Read a model response, filling gaps with conservative defaults.
    pub fn parse(request: &str, response: &str) -> Self {
        let mut analysis = Self::conservative(request);
        let Some(json) = extract_json(response) else {
            return analysis;
        };

        if let Some(need_tool) = json.get("need_tool").and_then(Value::as_bool) {
            analysis.need_tool = need_tool;
        }
        if let Some(desc) = json.get("task_description").and_then(Value::as_str) {
            if !desc.trim().is_empty() {
                analysis.task_description = desc.trim().to_string();
            }
        }
        if let Some(category) = json.get("task_category").and_then(Value::as_str) {
            analysis.task_category = ToolCategory::parse_lenient(category);
        }
        if let Some(answer) = json.get("direct_answer").and_then(Value::as_str) {
            analysis.direct_answer = answer.trim().to_string();
        }
        analysis
    }
}

/// Ask the model whether `request` needs a tool. Never fails.
pub async fn analyze(llm: &dyn LanguageModel, request: &str) -> Analysis {
    if request.trim().is_empty() {
        return Analysis::conservative(request);
    }
    let prompt = prompts::analysis(request);
    debug!("Analysis prompt:\n{}", prompt);

    match llm.complete(&prompt).await {
        Ok(response) => {
            debug!("Analysis response:\n{}", response);
            let analysis = Analysis::parse(request, &response);
            info!(
                "Analysis: need_tool={} category={} task='{}'",
                analysis.need_tool, analysis.task_category, analysis.task_description
            );
            analysis
        }
        Err(e) => {
            warn!("Analysis call failed, assuming a tool is needed: {}", e);
            Analysis::conservative(request)
        }
    }
}

/// Plain conversational reply for requests that need no tool.
pub async fn reply(llm: &dyn LanguageModel, request: &str) -> Option<String> {
    match llm.complete(&prompts::reply(request)).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!("Reply call failed: {}", e);
            None
        }
    }
}

/// Rephrase aggregated results for the user; falls back to the raw text.
pub async fn polish(llm: &dyn LanguageModel, request: &str, aggregated: &str) -> String {
    if aggregated.trim().is_empty() {
        return aggregated.to_string();
    }
    match llm.complete(&prompts::format_response(request, aggregated)).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => aggregated.to_string(),
        Err(e) => {
            warn!("Response formatting failed, returning raw results: {}", e);
            aggregated.to_string()
        }
    }
}
