//! Tool synthesis: ask the model for a spec and normalise what comes back.

use super::prompts::{self, GenerationRequest};
use crate::inference::{extract_json, LanguageModel};
use crate::sandbox;
use crate::types::{ToolCategory, ToolSpec};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("model call failed: {0}")]
    Model(String),

    #[error("response contained no JSON object")]
    NoJson,

    #[error("response had no code")]
    MissingCode,

    #[error("no usable tool name in the response or the code")]
    MissingName,
}

/// Inputs for one generation attempt.
pub struct Attempt<'a> {
    pub task_description: &'a str,
    pub category: ToolCategory,
    /// Summary of the previous failure, empty on the first attempt.
    pub feedback: &'a str,
    /// 1-based; becomes the tool's version.
    pub number: u32,
    pub allowed_modules: &'a [String],
    pub forbidden: &'a [String],
}

pub async fn generate(
    llm: &dyn LanguageModel,
    attempt: &Attempt<'_>,
) -> Result<ToolSpec, GenerationError> {
    if !attempt.feedback.is_empty() {
        warn!("Regenerating because: {}", attempt.feedback);
    }
    let prompt = prompts::generation(&GenerationRequest {
        task_description: attempt.task_description,
        category: attempt.category,
        feedback: attempt.feedback,
        allowed_modules: attempt.allowed_modules,
        forbidden: attempt.forbidden,
    });
    debug!("Generation prompt:\n{}", prompt);

    let response = llm
        .complete(&prompt)
        .await
        .map_err(|e| GenerationError::Model(e.to_string()))?;
    debug!("Generation response:\n{}", response);

    let spec = parse_spec(&response, attempt.category, attempt.number)?;
    info!(
        "Generated tool '{}' v{} ({}): {}",
        spec.name, spec.version, spec.category, spec.description
    );
    debug!("Generated code:\n{}", spec.code);
    Ok(spec)
}

/// Build a spec from a model response.
///
/// The name is sanitised (or taken from the first function in the code), the
/// category defaults to the subtask's, and tools never take parameters.
pub fn parse_spec(
    response: &str,
    fallback_category: ToolCategory,
    version: u32,
) -> Result<ToolSpec, GenerationError> {
    let json = extract_json(response).ok_or(GenerationError::NoJson)?;
    let text = |key: &str| {
        json.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    let code = strip_code_fence(&text("code"));
    if code.is_empty() {
        return Err(GenerationError::MissingCode);
    }

    let name = ToolSpec::sanitize_name(&text("name"))
        .or_else(|| {
            sandbox::declared_functions(&code)
                .first()
                .and_then(|n| ToolSpec::sanitize_name(n))
        })
        .ok_or(GenerationError::MissingName)?;

    let category = match text("category").as_str() {
        "" => fallback_category,
        raw => ToolCategory::parse_lenient(raw),
    };
    let return_kind = match text("return_kind") {
        k if !k.is_empty() => k,
        _ => match text("return_type") {
            k if !k.is_empty() => k,
            _ => "string".to_string(),
        },
    };

    Ok(ToolSpec {
        name,
        description: text("description"),
        parameters: serde_json::Map::new(),
        return_kind,
        category,
        code,
        version,
    })
}

/// Drop a ```lang fence the model sometimes puts inside the code string.
fn strip_code_fence(code: &str) -> String {
    let trimmed = code.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_spec() {
        let response = r#"```json
{"name": "Get Current Date", "description": "Today's date", "parameters": {"x": 1},
 "return_type": "str", "category": "datetime",
 "code": "fn get_current_date() {\n    datetime::today()\n}"}
```"#;
        let spec = parse_spec(response, ToolCategory::Other, 2).unwrap();
        assert_eq!(spec.name, "get_current_date");
        assert_eq!(spec.category, ToolCategory::Datetime);
        assert_eq!(spec.return_kind, "str");
        assert_eq!(spec.version, 2);
        assert!(spec.parameters.is_empty());
        assert!(spec.code.starts_with("fn get_current_date()"));
    }

    #[test]
    fn name_falls_back_to_first_function() {
        let response = r#"{"code": "fn roll_dice() { \"4\" }"}"#;
        let spec = parse_spec(response, ToolCategory::Math, 1).unwrap();
        assert_eq!(spec.name, "roll_dice");
        assert_eq!(spec.category, ToolCategory::Math);
        assert_eq!(spec.return_kind, "string");
    }

    #[test]
    fn unusable_responses_are_errors() {
        assert_eq!(parse_spec("nothing", ToolCategory::Other, 1), Err(GenerationError::NoJson));
        assert_eq!(
            parse_spec(r#"{"name": "x", "code": "  "}"#, ToolCategory::Other, 1),
            Err(GenerationError::MissingCode)
        );
        assert_eq!(
            parse_spec(r#"{"name": "!!!", "code": "\"just a string\""}"#, ToolCategory::Other, 1),
            Err(GenerationError::MissingName)
        );
    }

    #[test]
    fn inner_code_fences_are_removed() {
        assert_eq!(strip_code_fence("```rhai\nfn a() { 1 }\n```"), "fn a() { 1 }");
        assert_eq!(strip_code_fence("fn a() { 1 }"), "fn a() { 1 }");
    }
}
