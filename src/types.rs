//! Shared types used across the selftool runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Tool categories
// ---------------------------------------------------------------------------

/// Coarse capability tag attached to subtasks and synthesized tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Datetime,
    Calendar,
    Math,
    Text,
    #[default]
    #[serde(other)]
    Other,
}

impl ToolCategory {
    /// All categories, in display order.
    pub const ALL: [ToolCategory; 5] = [
        Self::Datetime,
        Self::Calendar,
        Self::Math,
        Self::Text,
        Self::Other,
    ];

    /// Parse a model-supplied tag; anything unrecognised is `Other`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "datetime" | "time" | "date" => Self::Datetime,
            "calendar" => Self::Calendar,
            "math" | "random" => Self::Math,
            "text" | "string" => Self::Text,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Datetime => "datetime",
            Self::Calendar => "calendar",
            Self::Math => "math",
            Self::Text => "text",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tool specifications
// ---------------------------------------------------------------------------

/// A named, versioned synthesized function plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique key in the directory.
    pub name: String,
    pub description: String,
    /// Always empty for now: tools take no arguments.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_return_kind")]
    pub return_kind: String,
    #[serde(default)]
    pub category: ToolCategory,
    /// Rhai source defining a zero-argument function that returns a string.
    pub code: String,
    /// Generation attempt that produced this spec (1-based).
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_return_kind() -> String {
    "string".into()
}

fn default_version() -> u32 {
    1
}

impl ToolSpec {
    /// Whether `name` is usable as a directory key and a file stem.
    pub fn is_valid_name(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Turn an arbitrary model-supplied name into a valid identifier.
    pub fn sanitize_name(raw: &str) -> Option<String> {
        let mut out: String = raw
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        while out.contains("__") {
            out = out.replace("__", "_");
        }
        let out = out.trim_matches('_').to_string();
        if out.is_empty() {
            return None;
        }
        let out = if out.starts_with(|c: char| c.is_ascii_digit()) {
            format!("tool_{}", out)
        } else {
            out
        };
        let out: String = out.chars().take(64).collect();
        Self::is_valid_name(&out).then_some(out)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// One independently executable unit of a decomposed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// Dense, 1-based, in planner order.
    pub id: u32,
    pub description: String,
    pub category: ToolCategory,
}

/// Outcome of one subtask. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: u32,
    pub description: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tool_file: Option<String>,
}

impl TaskResult {
    pub fn success(task: &Subtask, output: String, tool_file: Option<String>) -> Self {
        Self {
            task_id: task.id,
            description: task.description.clone(),
            result: Some(output),
            error: None,
            tool_file,
        }
    }

    pub fn failure(task: &Subtask, error: String) -> Self {
        Self {
            task_id: task.id,
            description: task.description.clone(),
            result: None,
            error: Some(error),
            tool_file: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Safety
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing_is_lenient() {
        assert_eq!(ToolCategory::parse_lenient("DateTime"), ToolCategory::Datetime);
        assert_eq!(ToolCategory::parse_lenient("chat"), ToolCategory::Other);
        assert_eq!(ToolCategory::parse_lenient(""), ToolCategory::Other);
    }

    #[test]
    fn unknown_category_deserializes_as_other() {
        let cat: ToolCategory = serde_json::from_str("\"weather\"").unwrap();
        assert_eq!(cat, ToolCategory::Other);
    }

    #[test]
    fn names_are_sanitized_into_identifiers() {
        assert_eq!(
            ToolSpec::sanitize_name("Get Current-Date!").as_deref(),
            Some("get_current_date")
        );
        assert_eq!(ToolSpec::sanitize_name("2dice").as_deref(), Some("tool_2dice"));
        assert_eq!(ToolSpec::sanitize_name("../../etc/passwd").as_deref(), Some("etc_passwd"));
        assert_eq!(ToolSpec::sanitize_name("***"), None);
    }

    #[test]
    fn name_validation_rejects_paths() {
        assert!(ToolSpec::is_valid_name("roll_dice"));
        assert!(!ToolSpec::is_valid_name("../roll"));
        assert!(!ToolSpec::is_valid_name("1roll"));
        assert!(!ToolSpec::is_valid_name(""));
    }
}
