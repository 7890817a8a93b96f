//! Human-readable audit copies of registered tools.
//!
//! The database is the source of truth; these files exist so a person can
//! see what was synthesized without opening SQLite.

use super::DirectoryError;
use crate::types::ToolSpec;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TOOL_FILE_EXTENSION: &str = "rhai";

/// Path of the audit file for `name`, or an error if the name could escape
/// `tools_dir`.
pub fn tool_path(tools_dir: &Path, name: &str) -> Result<PathBuf, DirectoryError> {
    if !ToolSpec::is_valid_name(name) {
        return Err(DirectoryError::InvalidName(name.to_string()));
    }
    Ok(tools_dir.join(format!("{}.{}", name, TOOL_FILE_EXTENSION)))
}

/// Render the audit file body: a comment header followed by the code.
pub fn render(spec: &ToolSpec) -> String {
    let description = spec.description.replace('\n', " ");
    format!(
        "// Tool: {}\n// Description: {}\n// Category: {}\n// Returns: {}\n// Version: {}\n// Generated: {}\n\n{}\n",
        spec.name,
        description,
        spec.category,
        spec.return_kind,
        spec.version,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        spec.code.trim_end(),
    )
}

/// Write (or overwrite) the audit file.
pub async fn write(tools_dir: &Path, spec: &ToolSpec) -> Result<PathBuf, DirectoryError> {
    let path = tool_path(tools_dir, &spec.name)?;
    tokio::fs::create_dir_all(tools_dir).await?;
    tokio::fs::write(&path, render(spec)).await?;
    info!("Audit copy of '{}' written to {}", spec.name, path.display());
    Ok(path)
}

/// Stems of the audit files present, sorted.
pub async fn list(tools_dir: &Path) -> Result<Vec<String>, DirectoryError> {
    let mut stems = Vec::new();
    let mut entries = match tokio::fs::read_dir(tools_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stems),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(TOOL_FILE_EXTENSION) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
    }
    stems.sort();
    Ok(stems)
}
