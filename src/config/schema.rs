//! Configuration schema for selftool.toml.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfToolConfig {
    /// OpenAI-compatible API base URL (without `/chat/completions`).
    pub api_url: String,

    /// API key for the inference endpoint.
    pub api_key: String,

    /// Model used for analysis, planning, generation and response polishing.
    pub model: String,

    /// Maximum tokens per completion.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f64,

    /// Total generation attempts per subtask, shared by safety and execution retries.
    pub max_generation_attempts: u32,

    /// Wall-clock cap for one sandboxed tool call, in seconds.
    pub execution_timeout_secs: u64,

    /// Script operation cap for one sandboxed call (0 = unlimited).
    pub max_operations: u64,

    /// Module names generated code may not import or reference.
    pub forbidden_modules: Vec<String>,

    /// Builtin functions generated code may not call.
    pub forbidden_builtins: Vec<String>,

    /// Side-effect-free modules exposed inside the sandbox.
    pub allowed_modules: Vec<String>,

    /// Path to the SQLite tool directory.
    pub db_path: String,

    /// Directory receiving audit copies of registered tools.
    pub tools_dir: String,

    /// Expiry of the volatile tool cache, in seconds.
    pub cache_ttl_secs: u64,

    /// Log level (debug, info, warn, error).
    pub log_level: String,
}

pub const DEFAULT_FORBIDDEN_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "requests",
    "urllib",
    "http",
    "pickle",
    "shelve",
    "sqlite3",
    "ctypes",
    "multiprocessing",
    "threading",
    "asyncio",
    "concurrent",
    "fs",
    "net",
    "process",
    "env",
];

pub const DEFAULT_FORBIDDEN_BUILTINS: &[&str] = &[
    "eval",
    "compile",
    "Fn",
    "call",
    "curry",
    "is_def_fn",
    "is_def_var",
    "print",
    "debug",
    "exit",
    "quit",
    "open",
    "input",
];

pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "datetime", "time", "calendar", "math", "json", "random", "string",
];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for SelfToolConfig {
    fn default() -> Self {
        Self {
            api_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            api_key: String::new(),
            model: "qwen-plus".into(),
            max_tokens: 2048,
            temperature: 0.2,
            max_generation_attempts: 3,
            execution_timeout_secs: 5,
            max_operations: 0,
            forbidden_modules: owned(DEFAULT_FORBIDDEN_MODULES),
            forbidden_builtins: owned(DEFAULT_FORBIDDEN_BUILTINS),
            allowed_modules: owned(DEFAULT_ALLOWED_MODULES),
            db_path: "~/.selftool/tools.db".into(),
            tools_dir: "~/.selftool/tools".into(),
            cache_ttl_secs: 3600,
            log_level: "info".into(),
        }
    }
}

impl SelfToolConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved database path.
    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.db_path)
    }

    /// Resolved audit-file directory.
    pub fn resolved_tools_dir(&self) -> String {
        self.resolve_path(&self.tools_dir)
    }

    /// Apply `SELFTOOL_*` environment overrides for connection settings.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty("SELFTOOL_API_KEY") {
            self.api_key = key;
        }
        if let Some(url) = non_empty("SELFTOOL_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = non_empty("SELFTOOL_MODEL") {
            self.model = model;
        }
    }
}
