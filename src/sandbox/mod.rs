//! Constrained execution of approved tool code.
//!
//! Every run gets a fresh engine and scope. The engine exposes the standard
//! Rhai language plus the allow-listed native modules; imports go through
//! [`AllowListResolver`], output primitives are silenced, `eval` is disabled,
//! and a wall-clock deadline terminates runaway scripts.

pub mod modules;
pub mod resolver;

pub use resolver::AllowListResolver;

use crate::config::SelfToolConfig;
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, Module, Scope, AST};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Why a sandboxed run produced no output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFault {
    #[error("code does not compile: {0}")]
    Compile(String),

    #[error("no zero-argument function to call (wanted '{0}')")]
    MissingEntryPoint(String),

    #[error("tool raised an error: {0}")]
    Raised(String),

    #[error("import of '{0}' is not allowed in the sandbox")]
    ModuleDenied(String),

    #[error("execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Resource ceilings for one run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
    /// 0 = unlimited.
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub allowed_modules: Vec<String>,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from_config(&SelfToolConfig::default())
    }
}

impl SandboxLimits {
    pub fn from_config(config: &SelfToolConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.execution_timeout_secs.max(1)),
            max_operations: config.max_operations,
            max_call_levels: 32,
            max_string_size: 1 << 20,
            max_array_size: 100_000,
            max_map_size: 10_000,
            allowed_modules: config.allowed_modules.clone(),
        }
    }
}

/// Runs approved code in a restricted engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConstrainedExecutor {
    limits: SandboxLimits,
    modules: Arc<BTreeMap<String, Arc<Module>>>,
}

impl Default for ConstrainedExecutor {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}

impl ConstrainedExecutor {
    pub fn new(limits: SandboxLimits) -> Self {
        let modules = Arc::new(modules::build(&limits.allowed_modules));
        Self { limits, modules }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Names of the modules scripts may use.
    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Load `code`, resolve the entry point and call it.
    ///
    /// Falls back to the first zero-argument function in source order when
    /// `entry` is not defined. Never panics on script errors.
    pub fn run(&self, code: &str, entry: &str) -> Result<String, ExecutionFault> {
        let engine = self.engine();
        let ast = engine
            .compile(code)
            .map_err(|e| ExecutionFault::Compile(e.to_string()))?;

        let name = resolve_entry(&ast, code, entry)
            .ok_or_else(|| ExecutionFault::MissingEntryPoint(entry.to_string()))?;
        if name != entry {
            debug!("Entry '{}' not defined, falling back to '{}'", entry, name);
        }

        let mut scope = Scope::new();
        let value = engine
            .call_fn::<Dynamic>(&mut scope, &ast, &name, ())
            .map_err(|e| self.classify(e))?;
        Ok(value.to_string())
    }

    fn engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_module_resolver(AllowListResolver::new(self.modules.clone()));
        for (name, module) in self.modules.iter() {
            engine.register_static_module(name.as_str(), module.clone());
        }

        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});
        engine.disable_symbol("eval");

        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_array_size);
        engine.set_max_map_size(self.limits.max_map_size);
        engine.set_max_modules(self.modules.len().max(1) * 4);

        // Checked on every operation: one operation may be a costly native call.
        let deadline = Instant::now() + self.limits.timeout;
        engine.on_progress(move |_| {
            if Instant::now() >= deadline {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        engine
    }

    fn classify(&self, err: Box<EvalAltResult>) -> ExecutionFault {
        match *err {
            EvalAltResult::ErrorInFunctionCall(.., inner, _) => self.classify(inner),
            EvalAltResult::ErrorInModule(_, inner, ..) => self.classify(inner),
            EvalAltResult::ErrorRuntime(value, ..) => ExecutionFault::Raised(value.to_string()),
            EvalAltResult::ErrorTerminated(..) => ExecutionFault::Timeout(self.limits.timeout),
            EvalAltResult::ErrorModuleNotFound(path, ..) => ExecutionFault::ModuleDenied(path),
            other => ExecutionFault::Runtime(other.to_string()),
        }
    }
}

fn fn_header() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER
        .get_or_init(|| Regex::new(r"(?m)^\s*(?:private\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").ok())
        .as_ref()
}

/// Names of the functions defined in `code`, in source order.
///
/// Textual only; the AST does not keep definition order.
pub fn declared_functions(code: &str) -> Vec<String> {
    fn_header()
        .map(|re| {
            re.captures_iter(code)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Declared name if it is a zero-argument function, else the first
/// zero-argument function in source order.
fn resolve_entry(ast: &AST, code: &str, declared: &str) -> Option<String> {
    let callable: Vec<String> = ast
        .iter_functions()
        .filter(|f| f.params.is_empty())
        .map(|f| f.name.to_string())
        .collect();

    if callable.iter().any(|n| n == declared) {
        return Some(declared.to_string());
    }

    declared_functions(code)
        .into_iter()
        .find(|name| callable.contains(name))
        .or_else(|| callable.into_iter().min())
}
