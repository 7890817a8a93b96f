//! Import hook: only allow-listed native modules resolve.

use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Serves `import "<name>"` from a fixed table and refuses everything else,
/// including paths that look like files.
#[derive(Debug, Clone)]
pub struct AllowListResolver {
    modules: Arc<BTreeMap<String, Arc<Module>>>,
}

impl AllowListResolver {
    pub fn new(modules: Arc<BTreeMap<String, Arc<Module>>>) -> Self {
        Self { modules }
    }
}

impl ModuleResolver for AllowListResolver {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Arc<Module>, Box<EvalAltResult>> {
        match self.modules.get(path) {
            Some(module) => Ok(module.clone()),
            None => {
                warn!("Sandbox refused import of '{}'", path);
                Err(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos).into())
            }
        }
    }
}
