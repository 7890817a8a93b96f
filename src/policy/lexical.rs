//! Fast text-level reject pass.
//!
//! Only ever a pre-filter: anything it misses the structural pass must catch.

use super::{IssueKind, Pass, PolicyIssue};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Debug, Clone)]
pub(super) struct LexicalRules {
    modules: Vec<(String, Regex)>,
    builtins: Vec<(String, Regex)>,
}

impl LexicalRules {
    /// Patterns are matched against raw text, so they over-report: a name
    /// inside a string literal (`"eval("`) is flagged, and so is an
    /// allow-listed import aliased under a denied name (`import "random" as os`
    /// then `os::int(..)`). Widening a denylist widens these too.
    pub(super) fn new(modules: &BTreeSet<String>, builtins: &BTreeSet<String>) -> Self {
        // `import "os"`, `import "os/path"` or a qualified `os::name`
        let modules = compile_all(modules, |m| {
            format!(r#"import "{m}(?:"|/|::)|\b{m}::"#, m = regex::escape(m))
        });
        let builtins = compile_all(builtins, |b| format!(r"\b{}\s*\(", regex::escape(b)));
        Self { modules, builtins }
    }

    pub(super) fn check_modules(&self, code: &str) -> Vec<PolicyIssue> {
        scan(&self.modules, code, IssueKind::ForbiddenModule)
    }

    pub(super) fn check_builtins(&self, code: &str) -> Vec<PolicyIssue> {
        scan(&self.builtins, code, IssueKind::ForbiddenBuiltin)
    }
}

fn compile_all(names: &BTreeSet<String>, pattern: impl Fn(&str) -> String) -> Vec<(String, Regex)> {
    names
        .iter()
        .filter_map(|name| match Regex::new(&pattern(name)) {
            Ok(re) => Some((name.clone(), re)),
            Err(e) => {
                warn!("Skipping unmatchable policy name '{}': {}", name, e);
                None
            }
        })
        .collect()
}

fn scan(rules: &[(String, Regex)], code: &str, kind: IssueKind) -> Vec<PolicyIssue> {
    rules
        .iter()
        .filter(|(_, re)| re.is_match(code))
        .map(|(name, _)| PolicyIssue::new(kind, Pass::Lexical, name.clone()))
        .collect()
}
