//! Static safety policy for synthesized tool code.
//!
//! Three independent passes whose findings are unioned:
//!
//! 1. lexical module denylist (cheap reject path),
//! 2. lexical builtin denylist,
//! 3. structural walk of the parsed AST (authoritative).
//!
//! Every hit is reported on its own so the regeneration prompt can name all
//! of them at once. Malformed code is reported as an issue, never as a fault.

mod lexical;
mod structural;

use crate::config::SelfToolConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What a policy finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ForbiddenModule,
    ForbiddenBuiltin,
    DynamicImport,
    Syntax,
}

/// Which pass produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Lexical,
    Structural,
}

/// A single policy violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyIssue {
    pub kind: IssueKind,
    pub pass: Pass,
    /// Offending module/builtin name, or the parse error for `Syntax`.
    pub subject: String,
}

impl PolicyIssue {
    fn new(kind: IssueKind, pass: Pass, subject: impl Into<String>) -> Self {
        Self {
            kind,
            pass,
            subject: subject.into(),
        }
    }
}

impl fmt::Display for PolicyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pass = match self.pass {
            Pass::Lexical => "lexical",
            Pass::Structural => "structural",
        };
        match self.kind {
            IssueKind::ForbiddenModule => {
                write!(f, "[{}] forbidden module referenced: {}", pass, self.subject)
            }
            IssueKind::ForbiddenBuiltin => {
                write!(f, "[{}] forbidden function called: {}", pass, self.subject)
            }
            IssueKind::DynamicImport => {
                write!(f, "[{}] import path must be a string literal: {}", pass, self.subject)
            }
            IssueKind::Syntax => write!(f, "syntax error: {}", self.subject),
        }
    }
}

/// Allow/deny policy checker. Pure: no I/O, no shared state.
#[derive(Debug, Clone)]
pub struct PolicyAnalyzer {
    forbidden_modules: BTreeSet<String>,
    forbidden_builtins: BTreeSet<String>,
    lexical: lexical::LexicalRules,
}

impl PolicyAnalyzer {
    pub fn new<M, B, S, T>(forbidden_modules: M, forbidden_builtins: B) -> Self
    where
        M: IntoIterator<Item = S>,
        B: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let forbidden_modules: BTreeSet<String> = forbidden_modules
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.trim().is_empty())
            .collect();
        let forbidden_builtins: BTreeSet<String> = forbidden_builtins
            .into_iter()
            .map(Into::into)
            .filter(|b: &String| !b.trim().is_empty())
            .collect();
        let lexical = lexical::LexicalRules::new(&forbidden_modules, &forbidden_builtins);
        Self {
            forbidden_modules,
            forbidden_builtins,
            lexical,
        }
    }

    pub fn from_config(config: &SelfToolConfig) -> Self {
        Self::new(
            config.forbidden_modules.iter().cloned(),
            config.forbidden_builtins.iter().cloned(),
        )
    }

    /// Check `code`; an empty result means approved.
    pub fn check(&self, code: &str) -> Vec<PolicyIssue> {
        let mut issues = Vec::new();
        issues.extend(self.lexical.check_modules(code));
        issues.extend(self.lexical.check_builtins(code));
        issues.extend(structural::check(
            code,
            &self.forbidden_modules,
            &self.forbidden_builtins,
        ));
        issues
    }

    /// Every denied module and builtin name, for prompting.
    pub fn denied_names(&self) -> Vec<String> {
        self.forbidden_modules
            .iter()
            .chain(self.forbidden_builtins.iter())
            .cloned()
            .collect()
    }
}

impl Default for PolicyAnalyzer {
    fn default() -> Self {
        Self::from_config(&SelfToolConfig::default())
    }
}

/// Render issues as a bullet list for generation feedback.
pub fn summarize(issues: &[PolicyIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}
