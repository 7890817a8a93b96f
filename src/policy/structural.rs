//! Authoritative pass: parse the script and inspect real import and call nodes.

use super::{IssueKind, Pass, PolicyIssue};
use rhai::{ASTNode, Engine, Expr, OptimizationLevel, Stmt};
use std::collections::BTreeSet;

pub(super) fn check(
    code: &str,
    forbidden_modules: &BTreeSet<String>,
    forbidden_builtins: &BTreeSet<String>,
) -> Vec<PolicyIssue> {
    // A raw engine parses the full language without registering anything.
    // Optimisation stays off so dead branches survive into the AST.
    let mut engine = Engine::new_raw();
    engine.set_optimization_level(OptimizationLevel::None);

    let ast = match engine.compile(code) {
        Ok(ast) => ast,
        Err(e) => return vec![PolicyIssue::new(IssueKind::Syntax, Pass::Structural, e.to_string())],
    };

    let mut issues = Vec::new();
    let mut report = |kind: IssueKind, subject: &str| {
        let issue = PolicyIssue::new(kind, Pass::Structural, subject);
        if !issues.contains(&issue) {
            issues.push(issue);
        }
    };

    ast.walk(&mut |path: &[ASTNode]| {
        let Some(node) = path.last() else {
            return true;
        };
        let parent_is_import = path.len() >= 2
            && matches!(path[path.len() - 2], ASTNode::Stmt(Stmt::Import(..)));

        match node {
            ASTNode::Expr(expr) if parent_is_import => match expr {
                Expr::StringConstant(module_path, ..) => {
                    let module_path: &str = module_path;
                    let root = module_root(module_path);
                    if forbidden_modules.contains(root) {
                        report(IssueKind::ForbiddenModule, root);
                    }
                }
                other => report(IssueKind::DynamicImport, &describe(other)),
            },
            ASTNode::Expr(Expr::FnCall(call, ..)) | ASTNode::Expr(Expr::MethodCall(call, ..)) => {
                let name: &str = &call.name;
                if forbidden_builtins.contains(name) {
                    report(IssueKind::ForbiddenBuiltin, name);
                }
                let namespace = call.namespace.to_string();
                if !namespace.is_empty() {
                    let root = module_root(&namespace);
                    if forbidden_modules.contains(root) {
                        report(IssueKind::ForbiddenModule, root);
                    }
                }
            }
            _ => {}
        }
        true
    });

    issues
}

/// First segment of `a/b`, `a::b` or `a`.
fn module_root(path: &str) -> &str {
    path.trim()
        .split(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(path)
}

fn describe(expr: &Expr) -> String {
    let text = format!("{:?}", expr);
    if text.len() > 80 {
        let cut = text
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= 80)
            .last()
            .unwrap_or(0);
        format!("{}…", &text[..cut])
    } else {
        text
    }
}
