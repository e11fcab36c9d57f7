// src/analysis/require.rs
//! Require tracing: discover the module names a parsed module depends on
//! by walking `require(...)` call sites.
//!
//! A require path is a dotted index chain. A chain rooted at `script`
//! resolves relative to the current module (split on `/`); each `Parent`
//! segment removes the last path component but never the first. Chains
//! rooted at any other name are taken literally from their segments.
//! Anything else yields no path, which surfaces later as an unknown
//! require diagnostic rather than an immediate error.

use crate::analysis::ModuleName;
use crate::syntax::ast::{Block, Expr, Stat};
use crate::syntax::Span;

/// Flatten a dotted index chain into its segments, root first.
/// Returns an empty vector for expressions that are not index chains
/// over a named root.
pub fn parse_path_expr(expr: &Expr) -> Vec<&str> {
    let Expr::Index(index) = expr else {
        return Vec::new();
    };

    let mut segments = vec![index.field.as_str()];
    let mut current = &index.base;

    loop {
        match current {
            Expr::Index(inner) => {
                segments.push(inner.field.as_str());
                current = &inner.base;
            }
            Expr::Name(name, _) => {
                segments.push(name.as_str());
                break;
            }
            _ => return Vec::new(),
        }
    }

    segments.reverse();
    segments
}

/// Resolve path segments against the current module name.
pub fn path_to_module_name(current: &ModuleName, segments: &[&str]) -> Option<ModuleName> {
    if segments.is_empty() {
        return None;
    }

    let mut result: Vec<&str> = Vec::new();
    let mut it = segments.iter();

    if segments[0] == "script" && !current.is_empty() {
        result = current.split('/').collect();
        it.next();
    }

    for segment in it {
        if result.len() > 1 && *segment == "Parent" {
            result.pop();
        } else {
            result.push(segment);
        }
    }

    Some(result.join("/"))
}

/// Resolve the path expression of one `require` argument.
pub fn resolve_require_expr(current: &ModuleName, expr: &Expr) -> Option<ModuleName> {
    let segments = parse_path_expr(expr);
    if segments.is_empty() {
        return None;
    }
    path_to_module_name(current, &segments)
}

/// Every resolved `require` call in a module, in source order.
pub fn trace_requires(root: &Block, current: &ModuleName) -> Vec<(ModuleName, Span)> {
    let mut out = Vec::new();
    for stat in &root.stats {
        match stat {
            Stat::Local(local) => trace_expr(&local.value, current, &mut out),
            Stat::Assign(assign) => {
                trace_expr(&assign.target, current, &mut out);
                trace_expr(&assign.value, current, &mut out);
            }
            Stat::Return(ret) => {
                if let Some(value) = &ret.value {
                    trace_expr(value, current, &mut out);
                }
            }
            Stat::Expr(expr) => trace_expr(expr, current, &mut out),
        }
    }
    out
}

fn trace_expr(expr: &Expr, current: &ModuleName, out: &mut Vec<(ModuleName, Span)>) {
    match expr {
        Expr::Call(call) => {
            if let Expr::Name(func, _) = &call.func {
                if func == "require" && call.args.len() == 1 {
                    if let Some(name) = resolve_require_expr(current, &call.args[0]) {
                        out.push((name, call.span));
                    }
                }
            }
            trace_expr(&call.func, current, out);
            for arg in &call.args {
                trace_expr(arg, current, out);
            }
        }
        Expr::Index(index) => trace_expr(&index.base, current, out),
        Expr::Binary(binary) => {
            trace_expr(&binary.lhs, current, out);
            trace_expr(&binary.rhs, current, out);
        }
        Expr::Nil(_)
        | Expr::True(_)
        | Expr::False(_)
        | Expr::Number(..)
        | Expr::Str(..)
        | Expr::Name(..) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    fn requires_of(current: &str, source: &str) -> Vec<ModuleName> {
        let result = parse(source, &ParseOptions::default());
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        trace_requires(&result.root, &current.to_string())
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    #[test]
    fn script_rooted_chain_resolves_relative() {
        let deps = requires_of("game/src/main", "local u = require(script.Parent.util)");
        assert_eq!(deps, vec!["game/src/util".to_string()]);
    }

    #[test]
    fn parent_never_removes_the_first_component() {
        let deps = requires_of(
            "game/main",
            "local u = require(script.Parent.Parent.Parent.other)",
        );
        assert_eq!(deps, vec!["game/other".to_string()]);
    }

    #[test]
    fn global_rooted_chain_is_taken_literally() {
        let deps = requires_of("main", "local m = require(Workspace.Shared.Math)");
        assert_eq!(deps, vec!["Workspace/Shared/Math".to_string()]);
    }

    #[test]
    fn non_chain_arguments_yield_no_path() {
        let deps = requires_of("main", "local m = require(pick())");
        assert!(deps.is_empty());
    }

    #[test]
    fn requires_are_recorded_in_source_order() {
        let deps = requires_of(
            "root/a",
            "local x = require(script.Parent.b)\nreturn require(script.Parent.c)",
        );
        assert_eq!(deps, vec!["root/b".to_string(), "root/c".to_string()]);
    }
}
