// src/analysis/lint.rs
//! Lint warnings, masks, and the reference linter.
//!
//! Warnings are classified per project config into hard errors and plain
//! warnings; `--!nolint Name` hot-comments subtract from the enabled mask.

use crate::analysis::module::Module;
use crate::analysis::scope::{Scope, ScopePtr};
use crate::syntax::ast::{Block, Expr, Stat};
use crate::syntax::{HotComment, Span};

/// Warning codes. The discriminant doubles as the mask bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintCode {
    UnknownGlobal = 0,
    UnusedLocal = 1,
    SuspiciousCompare = 2,
}

impl LintCode {
    pub const ALL: [LintCode; 3] = [
        LintCode::UnknownGlobal,
        LintCode::UnusedLocal,
        LintCode::SuspiciousCompare,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LintCode::UnknownGlobal => "UnknownGlobal",
            LintCode::UnusedLocal => "UnusedLocal",
            LintCode::SuspiciousCompare => "SuspiciousCompare",
        }
    }

    fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

/// A bitmask over [`LintCode`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LintOptions {
    pub warning_mask: u64,
}

impl LintOptions {
    pub fn all() -> Self {
        let mut mask = 0;
        for code in LintCode::ALL {
            mask |= code.bit();
        }
        Self { warning_mask: mask }
    }

    pub fn is_enabled(&self, code: LintCode) -> bool {
        self.warning_mask & code.bit() != 0
    }

    pub fn enable_warning(&mut self, code: LintCode) {
        self.warning_mask |= code.bit();
    }

    pub fn disable_warning(&mut self, code: LintCode) {
        self.warning_mask &= !code.bit();
    }
}

/// Parse the mask of warnings disabled by `--!nolint Name` hot-comments.
pub fn parse_nolint_mask(hot_comments: &[HotComment]) -> u64 {
    let mut mask = 0;
    for hc in hot_comments {
        if !hc.header {
            continue;
        }
        let mut words = hc.content.split_whitespace();
        if words.next() != Some("nolint") {
            continue;
        }
        for word in words {
            for code in LintCode::ALL {
                if code.name() == word {
                    mask |= code.bit();
                }
            }
        }
    }
    mask
}

#[derive(Debug, Clone)]
pub struct LintWarning {
    pub code: LintCode,
    pub location: Span,
    pub message: String,
}

/// Lint results partitioned by project config.
#[derive(Debug, Clone, Default)]
pub struct LintResult {
    pub errors: Vec<LintWarning>,
    pub warnings: Vec<LintWarning>,
}

/// The linter collaborator interface.
pub trait Linter {
    fn lint(
        &self,
        root: &Block,
        environment: &ScopePtr,
        module: Option<&Module>,
        hot_comments: &[HotComment],
        options: LintOptions,
    ) -> Vec<LintWarning>;
}

/// Reference linter: unknown globals, unused locals, and comparisons
/// between operands of visibly different literal types.
#[derive(Debug, Default)]
pub struct BuiltinLinter;

impl Linter for BuiltinLinter {
    fn lint(
        &self,
        root: &Block,
        environment: &ScopePtr,
        _module: Option<&Module>,
        _hot_comments: &[HotComment],
        options: LintOptions,
    ) -> Vec<LintWarning> {
        let mut pass = LintPass {
            environment,
            options,
            locals: Vec::new(),
            warnings: Vec::new(),
        };

        for stat in &root.stats {
            pass.stat(stat);
        }
        pass.flush_unused_locals();
        pass.warnings
    }
}

struct LocalUse {
    name: String,
    span: Span,
    used: bool,
}

struct LintPass<'a> {
    environment: &'a ScopePtr,
    options: LintOptions,
    locals: Vec<LocalUse>,
    warnings: Vec<LintWarning>,
}

impl LintPass<'_> {
    fn stat(&mut self, stat: &Stat) {
        match stat {
            Stat::Local(local) => {
                self.expr(&local.value);
                self.locals.push(LocalUse {
                    name: local.name.clone(),
                    span: local.span,
                    used: false,
                });
            }
            Stat::Assign(assign) => {
                self.expr(&assign.value);
                // writing a name is a use for unused-local purposes
                self.expr(&assign.target);
            }
            Stat::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.expr(value);
                }
            }
            Stat::Expr(expr) => self.expr(expr),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(name, span) => {
                if let Some(local) = self.locals.iter_mut().rev().find(|l| l.name == *name) {
                    local.used = true;
                } else if self.options.is_enabled(LintCode::UnknownGlobal)
                    && Scope::lookup(self.environment, name).is_none()
                {
                    self.warnings.push(LintWarning {
                        code: LintCode::UnknownGlobal,
                        location: *span,
                        message: format!("unknown global '{name}'"),
                    });
                }
            }
            Expr::Index(index) => self.expr(&index.base),
            Expr::Call(call) => {
                self.expr(&call.func);
                for arg in &call.args {
                    self.expr(arg);
                }
            }
            Expr::Binary(binary) => {
                if self.options.is_enabled(LintCode::SuspiciousCompare)
                    && binary.op.is_comparison()
                {
                    if let Some(kinds) = literal_kinds(&binary.lhs, &binary.rhs) {
                        if kinds.0 != kinds.1 {
                            self.warnings.push(LintWarning {
                                code: LintCode::SuspiciousCompare,
                                location: binary.span,
                                message: format!(
                                    "comparing {} with {} is always {}",
                                    kinds.0,
                                    kinds.1,
                                    binary.op == crate::syntax::BinOp::Ne
                                ),
                            });
                        }
                    }
                }
                self.expr(&binary.lhs);
                self.expr(&binary.rhs);
            }
            Expr::Nil(_) | Expr::True(_) | Expr::False(_) | Expr::Number(..) | Expr::Str(..) => {}
        }
    }

    fn flush_unused_locals(&mut self) {
        if !self.options.is_enabled(LintCode::UnusedLocal) {
            return;
        }
        for local in &self.locals {
            if !local.used && !local.name.starts_with('_') {
                self.warnings.push(LintWarning {
                    code: LintCode::UnusedLocal,
                    location: local.span,
                    message: format!("unused local '{}'", local.name),
                });
            }
        }
    }
}

fn literal_kinds<'e>(lhs: &'e Expr, rhs: &'e Expr) -> Option<(&'static str, &'static str)> {
    Some((literal_kind(lhs)?, literal_kind(rhs)?))
}

fn literal_kind(expr: &Expr) -> Option<&'static str> {
    match expr {
        Expr::Nil(_) => Some("nil"),
        Expr::True(_) | Expr::False(_) => Some("boolean"),
        Expr::Number(..) => Some("number"),
        Expr::Str(..) => Some("string"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    fn lint_source(source: &str) -> Vec<LintWarning> {
        let result = parse(source, &ParseOptions::default());
        assert!(result.errors.is_empty());
        let env = Scope::new();
        Scope::bind(&env, "print", crate::analysis::types::TyId::ANY);
        BuiltinLinter.lint(&result.root, &env, None, &[], LintOptions::all())
    }

    #[test]
    fn flags_unknown_globals() {
        let warnings = lint_source("return frobnicate");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, LintCode::UnknownGlobal);
    }

    #[test]
    fn known_globals_and_locals_are_quiet() {
        let warnings = lint_source("local x = 1\nreturn print(x)");
        assert!(warnings.is_empty());
    }

    #[test]
    fn flags_unused_locals_except_underscored() {
        let warnings = lint_source("local dead = 1\nlocal _ignored = 2\nreturn 3");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, LintCode::UnusedLocal);
    }

    #[test]
    fn flags_mismatched_literal_compares() {
        let warnings = lint_source("return 1 == 'one'");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, LintCode::SuspiciousCompare);
    }

    #[test]
    fn nolint_mask_parses_header_comments() {
        let result = parse("--!nolint UnknownGlobal UnusedLocal\nreturn 1", &ParseOptions {
            capture_comments: true,
        });
        let mask = parse_nolint_mask(&result.hot_comments);
        let mut options = LintOptions::all();
        options.warning_mask &= !mask;
        assert!(!options.is_enabled(LintCode::UnknownGlobal));
        assert!(!options.is_enabled(LintCode::UnusedLocal));
        assert!(options.is_enabled(LintCode::SuspiciousCompare));
    }
}
