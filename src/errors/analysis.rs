// src/errors/analysis.rs
//! Diagnostics produced by the analysis frontend and its checker.
//!
//! These accumulate as plain values: a check call returns every error
//! reachable from the checked module. Type payloads are arena handles so
//! that the frontend can re-home them into a module's interface arena
//! when trimming internal type graphs.

use thiserror::Error;

use crate::analysis::types::{TyId, TypeArena};
use crate::analysis::ModuleName;
use crate::syntax::Span;

/// A single diagnostic: where, in which module, and what kind.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisError {
    pub module: ModuleName,
    pub location: Span,
    pub kind: AnalysisErrorKind,
}

impl AnalysisError {
    pub fn new(module: impl Into<ModuleName>, location: Span, kind: AnalysisErrorKind) -> Self {
        Self {
            module: module.into(),
            location,
            kind,
        }
    }

    /// Render the diagnostic message, resolving type handles in `arena`.
    pub fn render(&self, arena: &TypeArena) -> String {
        self.kind.render(arena)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisErrorKind {
    /// A parse error surfaced through the check pipeline.
    SyntaxError { message: String },
    /// The module participates in a require cycle; one error per offending
    /// require site, carrying the human-readable cycle path.
    ModuleHasCyclicDependency { cycle: Vec<String> },
    /// A require whose path did not resolve to a known module.
    UnknownRequire { name: String },
    /// A global read that no scope binds (strict mode only).
    UnknownGlobal { name: String },
    TypeMismatch { expected: TyId, found: TyId },
    NotCallable { found: TyId },
}

impl AnalysisErrorKind {
    pub fn render(&self, arena: &TypeArena) -> String {
        match self {
            AnalysisErrorKind::SyntaxError { message } => message.clone(),
            AnalysisErrorKind::ModuleHasCyclicDependency { cycle } => {
                format!("cyclic module dependency: {}", cycle.join(" -> "))
            }
            AnalysisErrorKind::UnknownRequire { name } => {
                format!("unknown require: {name}")
            }
            AnalysisErrorKind::UnknownGlobal { name } => {
                format!("unknown global '{name}'")
            }
            AnalysisErrorKind::TypeMismatch { expected, found } => format!(
                "type mismatch: expected {}, found {}",
                arena.display(*expected),
                arena.display(*found)
            ),
            AnalysisErrorKind::NotCallable { found } => {
                format!("cannot call a value of type {}", arena.display(*found))
            }
        }
    }

    /// Mutable references to every type handle this diagnostic carries.
    /// Used to re-home errors into an interface arena.
    pub fn type_refs_mut(&mut self) -> Vec<&mut TyId> {
        match self {
            AnalysisErrorKind::TypeMismatch { expected, found } => vec![expected, found],
            AnalysisErrorKind::NotCallable { found } => vec![found],
            _ => Vec::new(),
        }
    }
}

/// An invariant violation inside the frontend. Fatal to the current
/// top-level call; caches are left in a consistent state.
#[derive(Error, Debug, Clone)]
#[error("internal compiler error in module '{module_name}': {message}")]
pub struct InternalCompilerError {
    pub message: String,
    pub module_name: ModuleName,
}

impl InternalCompilerError {
    pub fn new(message: impl Into<String>, module_name: impl Into<ModuleName>) -> Self {
        Self {
            message: message.into(),
            module_name: module_name.into(),
        }
    }
}
