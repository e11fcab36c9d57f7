// src/analysis/module.rs
//! Bookkeeping records of the analysis frontend: source nodes, parsed
//! source modules, and typed check output.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::scope::ScopePtr;
use crate::analysis::types::{TyId, TypeArena};
use crate::analysis::{Mode, ModuleName};
use crate::errors::{AnalysisError, ParseError};
use crate::syntax::ast::Block;
use crate::syntax::{HotComment, Span};

/// What kind of source a module came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    #[default]
    Module,
    Script,
}

/// Source text plus its kind, as handed out by the file resolver.
#[derive(Debug, Clone)]
pub struct SourceCode {
    pub source: String,
    pub source_type: SourceType,
}

/// The file-resolver collaborator. Must be deterministic within one
/// check call.
pub trait FileResolver {
    fn read_source(&self, name: &ModuleName) -> Option<SourceCode>;

    fn get_environment_for_module(&self, _name: &ModuleName) -> Option<String> {
        None
    }

    fn get_human_readable_module_name(&self, name: &ModuleName) -> String {
        name.clone()
    }
}

/// The frontend's per-module dependency record. Created by
/// `get_source_node`, mutated on reparse and `mark_dirty`, destroyed only
/// by `clear`.
#[derive(Debug, Clone)]
pub struct SourceNode {
    pub name: ModuleName,
    pub require_set: FxHashSet<ModuleName>,
    /// Every require call site, in source order.
    pub require_locations: Vec<(ModuleName, Span)>,
    pub dirty_source_module: bool,
    pub dirty_module: bool,
    pub dirty_module_for_autocomplete: bool,
    /// Work-budget multiplier for autocomplete checks, in (0, 1].
    pub autocomplete_limits_mult: f64,
}

impl SourceNode {
    pub fn new(name: ModuleName) -> Self {
        Self {
            name,
            require_set: FxHashSet::default(),
            require_locations: Vec::new(),
            dirty_source_module: true,
            dirty_module: true,
            dirty_module_for_autocomplete: true,
            autocomplete_limits_mult: 1.0,
        }
    }

    pub fn has_dirty_source_module(&self) -> bool {
        self.dirty_source_module
    }

    pub fn has_dirty_module(&self, for_autocomplete: bool) -> bool {
        if for_autocomplete {
            self.dirty_module_for_autocomplete
        } else {
            self.dirty_module
        }
    }
}

/// A parsed module: the syntax root plus everything the checker and
/// linter need. Replaced wholesale on reparse.
#[derive(Debug, Clone, Default)]
pub struct SourceModule {
    pub name: ModuleName,
    pub root: Block,
    pub parse_errors: Vec<ParseError>,
    pub hot_comments: Vec<HotComment>,
    pub comment_spans: Vec<Span>,
    /// Mode override from a header hot-comment, if any.
    pub mode: Option<Mode>,
    pub environment_name: Option<String>,
    pub source_type: SourceType,
    /// Set while checking when the module sits on a require cycle.
    pub cyclic: bool,
}

/// Shared handle to a typed module in one of the frontend's caches.
pub type ModulePtr = Rc<RefCell<Module>>;

/// Typed check output for one module.
#[derive(Debug, Default)]
pub struct Module {
    pub name: ModuleName,
    /// Arena used while checking; cleared when type graphs are trimmed.
    pub internal_types: TypeArena,
    /// Arena holding the public interface; frozen after check.
    pub interface_types: TypeArena,
    pub errors: Vec<AnalysisError>,
    /// Globals this module declared, typed in the interface arena.
    pub declared_globals: FxHashMap<String, TyId>,
    pub exported_type_bindings: FxHashMap<String, TyId>,
    /// Type of the module's `return` expression, in the interface arena.
    pub return_type: Option<TyId>,
    /// Expression types keyed by source span; cleared on trim.
    pub ast_types: FxHashMap<Span, TyId>,
    /// Expression types recorded only in autocomplete mode.
    pub ast_expected_types: FxHashMap<Span, TyId>,
    pub scopes: Vec<ScopePtr>,
    /// True when error handles point into `interface_types` rather than
    /// `internal_types` (set by the trim pass).
    pub trimmed: bool,
    /// Deadline or work budget was exhausted; contents may be partial.
    pub timeout: bool,
}

impl Module {
    pub fn new(name: ModuleName) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// The arena error type handles currently resolve against.
    pub fn error_types(&self) -> &TypeArena {
        if self.trimmed {
            &self.interface_types
        } else {
            &self.internal_types
        }
    }
}

/// A require cycle discovered while scheduling a check: the location of
/// the offending require in the starting module plus the human-readable
/// path, whose first and last entries name the starting module.
#[derive(Debug, Clone, PartialEq)]
pub struct RequireCycle {
    pub location: Span,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub errors: Vec<AnalysisError>,
    /// Modules whose autocomplete check hit its budget this call.
    pub timeout_hits: Vec<ModuleName>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrontendOptions {
    /// Keep full internal type graphs and AST side tables after check.
    /// Costs memory; tools that inspect types turn this on.
    pub retain_full_type_graphs: bool,
    /// Check in the secondary always-strict autocomplete mode.
    pub for_autocomplete: bool,
}

/// Cumulative frontend counters, reset by `clear_stats`.
#[derive(Debug, Clone, Default)]
pub struct FrontendStats {
    pub files: u64,
    pub lines: u64,
    pub files_strict: u64,
    pub files_nonstrict: u64,
    pub time_read: Duration,
    pub time_parse: Duration,
    pub time_check: Duration,
    pub time_lint: Duration,
}
