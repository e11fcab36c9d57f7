// src/analysis/frontend.rs
//! The incremental analysis frontend.
//!
//! For each requested module the frontend parses its source, traces its
//! requires, topologically orders the dependency graph, checks each dirty
//! module in order, caches typed modules, and returns accumulated
//! diagnostics. Two parallel caches are maintained: the normal one and an
//! autocomplete one checked under an adaptive budget.

use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::checker::{
    BuiltinChecker, CheckContext, ModuleChecker, ModuleResolverView,
};
use crate::analysis::config::{Config, ConfigResolver};
use crate::analysis::lint::{
    parse_nolint_mask, BuiltinLinter, LintCode, LintOptions, LintResult, LintWarning, Linter,
};
use crate::analysis::module::{
    CheckResult, FileResolver, FrontendOptions, FrontendStats, Module, ModulePtr, RequireCycle,
    SourceModule, SourceNode,
};
use crate::analysis::require;
use crate::analysis::scope::{Scope, ScopePtr};
use crate::analysis::types::{clone_ty, CloneState, TypeArena};
use crate::analysis::{parse_mode, Mode, ModuleName};
use crate::errors::{AnalysisError, AnalysisErrorKind, InternalCompilerError, ParseError};
use crate::syntax::{self, ast::Block, ParseOptions};

/// Default wall-clock budget for one autocomplete module check.
pub const AUTOCOMPLETE_TIMEOUT_MS: u64 = 100;

/// An applicator registered under a name and later applied to an
/// environment scope; it may allocate into the global type arena.
pub type BuiltinDefinition = Rc<dyn Fn(&mut TypeArena, &ScopePtr)>;

/// Result of loading a definition file into the global scope.
pub struct LoadDefinitionFileResult {
    pub success: bool,
    pub parse_errors: Vec<ParseError>,
    pub module: Option<Module>,
}

pub struct Frontend {
    file_resolver: Rc<dyn FileResolver>,
    config_resolver: Rc<dyn ConfigResolver>,
    checker: Rc<dyn ModuleChecker>,
    linter: Rc<dyn Linter>,
    options: FrontendOptions,

    source_nodes: FxHashMap<ModuleName, SourceNode>,
    source_modules: FxHashMap<ModuleName, SourceModule>,
    modules: FxHashMap<ModuleName, ModulePtr>,
    modules_for_autocomplete: FxHashMap<ModuleName, ModulePtr>,

    // Global arenas are frozen between calls; loadDefinitionFile and
    // builtin applicators briefly unfreeze them.
    global_types: TypeArena,
    global_types_for_autocomplete: TypeArena,
    global_scope: ScopePtr,
    global_scope_for_autocomplete: ScopePtr,
    environments: FxHashMap<String, ScopePtr>,
    builtin_definitions: FxHashMap<String, BuiltinDefinition>,

    /// Wall-clock budget per autocomplete module check; 0 disables it.
    pub autocomplete_timeout_ms: u64,
    /// Base statement budget scaled by a node's autocomplete multiplier.
    pub iteration_limit: Option<u32>,
    /// Base expression-depth budget scaled the same way.
    pub instantiation_child_limit: Option<u32>,

    stats: FrontendStats,
}

impl Frontend {
    pub fn new(
        file_resolver: Rc<dyn FileResolver>,
        config_resolver: Rc<dyn ConfigResolver>,
        options: FrontendOptions,
    ) -> Self {
        let mut global_types = TypeArena::new();
        let mut global_types_for_autocomplete = TypeArena::new();
        global_types.freeze();
        global_types_for_autocomplete.freeze();

        Self {
            file_resolver,
            config_resolver,
            checker: Rc::new(BuiltinChecker),
            linter: Rc::new(BuiltinLinter),
            options,
            source_nodes: FxHashMap::default(),
            source_modules: FxHashMap::default(),
            modules: FxHashMap::default(),
            modules_for_autocomplete: FxHashMap::default(),
            global_types,
            global_types_for_autocomplete,
            global_scope: Scope::new(),
            global_scope_for_autocomplete: Scope::new(),
            environments: FxHashMap::default(),
            builtin_definitions: FxHashMap::default(),
            autocomplete_timeout_ms: AUTOCOMPLETE_TIMEOUT_MS,
            iteration_limit: None,
            instantiation_child_limit: None,
            stats: FrontendStats::default(),
        }
    }

    /// Replace the checker collaborator.
    pub fn with_checker(mut self, checker: Rc<dyn ModuleChecker>) -> Self {
        self.checker = checker;
        self
    }

    /// Replace the linter collaborator.
    pub fn with_linter(mut self, linter: Rc<dyn Linter>) -> Self {
        self.linter = linter;
        self
    }

    pub fn stats(&self) -> &FrontendStats {
        &self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = FrontendStats::default();
    }

    /// Drop every cache. Source nodes, source modules, and typed modules
    /// are all forgotten; global scopes and environments survive.
    pub fn clear(&mut self) {
        self.source_nodes.clear();
        self.source_modules.clear();
        self.modules.clear();
        self.modules_for_autocomplete.clear();
    }

    pub fn get_global_scope(&self) -> ScopePtr {
        self.global_scope.clone()
    }

    pub fn get_source_module(&self, name: &ModuleName) -> Option<&SourceModule> {
        self.source_modules.get(name)
    }

    /// The typed module cached for `name`, if any.
    pub fn get_module(&self, name: &ModuleName, for_autocomplete: bool) -> Option<ModulePtr> {
        if for_autocomplete {
            self.modules_for_autocomplete.get(name).cloned()
        } else {
            self.modules.get(name).cloned()
        }
    }

    /// Current autocomplete work-budget multiplier for a known module.
    pub fn autocomplete_limits_mult(&self, name: &ModuleName) -> Option<f64> {
        self.source_nodes
            .get(name)
            .map(|node| node.autocomplete_limits_mult)
    }

    pub fn is_dirty(&self, name: &ModuleName, for_autocomplete: bool) -> bool {
        self.source_nodes
            .get(name)
            .is_none_or(|node| node.has_dirty_module(for_autocomplete))
    }

    /// Ensure `name` and all transitive dependencies are checked in the
    /// selected mode, then return every diagnostic reachable from `name`.
    pub fn check(
        &mut self,
        name: &ModuleName,
        option_override: Option<FrontendOptions>,
    ) -> Result<CheckResult, InternalCompilerError> {
        let options = option_override.unwrap_or(self.options);
        let _span = tracing::debug_span!("check", module = %name, for_autocomplete = options.for_autocomplete).entered();

        let mut check_result = CheckResult::default();

        if let Some(node) = self.source_nodes.get(name) {
            if !node.has_dirty_module(options.for_autocomplete) {
                // No recheck required; the cache must agree.
                let cache = if options.for_autocomplete {
                    &self.modules_for_autocomplete
                } else {
                    &self.modules
                };
                if !cache.contains_key(name) {
                    return Err(InternalCompilerError::new(
                        format!("Frontend::modules does not have data for {name}"),
                        name.clone(),
                    ));
                }
                check_result.errors = self.accumulate_errors(name, options.for_autocomplete);
                return Ok(check_result);
            }
        }

        let mut build_queue = Vec::new();
        let cycle_detected = self.parse_graph(&mut build_queue, name, options.for_autocomplete);

        for module_name in &build_queue {
            let node = self.source_nodes.get(module_name).ok_or_else(|| {
                InternalCompilerError::new("build queue names an unknown module", module_name.clone())
            })?;
            if !node.has_dirty_module(options.for_autocomplete) {
                continue;
            }
            let limits_mult = node.autocomplete_limits_mult;

            if !self.source_modules.contains_key(module_name) {
                return Err(InternalCompilerError::new(
                    "missing parsed source for scheduled module",
                    module_name.clone(),
                ));
            }

            let config = self.config_resolver.get_config(module_name);
            let mode = self
                .source_modules
                .get(module_name)
                .and_then(|sm| sm.mode)
                .unwrap_or(config.mode);

            let environment_scope = {
                let source_module = &self.source_modules[module_name];
                self.get_module_environment(source_module, &config, options.for_autocomplete)
            };

            let timestamp = Instant::now();

            // In NoCheck mode only the cyclic flag matters, so the cycle
            // search can stop at the first hit.
            let require_cycles = if cycle_detected {
                self.get_require_cycles(module_name, mode == Mode::NoCheck)
            } else {
                Vec::new()
            };

            if let Some(source_module) = self.source_modules.get_mut(module_name) {
                source_module.cyclic = !require_cycles.is_empty();
            }

            if options.for_autocomplete {
                // The autocomplete check always runs in strict mode, under
                // a budget scaled by how this module behaved before.
                let finish_time = (self.autocomplete_timeout_ms != 0)
                    .then(|| timestamp + Duration::from_millis(self.autocomplete_timeout_ms));
                let iteration_limit = self
                    .iteration_limit
                    .map(|limit| ((limit as f64 * limits_mult) as u32).max(1));
                let child_limit = self
                    .instantiation_child_limit
                    .map(|limit| ((limit as f64 * limits_mult) as u32).max(1));

                let checker = Rc::clone(&self.checker);
                let module = {
                    let source_module = &self.source_modules[module_name];
                    let ctx = CheckContext {
                        mode: Mode::Strict,
                        environment: environment_scope,
                        global_types: &self.global_types_for_autocomplete,
                        require_cycles: &require_cycles,
                        finish_time,
                        iteration_limit,
                        child_limit,
                        resolver: ModuleResolverView {
                            modules: &self.modules_for_autocomplete,
                            source_nodes: &self.source_nodes,
                            file_resolver: &*self.file_resolver,
                        },
                    };
                    checker.check(source_module, &ctx)
                };

                let duration = timestamp.elapsed();
                let timed_out = module.timeout;

                self.modules_for_autocomplete
                    .insert(module_name.clone(), ModulePtr::new(module.into()));

                let node = self.source_nodes.get_mut(module_name).ok_or_else(|| {
                    InternalCompilerError::new("source node vanished mid-check", module_name.clone())
                })?;

                if timed_out {
                    check_result.timeout_hits.push(module_name.clone());
                    node.autocomplete_limits_mult /= 2.0;
                } else if duration * 2 < Duration::from_millis(self.autocomplete_timeout_ms) {
                    node.autocomplete_limits_mult = (node.autocomplete_limits_mult * 2.0).min(1.0);
                }

                self.stats.time_check += duration;
                self.stats.files_strict += 1;

                node.dirty_module_for_autocomplete = false;
                continue;
            }

            let checker = Rc::clone(&self.checker);
            let mut module = {
                let source_module = &self.source_modules[module_name];
                let ctx = CheckContext {
                    mode,
                    environment: environment_scope,
                    global_types: &self.global_types,
                    require_cycles: &require_cycles,
                    finish_time: None,
                    iteration_limit: None,
                    child_limit: None,
                    resolver: ModuleResolverView {
                        modules: &self.modules,
                        source_nodes: &self.source_nodes,
                        file_resolver: &*self.file_resolver,
                    },
                };
                checker.check(source_module, &ctx)
            };

            self.stats.time_check += timestamp.elapsed();
            self.stats.files_strict += u64::from(mode == Mode::Strict);
            self.stats.files_nonstrict += u64::from(mode == Mode::Nonstrict);

            if !options.retain_full_type_graphs {
                // The interface arena must absorb every type the errors
                // reference before the internal arena goes away.
                module.interface_types.unfreeze();
                let mut state = CloneState::new();
                for error in &mut module.errors {
                    for ty in error.kind.type_refs_mut() {
                        *ty = clone_ty(
                            &module.internal_types,
                            *ty,
                            &mut module.interface_types,
                            &mut state,
                        );
                    }
                }
                module.interface_types.freeze();

                module.internal_types.unfreeze();
                module.internal_types.clear();
                module.internal_types.freeze();

                module.ast_types.clear();
                module.ast_expected_types.clear();
                module.scopes.clear();
                module.trimmed = true;
            }

            if mode != Mode::NoCheck {
                for cycle in &require_cycles {
                    module.errors.push(AnalysisError::new(
                        module_name.clone(),
                        cycle.location,
                        AnalysisErrorKind::ModuleHasCyclicDependency {
                            cycle: cycle.path.clone(),
                        },
                    ));
                }
            }

            let source_module = &self.source_modules[module_name];
            let parse_errors: Vec<AnalysisError> = source_module
                .parse_errors
                .iter()
                .map(|pe| {
                    AnalysisError::new(
                        module_name.clone(),
                        pe.span,
                        AnalysisErrorKind::SyntaxError {
                            message: pe.message(),
                        },
                    )
                })
                .collect();
            module.errors.splice(0..0, parse_errors);

            check_result.errors.extend(module.errors.iter().cloned());

            self.modules
                .insert(module_name.clone(), ModulePtr::new(module.into()));
            self.source_nodes
                .get_mut(module_name)
                .ok_or_else(|| {
                    InternalCompilerError::new("source node vanished mid-check", module_name.clone())
                })?
                .dirty_module = false;
        }

        Ok(check_result)
    }

    /// Collect every diagnostic of every module reachable from `name`.
    fn accumulate_errors(&self, name: &ModuleName, for_autocomplete: bool) -> Vec<AnalysisError> {
        let modules = if for_autocomplete {
            &self.modules_for_autocomplete
        } else {
            &self.modules
        };

        let mut seen = FxHashSet::default();
        let mut queue = vec![name.clone()];
        let mut result = Vec::new();

        while let Some(next) = queue.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }

            let Some(source_node) = self.source_nodes.get(&next) else {
                continue;
            };
            queue.extend(source_node.require_set.iter().cloned());

            let Some(module) = modules.get(&next) else {
                continue;
            };

            let mut errors = module.borrow().errors.clone();
            errors.sort_by(|a, b| b.location.start.cmp(&a.location.start));
            result.extend(errors);
        }

        result.reverse();
        result
    }

    /// Iterative DFS topological sort over the require graph.
    ///
    /// Non-dirty subtrees are skipped entirely: `mark_dirty` propagates
    /// over reverse dependencies, so a non-dirty node's transitive deps
    /// are all non-dirty and cannot form a cycle with any dirty node we
    /// do process. A back-edge sets the cyclic flag without aborting the
    /// sort.
    fn parse_graph(
        &mut self,
        build_queue: &mut Vec<ModuleName>,
        root: &ModuleName,
        for_autocomplete: bool,
    ) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            None,
            Temporary,
            Permanent,
        }

        let _span = tracing::trace_span!("parse_graph", root = %root).entered();

        let mut seen: FxHashMap<ModuleName, Mark> = FxHashMap::default();
        // `None` entries are post-order markers for the node on top of `path`.
        let mut stack: Vec<Option<ModuleName>> = Vec::new();
        let mut path: Vec<ModuleName> = Vec::new();
        let mut cyclic = false;

        if self.get_source_node(root).is_some() {
            stack.push(Some(root.clone()));
        }

        while let Some(top) = stack.pop() {
            let Some(name) = top else {
                let finished = path.pop().unwrap_or_else(|| {
                    unreachable!("post-order marker without a path entry")
                });
                seen.insert(finished.clone(), Mark::Permanent);
                build_queue.push(finished);
                continue;
            };

            match seen.get(&name) {
                Some(Mark::Permanent) => continue,
                Some(Mark::Temporary) => {
                    cyclic = true;
                    continue;
                }
                // `Mark::None` entries were pre-registered when the node
                // was discovered; visit them now.
                Some(Mark::None) | None => {}
            }

            seen.insert(name.clone(), Mark::Temporary);

            stack.push(None);
            path.push(name.clone());

            let deps: Vec<ModuleName> = self
                .source_nodes
                .get(&name)
                .map(|node| node.require_set.iter().cloned().collect())
                .unwrap_or_default();

            for dep in deps {
                if let Some(node) = self.source_nodes.get(&dep) {
                    if !node.has_dirty_module(for_autocomplete) {
                        continue;
                    }
                    if seen.contains_key(&dep) {
                        stack.push(Some(dep));
                        continue;
                    }
                }

                if self.get_source_node(&dep).is_some() {
                    // paired with the contains_key check above: each
                    // module is parsed at most once per graph walk
                    seen.insert(dep.clone(), Mark::None);
                    stack.push(Some(dep));
                }
            }
        }

        cyclic
    }

    /// For each of `start`'s direct requires, find the first DFS-order
    /// dependency path leading back to `start`. Cycle paths open and
    /// close with `start`'s human-readable name.
    ///
    /// The `seen` set is cleared only after a cycle is recorded: nodes
    /// visited without producing one cannot reach `start`, so excluding
    /// them from later searches is safe, while nodes on a recorded cycle
    /// may still lie on another cycle through a different sibling.
    pub fn get_require_cycles(
        &self,
        start: &ModuleName,
        stop_at_first: bool,
    ) -> Vec<RequireCycle> {
        let mut result = Vec::new();
        let Some(start_node) = self.source_nodes.get(start) else {
            return result;
        };

        let mut seen: FxHashSet<ModuleName> = FxHashSet::default();
        let mut stack: Vec<Option<&SourceNode>> = Vec::new();
        let mut path: Vec<&SourceNode> = Vec::new();

        for (dep_name, dep_location) in &start_node.require_locations {
            let mut cycle: Vec<String> = Vec::new();

            let Some(dep_node) = self.source_nodes.get(dep_name) else {
                continue;
            };
            stack.push(Some(dep_node));

            while let Some(top) = stack.pop() {
                let Some(top) = top else {
                    // post-order marker
                    let Some(finished) = path.pop() else {
                        continue;
                    };
                    if finished.name == *start {
                        // the remaining path plus this node closes a cycle
                        cycle.push(self.human_name(start));
                        for node in &path {
                            cycle.push(self.human_name(&node.name));
                        }
                        cycle.push(self.human_name(&finished.name));
                        break;
                    }
                    continue;
                };

                if seen.contains(&top.name) {
                    continue;
                }
                seen.insert(top.name.clone());

                path.push(top);
                stack.push(None);

                // requires are pushed in reverse so the stack pops them in
                // source order and the reported cycle is first in DFS order
                for (req_name, _) in top.require_locations.iter().rev() {
                    if let Some(req_node) = self.source_nodes.get(req_name) {
                        stack.push(Some(req_node));
                    }
                }
            }

            path.clear();
            stack.clear();

            if !cycle.is_empty() {
                result.push(RequireCycle {
                    location: *dep_location,
                    path: cycle,
                });

                if stop_at_first {
                    return result;
                }

                seen.clear();
            }
        }

        result
    }

    fn human_name(&self, name: &ModuleName) -> String {
        self.file_resolver.get_human_readable_module_name(name)
    }

    /// Mark `name` and every module that transitively requires it as
    /// requiring a recheck, in all caches. The reverse-dependency map is
    /// rebuilt on demand; the parsed SourceModule is evicted but the
    /// SourceNode is kept so the dirty flag triggers the reparse.
    pub fn mark_dirty(&mut self, name: &ModuleName, mut out_marked: Option<&mut Vec<ModuleName>>) {
        if !self.modules.contains_key(name) && !self.modules_for_autocomplete.contains_key(name) {
            return;
        }

        let mut reverse_deps: FxHashMap<ModuleName, Vec<ModuleName>> = FxHashMap::default();
        for (module_name, node) in &self.source_nodes {
            for dep in &node.require_set {
                reverse_deps
                    .entry(dep.clone())
                    .or_default()
                    .push(module_name.clone());
            }
        }

        let mut queue = vec![name.clone()];

        while let Some(next) = queue.pop() {
            let Some(node) = self.source_nodes.get_mut(&next) else {
                continue;
            };

            if let Some(out) = out_marked.as_deref_mut() {
                out.push(next.clone());
            }

            if node.dirty_source_module && node.dirty_module && node.dirty_module_for_autocomplete
            {
                continue;
            }

            node.dirty_source_module = true;
            node.dirty_module = true;
            node.dirty_module_for_autocomplete = true;

            self.source_modules.remove(&next);

            if let Some(dependents) = reverse_deps.get(&next) {
                queue.extend(dependents.iter().cloned());
            }
        }
    }

    /// Read the AST for `name` into the source caches if necessary,
    /// tracing requires along the way. Memoized by the
    /// `dirty_source_module` flag. A missing file removes any existing
    /// SourceModule and returns None, which later surfaces as an unknown
    /// require diagnostic instead of an error here.
    pub fn get_source_node(
        &mut self,
        name: &ModuleName,
    ) -> Option<(&SourceNode, &SourceModule)> {
        if let Some(node) = self.source_nodes.get(name) {
            if !node.has_dirty_source_module() && self.source_modules.contains_key(name) {
                let node = &self.source_nodes[name];
                let source_module = &self.source_modules[name];
                return Some((node, source_module));
            }
        }

        let timestamp = Instant::now();
        let source = self.file_resolver.read_source(name);
        let environment_name = self.file_resolver.get_environment_for_module(name);
        self.stats.time_read += timestamp.elapsed();

        let Some(source) = source else {
            self.source_modules.remove(name);
            return None;
        };

        let config = self.config_resolver.get_config(name);
        let mut parse_options = config.parse_options.clone();
        parse_options.capture_comments = true;

        let mut source_module = self.parse(name, &source.source, &parse_options);
        source_module.source_type = source.source_type;
        source_module.environment_name = environment_name;

        let require_list = require::trace_requires(&source_module.root, name);

        let is_new = !self.source_nodes.contains_key(name);
        let node = self
            .source_nodes
            .entry(name.clone())
            .or_insert_with(|| SourceNode::new(name.clone()));

        node.require_set.clear();
        node.require_locations.clear();
        node.dirty_source_module = false;

        if is_new {
            node.dirty_module = true;
            node.dirty_module_for_autocomplete = true;
        }

        for (dep, _) in &require_list {
            node.require_set.insert(dep.clone());
        }
        node.require_locations = require_list;

        self.source_modules.insert(name.clone(), source_module);

        let node = &self.source_nodes[name];
        let source_module = &self.source_modules[name];
        Some((node, source_module))
    }

    /// Parse one source file into a SourceModule.
    ///
    /// If the file has syntax errors they are recorded for the check
    /// pipeline, and when nothing could be recovered the module falls
    /// back to an empty root in NoCheck mode so that downstream
    /// consumers can still make progress.
    fn parse(&mut self, name: &ModuleName, src: &str, parse_options: &ParseOptions) -> SourceModule {
        let timestamp = Instant::now();
        let result = syntax::parse(src, parse_options);
        self.stats.time_parse += timestamp.elapsed();
        self.stats.files += 1;
        self.stats.lines += u64::from(result.lines);

        let mut source_module = SourceModule {
            name: name.clone(),
            ..SourceModule::default()
        };

        if result.errors.is_empty() || !result.root.stats.is_empty() {
            source_module.root = result.root;
            source_module.mode = parse_mode(&result.hot_comments);
        } else {
            source_module.root = Block::default();
            source_module.mode = Some(Mode::NoCheck);
        }

        source_module.parse_errors = result.errors;
        if parse_options.capture_comments {
            source_module.comment_spans = result.comment_spans;
            source_module.hot_comments = result.hot_comments;
        }

        source_module
    }

    /// The scope a module checks in: the mode's global scope, overridden
    /// by a named environment if the module has one, wrapped in a child
    /// scope binding config-listed globals to `any`.
    fn get_module_environment(
        &self,
        module: &SourceModule,
        config: &Config,
        for_autocomplete: bool,
    ) -> ScopePtr {
        let mut result = if for_autocomplete {
            self.global_scope_for_autocomplete.clone()
        } else {
            self.global_scope.clone()
        };

        if let Some(environment_name) = &module.environment_name {
            if let Some(scope) = self.environments.get(environment_name) {
                result = scope.clone();
            }
        }

        if !config.globals.is_empty() {
            let child = Scope::child(&result);
            for global in &config.globals {
                Scope::bind(&child, global.clone(), crate::analysis::types::TyId::ANY);
            }
            result = child;
        }

        result
    }

    /// Lint `name`, configuring warnings from project config and
    /// hot-comments. Requires that a SourceModule exists; a file too
    /// broken to read lints as empty.
    pub fn lint(&mut self, name: &ModuleName, enabled: Option<LintOptions>) -> LintResult {
        let _span = tracing::debug_span!("lint", module = %name).entered();

        if self.get_source_node(name).is_none() {
            return LintResult::default();
        }

        let config = self.config_resolver.get_config(name);
        let module_ptr = self.modules.get(name).cloned();
        let linter = Rc::clone(&self.linter);

        let timestamp = Instant::now();
        let (warnings, duration) = {
            let source_module = &self.source_modules[name];

            let ignore_mask = parse_nolint_mask(&source_module.hot_comments);
            let mut options = enabled.unwrap_or(config.enabled_lint);
            options.warning_mask &= !ignore_mask;

            let mode = source_module.mode.unwrap_or(config.mode);
            if mode != Mode::NoCheck {
                // the checker already reports unknown globals there
                options.disable_warning(LintCode::UnknownGlobal);
            }

            let environment_scope = self.get_module_environment(source_module, &config, false);

            let module_guard = module_ptr.as_ref().map(|m| m.borrow());
            let warnings = linter.lint(
                &source_module.root,
                &environment_scope,
                module_guard.as_deref(),
                &source_module.hot_comments,
                options,
            );
            (warnings, timestamp.elapsed())
        };

        self.stats.time_lint += duration;

        classify_lints(warnings, &config)
    }

    /// Register a named environment as a child of the global scope.
    pub fn add_environment(&mut self, environment_name: &str) -> ScopePtr {
        self.environments
            .entry(environment_name.to_string())
            .or_insert_with(|| Scope::child(&self.global_scope))
            .clone()
    }

    pub fn get_environment_scope(&self, environment_name: &str) -> Option<ScopePtr> {
        self.environments.get(environment_name).cloned()
    }

    /// Register a builtin definition applicator under a name.
    pub fn register_builtin_definition(
        &mut self,
        name: &str,
        applicator: BuiltinDefinition,
    ) {
        self.builtin_definitions
            .entry(name.to_string())
            .or_insert(applicator);
    }

    /// Apply a registered builtin definition to a named environment. The
    /// global arena is unfrozen only for the duration of the applicator.
    pub fn apply_builtin_definition_to_environment(
        &mut self,
        environment_name: &str,
        definition_name: &str,
    ) -> Result<(), InternalCompilerError> {
        let applicator = self
            .builtin_definitions
            .get(definition_name)
            .cloned()
            .ok_or_else(|| {
                InternalCompilerError::new(
                    format!("unknown builtin definition '{definition_name}'"),
                    environment_name.to_string(),
                )
            })?;
        let scope = self.get_environment_scope(environment_name).ok_or_else(|| {
            InternalCompilerError::new(
                format!("unknown environment '{environment_name}'"),
                environment_name.to_string(),
            )
        })?;

        self.global_types.unfreeze();
        applicator(&mut self.global_types, &scope);
        self.global_types.freeze();
        Ok(())
    }

    /// Check a definition source in Definition mode against the global
    /// scope, then persist its declared globals into the global arenas
    /// and scopes of both modes.
    pub fn load_definition_file(
        &mut self,
        source: &str,
        package_name: &str,
    ) -> LoadDefinitionFileResult {
        let _span = tracing::debug_span!("load_definition_file", package = package_name).entered();

        let parse_options = ParseOptions {
            capture_comments: true,
        };
        let module_name: ModuleName = format!("@{package_name}");
        let source_module = self.parse(&module_name, source, &parse_options);

        if !source_module.parse_errors.is_empty() {
            return LoadDefinitionFileResult {
                success: false,
                parse_errors: source_module.parse_errors,
                module: None,
            };
        }

        let checker = Rc::clone(&self.checker);
        let module = {
            let ctx = CheckContext {
                mode: Mode::Definition,
                environment: self.global_scope.clone(),
                global_types: &self.global_types,
                require_cycles: &[],
                finish_time: None,
                iteration_limit: None,
                child_limit: None,
                resolver: ModuleResolverView {
                    modules: &self.modules,
                    source_nodes: &self.source_nodes,
                    file_resolver: &*self.file_resolver,
                },
            };
            checker.check(&source_module, &ctx)
        };

        if !module.errors.is_empty() {
            return LoadDefinitionFileResult {
                success: false,
                parse_errors: Vec::new(),
                module: Some(module),
            };
        }

        self.global_types.unfreeze();
        self.global_types_for_autocomplete.unfreeze();

        let mut state = CloneState::new();
        let mut state_for_autocomplete = CloneState::new();
        for (global, ty) in &module.declared_globals {
            let cloned = clone_ty(
                &module.interface_types,
                *ty,
                &mut self.global_types,
                &mut state,
            );
            Scope::bind(&self.global_scope, global.clone(), cloned);

            let cloned = clone_ty(
                &module.interface_types,
                *ty,
                &mut self.global_types_for_autocomplete,
                &mut state_for_autocomplete,
            );
            Scope::bind(&self.global_scope_for_autocomplete, global.clone(), cloned);
        }

        self.global_types.freeze();
        self.global_types_for_autocomplete.freeze();

        LoadDefinitionFileResult {
            success: true,
            parse_errors: Vec::new(),
            module: Some(module),
        }
    }

    /// Resolve the message of a diagnostic against the arena of the
    /// module that produced it.
    pub fn render_error(&self, error: &AnalysisError) -> String {
        if let Some(module) = self.modules.get(&error.module) {
            let module = module.borrow();
            return error.render(module.error_types());
        }
        // No cached module (e.g. pure parse errors): primitives suffice.
        error.render(&TypeArena::new())
    }
}

fn classify_lints(warnings: Vec<LintWarning>, config: &Config) -> LintResult {
    let mut result = LintResult::default();
    for warning in warnings {
        if config.lint_errors || config.fatal_lint.is_enabled(warning.code) {
            result.errors.push(warning);
        } else {
            result.warnings.push(warning);
        }
    }
    result
}
