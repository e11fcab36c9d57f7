// src/analysis/checker.rs
//! The type-checker collaborator interface and the reference checker.
//!
//! The frontend drives any `ModuleChecker` through `CheckContext`; the
//! checker must populate errors, the interface arena, declared globals,
//! and exports, and set the `timeout` flag when it runs out of budget.

use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::analysis::module::{Module, ModulePtr, RequireCycle, SourceModule, SourceNode};
use crate::analysis::require;
use crate::analysis::scope::{Scope, ScopePtr};
use crate::analysis::types::{clone_ty, CloneState, TyId};
use crate::analysis::{Mode, ModuleName};
use crate::errors::{AnalysisError, AnalysisErrorKind};
use crate::syntax::ast::{BinOp, Block, Expr, Stat};

/// Read-only view of the frontend's caches, handed to a checker so it can
/// resolve requires against already-checked modules.
pub struct ModuleResolverView<'a> {
    pub modules: &'a FxHashMap<ModuleName, ModulePtr>,
    pub source_nodes: &'a FxHashMap<ModuleName, SourceNode>,
    pub file_resolver: &'a dyn crate::analysis::module::FileResolver,
}

impl ModuleResolverView<'_> {
    pub fn get_module(&self, name: &ModuleName) -> Option<ModulePtr> {
        self.modules.get(name).cloned()
    }

    pub fn module_exists(&self, name: &ModuleName) -> bool {
        self.source_nodes.contains_key(name)
    }

    pub fn human_name(&self, name: &ModuleName) -> String {
        self.file_resolver.get_human_readable_module_name(name)
    }
}

/// Everything a checker invocation may consult besides the source module.
pub struct CheckContext<'a> {
    pub mode: Mode,
    pub environment: ScopePtr,
    /// Arena the environment scope's bindings resolve against; binding
    /// handles must be cloned before use in a module arena.
    pub global_types: &'a crate::analysis::types::TypeArena,
    /// Cycles through the module being checked; requires along these
    /// edges type as `any`.
    pub require_cycles: &'a [RequireCycle],
    /// Wall-clock deadline (autocomplete mode only).
    pub finish_time: Option<Instant>,
    /// Statement-level work budget; `None` means unlimited.
    pub iteration_limit: Option<u32>,
    /// Expression nesting budget; `None` means unlimited.
    pub child_limit: Option<u32>,
    pub resolver: ModuleResolverView<'a>,
}

impl CheckContext<'_> {
    /// True when `require`ing `human_name` from the checked module closes
    /// a recorded cycle. Cycle paths start and end with the checked
    /// module, so the required module is the second entry.
    pub fn is_cyclic_require(&self, human_name: &str) -> bool {
        self.require_cycles
            .iter()
            .any(|cycle| cycle.path.len() >= 2 && cycle.path[1] == human_name)
    }
}

/// The type-checker collaborator.
pub trait ModuleChecker {
    fn check(&self, source: &SourceModule, ctx: &CheckContext<'_>) -> Module;
}

/// Reference checker: literal and operator inference over the Tarn AST,
/// require resolution through the frontend caches, declared-global and
/// export collection, and budget polling.
#[derive(Debug, Default)]
pub struct BuiltinChecker;

impl ModuleChecker for BuiltinChecker {
    fn check(&self, source: &SourceModule, ctx: &CheckContext<'_>) -> Module {
        let mut module = Module::new(source.name.clone());

        if ctx.mode != Mode::NoCheck {
            let mut pass = CheckPass {
                source,
                ctx,
                module: &mut module,
                locals: Vec::new(),
                steps: 0,
            };
            pass.block(&source.root);
        }

        // Publish the interface: re-home exports into the interface arena.
        let mut state = CloneState::new();
        if let Some(ret) = module.return_type {
            module.return_type = Some(clone_ty(
                &module.internal_types,
                ret,
                &mut module.interface_types,
                &mut state,
            ));
        }
        for ty in module.declared_globals.values_mut() {
            *ty = clone_ty(
                &module.internal_types,
                *ty,
                &mut module.interface_types,
                &mut state,
            );
        }
        for ty in module.exported_type_bindings.values_mut() {
            *ty = clone_ty(
                &module.internal_types,
                *ty,
                &mut module.interface_types,
                &mut state,
            );
        }

        module.scopes.push(ctx.environment.clone());
        module.internal_types.freeze();
        module.interface_types.freeze();
        module
    }
}

struct CheckPass<'a, 'm> {
    source: &'a SourceModule,
    ctx: &'a CheckContext<'a>,
    module: &'m mut Module,
    locals: Vec<(String, TyId)>,
    steps: u32,
}

impl CheckPass<'_, '_> {
    fn block(&mut self, root: &Block) {
        for stat in &root.stats {
            if self.out_of_budget() {
                self.module.timeout = true;
                tracing::debug!(module = %self.source.name, "check budget exhausted");
                return;
            }
            self.stat(stat);
        }
    }

    fn out_of_budget(&mut self) -> bool {
        self.steps += 1;
        if let Some(limit) = self.ctx.iteration_limit {
            if self.steps > limit {
                return true;
            }
        }
        if let Some(finish) = self.ctx.finish_time {
            if Instant::now() >= finish {
                return true;
            }
        }
        false
    }

    fn stat(&mut self, stat: &Stat) {
        match stat {
            Stat::Local(local) => {
                let ty = self.infer(&local.value, 0);
                self.locals.push((local.name.clone(), ty));
            }
            Stat::Assign(assign) => {
                let ty = self.infer(&assign.value, 0);
                match &assign.target {
                    Expr::Name(name, span) => {
                        if let Some(slot) =
                            self.locals.iter_mut().rev().find(|(n, _)| n == name)
                        {
                            slot.1 = ty;
                        } else if Scope::lookup(&self.ctx.environment, name).is_some()
                            || self.ctx.mode != Mode::Strict
                        {
                            // Global writes declare the global outside of
                            // strict mode (and definition files rely on it).
                            self.module.declared_globals.insert(name.clone(), ty);
                        } else {
                            self.error(*span, AnalysisErrorKind::UnknownGlobal { name: name.clone() });
                        }
                    }
                    target => {
                        self.infer(target, 0);
                    }
                }
            }
            Stat::Return(ret) => {
                let ty = match &ret.value {
                    Some(value) => self.infer(value, 0),
                    None => TyId::NIL,
                };
                self.module.return_type = Some(ty);
            }
            Stat::Expr(expr) => {
                self.infer(expr, 0);
            }
        }
    }

    fn infer(&mut self, expr: &Expr, depth: u32) -> TyId {
        if let Some(limit) = self.ctx.child_limit {
            if depth > limit {
                self.module.timeout = true;
                return TyId::ANY;
            }
        }

        let ty = match expr {
            Expr::Nil(_) => TyId::NIL,
            Expr::True(_) | Expr::False(_) => TyId::BOOLEAN,
            Expr::Number(..) => TyId::NUMBER,
            Expr::Str(..) => TyId::STRING,
            Expr::Name(name, span) => self.infer_name(name, *span),
            Expr::Index(index) => {
                let base = self.infer(&index.base, depth + 1);
                self.index_field(base, &index.field)
            }
            Expr::Call(call) => self.infer_call(call, depth),
            Expr::Binary(binary) => {
                let lhs = self.infer(&binary.lhs, depth + 1);
                let rhs = self.infer(&binary.rhs, depth + 1);
                self.binary_result(binary, lhs, rhs)
            }
        };

        self.module.ast_types.insert(expr.span(), ty);
        ty
    }

    fn infer_name(&mut self, name: &str, span: crate::syntax::Span) -> TyId {
        if let Some((_, ty)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return *ty;
        }
        if let Some(binding) = Scope::lookup(&self.ctx.environment, name) {
            // environment bindings live in the global arena
            let mut state = CloneState::new();
            return clone_ty(
                self.ctx.global_types,
                binding.ty,
                &mut self.module.internal_types,
                &mut state,
            );
        }
        if self.ctx.mode == Mode::Strict {
            self.error(span, AnalysisErrorKind::UnknownGlobal { name: name.to_string() });
        }
        TyId::ANY
    }

    fn index_field(&mut self, base: TyId, field: &str) -> TyId {
        match self.module.internal_types.get(base).clone() {
            crate::analysis::types::Ty::Table(fields) => fields
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, ty)| *ty)
                .unwrap_or(TyId::ANY),
            _ => TyId::ANY,
        }
    }

    fn infer_call(&mut self, call: &crate::syntax::ast::CallExpr, depth: u32) -> TyId {
        if let Expr::Name(func, _) = &call.func {
            if func == "require" && call.args.len() == 1 {
                return self.infer_require(call);
            }
        }

        let func_ty = self.infer(&call.func, depth + 1);
        for arg in &call.args {
            self.infer(arg, depth + 1);
        }

        let ret = match self.module.internal_types.get(func_ty) {
            crate::analysis::types::Ty::Function { ret, .. } => Some(*ret),
            crate::analysis::types::Ty::Any | crate::analysis::types::Ty::Error => Some(TyId::ANY),
            _ => None,
        };

        match ret {
            Some(ret) => ret,
            None => {
                self.error(call.span, AnalysisErrorKind::NotCallable { found: func_ty });
                TyId::ANY
            }
        }
    }

    fn infer_require(&mut self, call: &crate::syntax::ast::CallExpr) -> TyId {
        let Some(dep) = require::resolve_require_expr(&self.source.name, &call.args[0]) else {
            self.error(
                call.span,
                AnalysisErrorKind::UnknownRequire {
                    name: "unsupported require path".to_string(),
                },
            );
            return TyId::ANY;
        };

        // Requires that close a cycle are typed as any so checking can
        // proceed; the frontend reports the cycle separately.
        if self.ctx.is_cyclic_require(&self.ctx.resolver.human_name(&dep)) {
            return TyId::ANY;
        }

        if !self.ctx.resolver.module_exists(&dep) {
            self.error(call.span, AnalysisErrorKind::UnknownRequire { name: dep });
            return TyId::ANY;
        }

        let Some(dep_module) = self.ctx.resolver.get_module(&dep) else {
            // Scheduled after us only when cyclic; treated as any.
            return TyId::ANY;
        };

        let dep_module = dep_module.borrow();
        match dep_module.return_type {
            Some(ret) => {
                let mut state = CloneState::new();
                clone_ty(
                    &dep_module.interface_types,
                    ret,
                    &mut self.module.internal_types,
                    &mut state,
                )
            }
            None => TyId::ANY,
        }
    }

    fn binary_result(
        &mut self,
        binary: &crate::syntax::ast::BinaryExpr,
        lhs: TyId,
        rhs: TyId,
    ) -> TyId {
        if binary.op.is_arithmetic() {
            for (ty, operand) in [(lhs, &binary.lhs), (rhs, &binary.rhs)] {
                if !matches!(
                    self.module.internal_types.get(ty),
                    crate::analysis::types::Ty::Number
                        | crate::analysis::types::Ty::Any
                        | crate::analysis::types::Ty::Error
                ) {
                    self.error(
                        operand.span(),
                        AnalysisErrorKind::TypeMismatch {
                            expected: TyId::NUMBER,
                            found: ty,
                        },
                    );
                }
            }
            return TyId::NUMBER;
        }

        if binary.op == BinOp::Concat {
            for (ty, operand) in [(lhs, &binary.lhs), (rhs, &binary.rhs)] {
                // numbers coerce in concatenation
                if !matches!(
                    self.module.internal_types.get(ty),
                    crate::analysis::types::Ty::String
                        | crate::analysis::types::Ty::Number
                        | crate::analysis::types::Ty::Any
                        | crate::analysis::types::Ty::Error
                ) {
                    self.error(
                        operand.span(),
                        AnalysisErrorKind::TypeMismatch {
                            expected: TyId::STRING,
                            found: ty,
                        },
                    );
                }
            }
            return TyId::STRING;
        }

        debug_assert!(binary.op.is_comparison());
        if matches!(binary.op, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge) {
            // ordered comparison requires operands of one comparable type
            let comparable = |ty: TyId, pass: &Self| {
                matches!(
                    pass.module.internal_types.get(ty),
                    crate::analysis::types::Ty::Number
                        | crate::analysis::types::Ty::String
                        | crate::analysis::types::Ty::Any
                        | crate::analysis::types::Ty::Error
                )
            };
            if !comparable(lhs, self) {
                self.error(
                    binary.lhs.span(),
                    AnalysisErrorKind::TypeMismatch {
                        expected: TyId::NUMBER,
                        found: lhs,
                    },
                );
            } else if !comparable(rhs, self) {
                self.error(
                    binary.rhs.span(),
                    AnalysisErrorKind::TypeMismatch {
                        expected: lhs,
                        found: rhs,
                    },
                );
            }
        }
        TyId::BOOLEAN
    }

    fn error(&mut self, location: crate::syntax::Span, kind: AnalysisErrorKind) {
        self.module
            .errors
            .push(AnalysisError::new(self.source.name.clone(), location, kind));
    }
}
