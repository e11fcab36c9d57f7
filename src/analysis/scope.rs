// src/analysis/scope.rs

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::analysis::types::TyId;

/// Shared handle to a scope. Scopes form a parent chain: module
/// environments are children of the global scope, and config-driven
/// global injections wrap an extra child around those.
pub type ScopePtr = Rc<RefCell<Scope>>;

/// A binding for one name visible in a scope.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub ty: TyId,
}

#[derive(Debug, Default)]
pub struct Scope {
    pub parent: Option<ScopePtr>,
    pub bindings: FxHashMap<String, Binding>,
}

impl Scope {
    pub fn new() -> ScopePtr {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &ScopePtr) -> ScopePtr {
        Rc::new(RefCell::new(Scope {
            parent: Some(parent.clone()),
            bindings: FxHashMap::default(),
        }))
    }

    /// Look `name` up through the parent chain.
    pub fn lookup(scope: &ScopePtr, name: &str) -> Option<Binding> {
        let mut current = scope.clone();
        loop {
            if let Some(binding) = current.borrow().bindings.get(name) {
                return Some(*binding);
            }
            let parent = current.borrow().parent.clone()?;
            current = parent;
        }
    }

    pub fn bind(scope: &ScopePtr, name: impl Into<String>, ty: TyId) {
        scope.borrow_mut().bindings.insert(name.into(), Binding { ty });
    }
}
