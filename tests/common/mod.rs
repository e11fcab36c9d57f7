// tests/common/mod.rs
//! Shared fixtures for the integration suites: an in-memory file
//! resolver, a configurable config resolver, and a small IR evaluator
//! that executes fast paths and routes fallback helpers into the
//! runtime.

#![allow(dead_code)]

pub mod ir_eval;

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use tarn::analysis::{Config, ConfigResolver, FileResolver, ModuleName, SourceCode, SourceType};

/// A file resolver over an in-memory map, mutable between check calls.
#[derive(Default)]
pub struct MemoryFileResolver {
    files: RefCell<FxHashMap<ModuleName, String>>,
}

impl MemoryFileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, source: &str) {
        self.files
            .borrow_mut()
            .insert(name.to_string(), source.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.files.borrow_mut().remove(name);
    }
}

impl FileResolver for MemoryFileResolver {
    fn read_source(&self, name: &ModuleName) -> Option<SourceCode> {
        self.files.borrow().get(name).map(|source| SourceCode {
            source: source.clone(),
            source_type: SourceType::Module,
        })
    }
}

/// Config resolver handing out one mutable config for every module.
#[derive(Default)]
pub struct TestConfigResolver {
    pub config: RefCell<Config>,
}

impl TestConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: tarn::analysis::Mode) -> Self {
        let resolver = Self::default();
        resolver.config.borrow_mut().mode = mode;
        resolver
    }
}

impl ConfigResolver for TestConfigResolver {
    fn get_config(&self, _name: &ModuleName) -> Config {
        self.config.borrow().clone()
    }
}
