// src/analysis/config.rs

use crate::analysis::lint::LintOptions;
use crate::analysis::{Mode, ModuleName};
use crate::syntax::ParseOptions;

/// Per-module project configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub parse_options: ParseOptions,
    /// Extra globals bound to `any` in a child scope around the module
    /// environment.
    pub globals: Vec<String>,
    pub enabled_lint: LintOptions,
    /// Warnings promoted to errors even when `lint_errors` is off.
    pub fatal_lint: LintOptions,
    /// When set, every lint warning is classified as an error.
    pub lint_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Nonstrict,
            parse_options: ParseOptions::default(),
            globals: Vec::new(),
            enabled_lint: LintOptions::all(),
            fatal_lint: LintOptions::default(),
            lint_errors: false,
        }
    }
}

/// The config-resolver collaborator.
pub trait ConfigResolver {
    fn get_config(&self, name: &ModuleName) -> Config;
}

/// A resolver handing out one fixed config for every module.
#[derive(Debug, Default)]
pub struct NullConfigResolver {
    pub default_config: Config,
}

impl ConfigResolver for NullConfigResolver {
    fn get_config(&self, _name: &ModuleName) -> Config {
        self.default_config.clone()
    }
}
