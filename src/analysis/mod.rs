// src/analysis/mod.rs
//! The incremental analysis frontend and its collaborator seams.

pub mod checker;
pub mod config;
pub mod frontend;
pub mod lint;
pub mod module;
pub mod require;
pub mod scope;
pub mod types;

pub use checker::{BuiltinChecker, CheckContext, ModuleChecker, ModuleResolverView};
pub use config::{Config, ConfigResolver, NullConfigResolver};
pub use frontend::{Frontend, LoadDefinitionFileResult, AUTOCOMPLETE_TIMEOUT_MS};
pub use lint::{BuiltinLinter, LintCode, LintOptions, LintResult, LintWarning, Linter};
pub use module::{
    CheckResult, FileResolver, FrontendOptions, FrontendStats, Module, ModulePtr, RequireCycle,
    SourceCode, SourceModule, SourceNode, SourceType,
};
pub use scope::{Binding, Scope, ScopePtr};
pub use types::{CloneState, Ty, TyId, TypeArena};

use crate::syntax::HotComment;

/// Opaque module identifier. Cheap to clone, resolver-defined.
pub type ModuleName = String;

/// Analysis mode for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Parse and schedule only; no diagnostics beyond syntax.
    NoCheck,
    /// Gradual checking; unknown globals are permitted.
    Nonstrict,
    Strict,
    /// Used for definition files that declare globals.
    Definition,
}

/// The mode override requested by a file's header hot-comments, if any.
pub fn parse_mode(hot_comments: &[HotComment]) -> Option<Mode> {
    for hc in hot_comments {
        if !hc.header {
            continue;
        }

        match hc.content.as_str() {
            "nocheck" => return Some(Mode::NoCheck),
            "nonstrict" => return Some(Mode::Nonstrict),
            "strict" => return Some(Mode::Strict),
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    fn hot_comments(source: &str) -> Vec<HotComment> {
        parse(
            source,
            &ParseOptions {
                capture_comments: true,
            },
        )
        .hot_comments
    }

    #[test]
    fn header_mode_comments_override() {
        assert_eq!(
            parse_mode(&hot_comments("--!strict\nreturn 1")),
            Some(Mode::Strict)
        );
        assert_eq!(
            parse_mode(&hot_comments("--!nocheck\nreturn 1")),
            Some(Mode::NoCheck)
        );
        assert_eq!(
            parse_mode(&hot_comments("--!nonstrict\nreturn 1")),
            Some(Mode::Nonstrict)
        );
    }

    #[test]
    fn unknown_or_trailing_comments_do_not_override() {
        assert_eq!(parse_mode(&hot_comments("--!turbo\nreturn 1")), None);
        assert_eq!(parse_mode(&hot_comments("return 1\n--!strict")), None);
    }
}
