// src/commands/common.rs
//! Shared pieces for CLI commands: the on-disk file resolver and path
//! expansion.

use std::path::{Path, PathBuf};

use crate::analysis::{FileResolver, ModuleName, SourceCode, SourceType};

pub const SOURCE_EXTENSION: &str = "tarn";

/// Resolves module names against the filesystem: the module name is the
/// path without its extension, with `/` separators.
pub struct DiskFileResolver {
    root: PathBuf,
}

impl DiskFileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &ModuleName) -> PathBuf {
        self.root.join(format!("{name}.{SOURCE_EXTENSION}"))
    }
}

impl FileResolver for DiskFileResolver {
    fn read_source(&self, name: &ModuleName) -> Option<SourceCode> {
        let source = std::fs::read_to_string(self.path_for(name)).ok()?;
        Some(SourceCode {
            source,
            source_type: SourceType::Module,
        })
    }

    fn get_human_readable_module_name(&self, name: &ModuleName) -> String {
        self.path_for(name).display().to_string()
    }
}

/// The module name of a source file on disk: its path with the
/// extension stripped.
pub fn module_name_for_path(path: &Path) -> ModuleName {
    path.with_extension("")
        .to_string_lossy()
        .replace('\\', "/")
}

/// Expand CLI path arguments: globs expand, directories search for
/// sources recursively, plain files pass through.
pub fn expand_paths(patterns: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);
        if as_path.is_dir() {
            let nested = format!("{}/**/*.{SOURCE_EXTENSION}", pattern.trim_end_matches('/'));
            if let Ok(entries) = glob::glob(&nested) {
                out.extend(entries.flatten());
            }
            continue;
        }
        if as_path.is_file() {
            out.push(as_path.to_path_buf());
            continue;
        }
        if let Ok(entries) = glob::glob(pattern) {
            out.extend(entries.flatten());
        }
    }

    out.sort();
    out.dedup();
    out
}
