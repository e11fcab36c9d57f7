// src/cli/mod.rs
pub mod args;

pub use args::{Cli, ColorMode, Commands, InspectType};

use std::io::IsTerminal;

impl ColorMode {
    /// Resolve against the actual stderr terminal.
    pub fn use_color(self) -> bool {
        match self {
            ColorMode::Auto => std::io::stderr().is_terminal(),
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}
