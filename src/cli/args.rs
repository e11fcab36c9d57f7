// src/cli/args.rs

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Color output mode
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect based on terminal
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

/// What `tarn inspect` renders
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum InspectType {
    /// The loaded prototype tree
    Proto,
    /// The translated IR of the main prototype
    Ir,
}

/// Tarn programming language toolchain
#[derive(Parser)]
#[command(name = "tarn")]
#[command(version = "0.1.0")]
#[command(about = "Tarn programming language toolchain", long_about = None)]
pub struct Cli {
    /// Color output: auto, always, never
    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check Tarn source files for errors without running them
    Check {
        /// Paths to check (files, directories, or glob patterns)
        #[arg(value_name = "PATHS", required = true)]
        paths: Vec<String>,

        /// Also run the linter and report warnings
        #[arg(long)]
        lint: bool,
    },
    /// Inspect compiled bytecode (prototypes or translated IR)
    Inspect {
        /// What to inspect: proto, ir
        #[arg(value_name = "TYPE", value_enum)]
        inspect_type: InspectType,

        /// Path to the .tbc bytecode blob
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Load and run a compiled bytecode blob
    Run {
        /// Path to the .tbc bytecode blob
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}
