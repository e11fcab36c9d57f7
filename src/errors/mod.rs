// src/errors/mod.rs
//! Structured error reporting for the Tarn toolchain.
//!
//! Analysis diagnostics accumulate as values and flow upward through
//! `CheckResult`; they are never raised. Only invariant violations
//! (`InternalCompilerError`) are fatal to a top-level call.

pub mod analysis;
pub mod parser;
pub mod render;
pub mod runtime;

pub use analysis::{AnalysisError, AnalysisErrorKind, InternalCompilerError};
pub use parser::{ParseError, ParserError};
pub use render::{render_analysis_errors, render_parse_errors};
pub use runtime::{LoadError, RuntimeError};
