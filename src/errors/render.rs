// src/errors/render.rs
//! Console rendering for diagnostics.
//!
//! Parse errors render through miette (labeled source snippets); analysis
//! diagnostics render as one `file:line:col` line each, matching the
//! accumulate-then-report flow of the frontend.

use std::io::Write;

use crate::errors::ParseError;
use crate::syntax::Span;

/// Severity of a rendered diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A diagnostic whose message has already been resolved against the
/// owning module's type arena.
#[derive(Debug, Clone)]
pub struct RenderedDiagnostic {
    pub file: String,
    pub span: Span,
    pub severity: Severity,
    pub message: String,
}

/// Render parse errors with labeled source snippets.
pub fn render_parse_errors(file: &str, source: &str, errors: &[ParseError]) {
    for error in errors {
        let report = miette::Report::new(error.error.clone())
            .with_source_code(miette::NamedSource::new(file, source.to_string()));
        eprintln!("{report:?}");
    }
}

/// Render analysis diagnostics, one line each.
pub fn render_analysis_errors<W: Write>(
    out: &mut W,
    diagnostics: &[RenderedDiagnostic],
    use_color: bool,
) -> std::io::Result<()> {
    for diag in diagnostics {
        let (style, label) = match diag.severity {
            Severity::Error => (color(use_color, "\x1b[1;31m"), "error"),
            Severity::Warning => (color(use_color, "\x1b[1;33m"), "warning"),
        };
        writeln!(
            out,
            "{}:{}:{}: {}{}{}: {}",
            diag.file,
            diag.span.line,
            diag.span.column,
            style,
            label,
            color(use_color, "\x1b[0m"),
            diag.message,
        )?;
    }
    Ok(())
}

fn color(use_color: bool, code: &'static str) -> &'static str {
    if use_color {
        code
    } else {
        ""
    }
}
