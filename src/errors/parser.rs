// src/errors/parser.rs
//! Parser errors (E1xxx).

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::syntax::Span;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ParserError {
    #[error("unexpected token '{found}'")]
    #[diagnostic(code(E1001))]
    UnexpectedToken {
        found: String,
        #[label("unexpected token")]
        span: SourceSpan,
    },

    #[error("expected {expected}, found '{found}'")]
    #[diagnostic(code(E1002))]
    ExpectedToken {
        expected: &'static str,
        found: String,
        #[label("expected {expected}")]
        span: SourceSpan,
    },

    #[error("expected an expression")]
    #[diagnostic(code(E1003))]
    ExpectedExpression {
        #[label("not an expression")]
        span: SourceSpan,
    },

    #[error("malformed number literal")]
    #[diagnostic(code(E1004))]
    InvalidNumber {
        #[label("cannot be parsed as a number")]
        span: SourceSpan,
    },

    #[error("malformed token")]
    #[diagnostic(
        code(E1005),
        help("strings must be closed on the same line they open")
    )]
    MalformedToken {
        #[label("starting here")]
        span: SourceSpan,
    },

    #[error("cannot assign to this expression")]
    #[diagnostic(code(E1006))]
    InvalidAssignmentTarget {
        #[label("not a name or index expression")]
        span: SourceSpan,
    },
}

/// A parse error wrapping a miette-enabled ParserError
#[derive(Debug, Clone)]
pub struct ParseError {
    pub error: ParserError,
    pub span: Span,
}

impl ParseError {
    pub fn new(error: ParserError, span: Span) -> Self {
        Self { error, span }
    }

    /// Human-readable message without the source snippet.
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}
