// src/syntax/token.rs

/// Byte span of a token or AST node within one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: u32, end: u32, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line,
            column: self.column,
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        // miette uses (offset, length)
        (span.start as usize, span.len() as usize).into()
    }
}

/// All token types in the Tarn language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Literals
    Number,
    String,
    Identifier,

    // Keywords
    KwNil,
    KwTrue,
    KwFalse,
    KwLocal,
    KwReturn,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    DotDot,
    EqEq,
    TildeEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,

    // Punctuation
    LParen,
    RParen,
    Comma,
    Dot,

    // Produced for unexpected characters so the parser can report and recover
    Error,

    Eof,
}

/// A single lexed token with its source text and span.
#[derive(Debug, Clone)]
pub struct Token {
    pub ty: TokenType,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn new(ty: TokenType, text: impl Into<String>, span: Span) -> Self {
        Self {
            ty,
            text: text.into(),
            span,
        }
    }
}
