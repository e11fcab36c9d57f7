// src/syntax/parser.rs

use crate::errors::{ParseError, ParserError};
use crate::syntax::ast::*;
use crate::syntax::{HotComment, Lexer, Span, Token, TokenType};

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub capture_comments: bool,
}

/// Output of a parse: a root block plus everything the frontend needs to
/// bookkeep the module (errors, comments, line count). Parsing never
/// fails outright; a broken file yields whatever statements recovered.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub root: Block,
    pub errors: Vec<ParseError>,
    pub hot_comments: Vec<HotComment>,
    pub comment_spans: Vec<Span>,
    pub lines: u32,
}

pub struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token,
    previous: Token,
    errors: Vec<ParseError>,
}

/// Parse a chunk. This is the only entry point the frontend uses.
pub fn parse(source: &str, options: &ParseOptions) -> ParseResult {
    let mut lexer = Lexer::new(source, options.capture_comments);
    let current = lexer.next_token();
    let mut parser = Parser {
        lexer,
        current,
        previous: Token::new(TokenType::Eof, "", Span::default()),
        errors: Vec::new(),
    };

    let root = parser.chunk();
    let lines = parser.lexer.line();
    let comment_spans = parser.lexer.take_comments();
    let hot_comments = parser.lexer.take_hot_comments();

    ParseResult {
        root,
        errors: parser.errors,
        hot_comments,
        comment_spans,
        lines,
    }
}

impl<'src> Parser<'src> {
    fn chunk(&mut self) -> Block {
        let start = self.current.span;
        let mut stats = Vec::new();

        while !self.check(TokenType::Eof) {
            match self.statement() {
                Ok(stat) => stats.push(stat),
                Err(error) => {
                    self.errors.push(error);
                    self.synchronize();
                }
            }
        }

        let span = if stats.is_empty() {
            start
        } else {
            start.to(self.previous.span)
        };

        Block { stats, span }
    }

    fn statement(&mut self) -> Result<Stat, ParseError> {
        match self.current.ty {
            TokenType::KwLocal => self.local_statement(),
            TokenType::KwReturn => self.return_statement(),
            _ => self.expr_statement(),
        }
    }

    fn local_statement(&mut self) -> Result<Stat, ParseError> {
        let start = self.current.span;
        self.advance();

        let name = self.expect_identifier("a variable name")?;
        self.expect(TokenType::Eq, "'='")?;
        let value = self.expression(0)?;
        let span = start.to(value.span());

        Ok(Stat::Local(LocalStat { name, value, span }))
    }

    fn return_statement(&mut self) -> Result<Stat, ParseError> {
        let start = self.current.span;
        self.advance();

        let value = if self.check(TokenType::Eof) || !self.starts_expression() {
            None
        } else {
            Some(self.expression(0)?)
        };

        let span = match &value {
            Some(expr) => start.to(expr.span()),
            None => start,
        };

        Ok(Stat::Return(ReturnStat { value, span }))
    }

    fn expr_statement(&mut self) -> Result<Stat, ParseError> {
        let expr = self.expression(0)?;

        if self.check(TokenType::Eq) {
            let eq_span = self.current.span;
            self.advance();
            let value = self.expression(0)?;

            if !expr.is_assign_target() {
                return Err(ParseError::new(
                    ParserError::InvalidAssignmentTarget {
                        span: expr.span().into(),
                    },
                    eq_span,
                ));
            }

            let span = expr.span().to(value.span());
            return Ok(Stat::Assign(AssignStat {
                target: expr,
                value,
                span,
            }));
        }

        Ok(Stat::Expr(expr))
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary_or_primary()?;

        loop {
            let Some((op, lbp, rbp)) = binary_op(self.current.ty) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            self.advance();

            let rhs = self.expression(rbp)?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary(Box::new(BinaryExpr { op, lhs, rhs, span }));
        }

        Ok(lhs)
    }

    fn unary_or_primary(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;

        // Postfix: index chains and calls
        loop {
            match self.current.ty {
                TokenType::Dot => {
                    self.advance();
                    let field = self.expect_identifier("a field name")?;
                    let span = expr.span().to(self.previous.span);
                    expr = Expr::Index(Box::new(IndexExpr {
                        base: expr,
                        field,
                        span,
                    }));
                }
                TokenType::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenType::RParen) {
                        loop {
                            args.push(self.expression(0)?);
                            if !self.check(TokenType::Comma) {
                                break;
                            }
                            self.advance();
                        }
                    }
                    self.expect(TokenType::RParen, "')'")?;
                    let span = expr.span().to(self.previous.span);
                    expr = Expr::Call(Box::new(CallExpr {
                        func: expr,
                        args,
                        span,
                    }));
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current.clone();
        match token.ty {
            TokenType::KwNil => {
                self.advance();
                Ok(Expr::Nil(token.span))
            }
            TokenType::KwTrue => {
                self.advance();
                Ok(Expr::True(token.span))
            }
            TokenType::KwFalse => {
                self.advance();
                Ok(Expr::False(token.span))
            }
            TokenType::Number => {
                self.advance();
                let value = token.text.parse::<f64>().map_err(|_| {
                    ParseError::new(
                        ParserError::InvalidNumber {
                            span: token.span.into(),
                        },
                        token.span,
                    )
                })?;
                Ok(Expr::Number(value, token.span))
            }
            TokenType::String => {
                self.advance();
                Ok(Expr::Str(token.text, token.span))
            }
            TokenType::Identifier => {
                self.advance();
                Ok(Expr::Name(token.text, token.span))
            }
            TokenType::LParen => {
                self.advance();
                let expr = self.expression(0)?;
                self.expect(TokenType::RParen, "')'")?;
                Ok(expr)
            }
            TokenType::Error => Err(ParseError::new(
                ParserError::MalformedToken {
                    span: token.span.into(),
                },
                token.span,
            )),
            _ => Err(ParseError::new(
                ParserError::ExpectedExpression {
                    span: token.span.into(),
                },
                token.span,
            )),
        }
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.current.ty,
            TokenType::KwNil
                | TokenType::KwTrue
                | TokenType::KwFalse
                | TokenType::Number
                | TokenType::String
                | TokenType::Identifier
                | TokenType::LParen
        )
    }

    /// Skip to the next plausible statement start after an error.
    fn synchronize(&mut self) {
        if !self.check(TokenType::Eof) {
            self.advance();
        }
        while !matches!(
            self.current.ty,
            TokenType::Eof | TokenType::KwLocal | TokenType::KwReturn
        ) {
            self.advance();
        }
    }

    fn expect_identifier(&mut self, what: &'static str) -> Result<String, ParseError> {
        if self.check(TokenType::Identifier) {
            let name = self.current.text.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.expected(what))
        }
    }

    fn expect(&mut self, ty: TokenType, what: &'static str) -> Result<(), ParseError> {
        if self.check(ty) {
            self.advance();
            Ok(())
        } else {
            Err(self.expected(what))
        }
    }

    fn expected(&self, what: &'static str) -> ParseError {
        ParseError::new(
            ParserError::ExpectedToken {
                expected: what,
                found: self.current.text.clone(),
                span: self.current.span.into(),
            },
            self.current.span,
        )
    }

    fn check(&self, ty: TokenType) -> bool {
        self.current.ty == ty
    }

    fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, self.lexer.next_token());
    }
}

fn binary_op(ty: TokenType) -> Option<(BinOp, u8, u8)> {
    // (op, left bp, right bp); right-associative ops bind tighter on the left
    match ty {
        TokenType::EqEq => Some((BinOp::Eq, 1, 2)),
        TokenType::TildeEq => Some((BinOp::Ne, 1, 2)),
        TokenType::Lt => Some((BinOp::Lt, 1, 2)),
        TokenType::LtEq => Some((BinOp::Le, 1, 2)),
        TokenType::Gt => Some((BinOp::Gt, 1, 2)),
        TokenType::GtEq => Some((BinOp::Ge, 1, 2)),
        TokenType::DotDot => Some((BinOp::Concat, 4, 3)),
        TokenType::Plus => Some((BinOp::Add, 5, 6)),
        TokenType::Minus => Some((BinOp::Sub, 5, 6)),
        TokenType::Star => Some((BinOp::Mul, 7, 8)),
        TokenType::Slash => Some((BinOp::Div, 7, 8)),
        TokenType::Percent => Some((BinOp::Mod, 7, 8)),
        TokenType::Caret => Some((BinOp::Pow, 10, 9)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Block {
        let result = parse(source, &ParseOptions::default());
        assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
        result.root
    }

    #[test]
    fn parses_local_with_require_chain() {
        let root = parse_ok("local m = require(script.Parent.Util)");
        assert_eq!(root.stats.len(), 1);
        let Stat::Local(local) = &root.stats[0] else {
            panic!("expected local");
        };
        assert_eq!(local.name, "m");
        assert!(matches!(local.value, Expr::Call(_)));
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let root = parse_ok("return 1 + 2 * 3");
        let Stat::Return(ret) = &root.stats[0] else {
            panic!("expected return");
        };
        let Some(Expr::Binary(add)) = &ret.value else {
            panic!("expected binary");
        };
        assert_eq!(add.op, BinOp::Add);
        assert!(matches!(&add.rhs, Expr::Binary(mul) if mul.op == BinOp::Mul));
    }

    #[test]
    fn concat_is_right_associative() {
        let root = parse_ok("return 'a' .. 'b' .. 'c'");
        let Stat::Return(ret) = &root.stats[0] else {
            panic!("expected return");
        };
        let Some(Expr::Binary(outer)) = &ret.value else {
            panic!("expected binary");
        };
        assert_eq!(outer.op, BinOp::Concat);
        assert!(matches!(&outer.lhs, Expr::Str(s, _) if s == "a"));
        assert!(matches!(&outer.rhs, Expr::Binary(inner) if inner.op == BinOp::Concat));
    }

    #[test]
    fn recovers_after_a_broken_statement() {
        let result = parse("local = 1\nreturn 2", &ParseOptions::default());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.root.stats.len(), 1);
        assert!(matches!(result.root.stats[0], Stat::Return(_)));
    }

    #[test]
    fn assignment_to_a_call_is_rejected() {
        let result = parse("f() = 1", &ParseOptions::default());
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0].error,
            ParserError::InvalidAssignmentTarget { .. }
        ));
    }

    #[test]
    fn line_count_is_recorded() {
        let result = parse("local a = 1\nlocal b = 2\nreturn a + b", &ParseOptions::default());
        assert_eq!(result.lines, 3);
    }
}
