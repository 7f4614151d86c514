//! Recursive-descent parser.
//!
//! Grammar notes:
//!
//! - Statements end at a newline, a `;`, a closing brace or end of input.
//!   Newlines inside brackets and argument lists are insignificant.
//! - `struct`/`contract`/`event` declare types; `emit` records an event.
//! - Call arguments may be named (`field: value`); whether named arguments
//!   are legal for a given callee is decided by the compiler, not here.

use crate::ast::*;
use crate::token::{Token, TokenKind};
use sable_core::error::ParseError;
use sable_core::Span;
use std::rc::Rc;

/// The parser.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Create a parser over a token stream (must end with `Eof`).
    pub fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(matches!(
            tokens.last().map(|t| &t.kind),
            Some(TokenKind::Eof)
        ));
        Self { tokens, pos: 0 }
    }

    /// Parse a complete program.
    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::Eof) {
            body.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Program { body })
    }

    // =========================================================================
    // Token Access
    // =========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek_kind().describe()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<(Rc<str>, Span), ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let token = self.advance();
                Ok((name, token.span))
            }
            other => Err(self.error_here(format!(
                "expected identifier, found {}",
                other.describe()
            ))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    fn error_here(&self, message: String) -> ParseError {
        let span = self.peek().span;
        ParseError {
            message,
            line: span.line,
            column: span.column,
        }
    }

    /// Consume a statement terminator: `;`, newline, or an upcoming `}`/EOF.
    fn end_statement(&mut self) -> Result<(), ParseError> {
        if self.eat(&TokenKind::Semicolon) || self.eat(&TokenKind::Newline) {
            return Ok(());
        }
        if self.at(&TokenKind::RBrace) || self.at(&TokenKind::Eof) {
            return Ok(());
        }
        Err(self.error_here(format!(
            "expected end of statement, found {}",
            self.peek_kind().describe()
        )))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.peek().span;
        match self.peek_kind() {
            TokenKind::Let => self.parse_let(false),
            TokenKind::Const => self.parse_let(true),
            TokenKind::Fn => self.parse_function(false),
            TokenKind::Async => {
                self.advance();
                self.parse_function(true)
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Struct => self.parse_struct(false),
            TokenKind::Contract => self.parse_struct(true),
            TokenKind::Event => self.parse_event(),
            TokenKind::Emit => self.parse_emit(),
            TokenKind::Break => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Break,
                    span,
                })
            }
            TokenKind::Continue => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Continue,
                    span,
                })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at(&TokenKind::Newline)
                    || self.at(&TokenKind::Semicolon)
                    || self.at(&TokenKind::RBrace)
                    || self.at(&TokenKind::Eof)
                {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Return(value),
                    span,
                })
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_let(&mut self, is_const: bool) -> Result<Stmt, ParseError> {
        let span = self.advance().span; // let / const
        let (name, _) = self.expect_ident()?;
        let ty = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let value = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.end_statement()?;
        Ok(Stmt {
            kind: StmtKind::Let {
                name,
                ty,
                value,
                is_const,
            },
            span,
        })
    }

    fn parse_type(&mut self) -> Result<Rc<str>, ParseError> {
        let (name, _) = self.expect_ident()?;
        Ok(name)
    }

    fn parse_function(&mut self, is_async: bool) -> Result<Stmt, ParseError> {
        let span = self.expect(&TokenKind::Fn)?.span;
        let (name, _) = self.expect_ident()?;

        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) {
            let (param_name, _) = self.expect_ident()?;
            let ty = if self.eat(&TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            params.push(Param {
                name: param_name,
                ty,
            });
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen)?;

        let return_ty = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::Function(Rc::new(FunctionDef {
                name,
                params,
                return_ty,
                body,
                is_async,
                span,
            })),
            span,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.skip_newlines();
        self.expect(&TokenKind::LBrace)?;
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.error_here("unexpected end of input in block".to_string()));
            }
            body.push(self.parse_statement()?);
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(body)
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let span = self.expect(&TokenKind::If)?.span;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;

        let mut elifs = Vec::new();
        let mut orelse = None;
        loop {
            // Newlines between a `}` and `elif`/`else` are insignificant.
            let checkpoint = self.pos;
            self.skip_newlines();
            if self.eat(&TokenKind::Elif) {
                let elif_test = self.parse_expr()?;
                let elif_body = self.parse_block()?;
                elifs.push((elif_test, elif_body));
            } else if self.eat(&TokenKind::Else) {
                orelse = Some(self.parse_block()?);
                break;
            } else {
                self.pos = checkpoint;
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If {
                test,
                body,
                elifs,
                orelse,
            },
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let span = self.expect(&TokenKind::While)?.span;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            span,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let span = self.expect(&TokenKind::For)?.span;
        let (var, _) = self.expect_ident()?;
        self.expect(&TokenKind::In)?;
        let iterable = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::For {
                var,
                iterable,
                body,
            },
            span,
        })
    }

    fn parse_struct(&mut self, is_contract: bool) -> Result<Stmt, ParseError> {
        let span = self.advance().span; // struct / contract
        let (name, _) = self.expect_ident()?;
        self.skip_newlines();
        self.expect(&TokenKind::LBrace)?;

        let mut fields = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RBrace) {
            let (field_name, _) = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type()?;
            fields.push((field_name, ty));
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.skip_newlines();
        self.expect(&TokenKind::RBrace)?;

        Ok(Stmt {
            kind: StmtKind::StructDef(Rc::new(StructDef {
                name,
                fields,
                is_contract,
                span,
            })),
            span,
        })
    }

    fn parse_event(&mut self) -> Result<Stmt, ParseError> {
        let span = self.expect(&TokenKind::Event)?.span;
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;

        let mut fields = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) {
            let (field_name, _) = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type()?;
            fields.push((field_name, ty));
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen)?;
        self.end_statement()?;

        Ok(Stmt {
            kind: StmtKind::EventDef(Rc::new(EventDef { name, fields, span })),
            span,
        })
    }

    fn parse_emit(&mut self) -> Result<Stmt, ParseError> {
        let span = self.expect(&TokenKind::Emit)?.span;
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;

        let mut args = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen)?;
        self.end_statement()?;

        Ok(Stmt {
            kind: StmtKind::Emit { name, args },
            span,
        })
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt, ParseError> {
        let span = self.peek().span;
        let expr = self.parse_expr()?;

        let op = match self.peek_kind() {
            TokenKind::Assign => Some(AssignOp::Assign),
            TokenKind::PlusAssign => Some(AssignOp::Add),
            TokenKind::MinusAssign => Some(AssignOp::Sub),
            TokenKind::StarAssign => Some(AssignOp::Mul),
            TokenKind::SlashAssign => Some(AssignOp::Div),
            _ => None,
        };

        let kind = if let Some(op) = op {
            if !matches!(
                expr.kind,
                ExprKind::Name(_) | ExprKind::Index { .. } | ExprKind::Field { .. }
            ) {
                return Err(self.error_here("invalid assignment target".to_string()));
            }
            self.advance();
            let value = self.parse_expr()?;
            StmtKind::Assign {
                target: expr,
                op,
                value,
            }
        } else {
            StmtKind::Expr(expr)
        };

        self.end_statement()?;
        Ok(Stmt { kind, span })
    }

    // =========================================================================
    // Expressions (precedence climbing)
    // =========================================================================

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.parse_and()?;
            lhs = logical(lhs, LogicalOp::Or, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.parse_not()?;
            lhs = logical(lhs, LogicalOp::And, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.at(&TokenKind::Not) {
            let span = self.advance().span;
            let operand = self.parse_not()?;
            let span = span.to(operand.span);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_or()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_bit_or()?;
            lhs = binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_xor()?;
        while self.at(&TokenKind::Pipe) {
            self.advance();
            let rhs = self.parse_bit_xor()?;
            lhs = binary(lhs, BinaryOp::BitOr, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_and()?;
        while self.at(&TokenKind::Caret) {
            self.advance();
            let rhs = self.parse_bit_and()?;
            lhs = binary(lhs, BinaryOp::BitXor, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_shift()?;
        while self.at(&TokenKind::Amp) {
            self.advance();
            let rhs = self.parse_shift()?;
            lhs = binary(lhs, BinaryOp::BitAnd, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Shl => BinaryOp::Shl,
                TokenKind::Shr => BinaryOp::Shr,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Await => None,
            _ => return self.parse_power(),
        };

        let span = self.advance().span;
        let operand = self.parse_unary()?;
        let span = span.to(operand.span);
        let kind = match op {
            Some(op) => ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            None => ExprKind::Await(Box::new(operand)),
        };
        Ok(Expr { kind, span })
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_postfix()?;
        if self.eat(&TokenKind::StarStar) {
            // Right-associative; the exponent may carry a unary minus.
            let rhs = self.parse_unary()?;
            return Ok(binary(lhs, BinaryOp::Pow, rhs));
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    let end = self.expect(&TokenKind::RParen)?.span;
                    let span = expr.span.to(end);
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    self.skip_newlines();
                    let index = self.parse_expr()?;
                    self.skip_newlines();
                    let end = self.expect(&TokenKind::RBracket)?.span;
                    let span = expr.span.to(end);
                    expr = Expr {
                        kind: ExprKind::Index {
                            obj: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let (name, name_span) = self.expect_ident()?;
                    let span = expr.span.to(name_span);
                    expr = Expr {
                        kind: ExprKind::Field {
                            obj: Box::new(expr),
                            name,
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        let mut args = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) {
            // `name: value` is a named argument; requires two-token lookahead
            // to distinguish from an expression starting with an identifier.
            let name = match (self.peek_kind(), self.peek_at(1)) {
                (TokenKind::Ident(name), TokenKind::Colon) => {
                    let name = name.clone();
                    self.advance();
                    self.advance();
                    Some(name)
                }
                _ => None,
            };
            let value = self.parse_expr()?;
            args.push(CallArg { name, value });
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Int(value) => {
                self.advance();
                ExprKind::Int(value)
            }
            TokenKind::Float(value) => {
                self.advance();
                ExprKind::Float(value)
            }
            TokenKind::Str(value) => {
                self.advance();
                ExprKind::Str(value)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Void => {
                self.advance();
                ExprKind::Void
            }
            TokenKind::Ident(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => return self.parse_list_literal(),
            TokenKind::LBrace => return self.parse_map_literal(),
            other => {
                return Err(self.error_here(format!(
                    "expected expression, found {}",
                    other.describe()
                )));
            }
        };
        Ok(Expr { kind, span })
    }

    fn parse_list_literal(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(&TokenKind::LBracket)?.span;
        let mut elements = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RBracket) {
            elements.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        let end = self.expect(&TokenKind::RBracket)?.span;
        Ok(Expr {
            kind: ExprKind::List(elements),
            span: start.to(end),
        })
    }

    fn parse_map_literal(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(&TokenKind::LBrace)?.span;
        let mut pairs = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RBrace) {
            let key = self.parse_expr()?;
            // A bare identifier key is sugar for its name as a string.
            let key = match key.kind {
                ExprKind::Name(name) => Expr {
                    kind: ExprKind::Str(name),
                    span: key.span,
                },
                _ => key,
            };
            self.expect(&TokenKind::Colon)?;
            self.skip_newlines();
            let value = self.parse_expr()?;
            pairs.push((key, value));
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        let end = self.expect(&TokenKind::RBrace)?.span;
        Ok(Expr {
            kind: ExprKind::Map(pairs),
            span: start.to(end),
        })
    }
}

fn binary(lhs: Expr, op: BinaryOp, rhs: Expr) -> Expr {
    let span = lhs.span.to(rhs.span);
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

fn logical(lhs: Expr, op: LogicalOp, rhs: Expr) -> Expr {
    let span = lhs.span.to(rhs.span);
    Expr {
        kind: ExprKind::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}
