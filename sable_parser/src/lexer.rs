//! Cursor-based lexer.
//!
//! Walks the source bytes once, tracking line/column for spans. Newlines
//! are significant (they terminate statements) and are emitted as tokens;
//! consecutive newlines collapse to one. `//` comments run to end of line.

use crate::token::{Token, TokenKind};
use sable_core::error::ParseError;
use sable_core::Span;

/// The lexer.
pub struct Lexer<'src> {
    src: &'src str,
    bytes: &'src [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'src> Lexer<'src> {
    /// Create a lexer over a source string.
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 0,
        }
    }

    /// Tokenize the whole input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            // Collapse runs of newlines; a leading newline is noise too.
            if token.kind == TokenKind::Newline
                && matches!(
                    tokens.last().map(|t: &Token| &t.kind),
                    None | Some(TokenKind::Newline)
                )
            {
                continue;
            }
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn here(&self) -> Span {
        Span::new(self.pos as u32, self.pos as u32 + 1, self.line, self.column)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia();

        let start = self.here();
        let Some(byte) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: start,
            });
        };

        let kind = match byte {
            b'\n' => {
                self.bump();
                TokenKind::Newline
            }
            b'0'..=b'9' => return self.lex_number(start),
            b'"' => return self.lex_string(start),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Ok(self.lex_ident(start)),
            _ => self.lex_operator()?,
        };

        Ok(Token {
            kind,
            span: self.span_from(start),
        })
    }

    /// Skip spaces, tabs, carriage returns and `//` comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn span_from(&self, start: Span) -> Span {
        Span::new(start.start, self.pos as u32, start.line, start.column)
    }

    fn lex_number(&mut self, start: Span) -> Result<Token, ParseError> {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.bump();
            }
        }

        let text = &self.src[start.start as usize..self.pos];
        let kind = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))?;
            TokenKind::Float(value)
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error(format!("integer literal '{text}' out of range")))?;
            TokenKind::Int(value)
        };
        Ok(Token {
            kind,
            span: self.span_from(start),
        })
    }

    fn lex_string(&mut self, start: Span) -> Result<Token, ParseError> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    return Err(self.error("unterminated string literal"));
                }
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => text.push('\n'),
                    Some(b't') => text.push('\t'),
                    Some(b'r') => text.push('\r'),
                    Some(b'\\') => text.push('\\'),
                    Some(b'"') => text.push('"'),
                    Some(other) => {
                        return Err(
                            self.error(format!("unknown escape '\\{}'", other as char))
                        );
                    }
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(byte) => {
                    // Re-assemble multi-byte UTF-8 sequences from the raw
                    // bytes; the source is valid UTF-8 by construction.
                    if byte.is_ascii() {
                        text.push(byte as char);
                    } else {
                        let char_start = self.pos - 1;
                        let ch = self.src[char_start..]
                            .chars()
                            .next()
                            .expect("valid utf-8 source");
                        for _ in 1..ch.len_utf8() {
                            self.bump();
                        }
                        text.push(ch);
                    }
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Str(text.into()),
            span: self.span_from(start),
        })
    }

    fn lex_ident(&mut self, start: Span) -> Token {
        while matches!(
            self.peek(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
        ) {
            self.bump();
        }
        let text = &self.src[start.start as usize..self.pos];
        let kind =
            TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Ident(text.into()));
        Token {
            kind,
            span: self.span_from(start),
        }
    }

    fn lex_operator(&mut self) -> Result<TokenKind, ParseError> {
        let byte = self.bump().expect("caller checked non-empty");
        let followed_by = |lexer: &mut Self, expected: u8| {
            if lexer.peek() == Some(expected) {
                lexer.bump();
                true
            } else {
                false
            }
        };

        Ok(match byte {
            b'+' if followed_by(self, b'=') => TokenKind::PlusAssign,
            b'+' => TokenKind::Plus,
            b'-' if followed_by(self, b'=') => TokenKind::MinusAssign,
            b'-' if followed_by(self, b'>') => TokenKind::Arrow,
            b'-' => TokenKind::Minus,
            b'*' if followed_by(self, b'*') => TokenKind::StarStar,
            b'*' if followed_by(self, b'=') => TokenKind::StarAssign,
            b'*' => TokenKind::Star,
            b'/' if followed_by(self, b'=') => TokenKind::SlashAssign,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'=' if followed_by(self, b'=') => TokenKind::EqEq,
            b'=' => TokenKind::Assign,
            b'!' if followed_by(self, b'=') => TokenKind::NotEq,
            b'<' if followed_by(self, b'=') => TokenKind::LtEq,
            b'<' if followed_by(self, b'<') => TokenKind::Shl,
            b'<' => TokenKind::Lt,
            b'>' if followed_by(self, b'=') => TokenKind::GtEq,
            b'>' if followed_by(self, b'>') => TokenKind::Shr,
            b'>' => TokenKind::Gt,
            b'&' => TokenKind::Amp,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'~' => TokenKind::Tilde,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            other => {
                return Err(self.error(format!("unexpected character '{}'", other as char)));
            }
        })
    }
}
