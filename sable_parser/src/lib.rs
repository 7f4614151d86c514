//! Source-to-AST front end for Sable.
//!
//! The lexer and parser are deliberately mechanical: tokenization is a
//! cursor walk, parsing is recursive descent with precedence climbing.
//! Everything interesting happens downstream of the [`ast::Program`] this
//! crate produces.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

use sable_core::error::ParseError;

/// Tokenize and parse a complete source file.
pub fn parse(source: &str) -> Result<ast::Program, ParseError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).parse_program()
}
