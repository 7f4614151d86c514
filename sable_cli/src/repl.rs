//! Interactive shell.
//!
//! Reads a statement at a time (continuing across lines while brackets are
//! unbalanced), executes it in a persistent interpreter environment, and
//! prints non-void results.

use crate::diagnostics;
use sable_interp::Interpreter;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

/// Run the REPL until end of input.
pub fn run() -> ExitCode {
    println!("sable {} - interactive shell", sable_core::VERSION);
    println!("end a session with ctrl-d");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut interp = Interpreter::new();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { ">> " } else { ".. " };
        print!("{prompt}");
        let _ = io::stdout().flush();

        let Some(Ok(line)) = lines.next() else {
            break;
        };
        buffer.push_str(&line);
        buffer.push('\n');

        if open_brackets(&buffer) > 0 {
            continue;
        }
        let source = std::mem::take(&mut buffer);
        if source.trim().is_empty() {
            continue;
        }

        match sable_parser::parse(&source) {
            Ok(program) => match interp.run(&program) {
                Ok(value) if !value.is_void() => println!("{value}"),
                Ok(_) => {}
                Err(error) => {
                    eprint!("{}", diagnostics::render(&error, Some(&source), "<repl>"));
                }
            },
            Err(error) => {
                eprint!(
                    "{}",
                    diagnostics::render(&error.into(), Some(&source), "<repl>")
                );
            }
        }
    }
    ExitCode::SUCCESS
}

/// Net count of unclosed brackets, ignoring strings and comments.
fn open_brackets(source: &str) -> i32 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' | '\n' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '/' if chars.peek() == Some(&'/') => {
                for comment_ch in chars.by_ref() {
                    if comment_ch == '\n' {
                        break;
                    }
                }
            }
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            _ => {}
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_brackets() {
        assert_eq!(open_brackets("let x = 1"), 0);
        assert_eq!(open_brackets("fn f() {"), 1);
        assert_eq!(open_brackets("fn f() {\n return [1, 2"), 2);
        assert_eq!(open_brackets("fn f() { return 1 }"), 0);
    }

    #[test]
    fn test_brackets_ignore_strings_and_comments() {
        assert_eq!(open_brackets("let s = \"{[(\""), 0);
        assert_eq!(open_brackets("let x = 1 // {{{\n"), 0);
    }
}
