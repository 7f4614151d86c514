//! Source-anchored error rendering.

use sable_core::SableError;

/// Render an error with a source excerpt and caret when a position is
/// available:
///
/// ```text
/// error[unresolved name]: name 'x' is not declared
///   --> demo.sbl:2:8
///    |
///  2 | let y = x + 1
///    |         ^
/// ```
pub fn render(error: &SableError, source: Option<&str>, filename: &str) -> String {
    let (label, message, position) = describe(error);
    let mut output = format!("error[{label}]: {message}\n");

    if let Some((line, column)) = position {
        output.push_str(&format!("  --> {filename}:{line}:{}\n", column + 1));
        if let Some(text) = source.and_then(|src| src.lines().nth(line as usize - 1)) {
            let gutter = line.to_string();
            let pad = " ".repeat(gutter.len());
            output.push_str(&format!(" {pad} |\n"));
            output.push_str(&format!(" {gutter} | {text}\n"));
            let caret_pad = " ".repeat(column as usize);
            output.push_str(&format!(" {pad} | {caret_pad}^\n"));
        }
    } else {
        output.push_str(&format!("  --> {filename}\n"));
    }
    output
}

/// Split an error into a short label, a message, and an optional
/// `(line, column)` position.
fn describe(error: &SableError) -> (String, String, Option<(u32, u32)>) {
    match error {
        SableError::Parse(e) => (
            "syntax".to_string(),
            e.message.clone(),
            Some((e.line, e.column)),
        ),
        SableError::Compile(e) => (
            e.kind.label().to_string(),
            e.message.clone(),
            Some((e.line, e.column)),
        ),
        SableError::Runtime(e) => (
            e.kind.label().to_string(),
            e.message.clone(),
            e.line.map(|line| (line, 0)),
        ),
        SableError::Bytecode(e) => ("malformed bytecode".to_string(), e.message.clone(), None),
        SableError::Internal(message) => ("internal".to_string(), message.clone(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::error::{CompileError, CompileErrorKind, Failure};
    use sable_core::Span;

    #[test]
    fn test_render_compile_error_with_caret() {
        let error = SableError::Compile(CompileError::new(
            CompileErrorKind::UnresolvedName,
            "name 'x' is not declared",
            Span::new(8, 9, 1, 8),
        ));
        let output = render(&error, Some("let y = x + 1"), "demo.sbl");
        assert!(output.contains("error[unresolved name]"));
        assert!(output.contains("demo.sbl:1:9"));
        assert!(output.contains("let y = x + 1"));
        assert!(output.contains("        ^"));
    }

    #[test]
    fn test_render_runtime_error_with_line() {
        let error = SableError::Runtime(Failure::division_by_zero().at_line(3));
        let output = render(&error, Some("a\nb\nlet c = 1 / 0"), "demo.sbl");
        assert!(output.contains("error[division by zero]"));
        assert!(output.contains("demo.sbl:3:1"));
        assert!(output.contains("let c = 1 / 0"));
    }

    #[test]
    fn test_render_without_source() {
        let error = SableError::Runtime(Failure::overflow());
        let output = render(&error, None, "demo.sbl");
        assert!(output.contains("error[overflow]"));
        assert!(output.contains("demo.sbl"));
    }
}
