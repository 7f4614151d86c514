//! Command-line argument parsing.
//!
//! Hand-rolled: the surface is small enough that a parser dependency would
//! outweigh it.

use std::ffi::OsString;
use std::path::PathBuf;

/// Execution backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Bytecode virtual machine (default).
    #[default]
    Vm,
    /// Tree-walking reference backend.
    Interp,
}

/// What the process should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Run the input file (default when a file is given).
    #[default]
    Run,
    /// Print disassembly instead of running.
    Disasm,
    /// Print version and exit.
    Version,
    /// Print usage and exit.
    Help,
}

/// Parsed arguments.
#[derive(Debug, Default)]
pub struct Args {
    /// Source or bytecode file; REPL when absent.
    pub file: Option<PathBuf>,
    /// Backend choice.
    pub backend: Backend,
    /// Mode.
    pub mode: Mode,
    /// Write compiled bytecode here instead of running.
    pub emit: Option<PathBuf>,
    /// Scheduler round limit.
    pub round_limit: Option<u64>,
}

/// Usage text.
pub const USAGE: &str = "\
usage: sable [options] [file]

Runs a Sable source file (or a compiled .sbc container), or starts a REPL
when no file is given.

options:
  --interp          execute with the tree-walking backend
  --disasm          print bytecode disassembly and exit
  --emit <file>     compile to a bytecode container and exit
  --round-limit <n> fail tasks still incomplete after n scheduling rounds
  --version         print version and exit
  --help            print this help
";

/// Argument parse failure, reported on stderr with usage.
#[derive(Debug)]
pub struct ArgsError(pub String);

impl Args {
    /// Parse process arguments (the program name already stripped).
    pub fn parse(raw: impl IntoIterator<Item = OsString>) -> Result<Args, ArgsError> {
        let mut args = Args::default();
        let mut iter = raw.into_iter();

        while let Some(arg) = iter.next() {
            let Some(text) = arg.to_str() else {
                return Err(ArgsError("non-UTF-8 argument".to_string()));
            };
            match text {
                "--interp" => args.backend = Backend::Interp,
                "--disasm" => args.mode = Mode::Disasm,
                "--version" => args.mode = Mode::Version,
                "--help" | "-h" => args.mode = Mode::Help,
                "--emit" => {
                    let Some(path) = iter.next() else {
                        return Err(ArgsError("--emit requires a file argument".to_string()));
                    };
                    args.emit = Some(PathBuf::from(path));
                }
                "--round-limit" => {
                    let Some(value) = iter.next() else {
                        return Err(ArgsError(
                            "--round-limit requires a number".to_string(),
                        ));
                    };
                    let parsed = value
                        .to_str()
                        .and_then(|s| s.parse::<u64>().ok())
                        .ok_or_else(|| {
                            ArgsError(format!("invalid round limit {value:?}"))
                        })?;
                    args.round_limit = Some(parsed);
                }
                other if other.starts_with('-') => {
                    return Err(ArgsError(format!("unknown option '{other}'")));
                }
                _ => {
                    if args.file.is_some() {
                        return Err(ArgsError("multiple input files given".to_string()));
                    }
                    args.file = Some(PathBuf::from(arg));
                }
            }
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(parts: &[&str]) -> Result<Args, ArgsError> {
        Args::parse(parts.iter().map(OsString::from))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert!(args.file.is_none());
        assert_eq!(args.backend, Backend::Vm);
        assert_eq!(args.mode, Mode::Run);
    }

    #[test]
    fn test_file_and_flags() {
        let args = parse(&["--interp", "prog.sbl"]).unwrap();
        assert_eq!(args.backend, Backend::Interp);
        assert_eq!(args.file.as_deref().unwrap().to_str(), Some("prog.sbl"));
    }

    #[test]
    fn test_emit_and_round_limit() {
        let args = parse(&["--emit", "out.sbc", "--round-limit", "40", "in.sbl"]).unwrap();
        assert_eq!(args.emit.as_deref().unwrap().to_str(), Some("out.sbc"));
        assert_eq!(args.round_limit, Some(40));
    }

    #[test]
    fn test_errors() {
        assert!(parse(&["--emit"]).is_err());
        assert!(parse(&["--round-limit", "abc"]).is_err());
        assert!(parse(&["--nope"]).is_err());
        assert!(parse(&["a.sbl", "b.sbl"]).is_err());
    }
}
