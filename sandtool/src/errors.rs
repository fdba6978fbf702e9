//! User-facing error display.
//!
//! Formats anyhow errors with their causal chain and a help hint taken from
//! the first sandstone error found in the chain.

use std::io::Write;

use sandstone::CompileError;
use sandstone::bytecode::BytecodeError;
use sandstone::eval::EvalError;
use sandstone::operations::TableError;
use sandstone::sbpl::PolicyError;

use crate::style;

/// Display a user-facing error to stderr.
///
/// Format:
///   error: top-level message
///     caused by: chain item
///
///   hint: actionable suggestion (if available)
///
/// Without `verbose` and with a deeper chain, appends a pointer to
/// `--verbose`; with it, appends the full Debug representation.
pub fn display_error(err: &anyhow::Error, verbose: bool) {
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(stderr, "{}: {}", style::err_red_bold("error"), err);

    let chain: Vec<_> = err.chain().skip(1).collect();
    if chain.len() == 1 {
        let _ = writeln!(
            stderr,
            "  {}",
            style::err_dim(&format!("caused by: {}", chain[0]))
        );
    } else {
        for (i, cause) in chain.iter().enumerate() {
            let _ = writeln!(
                stderr,
                "  {}",
                style::err_dim(&format!("{}: {}", i + 1, cause))
            );
        }
    }

    if let Some(hint) = hint(err) {
        let _ = writeln!(stderr, "\n  {}: {}", style::err_cyan_bold("hint"), hint);
    }

    if verbose {
        let _ = writeln!(stderr, "\nFull error chain:\n{:?}", err);
    } else if !chain.is_empty() {
        let _ = writeln!(
            stderr,
            "\n  {}",
            style::err_dim("run with --verbose for full details")
        );
    }
}

/// Help text from the first domain error in the chain that has one.
pub fn hint(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<PolicyError>() {
            return e.help();
        }
        if let Some(e) = cause.downcast_ref::<CompileError>() {
            return e.help();
        }
        if let Some(e) = cause.downcast_ref::<BytecodeError>() {
            return bytecode_hint(e);
        }
        if let Some(e) = cause.downcast_ref::<EvalError>() {
            return match e {
                EvalError::Bytecode(inner) => bytecode_hint(inner),
                EvalError::UnknownOperation(_) => {
                    Some("run `sandtool operations` to list valid names".into())
                }
                EvalError::NoSuchProfile { .. } => {
                    Some("run `sandtool inspect` to list the profiles".into())
                }
                _ => None,
            };
        }
        if let Some(TableError::MissingDefault(_)) = cause.downcast_ref::<TableError>() {
            return Some("the first line of an operation table must be 'default'".into());
        }
        None
    })
}

fn bytecode_hint(err: &BytecodeError) -> Option<String> {
    match err {
        BytecodeError::InvalidOperationCount { .. } => Some(
            "the profile was built for another OS release; pass a matching --operations table"
                .into(),
        ),
        BytecodeError::TooSmall { .. } | BytecodeError::OffsetTooLarge { .. } => {
            Some("the file is truncated or is not compiled sandbox bytecode".into())
        }
        _ => None,
    }
}
