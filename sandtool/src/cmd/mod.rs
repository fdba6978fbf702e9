//! Subcommand implementations. Each `run` loads settings and delegates to a
//! function the tests can drive directly.

pub mod check;
pub mod compile;
pub mod hex;
pub mod inspect;
pub mod operations;
pub mod validate;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

/// Read a file, or stdin when `path` is `-`.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn read_source(path: &Path) -> Result<String> {
    let bytes = read_bytes(path)?;
    String::from_utf8(bytes).with_context(|| format!("{} is not UTF-8 text", path.display()))
}

/// Whether `bytes` look like SBPL source rather than compiled bytecode.
pub fn is_source(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).is_ok_and(|text| {
        text.trim_start()
            .chars()
            .next()
            .is_some_and(|c| c == '(' || c == ';')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_source() {
        assert!(is_source(b"(version 1)\n(allow default)"));
        assert!(is_source(b"  ; comment\n(version 1)"));
        assert!(!is_source(&[0x00, 0x00, 0x01, 0x00]));
        assert!(!is_source(b""));
    }

    #[test]
    fn read_missing_file_names_the_path() {
        let err = read_bytes(Path::new("/nonexistent/profile.sb")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/profile.sb"));
    }
}
