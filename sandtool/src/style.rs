//! TTY-aware styling helpers.
//!
//! Built on [`console`], which detects whether stdout/stderr is a terminal
//! and respects `NO_COLOR`.

use console::Style;

fn out() -> Style {
    Style::new()
}

fn err() -> Style {
    Style::new().for_stderr()
}

// ---------------------------------------------------------------------------
// Stdout
// ---------------------------------------------------------------------------

/// Muted secondary information (offsets, counts).
pub fn dim(text: &str) -> String {
    out().dim().apply_to(text).to_string()
}

/// Bold cyan section headers.
pub fn header(text: &str) -> String {
    out().cyan().bold().apply_to(text).to_string()
}

pub fn green(text: &str) -> String {
    out().green().apply_to(text).to_string()
}

pub fn red(text: &str) -> String {
    out().red().apply_to(text).to_string()
}

/// Labels such as operation and filter names.
pub fn cyan(text: &str) -> String {
    out().cyan().apply_to(text).to_string()
}

/// Colorize a terminal decision (allow/deny).
pub fn action(text: &str) -> String {
    if text.starts_with("allow") {
        green(text)
    } else if text.starts_with("deny") {
        red(text)
    } else {
        text.to_string()
    }
}

// ---------------------------------------------------------------------------
// Stderr
// ---------------------------------------------------------------------------

pub fn err_red_bold(text: &str) -> String {
    err().red().bold().apply_to(text).to_string()
}

pub fn err_dim(text: &str) -> String {
    err().dim().apply_to(text).to_string()
}

/// Hints.
pub fn err_cyan_bold(text: &str) -> String {
    err().cyan().bold().apply_to(text).to_string()
}

pub fn err_green(text: &str) -> String {
    err().green().apply_to(text).to_string()
}
