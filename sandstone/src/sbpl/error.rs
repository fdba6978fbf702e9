//! Error types for the policy front end.

use super::sexpr::{ParseError, Span};

/// Error while reading, parsing or validating a policy.
///
/// Variants carrying a `line`/`col` point at the offending form.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("syntax error at {0}")]
    Syntax(#[from] ParseError),

    #[error("{line}:{col}: {message}")]
    InvalidForm {
        message: String,
        line: usize,
        col: usize,
    },

    #[error("{line}:{col}: unsupported version {version}")]
    UnsupportedVersion {
        version: u32,
        line: usize,
        col: usize,
    },

    #[error("{line}:{col}: ({form} ...) is not supported")]
    UnsupportedForm {
        form: String,
        line: usize,
        col: usize,
    },

    #[error("missing (version N) form")]
    MissingVersion,

    #[error("{line}:{col}: unknown operation '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownOperation {
        name: String,
        suggestion: Option<String>,
        line: usize,
        col: usize,
    },

    #[error("{line}:{col}: unknown filter '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownFilter {
        name: String,
        suggestion: Option<String>,
        line: usize,
        col: usize,
    },

    #[error("{line}:{col}: invalid argument for '{filter}': {message}")]
    InvalidArgument {
        filter: String,
        message: String,
        line: usize,
        col: usize,
    },

    #[error("{line}:{col}: invalid regex '{pattern}': {message}")]
    InvalidRegex {
        pattern: String,
        message: String,
        line: usize,
        col: usize,
    },

    #[error("{line}:{col}: parameter '{name}' is not defined")]
    MissingParameter { name: String, line: usize, col: usize },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!("; did you mean '{s}'?"))
        .unwrap_or_default()
}

impl PolicyError {
    /// Build an [`PolicyError::InvalidForm`] located at `span`.
    pub(crate) fn form(source: &str, span: Span, message: impl Into<String>) -> Self {
        let (line, col) = super::sexpr::offset_to_line_col(source, span.start);
        PolicyError::InvalidForm {
            message: message.into(),
            line,
            col,
        }
    }

    pub(crate) fn unsupported_form(source: &str, span: Span, form: &str) -> Self {
        let (line, col) = super::sexpr::offset_to_line_col(source, span.start);
        PolicyError::UnsupportedForm {
            form: form.to_string(),
            line,
            col,
        }
    }

    /// Return a help message suggesting how to fix this error, if applicable.
    pub fn help(&self) -> Option<String> {
        match self {
            PolicyError::MissingVersion => {
                Some("start the profile with (version 1)".into())
            }
            PolicyError::UnsupportedVersion { .. } => {
                Some("supported versions are 1, 2 and 3".into())
            }
            PolicyError::UnknownOperation { .. } => Some(
                "run `sandtool operations` to list the operations of the active table".into(),
            ),
            PolicyError::UnknownFilter { .. } => Some(format!(
                "known filters: {}",
                crate::filters::names().join(", ")
            )),
            PolicyError::InvalidArgument { filter, .. } => {
                match crate::filters::by_name(filter).map(|f| f.kind) {
                    Some(crate::filters::ArgumentKind::Path) => Some(format!(
                        "({filter} \"/absolute/path\") or ({filter} (param \"NAME\"))"
                    )),
                    Some(crate::filters::ArgumentKind::Keyword(values)) => {
                        Some(format!("expected one of: {}", values.join(", ")))
                    }
                    Some(crate::filters::ArgumentKind::Address) => {
                        Some(format!("({filter} ip \"localhost:*\")"))
                    }
                    _ => None,
                }
            }
            PolicyError::MissingParameter { name, .. } => {
                Some(format!("pass it with --param {name}=VALUE"))
            }
            PolicyError::UnsupportedForm { form, .. } => match form.as_str() {
                "define" => Some(
                    "user-defined procedures are not supported; inline the filters instead".into(),
                ),
                "import" => Some("inline the imported profile instead".into()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Compute Levenshtein edit distance between two strings.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Find the closest match to `name` from a set of `candidates`.
/// Returns `None` if no candidate is within a reasonable edit distance (max 3).
pub fn suggest_closest(name: &str, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|c| (c, levenshtein(name, c)))
        .filter(|(_, dist)| *dist <= 3 && *dist > 0)
        .min_by_key(|(_, dist)| *dist)
        .map(|(c, _)| (*c).to_string())
}
