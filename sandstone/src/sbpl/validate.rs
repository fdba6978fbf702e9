//! Rule-set validation against an operation table and the filter catalogue.

use regex::Regex;
use tracing::{Level, debug, instrument};

use super::ast::{Argument, Filter, Policy, Rule, pattern_variable};
use super::error::{PolicyError, suggest_closest};
use super::sexpr::offset_to_line_col;
use crate::filters::{self, ArgumentKind};
use crate::operations::OperationTable;

/// Oldest and newest `(version N)` accepted.
pub const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 1..=3;

/// Validate a parsed policy, returning the first problem found.
///
/// `source` is the text the policy was parsed from; it is only used to turn
/// spans into line/column positions.
#[instrument(level = Level::TRACE, skip_all)]
pub fn validate(policy: &Policy, source: &str, table: &OperationTable) -> Result<(), PolicyError> {
    match diagnostics(policy, source, table).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate a parsed policy and collect every problem, in source order.
pub fn diagnostics(policy: &Policy, source: &str, table: &OperationTable) -> Vec<PolicyError> {
    let mut out = Vec::new();

    if !SUPPORTED_VERSIONS.contains(&policy.version) {
        let (line, col) = offset_to_line_col(source, policy.version_span.start);
        out.push(PolicyError::UnsupportedVersion {
            version: policy.version,
            line,
            col,
        });
    }

    for rule in &policy.rules {
        check_rule(rule, source, table, &mut out);
    }

    debug!(
        rules = policy.rules.len(),
        problems = out.len(),
        "validated policy"
    );
    out
}

fn check_rule(rule: &Rule, source: &str, table: &OperationTable, out: &mut Vec<PolicyError>) {
    let (line, col) = offset_to_line_col(source, rule.span.start);

    for name in &rule.operations {
        if table.resolve(name).is_none() {
            out.push(PolicyError::UnknownOperation {
                name: name.clone(),
                suggestion: suggest_closest(name, &table.candidates()),
                line,
                col,
            });
        }
    }

    if let Some(filter) = &rule.filter {
        check_filter(filter, line, col, out);
    }
}

fn check_filter(filter: &Filter, line: usize, col: usize, out: &mut Vec<PolicyError>) {
    match filter {
        Filter::All(items) | Filter::Any(items) => {
            for item in items {
                check_filter(item, line, col, out);
            }
        }
        Filter::Not(inner) => check_filter(inner, line, col, out),
        Filter::Leaf { name, argument } => {
            if let Err(message) = check_argument(name, argument) {
                out.push(match argument {
                    Argument::Regex(pattern) => PolicyError::InvalidRegex {
                        pattern: pattern.clone(),
                        message,
                        line,
                        col,
                    },
                    _ => PolicyError::InvalidArgument {
                        filter: name.clone(),
                        message,
                        line,
                        col,
                    },
                });
            }
        }
    }
}

/// Check a single leaf argument against the filter's declared kind.
fn check_argument(filter: &str, argument: &Argument) -> Result<(), String> {
    let Some(def) = filters::by_name(filter) else {
        return Err(format!("unknown filter '{filter}'"));
    };

    match (def.kind, argument) {
        (ArgumentKind::Path, Argument::Path(path)) => check_path(path),
        (ArgumentKind::Regex, Argument::Regex(pattern)) => Regex::new(pattern)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        (ArgumentKind::Name, Argument::Name(name))
        | (ArgumentKind::Entitlement, Argument::Entitlement(name)) => {
            if name.is_empty() {
                Err("name must not be empty".into())
            } else {
                Ok(())
            }
        }
        (ArgumentKind::Keyword(values), Argument::Keyword(value)) => {
            if values.contains(&value.as_str()) {
                Ok(())
            } else {
                Err(format!("unknown value '{value}'"))
            }
        }
        (ArgumentKind::Address, Argument::Address(address)) => check_address(address),
        (kind, other) => Err(format!("expected a {kind:?} argument, got {other}")),
    }
}

fn check_path(path: &str) -> Result<(), String> {
    if path.starts_with('/') {
        return Ok(());
    }
    match pattern_variable(path) {
        Some(name) if !name.is_empty() => Ok(()),
        _ => Err(format!(
            "path '{path}' must be absolute or start with a ${{VARIABLE}}"
        )),
    }
}

/// Accept `host:port` where host is `*`, `localhost` or a name/address and
/// port is `*` or a number.
fn check_address(address: &str) -> Result<(), String> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(format!("address '{address}' must look like host:port"));
    };
    if host.is_empty() {
        return Err(format!("address '{address}' has an empty host"));
    }
    if port != "*" && port.parse::<u16>().is_err() {
        return Err(format!("port '{port}' must be '*' or a number"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbpl::{Parameters, parse_policy};

    fn check(source: &str) -> Vec<PolicyError> {
        let policy = parse_policy(source, &Parameters::new()).unwrap();
        diagnostics(&policy, source, &OperationTable::default())
    }

    #[test]
    fn valid_profile_passes() {
        let source = r#"(version 1)
(deny default)
(allow process-exec (literal "/bin/ls"))
(allow file-read* (subpath "/usr") (subpath "${HOME}/Documents"))
(allow network-outbound (remote ip "localhost:8080"))
(allow mach-lookup (global-name "com.apple.system.logger"))
(allow file-read-metadata (vnode-type DIRECTORY))"#;
        assert!(check(source).is_empty(), "{:?}", check(source));
    }

    #[test]
    fn unsupported_version() {
        let errors = check("(version 9)\n(deny default)");
        assert!(matches!(
            errors[0],
            PolicyError::UnsupportedVersion {
                version: 9,
                line: 1,
                col: 1
            }
        ));
    }

    #[test]
    fn unknown_operation_with_suggestion() {
        let errors = check("(version 1)\n(allow file-reed-data)");
        match &errors[0] {
            PolicyError::UnknownOperation {
                name,
                suggestion,
                line,
                ..
            } => {
                assert_eq!(name, "file-reed-data");
                assert_eq!(suggestion.as_deref(), Some("file-read-data"));
                assert_eq!(*line, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_regex() {
        let errors = check("(version 1)\n(allow file-read* (regex #\"^/tmp/(unclosed\"))");
        assert!(matches!(&errors[0], PolicyError::InvalidRegex { pattern, .. } if pattern == "^/tmp/(unclosed"));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let errors = check("(version 1)\n(allow file-read* (subpath \"relative/dir\"))");
        assert!(errors[0].to_string().contains("must be absolute"));
    }

    #[test]
    fn bad_keywords_and_addresses() {
        let errors = check(
            r#"(version 1)
(allow file-read* (vnode-type FILE))
(allow network-outbound (remote ip "localhost"))
(allow network-outbound (remote ip "localhost:http"))"#,
        );
        assert_eq!(errors.len(), 3);
        assert!(errors[0].help().unwrap().contains("REGULAR-FILE"));
        assert!(errors[1].to_string().contains("host:port"));
        assert!(errors[2].to_string().contains("port 'http'"));
    }

    #[test]
    fn validate_returns_first_problem() {
        let source = "(version 1)\n(allow nope)\n(allow also-nope)";
        let policy = parse_policy(source, &Parameters::new()).unwrap();
        let err = validate(&policy, source, &OperationTable::default()).unwrap_err();
        assert!(err.to_string().contains("'nope'"));
    }
}
