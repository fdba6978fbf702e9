//! Semantic parser: s-expression tree → [`Policy`].
//!
//! Recognised top-level forms:
//!
//! ```scheme
//! (version 1)
//! (deny default)
//! (allow file-read* file-test-existence
//!   (require-any (subpath "/usr/lib") (literal (param "CONFIG")))
//!   (with report))
//! (debug deny)
//! ```

use tracing::{Level, instrument, warn};

use super::Parameters;
use super::ast::{Action, Argument, Filter, Modifiers, Policy, Rule};
use super::error::{PolicyError, suggest_closest};
use super::sexpr::{self, SExpr, Span};
use crate::filters::{self, ArgumentKind};

/// Parse an SBPL source string into a [`Policy`].
///
/// `(param "NAME")` references are resolved from `params` here, so the
/// returned policy contains only literal arguments.
#[instrument(level = Level::TRACE, skip(input, params))]
pub fn parse_policy(input: &str, params: &Parameters) -> Result<Policy, PolicyError> {
    let exprs = sexpr::parse(input)?;
    let parser = Parser { input, params };

    let mut version: Option<(u32, Span)> = None;
    let mut rules = Vec::new();

    for expr in &exprs {
        let list = expr.as_list().ok_or_else(|| {
            parser.error(expr, "expected a top-level form like (version 1) or (allow ...)")
        })?;
        let Some(head) = expr.head() else {
            return Err(parser.error(expr, "expected a form name such as allow or deny"));
        };

        match head {
            "version" => {
                if version.is_some() {
                    return Err(parser.error(expr, "duplicate (version ...) form"));
                }
                version = Some((parser.parse_version(expr, list)?, expr.span()));
            }
            "allow" | "deny" => {
                let action: Action = head
                    .parse()
                    .map_err(|e: String| parser.error(&list[0], e))?;
                rules.push(parser.parse_rule(expr, action, &list[1..])?);
            }
            "debug" => {
                warn!("ignoring (debug ...) form; tracing is configured by the host");
            }
            "define" | "import" => {
                return Err(PolicyError::unsupported_form(input, expr.span(), head));
            }
            other => {
                return Err(parser.error(
                    &list[0],
                    format!("unknown top-level form '{other}'; expected version, allow or deny"),
                ));
            }
        }
    }

    let (version, version_span) = version.ok_or(PolicyError::MissingVersion)?;
    Ok(Policy {
        version,
        version_span,
        rules,
    })
}

struct Parser<'a> {
    input: &'a str,
    params: &'a Parameters,
}

impl Parser<'_> {
    fn error(&self, expr: &SExpr, message: impl Into<String>) -> PolicyError {
        PolicyError::form(self.input, expr.span(), message)
    }

    fn line_col(&self, expr: &SExpr) -> (usize, usize) {
        sexpr::offset_to_line_col(self.input, expr.span().start)
    }

    fn parse_version(&self, expr: &SExpr, list: &[SExpr]) -> Result<u32, PolicyError> {
        match list {
            [_, SExpr::Atom(n, _)] => n
                .parse()
                .map_err(|_| self.error(&list[1], format!("expected a version number, got '{n}'"))),
            _ => Err(self.error(expr, "expected (version N)")),
        }
    }

    /// `(allow|deny op... filter... [(with modifier...)])`
    fn parse_rule(&self, expr: &SExpr, action: Action, body: &[SExpr]) -> Result<Rule, PolicyError> {
        let mut operations = Vec::new();
        let mut filters = Vec::new();
        let mut modifiers = Modifiers::empty();

        for item in body {
            match item {
                SExpr::Atom(name, _) => {
                    if !filters.is_empty() {
                        return Err(self.error(item, "operations must come before filters"));
                    }
                    operations.push(name.clone());
                }
                SExpr::List(..) if item.head() == Some("with") => {
                    modifiers |= self.parse_modifiers(item)?;
                }
                SExpr::List(..) => filters.push(self.parse_filter(item)?),
                SExpr::Str(..) | SExpr::Regex(..) => {
                    return Err(self.error(
                        item,
                        "unexpected string; arguments belong inside a filter like (literal \"...\")",
                    ));
                }
            }
        }

        if operations.is_empty() {
            return Err(self.error(expr, format!("({action} ...) names no operation")));
        }

        let filter = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::All(filters)),
        };

        Ok(Rule {
            action,
            operations,
            filter,
            modifiers,
            span: expr.span(),
        })
    }

    fn parse_modifiers(&self, expr: &SExpr) -> Result<Modifiers, PolicyError> {
        let list = expr.as_list().unwrap_or_default();
        if list.len() < 2 {
            return Err(self.error(expr, "expected (with report) or (with no-log)"));
        }
        let mut out = Modifiers::empty();
        for item in &list[1..] {
            let modifier = item
                .as_str()
                .and_then(Modifiers::from_keyword)
                .ok_or_else(|| {
                    self.error(item, format!("unsupported modifier '{item}'; expected report or no-log"))
                })?;
            out |= modifier;
        }
        Ok(out)
    }

    fn parse_filter(&self, expr: &SExpr) -> Result<Filter, PolicyError> {
        let list = expr.as_list().unwrap_or_default();
        let Some(head) = expr.head() else {
            return Err(self.error(expr, "expected a filter like (subpath \"/usr\")"));
        };
        let args = &list[1..];

        match head {
            "require-all" | "require-any" => {
                if args.is_empty() {
                    return Err(self.error(expr, format!("({head}) needs at least one filter")));
                }
                let items = args
                    .iter()
                    .map(|a| self.parse_filter(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if head == "require-all" {
                    Filter::All(items)
                } else {
                    Filter::Any(items)
                })
            }
            "require-not" => match args {
                [inner] => Ok(Filter::Not(Box::new(self.parse_filter(inner)?))),
                _ => Err(self.error(expr, "(require-not ...) takes exactly one filter")),
            },
            name => {
                let Some(def) = filters::by_name(name) else {
                    let (line, col) = self.line_col(&list[0]);
                    return Err(PolicyError::UnknownFilter {
                        name: name.to_string(),
                        suggestion: suggest_closest(name, &filters::names()),
                        line,
                        col,
                    });
                };
                self.parse_leaf(expr, def.name, def.kind, args)
            }
        }
    }

    /// Parse the arguments of a catalogue filter. Several arguments mean any
    /// of them may match, e.g. `(literal "/a" "/b")`.
    fn parse_leaf(
        &self,
        expr: &SExpr,
        name: &str,
        kind: ArgumentKind,
        args: &[SExpr],
    ) -> Result<Filter, PolicyError> {
        let invalid = |at: &SExpr, message: String| {
            let (line, col) = self.line_col(at);
            PolicyError::InvalidArgument {
                filter: name.to_string(),
                message,
                line,
                col,
            }
        };

        if args.is_empty() {
            return Err(invalid(expr, "missing argument".into()));
        }

        let arguments: Vec<Argument> = match kind {
            ArgumentKind::Address => match args {
                [SExpr::Atom(proto, _), address] if matches!(proto.as_str(), "ip" | "tcp" | "udp") => {
                    vec![Argument::Address(self.string_value(address, name)?)]
                }
                _ => {
                    return Err(invalid(expr, "expected a protocol (ip, tcp, udp) and an address".into()));
                }
            },
            ArgumentKind::Keyword(_) => args
                .iter()
                .map(|a| match a {
                    SExpr::Atom(s, _) | SExpr::Str(s, _) => Ok(Argument::Keyword(s.clone())),
                    other => Err(invalid(other, format!("expected a symbol, got {other}"))),
                })
                .collect::<Result<_, _>>()?,
            ArgumentKind::Regex => args
                .iter()
                .map(|a| match a {
                    SExpr::Regex(s, _) => Ok(Argument::Regex(s.clone())),
                    other => self.string_value(other, name).map(Argument::Regex),
                })
                .collect::<Result<_, _>>()?,
            ArgumentKind::Path => args
                .iter()
                .map(|a| self.string_value(a, name).map(Argument::Path))
                .collect::<Result<_, _>>()?,
            ArgumentKind::Name => args
                .iter()
                .map(|a| self.string_value(a, name).map(Argument::Name))
                .collect::<Result<_, _>>()?,
            ArgumentKind::Entitlement => args
                .iter()
                .map(|a| self.string_value(a, name).map(Argument::Entitlement))
                .collect::<Result<_, _>>()?,
        };

        let mut leaves: Vec<Filter> = arguments
            .into_iter()
            .map(|argument| Filter::leaf(name, argument))
            .collect();
        Ok(if leaves.len() == 1 {
            leaves.remove(0)
        } else {
            Filter::Any(leaves)
        })
    }

    /// Evaluate a string-valued expression: a literal, `(param "NAME")`, or
    /// `(string-append ...)` of those.
    fn string_value(&self, expr: &SExpr, filter: &str) -> Result<String, PolicyError> {
        match expr {
            SExpr::Str(s, _) => Ok(s.clone()),
            SExpr::List(items, _) => match expr.head() {
                Some("param") => match items.as_slice() {
                    [_, SExpr::Str(key, _)] => match self.params.get(key) {
                        Some(value) => Ok(value.to_string()),
                        None => {
                            let (line, col) = self.line_col(expr);
                            Err(PolicyError::MissingParameter {
                                name: key.clone(),
                                line,
                                col,
                            })
                        }
                    },
                    _ => Err(self.error(expr, "expected (param \"NAME\")")),
                },
                Some("string-append") => items[1..]
                    .iter()
                    .map(|item| self.string_value(item, filter))
                    .collect(),
                _ => Err(self.error(
                    expr,
                    format!("expected a string, (param ...) or (string-append ...) in ({filter} ...)"),
                )),
            },
            other => {
                let (line, col) = self.line_col(other);
                Err(PolicyError::InvalidArgument {
                    filter: filter.to_string(),
                    message: format!("expected a quoted string, got {other}"),
                    line,
                    col,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Policy, PolicyError> {
        parse_policy(input, &Parameters::new())
    }

    #[test]
    fn minimal_profile() {
        let policy = parse("(version 1)\n(deny default)").unwrap();
        assert_eq!(policy.version, 1);
        assert_eq!(policy.rules.len(), 1);
        assert_eq!(policy.rules[0].action, Action::Deny);
        assert_eq!(policy.rules[0].operations, vec!["default"]);
        assert!(policy.rules[0].filter.is_none());
    }

    #[test]
    fn several_operations_and_filters() {
        let policy = parse(
            r#"(version 1)
(allow file-read* file-test-existence
  (subpath "/usr/lib")
  (require-not (literal "/usr/lib/secret")))"#,
        )
        .unwrap();
        let rule = &policy.rules[0];
        assert_eq!(rule.operations, vec!["file-read*", "file-test-existence"]);
        assert_eq!(
            rule.filter,
            Some(Filter::All(vec![
                Filter::leaf("subpath", Argument::Path("/usr/lib".into())),
                Filter::Not(Box::new(Filter::leaf(
                    "literal",
                    Argument::Path("/usr/lib/secret".into())
                ))),
            ]))
        );
    }

    #[test]
    fn multiple_arguments_mean_any() {
        let policy = parse(r#"(version 1) (allow file-read* (literal "/a" "/b"))"#).unwrap();
        assert_eq!(
            policy.rules[0].filter,
            Some(Filter::Any(vec![
                Filter::leaf("literal", Argument::Path("/a".into())),
                Filter::leaf("literal", Argument::Path("/b".into())),
            ]))
        );
    }

    #[test]
    fn params_and_string_append() {
        let params = Parameters::new().with("HOME", "/Users/me");
        let policy = parse_policy(
            r#"(version 1)
(allow file-write* (subpath (string-append (param "HOME") "/Library/Caches")))"#,
            &params,
        )
        .unwrap();
        assert_eq!(
            policy.rules[0].filter,
            Some(Filter::leaf(
                "subpath",
                Argument::Path("/Users/me/Library/Caches".into())
            ))
        );
    }

    #[test]
    fn missing_param_is_reported_with_position() {
        let err = parse("(version 1)\n(allow file-read* (subpath (param \"HOME\")))").unwrap_err();
        assert_eq!(
            err,
            PolicyError::MissingParameter {
                name: "HOME".into(),
                line: 2,
                col: 28
            }
        );
        assert!(err.help().unwrap().contains("--param HOME=VALUE"));
    }

    #[test]
    fn regex_literal_and_modifiers() {
        let policy = parse(
            r#"(version 1) (deny file-write* (regex #"^/private/tmp/.*\.lock$") (with report) (with no-log))"#,
        )
        .unwrap();
        let rule = &policy.rules[0];
        assert_eq!(rule.modifiers, Modifiers::REPORT | Modifiers::NO_LOG);
        assert_eq!(
            rule.filter,
            Some(Filter::leaf(
                "regex",
                Argument::Regex(r"^/private/tmp/.*\.lock$".into())
            ))
        );
    }

    #[test]
    fn network_and_keyword_filters() {
        let policy = parse(
            r#"(version 1)
(allow network-outbound (remote ip "localhost:*"))
(allow signal (target self))
(allow file-read-metadata (vnode-type DIRECTORY))"#,
        )
        .unwrap();
        assert_eq!(
            policy.rules[0].filter,
            Some(Filter::leaf("remote", Argument::Address("localhost:*".into())))
        );
        assert_eq!(
            policy.rules[1].filter,
            Some(Filter::leaf("target", Argument::Keyword("self".into())))
        );
        assert_eq!(
            policy.rules[2].filter,
            Some(Filter::leaf("vnode-type", Argument::Keyword("DIRECTORY".into())))
        );
    }

    #[test]
    fn missing_version() {
        assert_eq!(parse("(deny default)").unwrap_err(), PolicyError::MissingVersion);
    }

    #[test]
    fn duplicate_version() {
        let err = parse("(version 1)\n(version 2)").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_filter_suggests() {
        let err = parse("(version 1)\n(allow file-read* (supbath \"/usr\"))").unwrap_err();
        match err {
            PolicyError::UnknownFilter {
                name,
                suggestion,
                line,
                col,
            } => {
                assert_eq!(name, "supbath");
                assert_eq!(suggestion.as_deref(), Some("subpath"));
                assert_eq!((line, col), (2, 20));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_define_and_import() {
        let define = parse("(version 1) (define (home) \"/Users\")").unwrap_err();
        assert_eq!(
            define,
            PolicyError::UnsupportedForm {
                form: "define".into(),
                line: 1,
                col: 13
            }
        );
        assert!(define.help().unwrap().contains("procedures"));

        let import = parse("(version 1) (import \"system.sb\")").unwrap_err();
        assert!(import.to_string().contains("(import ...) is not supported"));
        assert!(import.help().unwrap().contains("inline"));

        // The hint follows the variant, not the message text.
        let other = PolicyError::InvalidForm {
            message: "cannot define this".into(),
            line: 1,
            col: 1,
        };
        assert_eq!(other.help(), None);
    }

    #[test]
    fn rejects_bare_strings_in_rules() {
        let err = parse("(version 1) (allow file-read* \"/usr\")").unwrap_err();
        assert!(err.to_string().contains("unexpected string"));
    }

    #[test]
    fn rejects_rule_without_operation() {
        let err = parse("(version 1) (allow (subpath \"/usr\"))").unwrap_err();
        assert!(err.to_string().contains("names no operation"));
    }

    #[test]
    fn debug_form_is_ignored() {
        let policy = parse("(version 1) (debug deny) (deny default)").unwrap();
        assert_eq!(policy.rules.len(), 1);
    }

    #[test]
    fn syntax_errors_surface() {
        let err = parse("(version 1").unwrap_err();
        assert!(matches!(err, PolicyError::Syntax(_)));
    }
}
