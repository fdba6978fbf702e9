//! Userspace evaluation of compiled bytecode.
//!
//! The [`Evaluator`] walks a profile's decision graph for one request and
//! reports the terminal decision plus the nodes it visited. It reads the
//! same layout the dissector does, so any profile [`Bytecode`] can show can
//! also be evaluated.
//!
//! [`Bytecode`]: crate::bytecode::Bytecode

use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;
use tracing::{Level, debug, instrument};

use crate::bytecode::{BytecodeError, BytecodeWrapper, NodeEntry, OPCODE_FILTER};
use crate::filters::{self, ArgumentKind};
use crate::operations::OperationTable;
use crate::sbpl::ast::pattern_variable;
use crate::sbpl::{Action, Modifiers};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("profile {index} does not exist ({count} profiles)")]
    NoSuchProfile { index: usize, count: usize },

    #[error("operation {operation} enters at node {index}, but only {count} exist")]
    DanglingEntry {
        operation: usize,
        index: usize,
        count: usize,
    },

    #[error("node {from} points at node {index}, but only {count} exist")]
    DanglingNode { from: usize, index: usize, count: usize },

    #[error("cycle detected at node {0}")]
    Cycle(usize),

    #[error("node {index} uses unknown filter {filter:#04x}")]
    UnknownFilter { index: usize, filter: u8 },

    #[error("node {index} has an invalid terminal or opcode")]
    InvalidNode { index: usize },

    #[error("regex {index} does not compile: {message}")]
    InvalidRegex { index: usize, message: String },
}

/// An access check: an operation, its argument, and the caller's entitlements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub operation: String,
    /// Path, name or `host:port` the filters are tested against.
    pub argument: Option<String>,
    pub entitlements: Vec<String>,
}

impl Request {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = Some(argument.into());
        self
    }

    pub fn with_entitlement(mut self, key: impl Into<String>) -> Self {
        self.entitlements.push(key.into());
        self
    }
}

/// The outcome of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub action: Action,
    #[serde(serialize_with = "serialize_modifiers")]
    pub modifiers: Modifiers,
    /// Operation slot the request resolved to.
    pub operation: usize,
    /// Node indices visited, ending with the terminal.
    pub trace: Vec<u16>,
}

fn serialize_modifiers<S: serde::Serializer>(m: &Modifiers, s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(m.to_string().split(',').filter(|n| !n.is_empty()))
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allow
    }
}

/// Evaluates requests against parsed bytecode.
#[derive(Debug)]
pub struct Evaluator {
    wrapper: BytecodeWrapper,
    table: OperationTable,
    regexes: Vec<Regex>,
    variables: BTreeMap<String, String>,
}

impl Evaluator {
    /// Parse `bytes` and prepare its regexes.
    #[instrument(level = Level::TRACE, skip_all)]
    pub fn new(bytes: &[u8], table: OperationTable) -> Result<Self, EvalError> {
        let wrapper = BytecodeWrapper::parse(bytes)?;
        let declared = usize::from(wrapper.header.operation_count);
        if declared != table.len() {
            return Err(BytecodeError::InvalidOperationCount {
                declared,
                table: table.len(),
            }
            .into());
        }

        let regexes = (0..wrapper.regexes.len())
            .map(|index| -> Result<Regex, EvalError> {
                let source = wrapper.regex(index as u16)?;
                Regex::new(source).map_err(|e| EvalError::InvalidRegex {
                    index,
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            wrapper,
            table,
            regexes,
            variables: BTreeMap::new(),
        })
    }

    /// Value substituted for `${name}` at the start of path arguments.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn wrapper(&self) -> &BytecodeWrapper {
        &self.wrapper
    }

    pub fn profile_count(&self) -> usize {
        self.wrapper.profiles.len()
    }

    /// Evaluate `request` against the profile at `profile`.
    #[instrument(level = Level::TRACE, skip(self, request), fields(operation = %request.operation))]
    pub fn evaluate(&self, profile: usize, request: &Request) -> Result<Decision, EvalError> {
        let record = self
            .wrapper
            .profiles
            .get(profile)
            .ok_or(EvalError::NoSuchProfile {
                index: profile,
                count: self.wrapper.profiles.len(),
            })?;
        let operation = self
            .table
            .resolve(&request.operation)
            .ok_or_else(|| EvalError::UnknownOperation(request.operation.clone()))?;

        let count = self.wrapper.nodes.len();
        let mut visited = vec![false; count];
        let mut trace = Vec::new();
        let mut from = None;
        let mut current = record.operations[operation];

        loop {
            let index = usize::from(current);
            let node = self.wrapper.nodes.get(index).ok_or(match from {
                Some(from) => EvalError::DanglingNode { from, index, count },
                None => EvalError::DanglingEntry {
                    operation,
                    index,
                    count,
                },
            })?;
            if std::mem::replace(&mut visited[index], true) {
                return Err(EvalError::Cycle(index));
            }
            trace.push(current);

            if node.is_terminal() {
                let (action, modifiers) = node.decision().ok_or(EvalError::InvalidNode { index })?;
                debug!(%action, nodes = trace.len(), "evaluated request");
                return Ok(Decision {
                    action,
                    modifiers,
                    operation,
                    trace,
                });
            }

            if node.opcode != OPCODE_FILTER {
                return Err(EvalError::InvalidNode { index });
            }
            let matched = self.matches(index, node, request)?;
            from = Some(index);
            current = if matched { node.on_match } else { node.on_unmatch };
        }
    }

    fn matches(&self, index: usize, node: &NodeEntry, request: &Request) -> Result<bool, EvalError> {
        let def = filters::by_id(node.filter).ok_or(EvalError::UnknownFilter {
            index,
            filter: node.filter,
        })?;

        if def.kind == ArgumentKind::Entitlement {
            return Ok(self
                .wrapper
                .entitlement(node.argument)
                .is_some_and(|key| request.entitlements.iter().any(|e| e == key)));
        }

        let Some(argument) = request.argument.as_deref() else {
            return Ok(false);
        };

        Ok(match def.kind {
            ArgumentKind::Regex => self
                .regexes
                .get(usize::from(node.argument))
                .ok_or(BytecodeError::OffsetTooLarge {
                    offset: usize::from(node.argument),
                    len: self.regexes.len(),
                })?
                .is_match(argument),
            ArgumentKind::Path => {
                let Some(pattern) = self.expand(self.wrapper.string(node.argument)?) else {
                    return Ok(false);
                };
                match def.name {
                    "subpath" => subpath_matches(&pattern, argument),
                    "prefix" => argument.starts_with(pattern.as_str()),
                    _ => argument == pattern,
                }
            }
            ArgumentKind::Address => address_matches(self.wrapper.string(node.argument)?, argument),
            ArgumentKind::Name | ArgumentKind::Keyword(_) => {
                argument == self.wrapper.string(node.argument)?
            }
            ArgumentKind::Entitlement => false,
        })
    }

    /// Substitute a leading `${NAME}`; `None` when the variable is unset.
    fn expand(&self, pattern: &str) -> Option<String> {
        match pattern_variable(pattern) {
            Some(name) => {
                let value = self.variables.get(name)?;
                Some(format!("{value}{}", &pattern[name.len() + 3..]))
            }
            None => Some(pattern.to_string()),
        }
    }
}

fn subpath_matches(base: &str, path: &str) -> bool {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return path.starts_with('/');
    }
    path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Match `host:port` against a pattern where either side may be `*`.
fn address_matches(pattern: &str, address: &str) -> bool {
    let (Some((p_host, p_port)), Some((host, port))) =
        (pattern.rsplit_once(':'), address.rsplit_once(':'))
    else {
        return false;
    };
    (p_host == "*" || p_host == host) && (p_port == "*" || p_port == port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile_collection, compile_string};
    use crate::sbpl::Parameters;

    fn evaluator(source: &str) -> Evaluator {
        let profile = compile_string(source, &Parameters::new()).unwrap();
        Evaluator::new(profile.bytecode(), OperationTable::default()).unwrap()
    }

    fn allowed(ev: &Evaluator, request: Request) -> bool {
        ev.evaluate(0, &request).unwrap().is_allowed()
    }

    #[test]
    fn deny_default_allow_subpath() {
        let ev = evaluator(
            r#"(version 1)
(deny default)
(allow file-read* (subpath "/usr"))"#,
        );
        assert!(allowed(&ev, Request::new("file-read-data").with_argument("/usr/lib/libc.dylib")));
        assert!(allowed(&ev, Request::new("file-read-metadata").with_argument("/usr")));
        assert!(!allowed(&ev, Request::new("file-read-data").with_argument("/usrlocal/x")));
        assert!(!allowed(&ev, Request::new("file-write-data").with_argument("/usr/x")));
        assert!(!allowed(&ev, Request::new("mach-lookup").with_argument("com.apple.x")));
    }

    #[test]
    fn last_matching_rule_wins() {
        let ev = evaluator(
            r#"(version 1)
(allow file-read* (subpath "/private"))
(deny file-read-data (subpath "/private/secret"))
(allow file-read-data (literal "/private/secret/ok"))"#,
        );
        assert!(allowed(&ev, Request::new("file-read-data").with_argument("/private/a")));
        assert!(!allowed(&ev, Request::new("file-read-data").with_argument("/private/secret/key")));
        assert!(allowed(&ev, Request::new("file-read-data").with_argument("/private/secret/ok")));
        // The deny only names file-read-data.
        assert!(allowed(&ev, Request::new("file-read-xattr").with_argument("/private/secret/key")));
    }

    #[test]
    fn unconditional_rule_overrides_earlier_rules() {
        let ev = evaluator(
            r#"(version 1)
(allow file-read* (subpath "/usr"))
(deny file-read*)"#,
        );
        assert!(!allowed(&ev, Request::new("file-read-data").with_argument("/usr/lib")));
    }

    #[test]
    fn no_covering_rule_is_implicit_deny() {
        let ev = evaluator("(version 1)\n(allow network-outbound)");
        assert!(allowed(&ev, Request::new("network-outbound")));
        assert!(!allowed(&ev, Request::new("signal")));
    }

    #[test]
    fn combinators() {
        let ev = evaluator(
            r#"(version 1)
(deny default)
(allow file-write*
  (require-all
    (subpath "/tmp")
    (require-not (regex #"\.lock$"))
    (require-any (prefix "/tmp/app-") (literal "/tmp/shared"))))"#,
        );
        let write = |p: &str| allowed(&ev, Request::new("file-write-data").with_argument(p));
        assert!(write("/tmp/app-1/cache"));
        assert!(write("/tmp/shared"));
        assert!(!write("/tmp/app-1/cache.lock"));
        assert!(!write("/tmp/other"));
        assert!(!write("/var/app-1"));
    }

    #[test]
    fn entitlement_filter() {
        let ev = evaluator(
            r#"(version 1)
(deny default)
(allow mach-lookup (entitlement-is-present "com.apple.security.network.client"))"#,
        );
        assert!(!allowed(&ev, Request::new("mach-lookup")));
        assert!(allowed(
            &ev,
            Request::new("mach-lookup").with_entitlement("com.apple.security.network.client")
        ));
    }

    #[test]
    fn names_addresses_and_keywords() {
        let ev = evaluator(
            r#"(version 1)
(deny default)
(allow mach-lookup (global-name "com.apple.logd"))
(allow network-outbound (remote tcp "localhost:*"))
(allow network-bind (local ip "*:8080"))
(allow signal (target self))"#,
        );
        assert!(allowed(&ev, Request::new("mach-lookup").with_argument("com.apple.logd")));
        assert!(!allowed(&ev, Request::new("mach-lookup").with_argument("com.apple.logd2")));
        assert!(allowed(&ev, Request::new("network-outbound").with_argument("localhost:443")));
        assert!(!allowed(&ev, Request::new("network-outbound").with_argument("example.com:443")));
        assert!(allowed(&ev, Request::new("network-bind").with_argument("0.0.0.0:8080")));
        assert!(allowed(&ev, Request::new("signal").with_argument("self")));
        assert!(!allowed(&ev, Request::new("signal").with_argument("others")));
    }

    #[test]
    fn modifiers_and_trace() {
        let ev = evaluator(
            r#"(version 1)
(deny default (with no-log))
(allow file-read* (literal "/etc/hosts") (with report))"#,
        );
        let decision = ev
            .evaluate(0, &Request::new("file-read-data").with_argument("/etc/hosts"))
            .unwrap();
        assert_eq!(decision.modifiers, Modifiers::REPORT);
        assert_eq!(decision.trace.len(), 2);
        assert_eq!(decision.operation, 21);

        let denied = ev.evaluate(0, &Request::new("file-read-data")).unwrap();
        assert_eq!(denied.action, Action::Deny);
        assert_eq!(denied.modifiers, Modifiers::NO_LOG);

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "allow");
        assert_eq!(json["modifiers"][0], "report");
    }

    #[test]
    fn variables_expand_at_evaluation() {
        let profile = compile_string(
            r#"(version 1) (allow file-read* (subpath "${HOME}/Documents"))"#,
            &Parameters::new(),
        )
        .unwrap();
        let bare = Evaluator::new(profile.bytecode(), OperationTable::default()).unwrap();
        let request = Request::new("file-read-data").with_argument("/Users/me/Documents/a.txt");
        assert!(!bare.evaluate(0, &request).unwrap().is_allowed());

        let ev = bare.with_variable("HOME", "/Users/me");
        assert!(ev.evaluate(0, &request).unwrap().is_allowed());
    }

    #[test]
    fn collections_select_profile() {
        let profile = compile_collection(
            &[
                ("locked", "(version 1) (deny default)"),
                ("open", "(version 1) (allow default)"),
            ],
            &Parameters::new(),
        )
        .unwrap();
        let ev = Evaluator::new(profile.bytecode(), OperationTable::default()).unwrap();
        assert_eq!(ev.profile_count(), 2);
        assert!(!allowed(&ev, Request::new("signal")));
        assert!(ev.evaluate(1, &Request::new("signal")).unwrap().is_allowed());
        assert!(matches!(
            ev.evaluate(2, &Request::new("signal")),
            Err(EvalError::NoSuchProfile { index: 2, count: 2 })
        ));
    }

    #[test]
    fn unknown_operation() {
        let ev = evaluator("(version 1) (deny default)");
        assert!(matches!(
            ev.evaluate(0, &Request::new("file-reed")),
            Err(EvalError::UnknownOperation(_))
        ));
    }

    #[test]
    fn cycles_and_dangling_nodes_are_errors() {
        use crate::bytecode::{BytecodeBuilder, ProfileKind};

        let table = OperationTable::from_names(["default", "signal"]).unwrap();

        let mut b = BytecodeBuilder::new(ProfileKind::Single, 2).unwrap();
        let keyword = b.string("self").unwrap();
        // Node 0 loops back to itself on unmatch.
        b.node(NodeEntry::filter(0x0f, keyword, 0, 0)).unwrap();
        b.add_profile(None, vec![0, 0]).unwrap();
        let ev = Evaluator::new(&b.finish().unwrap(), table.clone()).unwrap();
        assert!(matches!(
            ev.evaluate(0, &Request::new("signal").with_argument("others")),
            Err(EvalError::Cycle(0))
        ));

        let mut b = BytecodeBuilder::new(ProfileKind::Single, 2).unwrap();
        b.node(NodeEntry::filter(0x0f, keyword, 7, 7)).unwrap();
        b.add_profile(None, vec![0, 0]).unwrap();
        let ev = Evaluator::new(&b.finish().unwrap(), table).unwrap();
        assert!(matches!(
            ev.evaluate(0, &Request::new("signal")),
            Err(EvalError::DanglingNode { from: 0, index: 7, count: 1 })
        ));
    }

    #[test]
    fn subpath_and_address_helpers() {
        assert!(subpath_matches("/usr/", "/usr/lib"));
        assert!(subpath_matches("/", "/anything"));
        assert!(!subpath_matches("/usr", "/usr2"));
        assert!(address_matches("*:*", "10.0.0.1:22"));
        assert!(!address_matches("localhost:22", "localhost"));
    }
}
