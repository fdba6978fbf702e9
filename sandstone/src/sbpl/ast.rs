//! AST types for the sandbox policy language.
//!
//! A parsed (but not yet lowered) policy: the declared version and the rules
//! in source order. Source order matters because the last matching rule wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::sexpr::Span;

/// The action a rule produces when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

impl Action {
    /// Encoding used in terminal node entries.
    pub fn code(self) -> u16 {
        match self {
            Action::Allow => 0,
            Action::Deny => 1,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Action::Allow),
            1 => Some(Action::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => write!(f, "allow"),
            Action::Deny => write!(f, "deny"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Action::Allow),
            "deny" => Ok(Action::Deny),
            _ => Err(format!("unknown action: {s:?}")),
        }
    }
}

bitflags::bitflags! {
    /// Modifiers attached to a rule with `(with ...)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u16 {
        /// `(with report)`: log the decision even when it allows.
        const REPORT = 0b0000_0001;
        /// `(with no-log)`: suppress the violation log on deny.
        const NO_LOG = 0b0000_0010;
    }
}

impl Modifiers {
    pub fn from_keyword(name: &str) -> Option<Self> {
        match name {
            "report" => Some(Modifiers::REPORT),
            "no-log" => Some(Modifiers::NO_LOG),
            _ => None,
        }
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Modifiers::REPORT) {
            names.push("report");
        }
        if self.contains(Modifiers::NO_LOG) {
            names.push("no-log");
        }
        write!(f, "{}", names.join(","))
    }
}

/// The argument of a leaf filter, tagged by how it is matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Argument {
    /// An absolute path, possibly starting with a `${VARIABLE}`.
    Path(String),
    /// A regular expression source.
    Regex(String),
    /// A service, sysctl, preference or class name.
    Name(String),
    /// A symbolic value such as `REGULAR-FILE` or `self`.
    Keyword(String),
    /// A network address `host:port`, either side may be `*`.
    Address(String),
    /// An entitlement key.
    Entitlement(String),
}

impl Argument {
    pub fn value(&self) -> &str {
        match self {
            Argument::Path(s)
            | Argument::Regex(s)
            | Argument::Name(s)
            | Argument::Keyword(s)
            | Argument::Address(s)
            | Argument::Entitlement(s) => s,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Regex(s) => write!(f, "#\"{s}\""),
            Argument::Keyword(s) => write!(f, "{s}"),
            Argument::Address(s) => write!(f, "ip {s:?}"),
            other => write!(f, "{:?}", other.value()),
        }
    }
}

/// A filter expression guarding a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// A single predicate, e.g. `(subpath "/usr")`.
    Leaf { name: String, argument: Argument },
    /// `(require-all ...)`; also the implicit form of several filters in one rule.
    All(Vec<Filter>),
    /// `(require-any ...)`.
    Any(Vec<Filter>),
    /// `(require-not ...)`.
    Not(Box<Filter>),
}

impl Filter {
    pub fn leaf(name: impl Into<String>, argument: Argument) -> Self {
        Filter::Leaf {
            name: name.into(),
            argument,
        }
    }

    /// Visit every leaf in evaluation order.
    pub fn leaves(&self) -> Vec<(&str, &Argument)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<(&'a str, &'a Argument)>) {
        match self {
            Filter::Leaf { name, argument } => out.push((name, argument)),
            Filter::All(items) | Filter::Any(items) => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
            Filter::Not(inner) => inner.collect_leaves(out),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, head: &str, items: &[Filter]) -> fmt::Result {
            write!(f, "({head}")?;
            for item in items {
                write!(f, " {item}")?;
            }
            write!(f, ")")
        }
        match self {
            Filter::Leaf { name, argument } => write!(f, "({name} {argument})"),
            Filter::All(items) => list(f, "require-all", items),
            Filter::Any(items) => list(f, "require-any", items),
            Filter::Not(inner) => write!(f, "(require-not {inner})"),
        }
    }
}

/// A single `(allow ...)` or `(deny ...)` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,
    /// Operation names as written, e.g. `file-read*` or `default`.
    pub operations: Vec<String>,
    /// `None` means the rule applies unconditionally.
    pub filter: Option<Filter>,
    #[serde(skip)]
    pub modifiers: Modifiers,
    #[serde(skip)]
    pub span: Span,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {}", self.action, self.operations.join(" "))?;
        if let Some(filter) = &self.filter {
            write!(f, " {filter}")?;
        }
        if !self.modifiers.is_empty() {
            write!(f, " (with {})", self.modifiers.to_string().replace(',', " "))?;
        }
        write!(f, ")")
    }
}

/// A complete parsed policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Value of the `(version N)` form.
    pub version: u32,
    #[serde(skip)]
    pub version_span: Span,
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Pattern variables (`${NAME}`) referenced by path arguments, deduplicated
    /// in first-use order.
    pub fn pattern_variables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rule in &self.rules {
            let Some(filter) = &rule.filter else { continue };
            for (_, argument) in filter.leaves() {
                if let Argument::Path(path) = argument
                    && let Some(name) = pattern_variable(path)
                    && !out.iter().any(|v| v == name)
                {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    /// Entitlement keys referenced by filters, deduplicated in first-use order.
    pub fn entitlements(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rule in &self.rules {
            let Some(filter) = &rule.filter else { continue };
            for (_, argument) in filter.leaves() {
                if let Argument::Entitlement(key) = argument
                    && !out.contains(key)
                {
                    out.push(key.clone());
                }
            }
        }
        out
    }
}

/// Extract `NAME` from a path that starts with `${NAME}`.
pub fn pattern_variable(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("${")?;
    let end = rest.find('}')?;
    Some(&rest[..end])
}
