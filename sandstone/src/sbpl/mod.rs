//! The sandbox policy language (SBPL) front end.
//!
//! Source text goes through three stages:
//!
//! - [`sexpr`] reads it into a generic s-expression tree with spans.
//! - [`parse`] turns the tree into a typed [`ast::Policy`], substituting
//!   `(param "NAME")` references from [`Parameters`].
//! - [`validate`] checks operations, filter arguments and regexes against an
//!   [`OperationTable`](crate::operations::OperationTable).

pub mod ast;
pub mod error;
pub mod parse;
pub mod sexpr;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use ast::{Action, Argument, Filter, Modifiers, Policy, Rule};
pub use error::PolicyError;
pub use parse::parse_policy;
pub use validate::validate;

/// Compile-time parameters referenced with `(param "NAME")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a `NAME=VALUE` assignment as given on the command line.
    pub fn parse_assignment(text: &str) -> Result<(String, String), String> {
        match text.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(format!("expected NAME=VALUE, got '{text}'")),
        }
    }

    /// Overlay `other` on top of `self`; entries in `other` win.
    pub fn merged(&self, other: &Parameters) -> Parameters {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.insert(k, v);
        }
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_parsing() {
        assert_eq!(
            Parameters::parse_assignment("HOME=/Users/me").unwrap(),
            ("HOME".to_string(), "/Users/me".to_string())
        );
        assert_eq!(
            Parameters::parse_assignment("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(Parameters::parse_assignment("=value").is_err());
        assert!(Parameters::parse_assignment("novalue").is_err());
    }

    #[test]
    fn merge_prefers_overlay() {
        let base = Parameters::new().with("A", "1").with("B", "2");
        let overlay = Parameters::new().with("B", "3");
        let merged = base.merged(&overlay);
        assert_eq!(merged.get("A"), Some("1"));
        assert_eq!(merged.get("B"), Some("3"));
        assert_eq!(merged.to_string(), "A=1 B=3");
    }
}
