//! Profile compilation: policy source → [`CompiledProfile`].
//!
//! The [`Compiler`] trait abstracts over backends. [`BuiltinCompiler`] runs
//! the pure-Rust pipeline (parse, validate, lower, emit). On macOS the
//! platform's `libsandbox` is available as
//! [`NativeCompiler`](crate::native::NativeCompiler).
//!
//! # Lowering
//!
//! Every operation slot gets its own decision graph. The rules covering the
//! slot (exact name, wildcard ancestor, or `default`) are folded so the last
//! matching rule wins. The last unconditional rule cuts off everything
//! before it, so only the rules after it emit nodes:
//!
//! ```text
//! acc = terminal(last unconditional rule) or deny
//! for rule in covering after it:
//!     acc = lower(filter, terminal(rule), acc)
//! ```
//!
//! `lower(filter, m, u)` produces a node that continues to `m` when the
//! filter holds and to `u` otherwise; `require-all`, `require-any` and
//! `require-not` become chains of such nodes.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{Level, debug, info, instrument, trace};

use crate::bytecode::{BytecodeBuilder, BytecodeError, NodeEntry, ProfileKind};
use crate::filters;
use crate::operations::OperationTable;
use crate::sbpl::{
    self, Action, Argument, Filter, Modifiers, Parameters, Policy, PolicyError, Rule,
    ast::pattern_variable,
};

/// Type tag of a profile holding a single unnamed policy.
pub const PROFILE_TYPE_SINGLE: u32 = 0;
/// Type tag of a profile holding a named collection of policies.
pub const PROFILE_TYPE_COLLECTION: u32 = 1;

/// Error produced by a compile request. Its message is the text a caller
/// would show as the compile error output.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),

    /// Reported by the platform compiler.
    #[error("{message}")]
    Native { message: String },

    #[error("duplicate profile name '{0}' in collection")]
    DuplicateProfile(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CompileError {
    pub fn help(&self) -> Option<String> {
        match self {
            CompileError::Policy(err) => err.help(),
            CompileError::Bytecode(BytecodeError::TableOverflow { table, .. }) => Some(format!(
                "the profile needs more {table} than the format can hold; split it into a collection or merge filters"
            )),
            CompileError::Unsupported(message) if message.contains("native") => {
                Some("use the builtin backend (--backend builtin)".into())
            }
            _ => None,
        }
    }
}

/// An owned compiled profile: a type tag and its bytecode.
///
/// Dropping the value releases it; [`release`](Self::release) does the same
/// explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProfile {
    kind: u32,
    bytecode: Vec<u8>,
}

impl CompiledProfile {
    pub fn new(kind: u32, bytecode: Vec<u8>) -> Self {
        Self { kind, bytecode }
    }

    /// The numeric type tag.
    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    pub fn into_bytecode(self) -> Vec<u8> {
        self.bytecode
    }

    /// Release the profile and its bytecode.
    pub fn release(self) {
        trace!(kind = self.kind, len = self.bytecode.len(), "released profile");
    }
}

/// Which compiler implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Builtin,
    Native,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Builtin => write!(f, "builtin"),
            Backend::Native => write!(f, "native"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "builtin" => Ok(Backend::Builtin),
            "native" => Ok(Backend::Native),
            other => Err(format!("unknown backend '{other}'; expected builtin or native")),
        }
    }
}

impl Backend {
    /// Instantiate the backend. The native backend only exists on macOS.
    pub fn compiler(self, table: OperationTable) -> Result<Box<dyn Compiler>, CompileError> {
        match self {
            Backend::Builtin => Ok(Box::new(BuiltinCompiler::new(table))),
            #[cfg(target_os = "macos")]
            Backend::Native => {
                let _ = table;
                Ok(Box::new(crate::native::NativeCompiler))
            }
            #[cfg(not(target_os = "macos"))]
            Backend::Native => {
                let _ = table;
                Err(CompileError::Unsupported(
                    "the native backend requires macOS libsandbox".into(),
                ))
            }
        }
    }
}

/// Trait abstracting over compiler backends.
pub trait Compiler {
    /// Compile SBPL source into a profile.
    fn compile(&self, source: &str, params: &Parameters) -> Result<CompiledProfile, CompileError>;
}

/// The pure-Rust compiler.
#[derive(Debug, Clone, Default)]
pub struct BuiltinCompiler {
    table: OperationTable,
}

impl BuiltinCompiler {
    pub fn new(table: OperationTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &OperationTable {
        &self.table
    }

    /// Parse and validate `source` without emitting bytecode.
    pub fn check(&self, source: &str, params: &Parameters) -> Result<Policy, PolicyError> {
        let policy = sbpl::parse_policy(source, params)?;
        sbpl::validate(&policy, source, &self.table)?;
        Ok(policy)
    }

    /// Compile several named policies into one collection.
    #[instrument(level = Level::TRACE, skip_all, fields(count = sources.len()))]
    pub fn compile_collection<S: AsRef<str>>(
        &self,
        sources: &[(S, S)],
        params: &Parameters,
    ) -> Result<CompiledProfile, CompileError> {
        let mut builder = BytecodeBuilder::new(ProfileKind::Collection, self.table.len())?;
        let mut seen: Vec<&str> = Vec::new();

        for (name, source) in sources {
            let name = name.as_ref();
            if seen.contains(&name) {
                return Err(CompileError::DuplicateProfile(name.to_string()));
            }
            seen.push(name);

            let policy = self.check(source.as_ref(), params)?;
            let slots = Lowering::new(&self.table, &mut builder).profile(&policy)?;
            builder.add_profile(Some(name), slots)?;
        }

        let nodes = builder.node_count();
        let bytecode = builder.finish()?;
        info!(profiles = sources.len(), nodes, bytes = bytecode.len(), "compiled collection");
        Ok(CompiledProfile::new(PROFILE_TYPE_COLLECTION, bytecode))
    }
}

impl Compiler for BuiltinCompiler {
    #[instrument(level = Level::TRACE, skip_all, fields(params = %params))]
    fn compile(&self, source: &str, params: &Parameters) -> Result<CompiledProfile, CompileError> {
        let policy = self.check(source, params)?;

        let mut builder = BytecodeBuilder::new(ProfileKind::Single, self.table.len())?;
        let slots = Lowering::new(&self.table, &mut builder).profile(&policy)?;
        builder.add_profile(None, slots)?;

        let nodes = builder.node_count();
        let bytecode = builder.finish()?;
        info!(rules = policy.rules.len(), nodes, bytes = bytecode.len(), "compiled profile");
        Ok(CompiledProfile::new(PROFILE_TYPE_SINGLE, bytecode))
    }
}

/// Compile `source` with the builtin compiler and the default operation table.
pub fn compile_string(source: &str, params: &Parameters) -> Result<CompiledProfile, CompileError> {
    BuiltinCompiler::default().compile(source, params)
}

/// Compile named sources into a collection with the default operation table.
pub fn compile_collection<S: AsRef<str>>(
    sources: &[(S, S)],
    params: &Parameters,
) -> Result<CompiledProfile, CompileError> {
    BuiltinCompiler::default().compile_collection(sources, params)
}

/// Turns a validated policy into node entries.
struct Lowering<'a> {
    table: &'a OperationTable,
    builder: &'a mut BytecodeBuilder,
}

impl<'a> Lowering<'a> {
    fn new(table: &'a OperationTable, builder: &'a mut BytecodeBuilder) -> Self {
        Self { table, builder }
    }

    /// Entry node for each operation slot of `policy`.
    fn profile(&mut self, policy: &Policy) -> Result<Vec<u16>, CompileError> {
        let rules = policy
            .rules
            .iter()
            .map(|rule| self.rule_operations(rule).map(|ops| (ops, rule)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut chains: HashMap<Vec<usize>, u16> = HashMap::new();
        let mut slots = Vec::with_capacity(self.table.len());

        for op in 0..self.table.len() {
            let covering: Vec<usize> = rules
                .iter()
                .enumerate()
                .filter(|(_, (ops, _))| ops.iter().any(|r| self.table.covers(*r, op)))
                .map(|(i, _)| i)
                .collect();

            let entry = match chains.get(&covering) {
                Some(entry) => *entry,
                None => {
                    let covering_rules: Vec<&Rule> = covering.iter().map(|i| rules[*i].1).collect();
                    let entry = self.chain(&covering_rules)?;
                    chains.insert(covering, entry);
                    entry
                }
            };
            slots.push(entry);
        }

        debug!(
            rules = rules.len(),
            distinct_chains = chains.len(),
            "lowered profile"
        );
        Ok(slots)
    }

    fn rule_operations(&self, rule: &Rule) -> Result<Vec<usize>, CompileError> {
        rule.operations
            .iter()
            .map(|name| {
                self.table.resolve(name).ok_or_else(|| {
                    CompileError::Policy(PolicyError::UnknownOperation {
                        name: name.clone(),
                        suggestion: None,
                        line: 0,
                        col: 0,
                    })
                })
            })
            .collect()
    }

    /// Fold the covering rules into one decision graph. Rules shadowed by a
    /// later unconditional rule emit nothing.
    fn chain(&mut self, rules: &[&Rule]) -> Result<u16, CompileError> {
        let cut = rules.iter().rposition(|rule| rule.filter.is_none());
        let (mut acc, live) = match cut {
            Some(i) => (self.terminal(rules[i].action, rules[i].modifiers)?, &rules[i + 1..]),
            None => (self.terminal(Action::Deny, Modifiers::empty())?, rules),
        };
        for rule in live {
            if let Some(filter) = &rule.filter {
                let decision = self.terminal(rule.action, rule.modifiers)?;
                acc = self.lower(filter, decision, acc)?;
            }
        }
        Ok(acc)
    }

    fn terminal(&mut self, action: Action, modifiers: Modifiers) -> Result<u16, CompileError> {
        Ok(self.builder.node(NodeEntry::terminal(action, modifiers))?)
    }

    fn lower(&mut self, filter: &Filter, on_match: u16, on_unmatch: u16) -> Result<u16, CompileError> {
        match filter {
            Filter::Leaf { name, argument } => {
                let def = filters::by_name(name)
                    .ok_or_else(|| CompileError::Unsupported(format!("filter '{name}'")))?;
                let argument = self.argument(argument)?;
                Ok(self
                    .builder
                    .node(NodeEntry::filter(def.id, argument, on_match, on_unmatch))?)
            }
            Filter::All(items) => {
                let mut acc = on_match;
                for item in items.iter().rev() {
                    acc = self.lower(item, acc, on_unmatch)?;
                }
                Ok(acc)
            }
            Filter::Any(items) => {
                let mut acc = on_unmatch;
                for item in items.iter().rev() {
                    acc = self.lower(item, on_match, acc)?;
                }
                Ok(acc)
            }
            Filter::Not(inner) => self.lower(inner, on_unmatch, on_match),
        }
    }

    fn argument(&mut self, argument: &Argument) -> Result<u16, BytecodeError> {
        match argument {
            Argument::Regex(pattern) => self.builder.regex(pattern),
            Argument::Entitlement(key) => self.builder.entitlement(key),
            Argument::Path(path) => {
                if let Some(name) = pattern_variable(path) {
                    self.builder.variable(name)?;
                }
                self.builder.string(path)
            }
            Argument::Name(value) | Argument::Keyword(value) | Argument::Address(value) => {
                self.builder.string(value)
            }
        }
    }
}
