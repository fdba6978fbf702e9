//! Bytecode writer.
//!
//! [`BytecodeBuilder`] accumulates interned strings, table entries, node
//! entries and profile records, then lays them out in [`finish`](BytecodeBuilder::finish).
//! Node entries are hash-consed, so a graph built bottom-up shares identical
//! suffixes automatically.

use std::collections::HashMap;

use tracing::{Level, debug, instrument};

use super::header::{Header, ProfileKind};
use super::operation::NodeEntry;
use super::profile::ProfileRecord;
use super::{BytecodeError, HEADER_LEN, OFFSET_UNIT, narrow};

const MAX_NODES: usize = u8::MAX as usize;
const MAX_DATA: usize = (u16::MAX as usize + 1) * OFFSET_UNIT;

/// An interning string table with index lookup.
#[derive(Debug, Default)]
struct Table {
    offsets: Vec<u16>,
    index: HashMap<String, u16>,
}

impl Table {
    fn len(&self) -> usize {
        self.offsets.len()
    }
}

#[derive(Debug)]
pub struct BytecodeBuilder {
    kind: ProfileKind,
    operation_count: u8,
    profiles: Vec<ProfileRecord>,
    nodes: Vec<NodeEntry>,
    node_index: HashMap<NodeEntry, u16>,
    regexes: Table,
    variables: Table,
    entitlements: Table,
    data: Vec<u8>,
    interned: HashMap<Vec<u8>, u16>,
}

impl BytecodeBuilder {
    pub fn new(kind: ProfileKind, operation_count: usize) -> Result<Self, BytecodeError> {
        Ok(Self {
            kind,
            operation_count: narrow("operation table", operation_count, u8::MAX as usize)?,
            profiles: Vec::new(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            regexes: Table::default(),
            variables: Table::default(),
            entitlements: Table::default(),
            data: Vec::new(),
            interned: HashMap::new(),
        })
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add a node entry, returning the index of an identical existing entry
    /// if there is one.
    pub fn node(&mut self, entry: NodeEntry) -> Result<u16, BytecodeError> {
        if let Some(index) = self.node_index.get(&entry) {
            return Ok(*index);
        }
        if self.nodes.len() >= MAX_NODES {
            return Err(BytecodeError::TableOverflow {
                table: "operation entries",
                count: self.nodes.len() + 1,
                max: MAX_NODES,
            });
        }
        let index = narrow("operation entries", self.nodes.len(), MAX_NODES)?;
        self.nodes.push(entry);
        self.node_index.insert(entry, index);
        Ok(index)
    }

    /// Intern a length-prefixed blob in the data area and return its table offset.
    pub fn data(&mut self, bytes: &[u8]) -> Result<u16, BytecodeError> {
        if let Some(offset) = self.interned.get(bytes) {
            return Ok(*offset);
        }
        let len: u16 = narrow("data entry", bytes.len(), u16::MAX as usize)?;
        let at = self.data.len();
        let offset: u16 = narrow("data area", at / OFFSET_UNIT, MAX_DATA / OFFSET_UNIT - 1)?;

        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(bytes);
        let padded = self.data.len().next_multiple_of(OFFSET_UNIT);
        self.data.resize(padded, 0);

        self.interned.insert(bytes.to_vec(), offset);
        Ok(offset)
    }

    /// Intern a string in the data area and return its table offset.
    pub fn string(&mut self, value: &str) -> Result<u16, BytecodeError> {
        self.data(value.as_bytes())
    }

    /// Register a regex source, returning its regex table index.
    pub fn regex(&mut self, pattern: &str) -> Result<u16, BytecodeError> {
        self.table_entry(TableKind::Regex, pattern, u16::MAX as usize)
    }

    /// Register a pattern variable, returning its variable table index.
    pub fn variable(&mut self, name: &str) -> Result<u16, BytecodeError> {
        self.table_entry(TableKind::Variable, name, u8::MAX as usize)
    }

    /// Register an entitlement key, returning its entitlement table index.
    pub fn entitlement(&mut self, key: &str) -> Result<u16, BytecodeError> {
        self.table_entry(TableKind::Entitlement, key, u16::MAX as usize)
    }

    fn table_entry(&mut self, kind: TableKind, value: &str, max: usize) -> Result<u16, BytecodeError> {
        if let Some(index) = self.table(kind).index.get(value) {
            return Ok(*index);
        }
        let count = self.table(kind).len();
        if count >= max {
            return Err(BytecodeError::TableOverflow {
                table: kind.name(),
                count: count + 1,
                max,
            });
        }
        let index = narrow(kind.name(), count, max)?;
        let offset = self.string(value)?;
        let table = self.table_mut(kind);
        table.offsets.push(offset);
        table.index.insert(value.to_string(), index);
        Ok(index)
    }

    fn table(&self, kind: TableKind) -> &Table {
        match kind {
            TableKind::Regex => &self.regexes,
            TableKind::Variable => &self.variables,
            TableKind::Entitlement => &self.entitlements,
        }
    }

    fn table_mut(&mut self, kind: TableKind) -> &mut Table {
        match kind {
            TableKind::Regex => &mut self.regexes,
            TableKind::Variable => &mut self.variables,
            TableKind::Entitlement => &mut self.entitlements,
        }
    }

    /// Append a profile record. `name` is only stored for collections.
    pub fn add_profile(
        &mut self,
        name: Option<&str>,
        operations: Vec<u16>,
    ) -> Result<(), BytecodeError> {
        if operations.len() != usize::from(self.operation_count) {
            return Err(BytecodeError::InvalidOperationCount {
                declared: usize::from(self.operation_count),
                table: operations.len(),
            });
        }
        let name_offset = match self.kind {
            ProfileKind::Single => {
                if !self.profiles.is_empty() {
                    return Err(BytecodeError::TableOverflow {
                        table: "profiles",
                        count: 2,
                        max: 1,
                    });
                }
                None
            }
            ProfileKind::Collection => Some(self.string(name.unwrap_or_default())?),
        };
        self.profiles.push(ProfileRecord {
            index: self.profiles.len(),
            name_offset,
            syscall_mask: 0,
            offset: 0,
            operations,
        });
        Ok(())
    }

    /// Lay out the bytecode.
    #[instrument(level = Level::TRACE, skip(self), fields(kind = ?self.kind))]
    pub fn finish(self) -> Result<Vec<u8>, BytecodeError> {
        if self.profiles.is_empty() {
            return Err(BytecodeError::MissingProfile);
        }

        let header = Header {
            kind: self.kind,
            node_count: narrow("operation entries", self.nodes.len(), MAX_NODES)?,
            block_count: 0,
            operation_count: self.operation_count,
            variable_count: narrow("variables", self.variables.len(), u8::MAX as usize)?,
            variable_state_count: 0,
            profile_count: match self.kind {
                ProfileKind::Single => 0,
                ProfileKind::Collection => {
                    narrow("profiles", self.profiles.len(), u16::MAX as usize)?
                }
            },
            regex_count: narrow("regexes", self.regexes.len(), u16::MAX as usize)?,
            entitlement_count: narrow("entitlements", self.entitlements.len(), u16::MAX as usize)?,
            instruction_count: 0,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() + self.nodes.len() * 8);
        header.write(&mut out);

        for offset in self
            .regexes
            .offsets
            .iter()
            .chain(&self.variables.offsets)
            .chain(&self.entitlements.offsets)
        {
            out.extend_from_slice(&offset.to_le_bytes());
        }

        for profile in &self.profiles {
            profile.write(&mut out);
        }
        out.resize(out.len().next_multiple_of(OFFSET_UNIT), 0);

        for node in &self.nodes {
            node.encode(&mut out);
        }

        out.extend_from_slice(&self.data);

        debug!(
            bytes = out.len(),
            nodes = self.nodes.len(),
            profiles = self.profiles.len(),
            "emitted bytecode"
        );
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
enum TableKind {
    Regex,
    Variable,
    Entitlement,
}

impl TableKind {
    fn name(self) -> &'static str {
        match self {
            TableKind::Regex => "regexes",
            TableKind::Variable => "variables",
            TableKind::Entitlement => "entitlements",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BytecodeWrapper;
    use crate::sbpl::{Action, Modifiers};

    #[test]
    fn nodes_are_hash_consed() {
        let mut b = BytecodeBuilder::new(ProfileKind::Single, 1).unwrap();
        let allow = NodeEntry::terminal(Action::Allow, Modifiers::empty());
        assert_eq!(b.node(allow).unwrap(), 0);
        assert_eq!(b.node(NodeEntry::filter(1, 0, 0, 0)).unwrap(), 1);
        assert_eq!(b.node(allow).unwrap(), 0);
        assert_eq!(b.node_count(), 2);
    }

    #[test]
    fn strings_are_interned_and_aligned() {
        let mut b = BytecodeBuilder::new(ProfileKind::Single, 1).unwrap();
        assert_eq!(b.string("/usr").unwrap(), 0);
        assert_eq!(b.string("/usr/lib/system").unwrap(), 1);
        assert_eq!(b.string("/usr").unwrap(), 0);
        // 2 + 15 bytes rounds up to 24.
        assert_eq!(b.data.len(), 8 + 24);
    }

    #[test]
    fn regex_and_entitlement_tables_index_from_zero() {
        let mut b = BytecodeBuilder::new(ProfileKind::Single, 1).unwrap();
        assert_eq!(b.regex("^/tmp/").unwrap(), 0);
        assert_eq!(b.regex("^/var/").unwrap(), 1);
        assert_eq!(b.regex("^/tmp/").unwrap(), 0);
        assert_eq!(b.entitlement("com.apple.private.x").unwrap(), 0);
    }

    #[test]
    fn node_table_overflows() {
        let mut b = BytecodeBuilder::new(ProfileKind::Single, 1).unwrap();
        for i in 0..MAX_NODES {
            b.node(NodeEntry::filter(1, i as u16, 0, 0)).unwrap();
        }
        assert_eq!(
            b.node(NodeEntry::filter(1, 9999, 0, 0)).unwrap_err(),
            BytecodeError::TableOverflow {
                table: "operation entries",
                count: 256,
                max: 255
            }
        );
    }

    #[test]
    fn profile_slot_count_must_match() {
        let mut b = BytecodeBuilder::new(ProfileKind::Single, 3).unwrap();
        assert_eq!(
            b.add_profile(None, vec![0, 0]).unwrap_err(),
            BytecodeError::InvalidOperationCount {
                declared: 3,
                table: 2
            }
        );
        assert_eq!(b.finish().unwrap_err(), BytecodeError::MissingProfile);
    }

    #[test]
    fn operation_table_must_fit_header() {
        assert!(matches!(
            BytecodeBuilder::new(ProfileKind::Single, 300),
            Err(BytecodeError::TableOverflow { .. })
        ));
    }

    #[test]
    fn layout_parses_back() {
        let mut b = BytecodeBuilder::new(ProfileKind::Single, 2).unwrap();
        let deny = b
            .node(NodeEntry::terminal(Action::Deny, Modifiers::empty()))
            .unwrap();
        let allow = b
            .node(NodeEntry::terminal(Action::Allow, Modifiers::REPORT))
            .unwrap();
        let path = b.string("/usr").unwrap();
        let check = b.node(NodeEntry::filter(2, path, allow, deny)).unwrap();
        b.regex(r"\.plist$").unwrap();
        b.add_profile(None, vec![deny, check]).unwrap();

        let bytes = b.finish().unwrap();
        let wrapper = BytecodeWrapper::parse(&bytes).unwrap();
        assert_eq!(wrapper.header.node_count, 3);
        assert_eq!(wrapper.header.regex_count, 1);
        assert_eq!(wrapper.profiles[0].operations, vec![deny, check]);
        assert_eq!(wrapper.nodes[usize::from(check)], NodeEntry::filter(2, path, allow, deny));
        assert_eq!(wrapper.string(path).unwrap(), "/usr");
        assert_eq!(wrapper.regex(0).unwrap(), r"\.plist$");
    }
}
