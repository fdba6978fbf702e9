//! High-level view of a bytecode buffer as lists of displayable items.

use std::fmt;

use serde::Serialize;
use tracing::{Level, instrument};

use super::operation::NodeEntry;
use super::wrapper::BytecodeWrapper;
use super::{BLOCK_LEN, BytecodeError, NODE_LEN};
use crate::operations::OperationTable;

/// A single resolved element of a bytecode buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BytecodeItem {
    Data {
        index: usize,
        offset: usize,
        value: Vec<u8>,
    },
    String {
        index: usize,
        offset: usize,
        value: String,
    },
    Profile {
        name: String,
        syscall_mask: u16,
        index: usize,
        offset: usize,
        operations: Vec<NamedOperation>,
    },
    Operation {
        index: usize,
        offset: usize,
        entry: NodeEntry,
    },
}

impl BytecodeItem {
    /// Byte position of the item in the bytecode.
    pub fn offset(&self) -> usize {
        match self {
            BytecodeItem::Data { offset, .. }
            | BytecodeItem::String { offset, .. }
            | BytecodeItem::Profile { offset, .. }
            | BytecodeItem::Operation { offset, .. } => *offset,
        }
    }
}

impl fmt::Display for BytecodeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeItem::Data { index, offset, value } => {
                write!(f, "#{index} @ {offset:#06x}: {} bytes", value.len())
            }
            BytecodeItem::String { index, offset, value } => {
                write!(f, "#{index} @ {offset:#06x}: {value:?}")
            }
            BytecodeItem::Profile {
                name,
                syscall_mask,
                index,
                offset,
                ..
            } => write!(
                f,
                "#{index} @ {offset:#06x}: {name} (syscall mask {syscall_mask:#06x})"
            ),
            BytecodeItem::Operation { index, offset, entry } => {
                write!(f, "#{index} @ {offset:#06x}: {entry}")
            }
        }
    }
}

/// The entry node a profile assigns to one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NamedOperation {
    pub operation_id: usize,
    pub name: String,
    pub entry: u16,
}

/// A dissected bytecode buffer.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub wrapper: BytecodeWrapper,
    pub regexes: Vec<BytecodeItem>,
    pub variables: Vec<BytecodeItem>,
    pub variable_states: Vec<BytecodeItem>,
    pub entitlements: Vec<BytecodeItem>,
    pub instructions: Vec<BytecodeItem>,
    pub profiles: Vec<BytecodeItem>,
    pub operation_entries: Vec<BytecodeItem>,
    pub blocks: Vec<BytecodeItem>,
}

impl Bytecode {
    /// Parse and resolve `bytes`, naming operation slots from `table`.
    #[instrument(level = Level::TRACE, skip_all)]
    pub fn new(bytes: &[u8], table: &OperationTable) -> Result<Self, BytecodeError> {
        let wrapper = BytecodeWrapper::parse(bytes)?;

        let declared = usize::from(wrapper.header.operation_count);
        if declared != table.len() {
            return Err(BytecodeError::InvalidOperationCount {
                declared,
                table: table.len(),
            });
        }

        let regexes = resolve_regexes(&wrapper)?;
        let variables = resolve_strings(&wrapper, &wrapper.variable_offsets)?;
        let variable_states = resolve_data(&wrapper, &wrapper.variable_states)?;
        let entitlements = resolve_strings(&wrapper, &wrapper.entitlement_offsets)?;
        let instructions = resolve_data(&wrapper, &wrapper.instructions)?;

        let profiles = wrapper
            .profiles
            .iter()
            .map(|profile| -> Result<BytecodeItem, BytecodeError> {
                let operations = profile
                    .operations
                    .iter()
                    .enumerate()
                    .map(|(operation_id, entry)| NamedOperation {
                        operation_id,
                        name: table.name(operation_id).unwrap_or_default().to_string(),
                        entry: *entry,
                    })
                    .collect();
                Ok(BytecodeItem::Profile {
                    name: wrapper.profile_name(profile)?,
                    syscall_mask: profile.syscall_mask,
                    index: profile.index,
                    offset: profile.offset,
                    operations,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let operation_entries = wrapper
            .nodes
            .iter()
            .enumerate()
            .map(|(index, entry)| BytecodeItem::Operation {
                index,
                offset: wrapper.nodes_offset + index * NODE_LEN,
                entry: *entry,
            })
            .collect();

        let blocks = wrapper
            .blocks
            .iter()
            .enumerate()
            .map(|(index, block)| BytecodeItem::Data {
                index,
                offset: wrapper.blocks_offset + index * BLOCK_LEN,
                value: block.clone(),
            })
            .collect();

        Ok(Self {
            regexes,
            variables,
            variable_states,
            entitlements,
            instructions,
            profiles,
            operation_entries,
            blocks,
            wrapper,
        })
    }

    /// Item lists with their section titles, in file order.
    pub fn sections(&self) -> [(&'static str, &[BytecodeItem]); 8] {
        [
            ("Regexes", self.regexes.as_slice()),
            ("Variables", self.variables.as_slice()),
            ("Variable States", self.variable_states.as_slice()),
            ("Entitlements", self.entitlements.as_slice()),
            ("Instructions", self.instructions.as_slice()),
            ("Profiles", self.profiles.as_slice()),
            ("Operation Entries", self.operation_entries.as_slice()),
            ("Blocks", self.blocks.as_slice()),
        ]
    }
}

fn resolve_strings(
    wrapper: &BytecodeWrapper,
    offsets: &[u16],
) -> Result<Vec<BytecodeItem>, BytecodeError> {
    offsets
        .iter()
        .enumerate()
        .map(|(index, offset)| -> Result<BytecodeItem, BytecodeError> {
            Ok(BytecodeItem::String {
                index,
                offset: wrapper.data_position(*offset),
                value: wrapper.string(*offset)?.to_string(),
            })
        })
        .collect()
}

/// Regex entries are pattern text from the builtin compiler but compiled
/// automata from libsandbox; only the former resolve as strings.
fn resolve_regexes(wrapper: &BytecodeWrapper) -> Result<Vec<BytecodeItem>, BytecodeError> {
    let area = wrapper.data_area();
    wrapper
        .regexes
        .iter()
        .enumerate()
        .map(|(index, offset)| -> Result<BytecodeItem, BytecodeError> {
            let offset_in_file = wrapper.data_position(*offset);
            let bytes = area.sized(*offset)?;
            Ok(match std::str::from_utf8(bytes) {
                Ok(value) => BytecodeItem::String {
                    index,
                    offset: offset_in_file,
                    value: value.to_string(),
                },
                Err(_) => BytecodeItem::Data {
                    index,
                    offset: offset_in_file,
                    value: bytes.to_vec(),
                },
            })
        })
        .collect()
}

fn resolve_data(
    wrapper: &BytecodeWrapper,
    offsets: &[u16],
) -> Result<Vec<BytecodeItem>, BytecodeError> {
    offsets
        .iter()
        .enumerate()
        .map(|(index, offset)| -> Result<BytecodeItem, BytecodeError> {
            Ok(BytecodeItem::Data {
                index,
                offset: wrapper.data_position(*offset),
                value: wrapper.data_area().sized(*offset)?.to_vec(),
            })
        })
        .collect()
}
