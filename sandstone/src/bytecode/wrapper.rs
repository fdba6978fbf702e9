//! Structural parsing of a bytecode buffer.

use tracing::{Level, debug, instrument};

use super::header::Header;
use super::operation::NodeEntry;
use super::profile::ProfileRecord;
use super::reader::{DataArea, Reader};
use super::{BLOCK_LEN, BytecodeError, NODE_LEN, OFFSET_UNIT};

/// Name given to the unnamed profile of a single-profile bytecode.
pub const SINGLE_PROFILE_NAME: &str = "Single Profile";

/// The raw structures of a bytecode buffer, with string tables resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeWrapper {
    pub header: Header,
    /// Data-area offsets of regex sources.
    pub regexes: Vec<u16>,
    pub variable_offsets: Vec<u16>,
    /// Pattern variable names, resolved.
    pub variables: Vec<String>,
    pub variable_states: Vec<u16>,
    pub entitlement_offsets: Vec<u16>,
    /// Entitlement keys, resolved.
    pub entitlements: Vec<String>,
    pub instructions: Vec<u16>,
    pub profiles: Vec<ProfileRecord>,
    pub nodes: Vec<NodeEntry>,
    /// Byte position of the first node entry.
    pub nodes_offset: usize,
    pub blocks: Vec<Vec<u8>>,
    /// Byte position of the first block.
    pub blocks_offset: usize,
    /// Byte position of the data area.
    pub data_offset: usize,
    data: Vec<u8>,
}

impl BytecodeWrapper {
    /// Parse raw bytecode. Truncated or inconsistent input is an error, never
    /// a panic.
    #[instrument(level = Level::TRACE, skip(bytes), fields(len = bytes.len()))]
    pub fn parse(bytes: &[u8]) -> Result<Self, BytecodeError> {
        let mut reader = Reader::new(bytes);
        let header = Header::read(&mut reader)?;

        let regexes = reader.offset_table(usize::from(header.regex_count))?;
        let variable_offsets = reader.offset_table(usize::from(header.variable_count))?;
        let variable_states = reader.offset_table(usize::from(header.variable_state_count))?;
        let entitlement_offsets = reader.offset_table(usize::from(header.entitlement_count))?;
        let instructions = reader.offset_table(usize::from(header.instruction_count))?;

        let operation_count = usize::from(header.operation_count);
        let profiles = (0..header.profile_records())
            .map(|index| ProfileRecord::read(&mut reader, header.kind, operation_count, index))
            .collect::<Result<Vec<_>, _>>()?;

        reader.align(OFFSET_UNIT)?;

        let nodes_offset = reader.position();
        let nodes = reader
            .records(usize::from(header.node_count), NODE_LEN)?
            .into_iter()
            .map(|(_, b)| NodeEntry::decode(b))
            .collect();

        let blocks_offset = reader.position();
        let blocks = reader
            .records(usize::from(header.block_count), BLOCK_LEN)?
            .into_iter()
            .map(|(_, b)| b.to_vec())
            .collect();

        let data_offset = reader.position();
        let data = reader.rest().to_vec();

        let area = DataArea::new(&data);
        let variables = resolve_strings(&area, &variable_offsets)?;
        let entitlements = resolve_strings(&area, &entitlement_offsets)?;

        debug!(
            kind = ?header.kind,
            profiles = profiles.len(),
            nodes = header.node_count,
            data = data.len(),
            "parsed bytecode"
        );

        Ok(Self {
            header,
            regexes,
            variable_offsets,
            variables,
            variable_states,
            entitlement_offsets,
            entitlements,
            instructions,
            profiles,
            nodes,
            nodes_offset,
            blocks,
            blocks_offset,
            data_offset,
            data,
        })
    }

    pub fn data_area(&self) -> DataArea<'_> {
        DataArea::new(&self.data)
    }

    /// Absolute byte position of a data-area table offset.
    pub fn data_position(&self, offset: u16) -> usize {
        self.data_offset + DataArea::position(offset)
    }

    pub fn string(&self, offset: u16) -> Result<&str, BytecodeError> {
        self.data_area().string(offset)
    }

    /// Source of the regex at a regex table index.
    pub fn regex(&self, index: u16) -> Result<&str, BytecodeError> {
        let offset = self
            .regexes
            .get(usize::from(index))
            .ok_or(BytecodeError::OffsetTooLarge {
                offset: usize::from(index),
                len: self.regexes.len(),
            })?;
        self.string(*offset)
    }

    /// Entitlement key at an entitlement table index.
    pub fn entitlement(&self, index: u16) -> Option<&str> {
        self.entitlements.get(usize::from(index)).map(String::as_str)
    }

    /// Display name of a profile record.
    pub fn profile_name(&self, profile: &ProfileRecord) -> Result<String, BytecodeError> {
        match profile.name_offset {
            Some(offset) => self.string(offset).map(str::to_string),
            None => Ok(SINGLE_PROFILE_NAME.to_string()),
        }
    }

    /// Index of the profile called `name`.
    pub fn profile_index(&self, name: &str) -> Option<usize> {
        self.profiles
            .iter()
            .position(|p| self.profile_name(p).is_ok_and(|n| n == name))
    }
}

fn resolve_strings(area: &DataArea<'_>, offsets: &[u16]) -> Result<Vec<String>, BytecodeError> {
    offsets
        .iter()
        .map(|offset| area.string(*offset).map(str::to_string))
        .collect()
}
