//! The fixed 0x10-byte bytecode header.

use serde::Serialize;

use super::reader::Reader;
use super::{BytecodeError, HEADER_LEN};

/// Header flag of a single profile.
pub const FLAG_SINGLE: u16 = 0x0000;
/// Header flag of a profile collection.
pub const FLAG_COLLECTION: u16 = 0x8000;

/// Whether the bytecode holds one unnamed profile or a named collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Single,
    Collection,
}

impl ProfileKind {
    pub fn flags(self) -> u16 {
        match self {
            ProfileKind::Single => FLAG_SINGLE,
            ProfileKind::Collection => FLAG_COLLECTION,
        }
    }

    pub fn from_flags(flags: u16) -> Result<Self, BytecodeError> {
        match flags {
            FLAG_SINGLE => Ok(ProfileKind::Single),
            FLAG_COLLECTION => Ok(ProfileKind::Collection),
            other => Err(BytecodeError::UnknownBytecodeFlag(other)),
        }
    }
}

/// Counts describing every table that follows the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub kind: ProfileKind,
    /// Number of 8-byte operation node entries.
    pub node_count: u8,
    /// Number of 0x800-byte opaque blocks.
    pub block_count: u8,
    /// Operation slots per profile; must match the operation name table.
    pub operation_count: u8,
    /// Pattern variables such as `PROCESS_TEMP_DIR`.
    pub variable_count: u8,
    pub variable_state_count: u8,
    /// Always 0 for single profiles.
    pub profile_count: u16,
    pub regex_count: u16,
    pub entitlement_count: u16,
    pub instruction_count: u16,
}

impl Header {
    pub fn read(reader: &mut Reader<'_>) -> Result<Self, BytecodeError> {
        let flags = reader.u16()?;
        let node_count = reader.u8()?;
        let block_count = reader.u8()?;
        let operation_count = reader.u8()?;
        let variable_count = reader.u8()?;
        let variable_state_count = reader.u8()?;
        let _reserved = reader.u8()?;
        let profile_count = reader.u16()?;
        let regex_count = reader.u16()?;
        let entitlement_count = reader.u16()?;
        let instruction_count = reader.u16()?;

        Ok(Self {
            kind: ProfileKind::from_flags(flags)?,
            node_count,
            block_count,
            operation_count,
            variable_count,
            variable_state_count,
            profile_count,
            regex_count,
            entitlement_count,
            instruction_count,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&self.kind.flags().to_le_bytes());
        out.push(self.node_count);
        out.push(self.block_count);
        out.push(self.operation_count);
        out.push(self.variable_count);
        out.push(self.variable_state_count);
        out.push(0);
        out.extend_from_slice(&self.profile_count.to_le_bytes());
        out.extend_from_slice(&self.regex_count.to_le_bytes());
        out.extend_from_slice(&self.entitlement_count.to_le_bytes());
        out.extend_from_slice(&self.instruction_count.to_le_bytes());
        debug_assert_eq!(out.len() - start, HEADER_LEN);
    }

    /// Number of profile records that follow the offset tables.
    pub fn profile_records(&self) -> usize {
        match self.kind {
            ProfileKind::Single => 1,
            ProfileKind::Collection => usize::from(self.profile_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            kind: ProfileKind::Collection,
            node_count: 12,
            block_count: 0,
            operation_count: 186,
            variable_count: 1,
            variable_state_count: 0,
            profile_count: 3,
            regex_count: 2,
            entitlement_count: 1,
            instruction_count: 0,
        }
    }

    #[test]
    fn write_then_read() {
        let mut out = Vec::new();
        sample().write(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(&out[..2], &[0x00, 0x80]);
        assert_eq!(out[4], 186);

        let header = Header::read(&mut Reader::new(&out)).unwrap();
        assert_eq!(header, sample());
        assert_eq!(header.profile_records(), 3);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let mut out = Vec::new();
        sample().write(&mut out);
        out[0] = 0x01;
        assert_eq!(
            Header::read(&mut Reader::new(&out)).unwrap_err(),
            BytecodeError::UnknownBytecodeFlag(0x8001)
        );
    }

    #[test]
    fn short_header_is_too_small() {
        assert!(matches!(
            Header::read(&mut Reader::new(&[0u8; 9])),
            Err(BytecodeError::TooSmall { .. })
        ));
    }
}
