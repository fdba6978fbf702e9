//! Profile records: one entry node per operation slot.

use serde::Serialize;

use super::BytecodeError;
use super::header::ProfileKind;
use super::reader::{Reader, le_u16};

/// Bytes preceding the operation slots in a collection record.
pub const COLLECTION_PREFIX_LEN: usize = 6;

/// A raw profile record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileRecord {
    /// Position of this profile among the records.
    pub index: usize,
    /// Data-area offset of the name; `None` for single profiles.
    pub name_offset: Option<u16>,
    pub syscall_mask: u16,
    /// Byte position of the record in the bytecode.
    pub offset: usize,
    /// Entry node index for each operation slot.
    pub operations: Vec<u16>,
}

impl ProfileRecord {
    /// Size of one record for the given kind and operation count.
    pub fn record_len(kind: ProfileKind, operation_count: usize) -> usize {
        let prefix = match kind {
            ProfileKind::Single => 0,
            ProfileKind::Collection => COLLECTION_PREFIX_LEN,
        };
        prefix + operation_count * 2
    }

    pub fn read(
        reader: &mut Reader<'_>,
        kind: ProfileKind,
        operation_count: usize,
        index: usize,
    ) -> Result<Self, BytecodeError> {
        let offset = reader.position();
        let bytes = reader.bytes(Self::record_len(kind, operation_count))?;

        let (name_offset, syscall_mask, slots) = match kind {
            ProfileKind::Single => (None, 0, bytes),
            ProfileKind::Collection => (
                Some(le_u16(bytes, 0)),
                le_u16(bytes, 2),
                &bytes[COLLECTION_PREFIX_LEN..],
            ),
        };
        let operations = slots.chunks_exact(2).map(|c| le_u16(c, 0)).collect();

        Ok(Self {
            index,
            name_offset,
            syscall_mask,
            offset,
            operations,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        if let Some(name) = self.name_offset {
            out.extend_from_slice(&name.to_le_bytes());
            out.extend_from_slice(&self.syscall_mask.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
        }
        for op in &self.operations {
            out.extend_from_slice(&op.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record_has_no_prefix() {
        let record = ProfileRecord {
            index: 0,
            name_offset: None,
            syscall_mask: 0,
            offset: 0,
            operations: vec![3, 1, 1],
        };
        let mut out = Vec::new();
        record.write(&mut out);
        assert_eq!(out.len(), ProfileRecord::record_len(ProfileKind::Single, 3));

        let read = ProfileRecord::read(&mut Reader::new(&out), ProfileKind::Single, 3, 0).unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn collection_record_carries_name_and_mask() {
        let record = ProfileRecord {
            index: 1,
            name_offset: Some(7),
            syscall_mask: 0x2a,
            offset: 0,
            operations: vec![0, 2],
        };
        let mut out = Vec::new();
        record.write(&mut out);
        assert_eq!(out.len(), 10);

        let read =
            ProfileRecord::read(&mut Reader::new(&out), ProfileKind::Collection, 2, 1).unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn truncated_record() {
        assert!(matches!(
            ProfileRecord::read(&mut Reader::new(&[0, 0, 0]), ProfileKind::Single, 2, 0),
            Err(BytecodeError::TooSmall { .. })
        ));
    }
}
