//! Sandbox bytecode: reading, writing and dissecting compiled profiles.
//!
//! A compiled profile is laid out as:
//!
//! ```text
//! header (0x10)
//! offset tables: regex, variable, variable state, entitlement, instruction
//! profile records
//! padding to 8 bytes
//! operation node entries (8 bytes each)
//! opaque blocks (0x800 bytes each)
//! data area
//! ```
//!
//! Every table offset points into the data area in units of 8 bytes. Strings
//! and sized data in the data area carry a `u16` length prefix.
//!
//! [`BytecodeWrapper`] parses the raw layout; [`Bytecode`] resolves it into
//! [`BytecodeItem`]s for display. [`BytecodeBuilder`] writes it.

pub mod emit;
pub mod header;
pub mod item;
pub mod operation;
pub mod profile;
pub mod reader;
pub mod wrapper;

pub use emit::BytecodeBuilder;
pub use header::{Header, ProfileKind};
pub use item::{Bytecode, BytecodeItem, NamedOperation};
pub use operation::{NodeEntry, OPCODE_FILTER, OPCODE_TERMINAL};
pub use profile::ProfileRecord;
pub use wrapper::BytecodeWrapper;

/// Length of the fixed header.
pub const HEADER_LEN: usize = 0x10;
/// Length of one operation node entry.
pub const NODE_LEN: usize = 0x8;
/// Length of one opaque block.
pub const BLOCK_LEN: usize = 0x800;
/// Table offsets are multiplied by this to get a byte position in the data area.
pub const OFFSET_UNIT: usize = 0x8;

/// Errors encountered while dissecting or emitting bytecode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BytecodeError {
    #[error("file is too small to be parsed: needed {needed} bytes at 0x{at:x}, have {len}")]
    TooSmall { needed: usize, at: usize, len: usize },

    #[error("offset 0x{offset:x} exceeds the {len} bytes of usable data")]
    OffsetTooLarge { offset: usize, len: usize },

    #[error("invalid string at data offset 0x{offset:x}")]
    InvalidString { offset: usize },

    #[error("header declares {declared} operations but the table has {table}")]
    InvalidOperationCount { declared: usize, table: usize },

    #[error("unknown bytecode flag 0x{0:04x}")]
    UnknownBytecodeFlag(u16),

    #[error("bytecode has no profile")]
    MissingProfile,

    #[error("{table} overflow: {count} entries, at most {max} fit")]
    TableOverflow {
        table: &'static str,
        count: usize,
        max: usize,
    },
}

/// Narrow a count or offset to the field width used by the format.
pub(crate) fn narrow<T: TryFrom<usize>>(
    table: &'static str,
    value: usize,
    max: usize,
) -> Result<T, BytecodeError> {
    T::try_from(value).map_err(|_| BytecodeError::TableOverflow {
        table,
        count: value,
        max,
    })
}
