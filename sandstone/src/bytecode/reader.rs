//! Bounds-checked little-endian cursor over bytecode.

use super::{BytecodeError, OFFSET_UNIT};

/// A forward-only reader over the header region of a bytecode buffer.
///
/// Every read is bounds-checked and reports [`BytecodeError::TooSmall`]
/// instead of panicking on truncated input.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte position from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Read `len` bytes and advance.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], BytecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(BytecodeError::TooSmall {
                needed: len,
                at: self.pos,
                len: self.data.len(),
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, BytecodeError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, BytecodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read `count` consecutive `u16` table offsets.
    pub fn offset_table(&mut self, count: usize) -> Result<Vec<u16>, BytecodeError> {
        (0..count).map(|_| self.u16()).collect()
    }

    /// Read `count` fixed-size records, returning each with its position.
    pub fn records(
        &mut self,
        count: usize,
        len: usize,
    ) -> Result<Vec<(usize, &'a [u8])>, BytecodeError> {
        (0..count)
            .map(|_| {
                let at = self.pos;
                self.bytes(len).map(|b| (at, b))
            })
            .collect()
    }

    /// Skip forward to the next multiple of `align`.
    pub fn align(&mut self, align: usize) -> Result<(), BytecodeError> {
        let rem = self.pos % align;
        if rem != 0 {
            self.bytes(align - rem)?;
        }
        Ok(())
    }

    /// Everything from the current position to the end.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

/// Read a `u16` from `bytes` at `at`; the caller guarantees the bounds.
pub(crate) fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// Resolves table offsets against the data area at the end of the bytecode.
#[derive(Debug, Clone, Copy)]
pub struct DataArea<'a> {
    data: &'a [u8],
}

impl<'a> DataArea<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Byte position inside the data area for a table offset.
    pub fn position(offset: u16) -> usize {
        usize::from(offset) * OFFSET_UNIT
    }

    /// Read the length-prefixed blob at a table offset.
    pub fn sized(&self, offset: u16) -> Result<&'a [u8], BytecodeError> {
        let at = Self::position(offset);
        let too_large = || BytecodeError::OffsetTooLarge {
            offset: at,
            len: self.data.len(),
        };
        if at + 2 > self.data.len() {
            return Err(too_large());
        }
        let len = usize::from(le_u16(self.data, at));
        self.data.get(at + 2..at + 2 + len).ok_or_else(too_large)
    }

    /// Read the UTF-8 string at a table offset.
    pub fn string(&self, offset: u16) -> Result<&'a str, BytecodeError> {
        let bytes = self.sized(offset)?;
        std::str::from_utf8(bytes).map_err(|_| BytecodeError::InvalidString {
            offset: Self::position(offset),
        })
    }
}
