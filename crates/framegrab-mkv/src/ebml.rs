//! EBML primitive reader.
//!
//! EBML is the binary format underlying Matroska. Element IDs and element
//! sizes are both variable-length integers (VINTs) whose first byte announces
//! the total width through its leading zero bits:
//!
//! - `1xxxxxxx`: 1 byte
//! - `01xxxxxx xxxxxxxx`: 2 bytes
//! - `001xxxxx xxxxxxxx xxxxxxxx`: 3 bytes
//! - ... up to 8 bytes
//!
//! IDs keep their marker bit, sizes do not.
//!
//! The reader works directly on a borrowed buffer (usually a memory map) and
//! never fails: reads that would cross the end of the buffer move the cursor
//! to the end and yield nothing.

use std::ops::Range;

/// Maximum VINT length in bytes.
pub const MAX_VINT_LENGTH: usize = 8;

/// Returned by [`EbmlReader::read_id`] when no valid ID could be decoded.
pub const NO_ID: u64 = 0;

/// Cursor over a bounded byte buffer.
#[derive(Debug, Clone)]
pub struct EbmlReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> EbmlReader<'a> {
    /// Create a reader positioned at `pos`, clamped to the buffer length.
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Read an element ID, marker bits included.
    ///
    /// At the end of the buffer, or on a zero leading byte, the cursor moves
    /// one byte forward (clamped) and [`NO_ID`] is returned. A truncated ID
    /// moves the cursor to the end of the buffer.
    pub fn read_id(&mut self) -> u64 {
        self.read_vint_raw().map_or(NO_ID, |(value, _)| value)
    }

    /// Read an element size with the length marker bit removed.
    pub fn read_size(&mut self) -> u64 {
        match self.read_vint_raw() {
            Some((value, width)) => value & payload_mask(width),
            None => 0,
        }
    }

    /// Read `len` bytes as a big-endian unsigned integer.
    ///
    /// Returns `None` (and skips the bytes) when they are not all inside the
    /// buffer or do not fit in a `u64`.
    pub fn read_uint(&mut self, len: u64) -> Option<u64> {
        let range = self.take(len)?;
        if range.len() > MAX_VINT_LENGTH {
            return None;
        }
        Some(
            self.buf[range]
                .iter()
                .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        )
    }

    /// Borrow `len` bytes as a range into the buffer and advance past them.
    ///
    /// Returns `None` and skips to the end when the range crosses the bound.
    pub fn take(&mut self, len: u64) -> Option<Range<usize>> {
        let start = self.pos;
        match usize::try_from(len).ok().and_then(|l| start.checked_add(l)) {
            Some(end) if end <= self.buf.len() => {
                self.pos = end;
                Some(start..end)
            }
            _ => {
                self.pos = self.buf.len();
                None
            }
        }
    }

    /// Advance the cursor by `len` bytes, stopping at the end of the buffer.
    pub fn skip(&mut self, len: u64) {
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        self.pos = self.pos.saturating_add(len).min(self.buf.len());
    }

    fn read_vint_raw(&mut self) -> Option<(u64, usize)> {
        let first = match self.buf.get(self.pos) {
            Some(&b) if b != 0 => b,
            _ => {
                self.pos = (self.pos + 1).min(self.buf.len());
                return None;
            }
        };

        let width = first.leading_zeros() as usize + 1;
        let Some(bytes) = self.buf.get(self.pos..self.pos + width) else {
            self.pos = self.buf.len();
            return None;
        };
        self.pos += width;

        let value = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        Some((value, width))
    }
}

/// Mask selecting the payload bits of a `width`-byte VINT.
fn payload_mask(width: usize) -> u64 {
    let bits = 7 * width as u32;
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Encode an element ID. IDs already carry their marker bit, so this is
/// their big-endian representation without leading zero bytes.
pub fn encode_id(id: u64) -> Vec<u8> {
    let width = (8 - id.leading_zeros() as usize / 8).max(1);
    id.to_be_bytes()[8 - width..].to_vec()
}

/// Encode an element size in the narrowest VINT that can hold it.
///
/// The all-ones payload of each width is reserved for "unknown size", so a
/// value equal to it is pushed to the next width. Sizes at or above
/// `2^56 - 1` are not representable and yield `None`.
pub fn encode_size(size: u64) -> Option<Vec<u8>> {
    let width = (1..=MAX_VINT_LENGTH).find(|&w| size < payload_mask(w))?;
    let marked = size | (1u64 << (7 * width));
    Some(marked.to_be_bytes()[8 - width..].to_vec())
}
