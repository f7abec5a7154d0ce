//! Values block: appended raw value payloads with deduplication.
//!
//! The body is a plain concatenation of per-entry payload bytes; sorted
//! index entries address into it with `(offset, length)` pairs.  When an
//! incoming payload equals the immediately preceding one, the builder
//! reuses the previous slot instead of appending, and the entry records
//! the reuse so the offset fields can be elided.

use super::SegmentError;
use super::block::{self, CompressionCodec};

/// Maximum specific-header size of a values block (it has none).
const MAX_HEADER_SIZE: usize = 0;

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// A slot assigned to one entry's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValuesSlot {
    /// Byte offset of the payload within the values body.
    pub offset: u64,
    /// Payload length in bytes.
    pub length: u64,
    /// Whether the slot was deduplicated against the previous payload.
    pub reused: bool,
}

/// Accumulates value payloads for one segment.
#[derive(Debug, Default)]
pub(crate) struct ValuesBuilder {
    bytes: Vec<u8>,
    previous: Option<(usize, usize)>,
}

impl ValuesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `payload`, deduplicating against the immediately preceding
    /// payload.
    pub fn add(&mut self, payload: &[u8]) -> ValuesSlot {
        if let Some((offset, length)) = self.previous
            && &self.bytes[offset..offset + length] == payload
        {
            return ValuesSlot {
                offset: offset as u64,
                length: length as u64,
                reused: true,
            };
        }
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(payload);
        self.previous = Some((offset, payload.len()));
        ValuesSlot {
            offset: offset as u64,
            length: payload.len() as u64,
            reused: false,
        }
    }

    /// Current body size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Frame the block; `None` when no entry carried a payload.
    pub fn close(self, codec: CompressionCodec) -> Result<Option<Vec<u8>>, SegmentError> {
        if self.bytes.is_empty() {
            return Ok(None);
        }
        block::close_block(&[], &self.bytes, codec, MAX_HEADER_SIZE).map(Some)
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Read-side view over a values body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValuesReader<'a> {
    body: &'a [u8],
}

impl<'a> ValuesReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { body }
    }

    /// A reader over an absent values block; any slot read fails.
    pub fn empty() -> Self {
        Self { body: &[] }
    }

    /// The payload bytes at `(offset, length)`.
    pub fn read(&self, offset: u64, length: u64) -> Result<&'a [u8], SegmentError> {
        let start = usize::try_from(offset)
            .map_err(|_| SegmentError::Corruption("value offset exceeds usize".to_string()))?;
        let len = usize::try_from(length)
            .map_err(|_| SegmentError::Corruption("value length exceeds usize".to_string()))?;
        let end = start.checked_add(len).ok_or_else(|| {
            SegmentError::Corruption("value slot overflows usize".to_string())
        })?;
        if end > self.body.len() {
            return Err(SegmentError::Corruption(format!(
                "value slot {start}..{end} outside values body of {} bytes",
                self.body.len()
            )));
        }
        Ok(&self.body[start..end])
    }
}
