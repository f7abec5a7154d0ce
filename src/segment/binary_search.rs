//! Binary-search-index block: a packed array of sorted-index offsets.
//!
//! Each value is a fixed-width little-endian byte offset into the
//! sorted-index body, wide enough for the largest offset in the block.
//! The search itself is driven through a `BinarySearchContext`, whose
//! `seek` reads the entry a given array index points at; comparisons
//! happen against materialized entries so covering ranges match directly.
//!
//! A miss returns the tightest `(lower, higher)` neighbours seen, which
//! the caller uses to bound the sequential scan that follows.

use std::cmp::Ordering;

use crate::encoding;
use crate::kv::{KeyComparator, SegmentEntry};
use crate::slice::Reader;

use super::SegmentError;
use super::block::{self, CompressionCodec};

/// Specific-header budget: count varuint, width byte, full-index flag.
const MAX_HEADER_SIZE: usize = encoding::MAX_VARINT_LEN + 2;

// ------------------------------------------------------------------------------------------------
// Config
// ------------------------------------------------------------------------------------------------

/// Binary-search-index build options.
#[derive(Debug, Clone)]
pub struct BinarySearchConfig {
    /// Build the block at all.
    pub enabled: bool,
    /// Index every entry, even those already resolvable through the hash
    /// index.
    pub full_index: bool,
    /// Block body compression.
    pub compression: CompressionCodec,
}

impl Default for BinarySearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            full_index: false,
            compression: CompressionCodec::None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Collects ascending sorted-index offsets and packs them fixed-width.
#[derive(Debug, Default)]
pub(crate) struct BinarySearchBuilder {
    offsets: Vec<u64>,
}

impl BinarySearchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next entry offset (ascending).
    pub fn add(&mut self, offset: u64) {
        self.offsets.push(offset);
    }

    /// Number of recorded offsets.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Frame the block; `None` when nothing was recorded.
    pub fn close(
        self,
        is_full_index: bool,
        codec: CompressionCodec,
    ) -> Result<Option<Vec<u8>>, SegmentError> {
        if self.offsets.is_empty() {
            return Ok(None);
        }
        let largest = *self.offsets.last().unwrap_or(&0);
        let bytes_per_value = bytes_needed(largest);

        let mut body = Vec::with_capacity(self.offsets.len() * bytes_per_value);
        for offset in &self.offsets {
            body.extend_from_slice(&offset.to_le_bytes()[..bytes_per_value]);
        }

        let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
        encoding::write_unsigned(self.offsets.len() as u64, &mut header);
        header.push(bytes_per_value as u8);
        header.push(u8::from(is_full_index));

        block::close_block(&header, &body, codec, MAX_HEADER_SIZE).map(Some)
    }
}

fn bytes_needed(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Read-side view over a binary-search-index body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BinarySearchReader<'a> {
    count: usize,
    bytes_per_value: usize,
    is_full_index: bool,
    body: &'a [u8],
}

impl<'a> BinarySearchReader<'a> {
    pub fn new(header: &[u8], body: &'a [u8]) -> Result<Self, SegmentError> {
        let mut reader = Reader::new(header);
        let count = usize::try_from(reader.read_unsigned()?)
            .map_err(|_| SegmentError::Corruption("offset count exceeds usize".to_string()))?;
        let bytes_per_value = reader.read_u8()? as usize;
        if !(1..=8).contains(&bytes_per_value) {
            return Err(SegmentError::Corruption(format!(
                "invalid binary-search value width {bytes_per_value}"
            )));
        }
        let is_full_index = match reader.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(SegmentError::Corruption(format!(
                    "invalid full-index byte 0x{other:02X}"
                )));
            }
        };
        if body.len() != count * bytes_per_value {
            return Err(SegmentError::Corruption(format!(
                "binary-search body of {} bytes, expected {}",
                body.len(),
                count * bytes_per_value
            )));
        }
        Ok(Self {
            count,
            bytes_per_value,
            is_full_index,
            body,
        })
    }

    /// Number of indexed offsets.
    pub fn values_count(&self) -> usize {
        self.count
    }

    /// Whether every sorted-index entry is indexed.
    pub fn is_full_index(&self) -> bool {
        self.is_full_index
    }

    /// The sorted-index offset at array position `index`.
    pub fn offset_at(&self, index: usize) -> Result<u64, SegmentError> {
        if index >= self.count {
            return Err(SegmentError::Corruption(format!(
                "binary-search index {index} out of {}",
                self.count
            )));
        }
        let start = index * self.bytes_per_value;
        let mut bytes = [0u8; 8];
        bytes[..self.bytes_per_value]
            .copy_from_slice(&self.body[start..start + self.bytes_per_value]);
        Ok(u64::from_le_bytes(bytes))
    }
}

// ------------------------------------------------------------------------------------------------
// Context-driven search
// ------------------------------------------------------------------------------------------------

/// The seam between the search loop and the sorted index it probes.
pub(crate) trait BinarySearchContext {
    /// The key being searched for.
    fn target_key(&self) -> &[u8];

    /// Number of addressable values.
    fn values_count(&self) -> usize;

    /// Whether every sorted-index entry is addressable.
    fn is_full_index(&self) -> bool;

    /// Materialize the entry addressed by array position `index`,
    /// returning it and its sorted-index offset.
    fn seek(&self, index: usize) -> Result<(u64, SegmentEntry), SegmentError>;
}

/// Outcome of a context-driven binary search.
#[derive(Debug)]
pub(crate) enum BinarySearchOutcome {
    /// An entry covering the target was found, at this sorted-index
    /// offset.
    Matched(u64, SegmentEntry),
    /// No covering entry among the indexed values; the neighbours bound
    /// the follow-up scan.
    NotMatched {
        /// Greatest indexed entry at or below the target, with its
        /// sorted-index offset.
        lower: Option<(u64, SegmentEntry)>,
        /// Least indexed entry above the target.
        higher: Option<SegmentEntry>,
    },
}

/// Classic binary search over the context, optionally bounded by prior
/// knowledge (`start`/`end` array positions from hash-index collisions).
pub(crate) fn binary_search(
    context: &impl BinarySearchContext,
    comparator: &dyn KeyComparator,
    bounds: Option<(usize, usize)>,
) -> Result<BinarySearchOutcome, SegmentError> {
    let count = context.values_count();
    if count == 0 {
        return Ok(BinarySearchOutcome::NotMatched {
            lower: None,
            higher: None,
        });
    }
    let (mut low, mut high) = match bounds {
        Some((start, end)) if start <= end && end < count => (start as isize, end as isize),
        _ => (0, count as isize - 1),
    };

    let mut lower: Option<(u64, SegmentEntry)> = None;
    let mut higher: Option<SegmentEntry> = None;
    let target = context.target_key();

    while low <= high {
        let mid = (low + high) / 2;
        let (offset, entry) = context.seek(mid as usize)?;
        if entry.covers(target, comparator) {
            return Ok(BinarySearchOutcome::Matched(offset, entry));
        }
        match comparator.cmp_keys(entry.key(), target) {
            Ordering::Greater => {
                higher = Some(entry);
                high = mid - 1;
            }
            _ => {
                lower = Some((offset, entry));
                low = mid + 1;
            }
        }
    }

    Ok(BinarySearchOutcome::NotMatched { lower, higher })
}

/// The sorted-index offset of the greatest indexed entry whose key is
/// **strictly below** the target; the starting point for a lower-seek.
pub(crate) fn binary_search_strict_floor(
    context: &impl BinarySearchContext,
    comparator: &dyn KeyComparator,
) -> Result<Option<u64>, SegmentError> {
    let count = context.values_count();
    if count == 0 {
        return Ok(None);
    }
    let mut low = 0isize;
    let mut high = count as isize - 1;
    let mut floor: Option<u64> = None;
    let target = context.target_key();

    while low <= high {
        let mid = (low + high) / 2;
        let (offset, entry) = context.seek(mid as usize)?;
        if comparator.cmp_keys(entry.key(), target) == Ordering::Less {
            floor = Some(offset);
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }
    Ok(floor)
}
