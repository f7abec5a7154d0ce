//! Hash-index block: open-addressed probe table over the sorted index.
//!
//! Maps `hash(key)` to either a sorted-index offset (**offset mode**) or a
//! full inlined entry with a CRC self-check (**copied mode**).
//!
//! # Probing
//!
//! The 64-bit key hash splits into `h1` (high half) and `h2`
//! (sign-extended low half); probe `i` targets
//! `((h1 + i*h2) & 0x7fff_ffff) % (allocated - largest_record)`, so a
//! record starting at any probed slot never crosses the table end.
//! Writing stops at the first empty slot (a run of zero bytes at least as
//! long as the record); reading probes up to the configured maximum,
//! treating undecodable slots as misses.
//!
//! # Slot records
//!
//! - Offset mode: `[0x00 marker][non-zero varuint of offset + 1]`.
//! - Copied mode: `[crc32 varuint][access_index varuint][standalone entry
//!   bytes][0x01 trailer]`. The trailer is written unconditionally so the
//!   record never ends in a zero byte and a legitimate trailing `0x01` in
//!   entry bytes is never ambiguous.  On read the CRC must match the
//!   entry bytes and be at least the persisted table minimum.
//!
//! # Quality accounting
//!
//! Every write that lands within the probe budget counts as a `hit`;
//! overflowing writes count as `miss` and fall back to the binary-search
//! index.  Closing refuses to persist a table with fewer hits than the
//! configured minimum, since a mostly-missing table costs probes without
//! saving seeks.

use xxhash_rust::xxh64::xxh64;

use crate::encoding;
use crate::slice::Reader;

use super::SegmentError;
use super::block::{self, CompressionCodec};

/// Specific-header budget: fixed `allocated` word, flag byte, and five
/// varuints.
const MAX_HEADER_SIZE: usize = 4 + 1 + 5 * encoding::MAX_VARINT_LEN;

/// Offset-mode slot marker.
const OFFSET_MARKER: u8 = 0x00;

/// Copied-mode record trailer.
const COPIED_TRAILER: u8 = 0x01;

// ------------------------------------------------------------------------------------------------
// Hashing
// ------------------------------------------------------------------------------------------------

/// The 64-bit key hash shared by the hash index and the bloom filter.
pub(crate) fn key_hash(key: &[u8]) -> u64 {
    xxh64(key, 0)
}

/// Split a key hash into the double-hashing pair `(h1, h2)`.
pub(crate) fn probe_parts(hash: u64) -> (i64, i64) {
    let h1 = (hash >> 32) as i64;
    let h2 = i64::from(hash as u32 as i32);
    (h1, h2)
}

/// Slot index targeted by probe `i` within `bucket_space` bytes.
pub(crate) fn probe_slot(h1: i64, h2: i64, probe: u32, bucket_space: usize) -> usize {
    let mixed = (h1 + i64::from(probe) * h2) & 0x7fff_ffff;
    (mixed as usize) % bucket_space
}

// ------------------------------------------------------------------------------------------------
// Config
// ------------------------------------------------------------------------------------------------

/// Hash-index build options.
#[derive(Debug, Clone)]
pub struct HashIndexConfig {
    /// Build the block at all.
    pub enabled: bool,
    /// Maximum probes per key for both writes and reads.
    pub max_probe: u32,
    /// Table bytes allocated per byte of required space.
    pub allocate_space_factor: u32,
    /// Inline full entries instead of sorted-index offsets.
    pub copy_index: bool,
    /// Minimum hits below which the block is not persisted.
    pub minimum_number_of_hits: usize,
    /// Block body compression.
    pub compression: CompressionCodec,
}

impl Default for HashIndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_probe: 8,
            allocate_space_factor: 3,
            copy_index: false,
            minimum_number_of_hits: 2,
            compression: CompressionCodec::None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Writes slot records into a pre-allocated probe table.
pub(crate) struct HashIndexBuilder {
    config: HashIndexConfig,
    table: Vec<u8>,
    largest_record: usize,
    hit: u64,
    miss: u64,
    minimum_crc: u64,
    used_crc: bool,
}

impl HashIndexBuilder {
    /// Size a builder for `item_count` entries whose largest slot record
    /// is `largest_record` bytes.
    pub fn new(config: HashIndexConfig, item_count: usize, largest_record: usize) -> Self {
        let required = item_count * largest_record;
        let allocated = if config.enabled && required > 0 {
            required * config.allocate_space_factor as usize
        } else {
            0
        };
        Self {
            config,
            table: vec![0u8; allocated],
            largest_record,
            hit: 0,
            miss: 0,
            minimum_crc: 0,
            used_crc: false,
        }
    }

    fn bucket_space(&self) -> usize {
        self.table.len().saturating_sub(self.largest_record)
    }

    /// Probe for an all-zero span and write `record` there.
    ///
    /// The span check covers one guard byte past the record so a write
    /// never lands flush against an existing record's zero marker.
    fn write_record(&mut self, key: &[u8], record: &[u8]) -> bool {
        let bucket_space = self.bucket_space();
        if bucket_space == 0 {
            self.miss += 1;
            return false;
        }
        let (h1, h2) = probe_parts(key_hash(key));
        for probe in 0..self.config.max_probe {
            let slot = probe_slot(h1, h2, probe, bucket_space);
            let guard_end = (slot + record.len() + 1).min(self.table.len());
            let span = &self.table[slot..guard_end];
            if span.iter().all(|&b| b == 0) {
                self.table[slot..slot + record.len()].copy_from_slice(record);
                self.hit += 1;
                return true;
            }
        }
        self.miss += 1;
        false
    }

    /// Offset-mode write; returns whether the key landed in the table.
    pub fn write_offset(&mut self, key: &[u8], sorted_index_offset: u64) -> bool {
        let mut record = Vec::with_capacity(1 + encoding::MAX_VARINT_LEN);
        record.push(OFFSET_MARKER);
        encoding::write_unsigned_non_zero(sorted_index_offset, &mut record);
        self.write_record(key, &record)
    }

    /// Copied-mode write of a standalone entry encoding.
    pub fn write_copied(&mut self, key: &[u8], access_index: u64, entry_bytes: &[u8]) -> bool {
        let crc = u64::from(crc32fast::hash(entry_bytes));
        let mut record =
            Vec::with_capacity(2 * encoding::MAX_VARINT_LEN + entry_bytes.len() + 1);
        encoding::write_unsigned(crc, &mut record);
        // Non-zero varint keeps the record free of zero bytes outside the
        // entry itself.
        encoding::write_unsigned_non_zero(access_index, &mut record);
        record.extend_from_slice(entry_bytes);
        record.push(COPIED_TRAILER);
        let written = self.write_record(key, &record);
        if written {
            self.minimum_crc = if self.used_crc {
                self.minimum_crc.min(crc)
            } else {
                crc
            };
            self.used_crc = true;
        }
        written
    }

    /// Largest possible slot record for the given standalone entry size.
    pub fn record_size(copy_index: bool, largest_entry: usize) -> usize {
        if copy_index {
            // crc + access index varuints, entry bytes, trailer.
            2 * encoding::MAX_VARINT_LEN + largest_entry + 1
        } else {
            1 + encoding::MAX_VARINT_LEN
        }
    }

    /// Frame the block, or `None` when disabled, empty, or below the
    /// minimum hit threshold.
    pub fn close(self) -> Result<Option<Vec<u8>>, SegmentError> {
        if self.table.is_empty() || (self.hit as usize) < self.config.minimum_number_of_hits {
            if self.hit > 0 || self.miss > 0 {
                tracing::debug!(
                    hit = self.hit,
                    miss = self.miss,
                    minimum = self.config.minimum_number_of_hits,
                    "hash index not persisted"
                );
            }
            return Ok(None);
        }
        let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
        header.extend_from_slice(&(self.table.len() as u32).to_le_bytes());
        encoding::write_unsigned(u64::from(self.config.max_probe), &mut header);
        header.push(u8::from(self.config.copy_index));
        encoding::write_unsigned(self.hit, &mut header);
        encoding::write_unsigned(self.miss, &mut header);
        encoding::write_unsigned(if self.used_crc { self.minimum_crc } else { 0 }, &mut header);
        encoding::write_unsigned(self.largest_record as u64, &mut header);

        block::close_block(&header, &self.table, self.config.compression, MAX_HEADER_SIZE)
            .map(Some)
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Decoded hash-index specific header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HashIndexHeader {
    pub allocated_bytes: usize,
    pub max_probe: u32,
    pub copy_index: bool,
    pub hit: u64,
    pub miss: u64,
    pub minimum_crc: u64,
    pub writeable_largest_value_size: usize,
}

impl HashIndexHeader {
    pub fn parse(header: &[u8]) -> Result<Self, SegmentError> {
        let mut reader = Reader::new(header);
        let allocated_bytes = reader.read_u32_le()? as usize;
        let max_probe = u32::try_from(reader.read_unsigned()?)
            .map_err(|_| SegmentError::Corruption("max probe exceeds u32".to_string()))?;
        let copy_index = match reader.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(SegmentError::Corruption(format!(
                    "invalid copy-index byte 0x{other:02X}"
                )));
            }
        };
        let hit = reader.read_unsigned()?;
        let miss = reader.read_unsigned()?;
        let minimum_crc = reader.read_unsigned()?;
        let writeable_largest_value_size = usize::try_from(reader.read_unsigned()?)
            .map_err(|_| SegmentError::Corruption("largest value size exceeds usize".to_string()))?;
        Ok(Self {
            allocated_bytes,
            max_probe,
            copy_index,
            hit,
            miss,
            minimum_crc,
            writeable_largest_value_size,
        })
    }
}

/// A candidate parsed from one probed slot.
#[derive(Debug)]
pub(crate) enum SlotCandidate<'a> {
    /// Offset-mode record: a sorted-index entry offset.
    Offset(u64),
    /// Copied-mode record: the inlined standalone entry bytes, CRC
    /// already validated. The entry carries its own access index.
    Copied {
        entry_bytes: &'a [u8],
    },
}

/// Read-side view over a hash-index body.
pub(crate) struct HashIndexReader<'a> {
    header: HashIndexHeader,
    body: &'a [u8],
}

impl<'a> HashIndexReader<'a> {
    pub fn new(header: HashIndexHeader, body: &'a [u8]) -> Result<Self, SegmentError> {
        if body.len() != header.allocated_bytes {
            return Err(SegmentError::Corruption(format!(
                "hash index body of {} bytes, header declares {}",
                body.len(),
                header.allocated_bytes
            )));
        }
        tracing::trace!(
            hit = header.hit,
            miss = header.miss,
            copy_index = header.copy_index,
            "hash index opened"
        );
        Ok(Self { header, body })
    }

    /// Probe for `key`, handing each decodable candidate to `visit` until
    /// it returns `Some` or the probe budget is exhausted.
    ///
    /// Slots that fail to decode — mid-record landings, truncated
    /// varints, CRC mismatches — are probe misses and the walk continues.
    pub fn probe<T>(
        &self,
        key: &[u8],
        mut visit: impl FnMut(SlotCandidate<'_>) -> Result<Option<T>, SegmentError>,
    ) -> Result<Option<T>, SegmentError> {
        let bucket_space = self
            .body
            .len()
            .saturating_sub(self.header.writeable_largest_value_size);
        if bucket_space == 0 {
            return Ok(None);
        }
        let (h1, h2) = probe_parts(key_hash(key));
        for probe in 0..self.header.max_probe {
            let slot = probe_slot(h1, h2, probe, bucket_space);
            let Some(candidate) = self.parse_slot(slot) else {
                continue;
            };
            if let Some(found) = visit(candidate)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn parse_slot(&self, slot: usize) -> Option<SlotCandidate<'a>> {
        let bytes = &self.body[slot..];
        if self.header.copy_index {
            let mut reader = Reader::new(bytes);
            let crc = reader.read_unsigned().ok()?;
            if crc == 0 || crc < self.header.minimum_crc {
                return None;
            }
            // The access index is re-read from the entry itself; skip it.
            reader.read_unsigned_non_zero().ok()?;
            let entry_start = reader.position();
            // The entry's own size prefix delimits it.
            let mut entry_reader = Reader::with_position(bytes, entry_start);
            let entry_size = entry_reader.read_signed().ok()?;
            let entry_size = usize::try_from(entry_size).ok()?;
            let entry_len = entry_reader.position() - entry_start + entry_size;
            let entry_bytes = bytes.get(entry_start..entry_start + entry_len)?;
            if u64::from(crc32fast::hash(entry_bytes)) != crc {
                return None;
            }
            Some(SlotCandidate::Copied { entry_bytes })
        } else {
            let mut reader = Reader::new(bytes);
            if reader.read_u8().ok()? != OFFSET_MARKER {
                return None;
            }
            let offset = reader.read_unsigned_non_zero().ok()?;
            Some(SlotCandidate::Offset(offset))
        }
    }
}
