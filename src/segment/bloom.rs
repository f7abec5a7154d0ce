//! Bloom-filter block: membership negative-filter for point lookups.
//!
//! Sized by the standard optimum for `n` keys at false-positive rate `p`:
//! `bits = ceil(-n * ln(p) / ln(2)²)` and
//! `probes = ceil(bits / n * ln(2))`.  Bit positions reuse the segment
//! key hash split into the `(h1, h2)` double-hashing pair, probing
//! `((h1 + i*h2) & 0x7fff_ffff) % bits`.
//!
//! The writer skips the filter entirely when the segment carries a
//! removing range: a positive-only filter cannot represent "every key in
//! this interval is affected".

use crate::encoding;
use crate::slice::Reader;

use super::SegmentError;
use super::block::{self, CompressionCodec};
use super::hash_index::{key_hash, probe_parts, probe_slot};

/// Specific-header budget: two varuints.
const MAX_HEADER_SIZE: usize = 2 * encoding::MAX_VARINT_LEN;

// ------------------------------------------------------------------------------------------------
// Config
// ------------------------------------------------------------------------------------------------

/// Bloom-filter build options.
#[derive(Debug, Clone)]
pub struct BloomConfig {
    /// Build the block at all.
    pub enabled: bool,
    /// Target false-positive rate.
    pub false_positive_rate: f64,
    /// Block body compression. Bitsets rarely compress well; left raw by
    /// default.
    pub compression: CompressionCodec,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            false_positive_rate: 0.01,
            compression: CompressionCodec::None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Accumulates keys into the bitset.
#[derive(Debug)]
pub(crate) struct BloomBuilder {
    bits: Vec<u8>,
    number_of_bits: u64,
    max_probe: u32,
}

impl BloomBuilder {
    /// Size the filter for `item_count` keys at the configured rate.
    pub fn new(item_count: usize, false_positive_rate: f64) -> Self {
        let n = item_count.max(1) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let number_of_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let max_probe = ((number_of_bits as f64 / n) * ln2).ceil().max(1.0) as u32;
        Self {
            bits: vec![0u8; number_of_bits.div_ceil(8) as usize],
            number_of_bits,
            max_probe,
        }
    }

    /// Insert `key`.
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = probe_parts(key_hash(key));
        for probe in 0..self.max_probe {
            let bit = probe_slot(h1, h2, probe, self.number_of_bits as usize);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Frame the block.
    pub fn close(self, codec: CompressionCodec) -> Result<Vec<u8>, SegmentError> {
        let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
        encoding::write_unsigned(self.number_of_bits, &mut header);
        encoding::write_unsigned(u64::from(self.max_probe), &mut header);
        block::close_block(&header, &self.bits, codec, MAX_HEADER_SIZE)
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Read-side view over a bloom-filter body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BloomReader<'a> {
    number_of_bits: u64,
    max_probe: u32,
    body: &'a [u8],
}

impl<'a> BloomReader<'a> {
    pub fn new(header: &[u8], body: &'a [u8]) -> Result<Self, SegmentError> {
        let mut reader = Reader::new(header);
        let number_of_bits = reader.read_unsigned()?;
        let max_probe = u32::try_from(reader.read_unsigned()?)
            .map_err(|_| SegmentError::Corruption("bloom probe count exceeds u32".to_string()))?;
        if body.len() as u64 != number_of_bits.div_ceil(8) {
            return Err(SegmentError::Corruption(format!(
                "bloom body of {} bytes for {number_of_bits} bits",
                body.len()
            )));
        }
        if number_of_bits == 0 {
            return Err(SegmentError::Corruption("empty bloom filter".to_string()));
        }
        Ok(Self {
            number_of_bits,
            max_probe,
            body,
        })
    }

    /// `false` only when the key is definitely absent.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = probe_parts(key_hash(key));
        for probe in 0..self.max_probe {
            let bit = probe_slot(h1, h2, probe, self.number_of_bits as usize);
            if self.body[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }
}
