//! Immutable on-disk segments.
//!
//! A segment is the unit of persistent storage: a sorted set of fixed and
//! range key-values plus auxiliary index blocks, written once and never
//! mutated.
//!
//! # On-disk layout
//!
//! ```text
//! [0x01 format byte]
//! [values block             ]  (optional)
//! [sorted-index block       ]  (required)
//! [hash-index block         ]  (optional)
//! [binary-search-index block]  (optional)
//! [bloom-filter block       ]  (optional)
//! [footer block             ]  (required)
//! [reversed varuint: footer offset][0x01 magic]
//! ```
//!
//! Multi-segment containers start with `0x02` instead; see [`many`].
//!
//! # Read pipeline
//!
//! A point lookup consults, in order: the bloom filter (point-only
//! segments), the hash index, the binary-search index (bounded by hash
//! collision hints), and finally a sequential sorted-index scan driven by
//! the matcher state machine.  `higher`/`lower` skip the point-only
//! stages and seek from a binary-search bound.
//!
//! # Concurrency
//!
//! Segments are immutable, so reads are lock-free over the shared mmap;
//! the only mutable state is the per-block lazy cache cells, each
//! protected by its own discipline (see [`crate::cache`]).
//!
//! # Sub-modules
//!
//! - [`builder`] — [`SegmentWriter`] emitting bounded closed segments.
//! - [`block`] — shared block framing and compression codecs.
//! - [`sorted_index`], [`hash_index`], [`binary_search`], [`bloom`],
//!   [`values`], [`footer`] — the individual block formats.
//! - [`many`] — the multi-segment container.

pub mod binary_search;
pub mod block;
pub mod bloom;
pub mod builder;
pub mod footer;
pub mod hash_index;
pub mod many;
pub mod sorted_index;
pub mod values;

#[cfg(test)]
mod tests;

pub use binary_search::BinarySearchConfig;
pub use block::CompressionCodec;
pub use bloom::BloomConfig;
pub use builder::{ClosedSegment, MaxKey, SegmentConfig, SegmentWriter};
pub use hash_index::HashIndexConfig;
pub use sorted_index::SortedIndexConfig;

use std::cmp::Ordering;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;

use crate::cache::{CacheError, CacheStrategy, Lazy};
use crate::encoding::EncodingError;
use crate::kv::{KeyComparator, SegmentEntry};
use crate::slice::SliceError;

use binary_search::{BinarySearchContext, BinarySearchOutcome, BinarySearchReader};
use block::BlockHandle;
use bloom::BloomReader;
use builder::SINGLE_SEGMENT_FORMAT;
use footer::Footer;
use hash_index::{HashIndexHeader, HashIndexReader, SlotCandidate};
use sorted_index::{
    MatchOp, MatchResult, RawEntry, SortedIndexHeader, SortedIndexReader, match_entry, materialize,
};
use values::ValuesReader;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by segment reads and writes.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Slice-level decode failure.
    #[error("decode error: {0}")]
    Slice(#[from] SliceError),

    /// Varint decode failure.
    #[error("varint error: {0}")]
    Encoding(#[from] EncodingError),

    /// A block or footer checksum did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The file does not end with the footer magic byte.
    #[error("footer magic mismatch: found 0x{found:02X}")]
    FooterMagicMismatch {
        /// The byte found at the end of the file.
        found: u8,
    },

    /// A sorted-index entry declared an id outside the decode table.
    #[error("unknown key-value id {0}")]
    UnknownKeyValueId(i64),

    /// A sorted-index entry's declared size disagrees with its fields.
    #[error("entry size mismatch: declared {declared}, parsed {actual}")]
    EntrySize {
        /// Size declared by the entry prefix.
        declared: usize,
        /// Bytes actually consumed by the fields.
        actual: usize,
    },

    /// A block's specific header outgrew its declared budget at close.
    #[error("block header overflow: declared {declared}, actual {actual}")]
    HeaderOverflow {
        /// The declared header budget.
        declared: usize,
        /// The bytes the header actually needed.
        actual: usize,
    },

    /// A single-flight cache slot is held by another task; retry later.
    #[error("block cache busy; retry later")]
    Busy,

    /// Structural corruption outside the specific kinds above.
    #[error("corruption: {0}")]
    Corruption(String),
}

impl From<CacheError<SegmentError>> for SegmentError {
    fn from(error: CacheError<SegmentError>) -> Self {
        match error {
            CacheError::Busy => SegmentError::Busy,
            CacheError::Fetch(inner) => inner,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block cache plumbing
// ------------------------------------------------------------------------------------------------

/// The cacheable regions of a segment, for per-kind cache strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The footer block.
    Footer,
    /// The values block.
    Values,
    /// The sorted-index block.
    SortedIndex,
    /// The hash-index block.
    HashIndex,
    /// The binary-search-index block.
    BinarySearch,
    /// The bloom-filter block.
    BloomFilter,
}

/// Chooses a cache strategy per block kind at segment open.
pub type BlockCacheStrategy = fn(BlockKind) -> CacheStrategy;

fn synchronised_everywhere(_: BlockKind) -> CacheStrategy {
    CacheStrategy::Synchronised
}

/// A decoded block held by a cache cell: specific header plus
/// decompressed body.
#[derive(Debug)]
struct ParsedBlock {
    header: Vec<u8>,
    body: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// Segment
// ------------------------------------------------------------------------------------------------

/// An immutable, memory-mapped segment.
pub struct Segment {
    path: Option<PathBuf>,
    mmap: Arc<Mmap>,
    offset: usize,
    len: usize,
    comparator: Arc<dyn KeyComparator>,
    footer: Lazy<Arc<Footer>>,
    values_cache: Lazy<Arc<ParsedBlock>>,
    sorted_cache: Lazy<Arc<ParsedBlock>>,
    hash_cache: Lazy<Arc<ParsedBlock>>,
    binary_search_cache: Lazy<Arc<ParsedBlock>>,
    bloom_cache: Lazy<Arc<ParsedBlock>>,
}

impl Segment {
    /// Open a single-segment file with synchronised block caches.
    pub fn open(
        path: impl AsRef<Path>,
        comparator: Arc<dyn KeyComparator>,
    ) -> Result<Self, SegmentError> {
        Self::open_with(path, comparator, synchronised_everywhere)
    }

    /// Open a single-segment file with a per-block cache strategy.
    ///
    /// # Safety argument
    ///
    /// The `unsafe` mmap is sound because segment files are immutable
    /// once published (written to a temp path and renamed), the map is
    /// read-only, and every block boundary is validated before slicing.
    pub fn open_with(
        path: impl AsRef<Path>,
        comparator: Arc<dyn KeyComparator>,
        strategy: BlockCacheStrategy,
    ) -> Result<Self, SegmentError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = Arc::new(unsafe { Mmap::map(&file)? });
        let len = mmap.len();
        let mut segment = Self::from_mapped(mmap, 0, len, comparator, strategy)?;
        segment.path = Some(path.to_path_buf());
        Ok(segment)
    }

    /// View a segment inside an existing map (used by the multi-segment
    /// container).
    pub(crate) fn from_mapped(
        mmap: Arc<Mmap>,
        offset: usize,
        len: usize,
        comparator: Arc<dyn KeyComparator>,
        strategy: BlockCacheStrategy,
    ) -> Result<Self, SegmentError> {
        if offset + len > mmap.len() {
            return Err(SegmentError::Corruption(format!(
                "segment range {offset}+{len} outside map of {} bytes",
                mmap.len()
            )));
        }
        match mmap[offset..offset + len].first() {
            Some(&SINGLE_SEGMENT_FORMAT) => {}
            Some(&many::MANY_SEGMENT_FORMAT) => {
                return Err(SegmentError::Corruption(
                    "multi-segment file; open it with ManySegments".to_string(),
                ));
            }
            Some(&other) => {
                return Err(SegmentError::Corruption(format!(
                    "unknown segment format byte 0x{other:02X}"
                )));
            }
            None => {
                return Err(SegmentError::Corruption("empty segment file".to_string()));
            }
        }
        Ok(Self {
            path: None,
            mmap,
            offset,
            len,
            comparator,
            footer: Lazy::with_strategy(&BlockKind::Footer, |kind| strategy(*kind)),
            values_cache: Lazy::with_strategy(&BlockKind::Values, |kind| strategy(*kind)),
            sorted_cache: Lazy::with_strategy(&BlockKind::SortedIndex, |kind| strategy(*kind)),
            hash_cache: Lazy::with_strategy(&BlockKind::HashIndex, |kind| strategy(*kind)),
            binary_search_cache: Lazy::with_strategy(&BlockKind::BinarySearch, |kind| {
                strategy(*kind)
            }),
            bloom_cache: Lazy::with_strategy(&BlockKind::BloomFilter, |kind| strategy(*kind)),
        })
    }

    fn bytes(&self) -> &[u8] {
        &self.mmap[self.offset..self.offset + self.len]
    }

    /// The file this segment was opened from, if it owns one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Byte length of this segment.
    pub fn len_bytes(&self) -> usize {
        self.len
    }

    /// Drop every cached block; subsequent reads re-parse from the map.
    pub fn clear_caches(&self) {
        self.footer.clear();
        self.values_cache.clear();
        self.sorted_cache.clear();
        self.hash_cache.clear();
        self.binary_search_cache.clear();
        self.bloom_cache.clear();
    }

    // --------------------------------------------------------------------------------------------
    // Footer and stats
    // --------------------------------------------------------------------------------------------

    fn footer(&self) -> Result<Arc<Footer>, SegmentError> {
        self.footer
            .value(|| Footer::read(self.bytes()).map(|(footer, _)| Arc::new(footer)))
            .map_err(SegmentError::from)
    }

    /// Total entries (fixed and range).
    pub fn key_value_count(&self) -> Result<u64, SegmentError> {
        Ok(self.footer()?.key_value_count)
    }

    /// Number of range entries.
    pub fn range_count(&self) -> Result<u64, SegmentError> {
        Ok(self.footer()?.range_count)
    }

    /// Whether any range in this segment removes keys.
    pub fn has_remove_range(&self) -> Result<bool, SegmentError> {
        Ok(self.footer()?.has_remove_range)
    }

    /// Whether any committed Put is present.
    pub fn has_put(&self) -> Result<bool, SegmentError> {
        Ok(self.footer()?.has_put)
    }

    /// The level this segment was created in.
    pub fn created_in_level(&self) -> Result<u64, SegmentError> {
        Ok(self.footer()?.created_in_level)
    }

    /// Nearest expiry deadline across all entries.
    pub fn nearest_deadline(&self) -> Result<Option<crate::kv::Deadline>, SegmentError> {
        Ok(self.footer()?.nearest_deadline)
    }

    /// Smallest and largest function ids referenced, if any.
    pub fn function_id_range(
        &self,
    ) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), SegmentError> {
        let footer = self.footer()?;
        Ok((footer.min_function_id.clone(), footer.max_function_id.clone()))
    }

    // --------------------------------------------------------------------------------------------
    // Block access
    // --------------------------------------------------------------------------------------------

    fn cached_block(
        &self,
        cache: &Lazy<Arc<ParsedBlock>>,
        handle: BlockHandle,
    ) -> Result<Arc<ParsedBlock>, SegmentError> {
        cache
            .value(|| {
                let start = usize::try_from(handle.offset).map_err(|_| {
                    SegmentError::Corruption("block offset exceeds usize".to_string())
                })?;
                let size = usize::try_from(handle.size).map_err(|_| {
                    SegmentError::Corruption("block size exceeds usize".to_string())
                })?;
                let bytes = self.bytes();
                let end = start.checked_add(size).filter(|&end| end <= bytes.len());
                let Some(end) = end else {
                    return Err(SegmentError::Corruption(format!(
                        "block {start}+{size} outside segment of {} bytes",
                        bytes.len()
                    )));
                };
                let decoded = block::open_block(&bytes[start..end])?;
                Ok(Arc::new(ParsedBlock {
                    header: decoded.header.to_vec(),
                    body: decoded.body.into_owned(),
                }))
            })
            .map_err(SegmentError::from)
    }

    // --------------------------------------------------------------------------------------------
    // Lookups
    // --------------------------------------------------------------------------------------------

    /// Whether `key` may be present, per the bloom filter.
    ///
    /// Returns `true` when no filter exists or the segment holds ranges.
    pub fn may_contain(&self, key: &[u8]) -> Result<bool, SegmentError> {
        let footer = self.footer()?;
        if footer.range_count > 0 {
            return Ok(true);
        }
        let Some(handle) = footer.bloom else {
            return Ok(true);
        };
        let bloom_arc = self.cached_block(&self.bloom_cache, handle)?;
        let bloom = BloomReader::new(&bloom_arc.header, &bloom_arc.body)?;
        Ok(bloom.might_contain(key))
    }

    /// Point lookup: the fixed entry at `key`, or the range covering it.
    pub fn get(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        let footer = self.footer()?;
        if !self.may_contain(key)? {
            return Ok(None);
        }

        let sorted_arc = self.cached_block(&self.sorted_cache, footer.sorted_index)?;
        let sorted = SortedIndexReader::new(
            SortedIndexHeader::parse(&sorted_arc.header)?,
            &sorted_arc.body,
        );
        let values_arc = match footer.values {
            Some(handle) => Some(self.cached_block(&self.values_cache, handle)?),
            None => None,
        };
        let values = match &values_arc {
            Some(arc) => ValuesReader::new(&arc.body),
            None => ValuesReader::empty(),
        };

        // Stage 1: hash index, collecting collision hints on the way.
        let mut hint_low: Option<u64> = None;
        let mut hint_high: Option<u64> = None;
        if let Some(handle) = footer.hash_index {
            let hash_arc = self.cached_block(&self.hash_cache, handle)?;
            let hash = HashIndexReader::new(
                HashIndexHeader::parse(&hash_arc.header)?,
                &hash_arc.body,
            )?;
            let found = hash.probe(key, |candidate| {
                let parsed = match candidate {
                    SlotCandidate::Offset(offset) => sorted
                        .read_at(offset, None)
                        .ok()
                        .flatten()
                        .and_then(|raw| materialize(&raw, &values).ok().map(|e| (raw, e))),
                    SlotCandidate::Copied { entry_bytes, .. } => {
                        SortedIndexReader::read_standalone(entry_bytes)
                            .ok()
                            .and_then(|(raw, _)| {
                                materialize(&raw, &values).ok().map(|e| (raw, e))
                            })
                    }
                };
                // Undecodable or mismatched slots are probe misses.
                let Some((raw, entry)) = parsed else {
                    return Ok(None);
                };
                match match_entry(MatchOp::Get(key), self.comparator.as_ref(), &entry, false, false)
                {
                    MatchResult::Matched(entry) => Ok(Some(entry)),
                    _ => {
                        if let Some(access) = raw.access_index {
                            match self.comparator.cmp_keys(&raw.key, key) {
                                Ordering::Less => {
                                    hint_low =
                                        Some(hint_low.map_or(access, |low| low.max(access)));
                                }
                                Ordering::Greater => {
                                    hint_high =
                                        Some(hint_high.map_or(access, |high| high.min(access)));
                                }
                                Ordering::Equal => {}
                            }
                        }
                        Ok(None)
                    }
                }
            })?;
            if let Some(entry) = found {
                return Ok(Some(entry));
            }
        }

        // Stage 2: binary search bounded by the collision hints.
        let mut scan_from = 0u64;
        if let Some(handle) = footer.binary_search {
            let bs_arc = self.cached_block(&self.binary_search_cache, handle)?;
            let reader = BinarySearchReader::new(&bs_arc.header, &bs_arc.body)?;
            let context = SegmentSearchContext {
                target: key,
                reader,
                sorted,
                values,
            };
            let bounds = match (hint_low, hint_high) {
                (Some(low), Some(high)) if reader.is_full_index() && low <= high => {
                    Some((low as usize, high as usize))
                }
                _ => None,
            };
            match binary_search::binary_search(&context, self.comparator.as_ref(), bounds)? {
                BinarySearchOutcome::Matched(_, entry) => return Ok(Some(entry)),
                BinarySearchOutcome::NotMatched { lower, higher: _ } => {
                    if reader.is_full_index() && footer.range_count == 0 {
                        // Every entry is indexed and none covers the key.
                        return Ok(None);
                    }
                    if let Some((offset, _)) = lower {
                        scan_from = offset;
                    }
                }
            }
        }

        // Stage 3: bounded sequential scan.
        self.seek_match(MatchOp::Get(key), scan_from, &sorted, &values)
    }

    /// The least entry strictly greater than `key` (ranges count when
    /// they hold keys above it).
    pub fn higher(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        let (sorted_arc, values_arc) = self.index_blocks()?;
        let sorted = SortedIndexReader::new(
            SortedIndexHeader::parse(&sorted_arc.header)?,
            &sorted_arc.body,
        );
        let values = match &values_arc {
            Some(arc) => ValuesReader::new(&arc.body),
            None => ValuesReader::empty(),
        };
        let start = self.floor_offset(key, &sorted, &values)?.unwrap_or(0);
        self.seek_match(MatchOp::Higher(key), start, &sorted, &values)
    }

    /// The greatest entry strictly less than `key` (ranges count when
    /// they hold keys below it).
    pub fn lower(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        let (sorted_arc, values_arc) = self.index_blocks()?;
        let sorted = SortedIndexReader::new(
            SortedIndexHeader::parse(&sorted_arc.header)?,
            &sorted_arc.body,
        );
        let values = match &values_arc {
            Some(arc) => ValuesReader::new(&arc.body),
            None => ValuesReader::empty(),
        };
        let start = self.strict_floor_offset(key, &sorted, &values)?.unwrap_or(0);
        self.seek_match(MatchOp::Lower(key), start, &sorted, &values)
    }

    /// `get(key)` falling back to `higher(key)`.
    pub fn ceiling(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        match self.get(key)? {
            Some(entry) => Ok(Some(entry)),
            None => self.higher(key),
        }
    }

    /// `get(key)` falling back to `lower(key)`.
    pub fn floor(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        match self.get(key)? {
            Some(entry) => Ok(Some(entry)),
            None => self.lower(key),
        }
    }

    /// The first (lowest-key) entry.
    pub fn first_entry(&self) -> Result<Option<SegmentEntry>, SegmentError> {
        let (sorted_arc, values_arc) = self.index_blocks()?;
        let sorted = SortedIndexReader::new(
            SortedIndexHeader::parse(&sorted_arc.header)?,
            &sorted_arc.body,
        );
        let values = match &values_arc {
            Some(arc) => ValuesReader::new(&arc.body),
            None => ValuesReader::empty(),
        };
        match sorted.read_at(0, None)? {
            Some(raw) => Ok(Some(materialize(&raw, &values)?)),
            None => Ok(None),
        }
    }

    /// The last (highest-key) entry.
    pub fn last_entry(&self) -> Result<Option<SegmentEntry>, SegmentError> {
        let entries = self.read_all()?;
        Ok(entries.into_iter().next_back())
    }

    /// Every entry in key order.
    pub fn read_all(&self) -> Result<Vec<SegmentEntry>, SegmentError> {
        let (sorted_arc, values_arc) = self.index_blocks()?;
        let sorted = SortedIndexReader::new(
            SortedIndexHeader::parse(&sorted_arc.header)?,
            &sorted_arc.body,
        );
        let values = match &values_arc {
            Some(arc) => ValuesReader::new(&arc.body),
            None => ValuesReader::empty(),
        };
        let mut entries = Vec::new();
        let mut previous: Option<RawEntry> = None;
        let mut offset = 0u64;
        loop {
            let Some(raw) = sorted.read_at(offset, previous.as_ref())? else {
                break;
            };
            entries.push(materialize(&raw, &values)?);
            match raw.next_offset {
                Some(next) => {
                    offset = next;
                    previous = Some(raw);
                }
                None => break,
            }
        }
        Ok(entries)
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn index_blocks(
        &self,
    ) -> Result<(Arc<ParsedBlock>, Option<Arc<ParsedBlock>>), SegmentError> {
        let footer = self.footer()?;
        let sorted = self.cached_block(&self.sorted_cache, footer.sorted_index)?;
        let values = match footer.values {
            Some(handle) => Some(self.cached_block(&self.values_cache, handle)?),
            None => None,
        };
        Ok((sorted, values))
    }

    /// Sorted-index offset of the greatest indexed entry with key at or
    /// below `key`.
    fn floor_offset(
        &self,
        key: &[u8],
        sorted: &SortedIndexReader<'_>,
        values: &ValuesReader<'_>,
    ) -> Result<Option<u64>, SegmentError> {
        let footer = self.footer()?;
        let Some(handle) = footer.binary_search else {
            return Ok(None);
        };
        let bs_arc = self.cached_block(&self.binary_search_cache, handle)?;
        let reader = BinarySearchReader::new(&bs_arc.header, &bs_arc.body)?;
        let context = SegmentSearchContext {
            target: key,
            reader,
            sorted: *sorted,
            values: *values,
        };
        match binary_search::binary_search(&context, self.comparator.as_ref(), None)? {
            BinarySearchOutcome::Matched(offset, _) => Ok(Some(offset)),
            BinarySearchOutcome::NotMatched { lower, .. } => Ok(lower.map(|(offset, _)| offset)),
        }
    }

    /// Sorted-index offset of the greatest indexed entry with key
    /// strictly below `key`.
    fn strict_floor_offset(
        &self,
        key: &[u8],
        sorted: &SortedIndexReader<'_>,
        values: &ValuesReader<'_>,
    ) -> Result<Option<u64>, SegmentError> {
        let footer = self.footer()?;
        let Some(handle) = footer.binary_search else {
            return Ok(None);
        };
        let bs_arc = self.cached_block(&self.binary_search_cache, handle)?;
        let reader = BinarySearchReader::new(&bs_arc.header, &bs_arc.body)?;
        let context = SegmentSearchContext {
            target: key,
            reader,
            sorted: *sorted,
            values: *values,
        };
        binary_search::binary_search_strict_floor(&context, self.comparator.as_ref())
    }

    /// The explicit-loop seek-and-match driver behind get/higher/lower.
    fn seek_match(
        &self,
        op: MatchOp<'_>,
        start_offset: u64,
        sorted: &SortedIndexReader<'_>,
        values: &ValuesReader<'_>,
    ) -> Result<Option<SegmentEntry>, SegmentError> {
        let mut previous: Option<RawEntry> = None;
        let mut offset = start_offset;
        let mut best_lower: Option<SegmentEntry> = None;
        loop {
            let Some(raw) = sorted.read_at(offset, previous.as_ref())? else {
                return Ok(match op {
                    MatchOp::Lower(_) => best_lower,
                    _ => None,
                });
            };
            let entry = materialize(&raw, values)?;
            let has_more = raw.next_offset.is_some();
            match match_entry(op, self.comparator.as_ref(), &entry, has_more, true) {
                MatchResult::Matched(entry) => return Ok(Some(entry)),
                MatchResult::BehindStopped => return Ok(None),
                MatchResult::BehindFetchNext => {
                    if matches!(op, MatchOp::Lower(_)) {
                        best_lower = Some(entry);
                    }
                    match raw.next_offset {
                        Some(next) => {
                            offset = next;
                            previous = Some(raw);
                        }
                        None => {
                            return Ok(match op {
                                MatchOp::Lower(_) => best_lower,
                                _ => None,
                            });
                        }
                    }
                }
                MatchResult::AheadOrEnd(_) => {
                    return Ok(match op {
                        MatchOp::Lower(_) => best_lower,
                        _ => None,
                    });
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Binary-search context over this segment's blocks
// ------------------------------------------------------------------------------------------------

struct SegmentSearchContext<'a> {
    target: &'a [u8],
    reader: BinarySearchReader<'a>,
    sorted: SortedIndexReader<'a>,
    values: ValuesReader<'a>,
}

impl BinarySearchContext for SegmentSearchContext<'_> {
    fn target_key(&self) -> &[u8] {
        self.target
    }

    fn values_count(&self) -> usize {
        self.reader.values_count()
    }

    fn is_full_index(&self) -> bool {
        self.reader.is_full_index()
    }

    fn seek(&self, index: usize) -> Result<(u64, SegmentEntry), SegmentError> {
        let offset = self.reader.offset_at(index)?;
        let raw = self.sorted.read_at(offset, None)?.ok_or_else(|| {
            SegmentError::Corruption(format!(
                "binary-search offset {offset} points at the end sentinel"
            ))
        })?;
        let entry = materialize(&raw, &self.values)?;
        Ok((offset, entry))
    }
}
