//! Segment writer — builds closed segment files from sorted entries.
//!
//! [`SegmentWriter`] consumes a key-ascending stream of
//! [`SegmentEntry`] values and emits a sequence of immutable segment
//! files, each at least `min_segment_size` bytes of index-and-values
//! payload (the final segment absorbs the tail so no undersized file is
//! published).
//!
//! # Per-segment pipeline
//!
//! 1. Stream entries into the sorted-index and values builders; identical
//!    consecutive payloads reuse the previous values slot.
//! 2. On close, populate the hash index from the collected secondary
//!    records; keys that miss the hash (or all keys, with a full index)
//!    also land in the binary-search index.
//! 3. Build the bloom filter — skipped when the segment carries a
//!    removing range.
//! 4. Write the footer, the reversed footer offset, and the magic byte.
//!
//! # Atomicity
//!
//! Files are written to `<name>.tmp`, synced, and renamed into place, so
//! a crash never publishes a partially-written segment.

use std::fs::{File, OpenOptions, rename};
use std::io::Write;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use crate::kv::{Deadline, KeyComparator, KeyValue, SegmentEntry, nearest_deadline};

use super::SegmentError;
use super::binary_search::{BinarySearchBuilder, BinarySearchConfig};
use super::block::{BlockHandle, CompressionCodec};
use super::bloom::{BloomBuilder, BloomConfig};
use super::footer::Footer;
use super::hash_index::{HashIndexBuilder, HashIndexConfig};
use super::sorted_index::{self, SortedIndexBuilder, SortedIndexConfig};
use super::values::ValuesBuilder;

/// Leading format byte of a single-segment file.
pub(crate) const SINGLE_SEGMENT_FORMAT: u8 = 0x01;

// ------------------------------------------------------------------------------------------------
// Config
// ------------------------------------------------------------------------------------------------

/// All build options for one segment writer.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Close a segment once its index-and-values payload reaches this
    /// size and more entries remain.
    pub min_segment_size: usize,
    /// Level number recorded in every emitted footer.
    pub created_in_level: u64,
    /// Sorted-index options.
    pub sorted_index: SortedIndexConfig,
    /// Values block compression.
    pub values_compression: CompressionCodec,
    /// Hash-index options.
    pub hash_index: HashIndexConfig,
    /// Binary-search-index options.
    pub binary_search: BinarySearchConfig,
    /// Bloom-filter options.
    pub bloom: BloomConfig,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_segment_size: 2 * 1024 * 1024,
            created_in_level: 0,
            sorted_index: SortedIndexConfig::default(),
            values_compression: CompressionCodec::None,
            hash_index: HashIndexConfig::default(),
            binary_search: BinarySearchConfig::default(),
            bloom: BloomConfig::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Closed segments
// ------------------------------------------------------------------------------------------------

/// The upper bound of a segment's key coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaxKey {
    /// The segment's last entry is a fixed key-value.
    Fixed(Vec<u8>),
    /// The segment's last entry is a range: coverage ends just below
    /// `to_exclusive`.
    Range {
        /// The range's from-key.
        from: Vec<u8>,
        /// The range's exclusive end.
        to_exclusive: Vec<u8>,
    },
}

/// Metadata of one finished segment.
#[derive(Debug, Clone)]
pub struct ClosedSegment {
    /// Published file path.
    pub path: PathBuf,
    /// On-disk file size in bytes.
    pub file_size: u64,
    /// Total entries (fixed and range).
    pub key_value_count: u64,
    /// Number of committed Puts.
    pub put_count: u64,
    /// Number of range entries.
    pub range_count: u64,
    /// Lowest key covered.
    pub min_key: Vec<u8>,
    /// Highest coverage bound.
    pub max_key: MaxKey,
    /// Nearest expiry across all entries.
    pub nearest_deadline: Option<Deadline>,
    /// Lexicographically smallest function id referenced.
    pub min_function_id: Option<Vec<u8>>,
    /// Lexicographically largest function id referenced.
    pub max_function_id: Option<Vec<u8>>,
    /// Level recorded at build time.
    pub created_in_level: u64,
}

// ------------------------------------------------------------------------------------------------
// Build statistics
// ------------------------------------------------------------------------------------------------

/// Metadata accumulated while streaming entries, fed into the footer.
#[derive(Debug, Default)]
struct BuildStats {
    key_value_count: u64,
    put_count: u64,
    range_count: u64,
    has_remove_range: bool,
    nearest_deadline: Option<Deadline>,
    min_key: Option<Vec<u8>>,
    max_key: Option<MaxKey>,
    min_function_id: Option<Vec<u8>>,
    max_function_id: Option<Vec<u8>>,
}

impl BuildStats {
    fn track(&mut self, entry: &SegmentEntry) {
        self.key_value_count += 1;
        self.nearest_deadline = nearest_deadline(self.nearest_deadline, entry.nearest_deadline());
        if self.min_key.is_none() {
            self.min_key = Some(entry.key().to_vec());
        }
        match entry {
            SegmentEntry::Fixed(kv) => {
                if kv.is_put() {
                    self.put_count += 1;
                }
                if let KeyValue::Function(function) = kv {
                    self.track_function_id(&function.function);
                }
                if let KeyValue::PendingApply(pending) = kv {
                    for apply in pending.applies() {
                        if let Some(id) = apply.function_id() {
                            self.track_function_id(id);
                        }
                    }
                }
                self.max_key = Some(MaxKey::Fixed(kv.key().to_vec()));
            }
            SegmentEntry::Range(range) => {
                self.range_count += 1;
                if range.has_remove() {
                    self.has_remove_range = true;
                }
                for apply in &range.applies {
                    if let Some(id) = apply.function_id() {
                        self.track_function_id(id);
                    }
                }
                self.max_key = Some(MaxKey::Range {
                    from: range.from_key.clone(),
                    to_exclusive: range.to_key.clone(),
                });
            }
        }
    }

    fn track_function_id(&mut self, id: &[u8]) {
        match &self.min_function_id {
            Some(min) if min.as_slice() <= id => {}
            _ => self.min_function_id = Some(id.to_vec()),
        }
        match &self.max_function_id {
            Some(max) if max.as_slice() >= id => {}
            _ => self.max_function_id = Some(id.to_vec()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Assembler — one in-flight segment
// ------------------------------------------------------------------------------------------------

/// Metadata of an assembled (not yet persisted) segment.
pub(crate) struct AssembledSegment {
    pub bytes: Vec<u8>,
    pub key_value_count: u64,
    pub put_count: u64,
    pub range_count: u64,
    pub min_key: Vec<u8>,
    pub max_key: MaxKey,
    pub nearest_deadline: Option<Deadline>,
    pub min_function_id: Option<Vec<u8>>,
    pub max_function_id: Option<Vec<u8>>,
}

/// Accumulates one segment's entries and assembles the final byte image.
pub(crate) struct SegmentAssembler {
    config: SegmentConfig,
    sorted: SortedIndexBuilder,
    values: ValuesBuilder,
    bloom_keys: Vec<Vec<u8>>,
    stats: BuildStats,
}

impl SegmentAssembler {
    pub fn new(config: &SegmentConfig) -> Self {
        let keep_standalone = config.hash_index.enabled && config.hash_index.copy_index;
        Self {
            config: config.clone(),
            sorted: SortedIndexBuilder::new(config.sorted_index.clone(), keep_standalone),
            values: ValuesBuilder::new(),
            bloom_keys: Vec::new(),
            stats: BuildStats::default(),
        }
    }

    /// Append the next entry in key order.
    pub fn add(&mut self, entry: &SegmentEntry) {
        let slot = sorted_index::encode_payload(entry).map(|payload| self.values.add(&payload));
        self.sorted.add(entry, slot);
        if let SegmentEntry::Fixed(kv) = entry {
            self.bloom_keys.push(kv.key().to_vec());
        }
        self.stats.track(entry);
    }

    /// Combined size of the index and values payload so far.
    pub fn current_size(&self) -> usize {
        self.sorted.len() + self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.entry_count() == 0
    }

    /// Assemble the complete segment byte image, or `None` when empty.
    pub fn close(self) -> Result<Option<AssembledSegment>, SegmentError> {
        if self.is_empty() {
            return Ok(None);
        }
        let entry_count = self.sorted.entry_count();
        let values_block = self.values.close(self.config.values_compression)?;
        let closed_sorted = self.sorted.close()?;

        let mut file = vec![SINGLE_SEGMENT_FORMAT];
        let push_block = |file: &mut Vec<u8>, bytes: Vec<u8>| -> BlockHandle {
            let handle = BlockHandle {
                offset: file.len() as u64,
                size: bytes.len() as u64,
            };
            file.extend_from_slice(&bytes);
            handle
        };

        let values_handle = values_block.map(|bytes| push_block(&mut file, bytes));
        let sorted_handle = push_block(&mut file, closed_sorted.block);

        // Hash index over standalone entries.
        let copy_index = self.config.hash_index.copy_index;
        let largest_entry = closed_sorted
            .secondary
            .iter()
            .filter_map(|s| s.standalone_bytes.as_ref().map(Vec::len))
            .max()
            .unwrap_or(0);
        let largest_record = HashIndexBuilder::record_size(copy_index, largest_entry);
        // Copied records are context-free re-encodings, so every entry is
        // hashable; offset records can only point at standalone entries.
        let hashable_count = if copy_index {
            closed_sorted.secondary.len()
        } else {
            closed_sorted
                .secondary
                .iter()
                .filter(|s| s.standalone)
                .count()
        };
        let mut hash = if self.config.hash_index.enabled {
            Some(HashIndexBuilder::new(
                self.config.hash_index.clone(),
                hashable_count,
                largest_record,
            ))
        } else {
            None
        };
        let mut hash_hits = vec![false; closed_sorted.secondary.len()];
        if let Some(hash) = hash.as_mut() {
            for (index, secondary) in closed_sorted.secondary.iter().enumerate() {
                hash_hits[index] = if copy_index {
                    match &secondary.standalone_bytes {
                        Some(bytes) => {
                            hash.write_copied(&secondary.key, secondary.access_index, bytes)
                        }
                        None => false,
                    }
                } else if secondary.standalone {
                    hash.write_offset(&secondary.key, secondary.offset)
                } else {
                    false
                };
            }
        }
        let hash_block = match hash {
            Some(hash) => hash.close()?,
            None => None,
        };
        let hash_handle = hash_block.map(|bytes| push_block(&mut file, bytes));

        // Binary-search index: every standalone entry unless it already
        // landed in a persisted hash index and no full index was asked.
        let binary_search_handle = if self.config.binary_search.enabled {
            let want_all = self.config.binary_search.full_index || hash_handle.is_none();
            let mut binary_search = BinarySearchBuilder::new();
            for (index, secondary) in closed_sorted.secondary.iter().enumerate() {
                if !secondary.standalone {
                    continue;
                }
                if want_all || !hash_hits[index] {
                    binary_search.add(secondary.offset);
                }
            }
            let is_full_index = binary_search.len() == entry_count;
            binary_search
                .close(is_full_index, self.config.binary_search.compression)?
                .map(|bytes| push_block(&mut file, bytes))
        } else {
            None
        };

        // Bloom filter; a removing range cannot be represented.
        let bloom_handle = if self.config.bloom.enabled
            && !self.stats.has_remove_range
            && !self.bloom_keys.is_empty()
        {
            let mut bloom = BloomBuilder::new(
                self.bloom_keys.len(),
                self.config.bloom.false_positive_rate,
            );
            for key in &self.bloom_keys {
                bloom.add(key);
            }
            let bytes = bloom.close(self.config.bloom.compression)?;
            Some(push_block(&mut file, bytes))
        } else {
            None
        };

        let stats = self.stats;
        let footer = Footer {
            created_in_level: self.config.created_in_level,
            has_put: stats.put_count > 0,
            key_value_count: stats.key_value_count,
            range_count: stats.range_count,
            has_remove_range: stats.has_remove_range,
            nearest_deadline: stats.nearest_deadline,
            min_function_id: stats.min_function_id.clone(),
            max_function_id: stats.max_function_id.clone(),
            values: values_handle,
            sorted_index: sorted_handle,
            hash_index: hash_handle,
            binary_search: binary_search_handle,
            bloom: bloom_handle,
        };
        let footer_bytes = footer.write(file.len() as u64)?;
        file.extend_from_slice(&footer_bytes);

        let (min_key, max_key) = match (stats.min_key, stats.max_key) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                return Err(SegmentError::Corruption(
                    "closed a segment without key bounds".to_string(),
                ));
            }
        };

        Ok(Some(AssembledSegment {
            bytes: file,
            key_value_count: stats.key_value_count,
            put_count: stats.put_count,
            range_count: stats.range_count,
            min_key,
            max_key,
            nearest_deadline: stats.nearest_deadline,
            min_function_id: stats.min_function_id,
            max_function_id: stats.max_function_id,
        }))
    }
}

// ------------------------------------------------------------------------------------------------
// SegmentWriter — public entry point
// ------------------------------------------------------------------------------------------------

/// Builds a sequence of bounded segment files from sorted entries.
pub struct SegmentWriter {
    dir: PathBuf,
    config: SegmentConfig,
    comparator: Arc<dyn KeyComparator>,
    next_file_number: u64,
}

impl SegmentWriter {
    /// A writer emitting files into `dir` under the given ordering.
    pub fn new(
        dir: impl Into<PathBuf>,
        config: SegmentConfig,
        comparator: Arc<dyn KeyComparator>,
    ) -> Self {
        Self {
            dir: dir.into(),
            config,
            comparator,
            next_file_number: 0,
        }
    }

    /// Consume a key-ascending entry stream and emit closed segments.
    ///
    /// A segment closes once its payload reaches `min_segment_size` and
    /// at least one further entry exists; the final segment absorbs the
    /// remaining tail.
    pub fn write_all(
        &mut self,
        entries: impl IntoIterator<Item = SegmentEntry>,
    ) -> Result<Vec<ClosedSegment>, SegmentError> {
        let mut iter = entries.into_iter().peekable();
        let mut closed = Vec::new();
        let mut assembler = SegmentAssembler::new(&self.config);
        let mut previous_key: Option<Vec<u8>> = None;

        while let Some(entry) = iter.next() {
            if let Some(previous) = &previous_key
                && self.comparator.cmp_keys(entry.key(), previous).is_le()
            {
                return Err(SegmentError::Corruption(format!(
                    "entries out of order: {:02x?} after {:02x?}",
                    entry.key(),
                    previous
                )));
            }
            previous_key = Some(entry.key().to_vec());

            assembler.add(&entry);
            if assembler.current_size() >= self.config.min_segment_size && iter.peek().is_some() {
                let full = mem::replace(&mut assembler, SegmentAssembler::new(&self.config));
                if let Some(segment) = self.flush(full)? {
                    closed.push(segment);
                }
                previous_key = None;
            }
        }
        if let Some(segment) = self.flush(assembler)? {
            closed.push(segment);
        }
        Ok(closed)
    }

    fn flush(&mut self, assembler: SegmentAssembler) -> Result<Option<ClosedSegment>, SegmentError> {
        let Some(assembled) = assembler.close()? else {
            return Ok(None);
        };

        let file_name = format!("{:010}.seg", self.next_file_number);
        self.next_file_number += 1;
        let final_path = self.dir.join(file_name);
        let tmp_path = final_path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&assembled.bytes)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        rename(&tmp_path, &final_path)?;
        sync_dir(&self.dir)?;

        tracing::debug!(
            path = %final_path.display(),
            bytes = assembled.bytes.len(),
            key_values = assembled.key_value_count,
            ranges = assembled.range_count,
            "segment closed"
        );

        Ok(Some(ClosedSegment {
            path: final_path,
            file_size: assembled.bytes.len() as u64,
            key_value_count: assembled.key_value_count,
            put_count: assembled.put_count,
            range_count: assembled.range_count,
            min_key: assembled.min_key,
            max_key: assembled.max_key,
            nearest_deadline: assembled.nearest_deadline,
            min_function_id: assembled.min_function_id,
            max_function_id: assembled.max_function_id,
            created_in_level: self.config.created_in_level,
        }))
    }
}

fn sync_dir(dir: &std::path::Path) -> Result<(), SegmentError> {
    // Persist the rename itself.
    File::open(dir)?.sync_all()?;
    Ok(())
}
