//! Sorted-index block: the ordered entry records of a segment.
//!
//! # Entry layout
//!
//! ```text
//! [entry_size    : varint  (signed; -1 is the end-of-block sentinel)]
//! [key_value_id  : varint  (shape + key/value compression flags)]
//! [access_index  : varuint (iff enabled)]
//! [key           : full {len, bytes} | partial {common_prefix_len, suffix_len, suffix}]
//! [deadline      : varuint (nanoseconds; 0 = absent)]
//! [value_offset  : varuint ┐ iff the shape carries a payload and the
//! [value_length  : varuint ┘ payload is not deduplicated]
//! [time_len      : u32-le]
//! [time          : bytes]
//! ```
//!
//! The varint following an entry is the next entry's `entry_size`, so a
//! sequential reader learns the successor by peeking a handful of bytes
//! past the entry it just parsed.
//!
//! `key_value_id = base(shape) * 4 + 2 * key_is_partial + value_is_dedup`
//! with bases Put=0, Remove=1, Update=2, Function=3, PendingApply=4,
//! Range=5.  Readers decode ids through a static table.
//!
//! # Prefix compression
//!
//! A key may be stored as a suffix against the previous entry's key; a
//! configured reset count forces a full key every N entries so a bounded
//! backward context always exists.  Entries with a full key **and**
//! explicit value fields parse standalone and are the only ones the
//! hash and binary-search indexes reference directly.
//!
//! # Normalisation
//!
//! When normalising for binary search, every entry is padded to a fixed
//! slot of `max_entry_size + 1` bytes — leading zeros, a `0x01`
//! separator, then the entry — so slot `i` starts at `i * width` and the
//! block supports direct offset arithmetic.  Normalisation forces prefix
//! compression off.
//!
//! # Matchers
//!
//! `match_entry` is the single state machine behind get/higher/lower
//! traversal: invoked with the current entry and whether more entries
//! follow, it directs the caller to stop, fetch the next entry, or accept
//! a result.

use std::cmp::Ordering;

use crate::kv::{
    Apply, Deadline, Function, KeyValue, PendingApply, Put, RangeEntry, Remove, SegmentEntry,
    KeyComparator, Time, Update,
};
use crate::encoding;
use crate::slice::{self, Reader};

use super::SegmentError;
use super::block::{self, CompressionCodec};
use super::values::{ValuesReader, ValuesSlot};

/// Specific-header budget: six flag bytes plus one varuint.
const MAX_HEADER_SIZE: usize = 6 + encoding::MAX_VARINT_LEN;

/// Slot separator between padding and entry in a normalised block.
const NORMALISED_SEPARATOR: u8 = 0x01;

/// End-of-block sentinel, written as `varint(-1)`.
const END_SENTINEL: i64 = -1;

// ------------------------------------------------------------------------------------------------
// Config
// ------------------------------------------------------------------------------------------------

/// Sorted-index build options.
#[derive(Debug, Clone)]
pub struct SortedIndexConfig {
    /// Store keys as suffixes against their predecessor where shorter.
    pub prefix_compression: bool,
    /// Force a full key every N entries.
    pub prefix_compression_reset_count: usize,
    /// Record a per-entry ordinal to accelerate binary search bounds.
    pub enable_access_position_index: bool,
    /// Pad entries to a fixed slot so binary search can address
    /// `idx * width` directly. Forces prefix compression off.
    pub normalise_for_binary_search: bool,
    /// Persisted hint that entries may be parsed partially; readers here
    /// always parse fully.
    pub enable_partial_read: bool,
    /// Block body compression.
    pub compression: CompressionCodec,
}

impl Default for SortedIndexConfig {
    fn default() -> Self {
        Self {
            prefix_compression: true,
            prefix_compression_reset_count: 8,
            enable_access_position_index: true,
            normalise_for_binary_search: false,
            enable_partial_read: false,
            compression: CompressionCodec::None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shapes and key-value ids
// ------------------------------------------------------------------------------------------------

/// Stored entry shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Put,
    Remove,
    Update,
    Function,
    PendingApply,
    Range,
}

impl Shape {
    fn base(self) -> i64 {
        match self {
            Shape::Put => 0,
            Shape::Remove => 1,
            Shape::Update => 2,
            Shape::Function => 3,
            Shape::PendingApply => 4,
            Shape::Range => 5,
        }
    }

    /// Whether entries of this shape reference a values-block payload.
    fn has_payload(self) -> bool {
        !matches!(self, Shape::Remove)
    }
}

/// Decoded `key_value_id` flags.
#[derive(Debug, Clone, Copy)]
struct IdInfo {
    shape: Shape,
    key_partial: bool,
    value_dedup: bool,
}

fn encode_id(shape: Shape, key_partial: bool, value_dedup: bool) -> i64 {
    shape.base() * 4 + i64::from(key_partial) * 2 + i64::from(value_dedup)
}

/// Static id decode table: index = key_value_id.
const ID_TABLE: [IdInfo; 24] = {
    const SHAPES: [Shape; 6] = [
        Shape::Put,
        Shape::Remove,
        Shape::Update,
        Shape::Function,
        Shape::PendingApply,
        Shape::Range,
    ];
    let mut table = [IdInfo {
        shape: Shape::Put,
        key_partial: false,
        value_dedup: false,
    }; 24];
    let mut id = 0;
    while id < 24 {
        table[id] = IdInfo {
            shape: SHAPES[id / 4],
            key_partial: (id % 4) / 2 == 1,
            value_dedup: id % 2 == 1,
        };
        id += 1;
    }
    table
};

fn decode_id(id: i64) -> Result<IdInfo, SegmentError> {
    usize::try_from(id)
        .ok()
        .and_then(|id| ID_TABLE.get(id).copied())
        .ok_or(SegmentError::UnknownKeyValueId(id))
}

// ------------------------------------------------------------------------------------------------
// Value payload codecs
// ------------------------------------------------------------------------------------------------

/// Encode an optional value as `[presence u8][bytes]`; the slot length
/// delimits the bytes.
fn encode_optional_value(value: Option<&[u8]>, buf: &mut Vec<u8>) {
    match value {
        None => buf.push(0),
        Some(bytes) => {
            buf.push(1);
            buf.extend_from_slice(bytes);
        }
    }
}

fn decode_optional_value(payload: &[u8]) -> Result<Option<Vec<u8>>, SegmentError> {
    match payload.first() {
        Some(0) => Ok(None),
        Some(1) => Ok(Some(payload[1..].to_vec())),
        Some(other) => Err(SegmentError::Corruption(format!(
            "invalid value presence byte 0x{other:02X}"
        ))),
        None => Err(SegmentError::Corruption(
            "empty optional-value payload".to_string(),
        )),
    }
}

fn encode_applies(applies: &[Apply], buf: &mut Vec<u8>) {
    encoding::write_unsigned(applies.len() as u64, buf);
    for apply in applies {
        match apply {
            Apply::Remove { time, deadline } => {
                buf.push(0);
                encoding::write_unsigned(deadline.map_or(0, |d| d.nanos()), buf);
                encoding::write_unsigned(time.as_slice().len() as u64, buf);
                buf.extend_from_slice(time.as_slice());
            }
            Apply::Update {
                value,
                time,
                deadline,
            } => {
                buf.push(1);
                encoding::write_unsigned(deadline.map_or(0, |d| d.nanos()), buf);
                match value {
                    None => buf.push(0),
                    Some(bytes) => {
                        buf.push(1);
                        encoding::write_unsigned(bytes.len() as u64, buf);
                        buf.extend_from_slice(bytes);
                    }
                }
                encoding::write_unsigned(time.as_slice().len() as u64, buf);
                buf.extend_from_slice(time.as_slice());
            }
            Apply::Function {
                function,
                time,
                deadline,
            } => {
                buf.push(2);
                encoding::write_unsigned(deadline.map_or(0, |d| d.nanos()), buf);
                encoding::write_unsigned(function.len() as u64, buf);
                buf.extend_from_slice(function);
                encoding::write_unsigned(time.as_slice().len() as u64, buf);
                buf.extend_from_slice(time.as_slice());
            }
        }
    }
}

fn read_len(reader: &mut Reader<'_>) -> Result<usize, SegmentError> {
    usize::try_from(reader.read_unsigned()?)
        .map_err(|_| SegmentError::Corruption("length exceeds usize".to_string()))
}

fn decode_applies(reader: &mut Reader<'_>) -> Result<Vec<Apply>, SegmentError> {
    let count = read_len(reader)?;
    let mut applies = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let tag = reader.read_u8()?;
        let deadline = Deadline::from_nanos(reader.read_unsigned()?);
        let apply = match tag {
            0 => {
                let time_len = read_len(reader)?;
                Apply::Remove {
                    time: Time::new(reader.read_bytes(time_len)?.to_vec()),
                    deadline,
                }
            }
            1 => {
                let value = match reader.read_u8()? {
                    0 => None,
                    1 => {
                        let len = read_len(reader)?;
                        Some(reader.read_bytes(len)?.to_vec())
                    }
                    other => {
                        return Err(SegmentError::Corruption(format!(
                            "invalid apply value presence byte 0x{other:02X}"
                        )));
                    }
                };
                let time_len = read_len(reader)?;
                Apply::Update {
                    value,
                    time: Time::new(reader.read_bytes(time_len)?.to_vec()),
                    deadline,
                }
            }
            2 => {
                let function_len = read_len(reader)?;
                let function = reader.read_bytes(function_len)?.to_vec();
                let time_len = read_len(reader)?;
                Apply::Function {
                    function,
                    time: Time::new(reader.read_bytes(time_len)?.to_vec()),
                    deadline,
                }
            }
            other => {
                return Err(SegmentError::Corruption(format!(
                    "unknown apply tag {other}"
                )));
            }
        };
        applies.push(apply);
    }
    Ok(applies)
}

/// Serialize the values-block payload of an entry; `None` for shapes
/// without one.
pub(crate) fn encode_payload(entry: &SegmentEntry) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    match entry {
        SegmentEntry::Fixed(KeyValue::Put(put)) => {
            encode_optional_value(put.value.as_deref(), &mut buf)
        }
        SegmentEntry::Fixed(KeyValue::Update(update)) => {
            encode_optional_value(update.value.as_deref(), &mut buf)
        }
        SegmentEntry::Fixed(KeyValue::Remove(_)) => return None,
        SegmentEntry::Fixed(KeyValue::Function(function)) => {
            buf.extend_from_slice(&function.function)
        }
        SegmentEntry::Fixed(KeyValue::PendingApply(pending)) => {
            encode_applies(pending.applies(), &mut buf)
        }
        SegmentEntry::Range(range) => {
            encoding::write_unsigned(range.to_key.len() as u64, &mut buf);
            buf.extend_from_slice(&range.to_key);
            encode_applies(&range.applies, &mut buf);
        }
    }
    Some(buf)
}

// ------------------------------------------------------------------------------------------------
// Raw entries
// ------------------------------------------------------------------------------------------------

/// A parsed sorted-index entry before its payload is materialized.
#[derive(Debug, Clone)]
pub(crate) struct RawEntry {
    pub shape: Shape,
    pub key: Vec<u8>,
    pub deadline: Option<Deadline>,
    /// Values-block slot, explicit or inherited from the predecessor.
    pub value_slot: Option<(u64, u64)>,
    pub time: Time,
    /// Offset of the successor entry, `None` at the end of the block.
    pub next_offset: Option<u64>,
    pub access_index: Option<u64>,
}

/// Materialize a raw entry into its full shape using the values block.
pub(crate) fn materialize(
    raw: &RawEntry,
    values: &ValuesReader<'_>,
) -> Result<SegmentEntry, SegmentError> {
    let payload = match raw.value_slot {
        Some((offset, length)) => Some(values.read(offset, length)?),
        None => None,
    };
    let require_payload = || {
        payload.ok_or_else(|| {
            SegmentError::Corruption(format!("{:?} entry without payload", raw.shape))
        })
    };
    let entry = match raw.shape {
        Shape::Put => SegmentEntry::Fixed(KeyValue::Put(Put {
            key: raw.key.clone(),
            value: decode_optional_value(require_payload()?)?,
            time: raw.time.clone(),
            deadline: raw.deadline,
        })),
        Shape::Remove => SegmentEntry::Fixed(KeyValue::Remove(Remove {
            key: raw.key.clone(),
            time: raw.time.clone(),
            deadline: raw.deadline,
        })),
        Shape::Update => SegmentEntry::Fixed(KeyValue::Update(Update {
            key: raw.key.clone(),
            value: decode_optional_value(require_payload()?)?,
            time: raw.time.clone(),
            deadline: raw.deadline,
        })),
        Shape::Function => SegmentEntry::Fixed(KeyValue::Function(Function {
            key: raw.key.clone(),
            function: require_payload()?.to_vec(),
            time: raw.time.clone(),
            deadline: raw.deadline,
        })),
        Shape::PendingApply => {
            let mut reader = Reader::new(require_payload()?);
            let applies = decode_applies(&mut reader)?;
            let built = PendingApply::from_applies(raw.key.clone(), applies).ok_or_else(|| {
                SegmentError::Corruption("pending apply with empty sequence".to_string())
            })?;
            SegmentEntry::Fixed(built)
        }
        Shape::Range => {
            let mut reader = Reader::new(require_payload()?);
            let to_key_len = read_len(&mut reader)?;
            let to_key = reader.read_bytes(to_key_len)?.to_vec();
            let applies = decode_applies(&mut reader)?;
            if applies.is_empty() {
                return Err(SegmentError::Corruption(
                    "range with empty apply sequence".to_string(),
                ));
            }
            SegmentEntry::Range(RangeEntry {
                from_key: raw.key.clone(),
                to_key,
                applies,
            })
        }
    };
    Ok(entry)
}

// ------------------------------------------------------------------------------------------------
// Entry encoding
// ------------------------------------------------------------------------------------------------

fn shape_of(entry: &SegmentEntry) -> Shape {
    match entry {
        SegmentEntry::Fixed(KeyValue::Put(_)) => Shape::Put,
        SegmentEntry::Fixed(KeyValue::Remove(_)) => Shape::Remove,
        SegmentEntry::Fixed(KeyValue::Update(_)) => Shape::Update,
        SegmentEntry::Fixed(KeyValue::Function(_)) => Shape::Function,
        SegmentEntry::Fixed(KeyValue::PendingApply(_)) => Shape::PendingApply,
        SegmentEntry::Range(_) => Shape::Range,
    }
}

fn entry_time(entry: &SegmentEntry) -> Time {
    match entry {
        SegmentEntry::Fixed(kv) => kv.time().clone(),
        SegmentEntry::Range(_) => Time::NONE,
    }
}

#[derive(Debug, Clone, Copy)]
enum KeyField<'a> {
    Full(&'a [u8]),
    Partial { common: usize, suffix: &'a [u8] },
}

/// Encode one entry, `entry_size` prefix included.
fn encode_entry(
    shape: Shape,
    key: KeyField<'_>,
    access_index: Option<u64>,
    deadline: Option<Deadline>,
    value_slot: Option<(u64, u64)>,
    value_dedup: bool,
    time: &Time,
) -> Vec<u8> {
    let mut body = Vec::new();
    let key_partial = matches!(key, KeyField::Partial { .. });
    encoding::write_signed(encode_id(shape, key_partial, value_dedup), &mut body);
    if let Some(access) = access_index {
        encoding::write_unsigned(access, &mut body);
    }
    match key {
        KeyField::Full(bytes) => {
            encoding::write_unsigned(bytes.len() as u64, &mut body);
            body.extend_from_slice(bytes);
        }
        KeyField::Partial { common, suffix } => {
            encoding::write_unsigned(common as u64, &mut body);
            encoding::write_unsigned(suffix.len() as u64, &mut body);
            body.extend_from_slice(suffix);
        }
    }
    encoding::write_unsigned(deadline.map_or(0, |d| d.nanos()), &mut body);
    if let Some((offset, length)) = value_slot {
        encoding::write_unsigned(offset, &mut body);
        encoding::write_unsigned(length, &mut body);
    }
    body.extend_from_slice(&(time.as_slice().len() as u32).to_le_bytes());
    body.extend_from_slice(time.as_slice());

    let mut entry = Vec::with_capacity(body.len() + encoding::MAX_VARINT_LEN);
    encoding::write_signed(body.len() as i64, &mut entry);
    entry.extend_from_slice(&body);
    entry
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Per-entry record collected for populating the hash and binary-search
/// indexes at segment close.
#[derive(Debug, Clone)]
pub(crate) struct SecondaryIndexEntry {
    pub key: Vec<u8>,
    /// Entry offset within the sorted-index body.
    pub offset: u64,
    pub access_index: u64,
    /// Whether the entry parses without sequential context.
    pub standalone: bool,
    /// Standalone re-encoding for the hash index copied mode.
    pub standalone_bytes: Option<Vec<u8>>,
}

/// Result of closing a sorted-index builder.
pub(crate) struct ClosedSortedIndex {
    pub block: Vec<u8>,
    pub secondary: Vec<SecondaryIndexEntry>,
    pub entry_count: usize,
}

/// Streams sorted entries into an encoded sorted-index body.
pub(crate) struct SortedIndexBuilder {
    config: SortedIndexConfig,
    keep_standalone_bytes: bool,
    entries: Vec<Vec<u8>>,
    bytes_len: usize,
    previous_key: Option<Vec<u8>>,
    previous_had_payload: bool,
    since_reset: usize,
    has_prefix_compressed: bool,
    max_entry_size: usize,
    secondary: Vec<SecondaryIndexEntry>,
}

impl SortedIndexBuilder {
    /// `keep_standalone_bytes` retains a context-free re-encoding of each
    /// entry for the hash index copied mode.
    pub fn new(config: SortedIndexConfig, keep_standalone_bytes: bool) -> Self {
        Self {
            config,
            keep_standalone_bytes,
            entries: Vec::new(),
            bytes_len: 0,
            previous_key: None,
            previous_had_payload: false,
            since_reset: 0,
            has_prefix_compressed: false,
            max_entry_size: 0,
            secondary: Vec::new(),
        }
    }

    /// Current encoded size in bytes (pre-normalisation).
    pub fn len(&self) -> usize {
        self.bytes_len
    }

    /// Number of entries added.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Append the next entry in key order. `slot` is its values-block
    /// slot, absent for shapes without a payload.
    pub fn add(&mut self, entry: &SegmentEntry, slot: Option<ValuesSlot>) {
        let shape = shape_of(entry);
        let key = entry.key();
        let time = entry_time(entry);
        let access_index = self.entries.len() as u64;

        let prefix_allowed = self.config.prefix_compression
            && !self.config.normalise_for_binary_search
            && self.since_reset < self.config.prefix_compression_reset_count;
        let (key_field, key_partial) = match (&self.previous_key, prefix_allowed) {
            (Some(previous), true) => {
                let (common, suffix) = slice::compress(previous, key);
                if common > 0 {
                    (KeyField::Partial { common, suffix }, true)
                } else {
                    (KeyField::Full(key), false)
                }
            }
            _ => (KeyField::Full(key), false),
        };

        // A deduplicated slot is only elided when the reader's previous
        // entry actually carries one to inherit.
        let value_dedup = slot.is_some_and(|s| s.reused) && self.previous_had_payload;
        let explicit_slot = match slot {
            Some(s) if value_dedup => {
                debug_assert!(s.reused);
                None
            }
            Some(s) => Some((s.offset, s.length)),
            None => None,
        };

        let encoded = encode_entry(
            shape,
            key_field,
            self.config.enable_access_position_index.then_some(access_index),
            entry.nearest_deadline(),
            explicit_slot,
            value_dedup,
            &time,
        );

        let standalone = !key_partial && !value_dedup;
        // The re-encoding is context-free: full key, explicit value slot,
        // and always an access index, whatever the block-level flags.
        let standalone_bytes = if self.keep_standalone_bytes {
            Some(encode_entry(
                shape,
                KeyField::Full(key),
                Some(access_index),
                entry.nearest_deadline(),
                slot.map(|s| (s.offset, s.length)),
                false,
                &time,
            ))
        } else {
            None
        };

        self.secondary.push(SecondaryIndexEntry {
            key: key.to_vec(),
            offset: self.bytes_len as u64,
            access_index,
            standalone,
            standalone_bytes,
        });

        if key_partial {
            self.has_prefix_compressed = true;
            self.since_reset += 1;
        } else {
            self.since_reset = 0;
        }
        self.previous_key = Some(key.to_vec());
        self.previous_had_payload = slot.is_some();
        self.max_entry_size = self.max_entry_size.max(encoded.len());
        self.bytes_len += encoded.len();
        self.entries.push(encoded);
    }

    /// Frame the block, normalising if configured.
    pub fn close(mut self) -> Result<ClosedSortedIndex, SegmentError> {
        let normalised = self.config.normalise_for_binary_search;
        let mut body = Vec::with_capacity(self.bytes_len + self.entries.len() + 1);

        if normalised {
            let width = self.max_entry_size + 1;
            for (index, entry) in self.entries.iter().enumerate() {
                let padding = width - 1 - entry.len();
                body.extend(std::iter::repeat_n(0u8, padding));
                body.push(NORMALISED_SEPARATOR);
                body.extend_from_slice(entry);
                self.secondary[index].offset = (index * width) as u64;
            }
        } else {
            for entry in &self.entries {
                body.extend_from_slice(entry);
            }
        }
        encoding::write_signed(END_SENTINEL, &mut body);

        let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
        header.push(u8::from(self.config.enable_access_position_index));
        header.push(u8::from(self.has_prefix_compressed));
        header.push(u8::from(normalised));
        header.push(u8::from(normalised));
        header.push(u8::from(!self.config.prefix_compression || normalised));
        header.push(u8::from(self.config.enable_partial_read));
        encoding::write_unsigned(self.max_entry_size as u64, &mut header);

        let block = block::close_block(&header, &body, self.config.compression, MAX_HEADER_SIZE)?;
        Ok(ClosedSortedIndex {
            block,
            secondary: self.secondary,
            entry_count: self.entries.len(),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Decoded sorted-index specific header.
///
/// The persisted header also carries `has_prefix_compression`,
/// `is_pre_normalised`, and `enable_partial_read` flags; they are
/// validated during parse but not needed afterwards — this reader always
/// parses entries fully.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SortedIndexHeader {
    pub enable_access_position_index: bool,
    pub normalised: bool,
    pub disable_key_prefix_compression: bool,
    pub max_entry_size: usize,
}

impl SortedIndexHeader {
    pub fn parse(header: &[u8]) -> Result<Self, SegmentError> {
        let mut reader = Reader::new(header);
        let read_bool = |reader: &mut Reader<'_>| -> Result<bool, SegmentError> {
            match reader.read_u8()? {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(SegmentError::Corruption(format!(
                    "invalid bool byte 0x{other:02X} in sorted-index header"
                ))),
            }
        };
        let enable_access_position_index = read_bool(&mut reader)?;
        let has_prefix_compression = read_bool(&mut reader)?;
        let normalised = read_bool(&mut reader)?;
        let is_pre_normalised = read_bool(&mut reader)?;
        let disable_key_prefix_compression = read_bool(&mut reader)?;
        let _enable_partial_read = read_bool(&mut reader)?;
        let max_entry_size = usize::try_from(reader.read_unsigned()?)
            .map_err(|_| SegmentError::Corruption("max entry size exceeds usize".to_string()))?;

        if is_pre_normalised && !normalised {
            return Err(SegmentError::Corruption(
                "pre-normalised flag on a non-normalised block".to_string(),
            ));
        }
        if has_prefix_compression && disable_key_prefix_compression {
            return Err(SegmentError::Corruption(
                "prefix-compressed block that declares prefix compression disabled".to_string(),
            ));
        }

        Ok(Self {
            enable_access_position_index,
            normalised,
            disable_key_prefix_compression,
            max_entry_size,
        })
    }

    /// Slot width of a normalised block.
    fn slot_width(&self) -> usize {
        self.max_entry_size + 1
    }
}

/// Read-side view over a sorted-index body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SortedIndexReader<'a> {
    header: SortedIndexHeader,
    body: &'a [u8],
}

impl<'a> SortedIndexReader<'a> {
    pub fn new(header: SortedIndexHeader, body: &'a [u8]) -> Self {
        Self { header, body }
    }

    /// Parse the entry at `offset`.
    ///
    /// `previous` supplies the sequential context needed by
    /// prefix-compressed keys and deduplicated value slots; entries that
    /// require it fail with a corruption error when it is absent.
    /// Returns `None` at the end-of-block sentinel.
    pub fn read_at(
        &self,
        offset: u64,
        previous: Option<&RawEntry>,
    ) -> Result<Option<RawEntry>, SegmentError> {
        let start = usize::try_from(offset)
            .map_err(|_| SegmentError::Corruption("entry offset exceeds usize".to_string()))?;
        if start >= self.body.len() {
            return Err(SegmentError::Corruption(format!(
                "entry offset {start} outside sorted-index body of {} bytes",
                self.body.len()
            )));
        }

        let mut pos = start;
        if self.header.normalised {
            while pos < self.body.len() && self.body[pos] == 0 {
                pos += 1;
            }
            if pos >= self.body.len() || self.body[pos] != NORMALISED_SEPARATOR {
                return Err(SegmentError::Corruption(
                    "normalised slot without separator".to_string(),
                ));
            }
            pos += 1;
            // The final sentinel byte is also 0x01; a slot that contains
            // nothing after the separator is the block end.
            if pos >= self.body.len() {
                return Ok(None);
            }
        }

        let mut reader = Reader::with_position(self.body, pos);
        let entry_size = reader.read_signed()?;
        if entry_size == END_SENTINEL {
            return Ok(None);
        }
        let entry_size = usize::try_from(entry_size)
            .map_err(|_| SegmentError::Corruption(format!("negative entry size {entry_size}")))?;
        let body_start = reader.position();

        let id = decode_id(reader.read_signed()?)?;
        if id.key_partial && self.header.disable_key_prefix_compression {
            return Err(SegmentError::Corruption(
                "prefix-compressed entry in a block that disables it".to_string(),
            ));
        }
        let access_index = if self.header.enable_access_position_index {
            Some(reader.read_unsigned()?)
        } else {
            None
        };

        let key = if id.key_partial {
            let common = read_len(&mut reader)?;
            let suffix_len = read_len(&mut reader)?;
            let suffix = reader.read_bytes(suffix_len)?;
            let previous = previous.ok_or_else(|| {
                SegmentError::Corruption(
                    "prefix-compressed entry without sequential context".to_string(),
                )
            })?;
            slice::decompress(&previous.key, suffix, common)?
        } else {
            let key_len = read_len(&mut reader)?;
            reader.read_bytes(key_len)?.to_vec()
        };

        let deadline = Deadline::from_nanos(reader.read_unsigned()?);

        let value_slot = if !id.shape.has_payload() {
            None
        } else if id.value_dedup {
            let previous = previous.ok_or_else(|| {
                SegmentError::Corruption(
                    "deduplicated value without sequential context".to_string(),
                )
            })?;
            Some(previous.value_slot.ok_or_else(|| {
                SegmentError::Corruption(
                    "deduplicated value after an entry without one".to_string(),
                )
            })?)
        } else {
            let value_offset = reader.read_unsigned()?;
            let value_length = reader.read_unsigned()?;
            Some((value_offset, value_length))
        };

        let time_len = usize::try_from(reader.read_u32_le()?)
            .map_err(|_| SegmentError::Corruption("time length exceeds usize".to_string()))?;
        let time = Time::new(reader.read_bytes(time_len)?.to_vec());

        let consumed = reader.position() - body_start;
        if consumed != entry_size {
            return Err(SegmentError::EntrySize {
                declared: entry_size,
                actual: consumed,
            });
        }

        let next_offset = if self.header.normalised {
            let next = start as u64 + self.header.slot_width() as u64;
            // The body ends with a one-byte sentinel past the last slot.
            ((next as usize) < self.body.len() - 1).then_some(next)
        } else {
            let next_pos = reader.position();
            match Reader::with_position(self.body, next_pos).read_signed() {
                Ok(END_SENTINEL) => None,
                _ => Some(next_pos as u64),
            }
        };

        Ok(Some(RawEntry {
            shape: id.shape,
            key,
            deadline,
            value_slot,
            time,
            next_offset,
            access_index,
        }))
    }

    /// Parse an entry from a standalone byte string (hash-index copied
    /// mode). Returns the entry and its encoded length.
    pub fn read_standalone(bytes: &[u8]) -> Result<(RawEntry, usize), SegmentError> {
        let header = SortedIndexHeader {
            enable_access_position_index: true,
            normalised: false,
            disable_key_prefix_compression: true,
            max_entry_size: bytes.len(),
        };
        // Standalone entries always carry the access index and never use
        // sequential context.
        let reader = SortedIndexReader::new(header, bytes);
        let entry = reader.read_at(0, None)?.ok_or_else(|| {
            SegmentError::Corruption("standalone entry is an end sentinel".to_string())
        })?;
        let mut cursor = Reader::new(bytes);
        let size = cursor.read_signed()?;
        let size = usize::try_from(size)
            .map_err(|_| SegmentError::Corruption("negative standalone entry size".to_string()))?;
        Ok((entry, cursor.position() + size))
    }
}

// ------------------------------------------------------------------------------------------------
// Matchers
// ------------------------------------------------------------------------------------------------

/// The traversal operation a matcher drives toward.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MatchOp<'k> {
    /// Exact key or covering range.
    Get(&'k [u8]),
    /// Least entry strictly greater than the key.
    Higher(&'k [u8]),
    /// Greatest entry strictly less than the key.
    Lower(&'k [u8]),
}

/// Outcome of matching one entry.
#[derive(Debug)]
pub(crate) enum MatchResult {
    /// The entry satisfies the operation.
    Matched(SegmentEntry),
    /// Target is further ahead but fetching is not permitted.
    BehindStopped,
    /// Target is further ahead; read the successor and rematch.
    BehindFetchNext,
    /// The target cannot be found; the argument is the first entry past
    /// it, when one was seen.
    AheadOrEnd(Option<SegmentEntry>),
}

/// Match `entry` against the operation.
///
/// `has_more` reports whether a successor entry exists; `fetch_allowed`
/// distinguishes seeking matchers from match-only invocations (hash-index
/// candidate checks), which never request further reads.
pub(crate) fn match_entry(
    op: MatchOp<'_>,
    comparator: &dyn KeyComparator,
    entry: &SegmentEntry,
    has_more: bool,
    fetch_allowed: bool,
) -> MatchResult {
    let behind = || {
        if !fetch_allowed {
            MatchResult::BehindStopped
        } else if has_more {
            MatchResult::BehindFetchNext
        } else {
            MatchResult::AheadOrEnd(None)
        }
    };

    match op {
        MatchOp::Get(key) => {
            if entry.covers(key, comparator) {
                MatchResult::Matched(entry.clone())
            } else if comparator.cmp_keys(entry.key(), key) == Ordering::Greater {
                MatchResult::AheadOrEnd(Some(entry.clone()))
            } else {
                behind()
            }
        }
        MatchOp::Higher(key) => {
            let is_higher = match entry {
                SegmentEntry::Fixed(kv) => {
                    comparator.cmp_keys(kv.key(), key) == Ordering::Greater
                }
                // A range holds keys above the target while its exclusive
                // end lies beyond the target.
                SegmentEntry::Range(range) => {
                    comparator.cmp_keys(key, &range.to_key) == Ordering::Less
                }
            };
            if is_higher {
                MatchResult::Matched(entry.clone())
            } else {
                behind()
            }
        }
        MatchOp::Lower(key) => {
            let is_lower = match entry {
                SegmentEntry::Fixed(kv) => comparator.cmp_keys(kv.key(), key) == Ordering::Less,
                // A range holds keys below the target while its inclusive
                // start lies before the target.
                SegmentEntry::Range(range) => {
                    comparator.cmp_keys(&range.from_key, key) == Ordering::Less
                }
            };
            if is_lower {
                if has_more && fetch_allowed {
                    // The caller records this candidate and keeps walking.
                    MatchResult::BehindFetchNext
                } else {
                    MatchResult::Matched(entry.clone())
                }
            } else {
                MatchResult::AheadOrEnd(None)
            }
        }
    }
}
