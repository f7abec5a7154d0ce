//! Multi-segment container: several segments in one file.
//!
//! Layout:
//!
//! ```text
//! [0x02 format byte]
//! [list_segment_size : varuint]
//! [list segment  — a normal segment whose entries describe the children]
//! [child segment bytes, concatenated]
//! ```
//!
//! Each list entry is a Put keyed by a child's min-key whose value holds
//! the child's byte offset (relative to the end of the list segment) and
//! size.  Lookups route through the list: the child owning a key is the
//! one with the greatest min-key at or below it.

use std::fs::{File, OpenOptions, rename};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::encoding;
use crate::kv::{KeyComparator, KeyValue, Put, SegmentEntry, Time};
use crate::slice::Reader;

use super::builder::{ClosedSegment, SegmentAssembler, SegmentConfig};
use super::{BlockCacheStrategy, Segment, SegmentError};

/// Leading format byte of a multi-segment file.
pub const MANY_SEGMENT_FORMAT: u8 = 0x02;

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Pack previously-closed segments into one multi-segment file.
///
/// `children` must be ascending and non-overlapping by min-key; their
/// files are read back and concatenated after the generated list segment.
pub fn write_many(
    path: impl AsRef<Path>,
    children: &[ClosedSegment],
    list_config: &SegmentConfig,
    comparator: &dyn KeyComparator,
) -> Result<(), SegmentError> {
    if children.is_empty() {
        return Err(SegmentError::Corruption(
            "a multi-segment file needs at least one child".to_string(),
        ));
    }

    let mut child_bytes = Vec::with_capacity(children.len());
    for child in children {
        child_bytes.push(std::fs::read(&child.path)?);
    }

    let mut assembler = SegmentAssembler::new(list_config);
    let mut relative_offset = 0u64;
    let mut previous_key: Option<&[u8]> = None;
    for (child, bytes) in children.iter().zip(&child_bytes) {
        if let Some(previous) = previous_key
            && comparator.cmp_keys(&child.min_key, previous).is_le()
        {
            return Err(SegmentError::Corruption(
                "multi-segment children out of min-key order".to_string(),
            ));
        }
        previous_key = Some(&child.min_key);

        let mut locator = Vec::new();
        encoding::write_unsigned(relative_offset, &mut locator);
        encoding::write_unsigned(bytes.len() as u64, &mut locator);
        relative_offset += bytes.len() as u64;

        assembler.add(&SegmentEntry::Fixed(KeyValue::Put(Put {
            key: child.min_key.clone(),
            value: Some(locator),
            time: Time::NONE,
            deadline: None,
        })));
    }

    let list = assembler.close()?.ok_or_else(|| {
        SegmentError::Corruption("empty list segment for multi-segment file".to_string())
    })?;

    let final_path = path.as_ref();
    let tmp_path = final_path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;

    let mut prefix = vec![MANY_SEGMENT_FORMAT];
    encoding::write_unsigned(list.bytes.len() as u64, &mut prefix);
    file.write_all(&prefix)?;
    file.write_all(&list.bytes)?;
    for bytes in &child_bytes {
        file.write_all(bytes)?;
    }
    file.flush()?;
    file.sync_all()?;
    drop(file);
    rename(&tmp_path, final_path)?;

    tracing::debug!(
        path = %final_path.display(),
        children = children.len(),
        "multi-segment file written"
    );
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

struct Child {
    min_key: Vec<u8>,
    segment: Segment,
}

/// An open multi-segment file.
pub struct ManySegments {
    path: PathBuf,
    comparator: Arc<dyn KeyComparator>,
    children: Vec<Child>,
}

impl ManySegments {
    /// Open a multi-segment file with synchronised block caches.
    pub fn open(
        path: impl AsRef<Path>,
        comparator: Arc<dyn KeyComparator>,
    ) -> Result<Self, SegmentError> {
        Self::open_with(path, comparator, |_| crate::cache::CacheStrategy::Synchronised)
    }

    /// Open a multi-segment file with a per-block cache strategy applied
    /// to the list segment and every child.
    pub fn open_with(
        path: impl AsRef<Path>,
        comparator: Arc<dyn KeyComparator>,
        strategy: BlockCacheStrategy,
    ) -> Result<Self, SegmentError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = Arc::new(unsafe { Mmap::map(&file)? });

        let mut reader = Reader::new(&mmap[..]);
        match reader.read_u8()? {
            MANY_SEGMENT_FORMAT => {}
            other => {
                return Err(SegmentError::Corruption(format!(
                    "not a multi-segment file (format byte 0x{other:02X})"
                )));
            }
        }
        let list_size = usize::try_from(reader.read_unsigned()?)
            .map_err(|_| SegmentError::Corruption("list segment size exceeds usize".to_string()))?;
        let list_offset = reader.position();
        let children_base = list_offset + list_size;

        let list = Segment::from_mapped(
            Arc::clone(&mmap),
            list_offset,
            list_size,
            Arc::clone(&comparator),
            strategy,
        )?;

        let mut children = Vec::new();
        for entry in list.read_all()? {
            let SegmentEntry::Fixed(KeyValue::Put(put)) = entry else {
                return Err(SegmentError::Corruption(
                    "list segment holds a non-Put entry".to_string(),
                ));
            };
            let locator = put.value.as_deref().ok_or_else(|| {
                SegmentError::Corruption("list entry without a child locator".to_string())
            })?;
            let mut locator = Reader::new(locator);
            let offset = usize::try_from(locator.read_unsigned()?)
                .map_err(|_| SegmentError::Corruption("child offset exceeds usize".to_string()))?;
            let size = usize::try_from(locator.read_unsigned()?)
                .map_err(|_| SegmentError::Corruption("child size exceeds usize".to_string()))?;
            let segment = Segment::from_mapped(
                Arc::clone(&mmap),
                children_base + offset,
                size,
                Arc::clone(&comparator),
                strategy,
            )?;
            children.push(Child {
                min_key: put.key,
                segment,
            });
        }
        if children.is_empty() {
            return Err(SegmentError::Corruption(
                "multi-segment file without children".to_string(),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            comparator,
            children,
        })
    }

    /// The file this container was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of child segments.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Index of the child owning `key`: greatest min-key at or below it.
    fn owner_index(&self, key: &[u8]) -> Option<usize> {
        let partition = self
            .children
            .partition_point(|child| self.comparator.cmp_keys(&child.min_key, key).is_le());
        partition.checked_sub(1)
    }

    /// Point lookup routed to the owning child.
    pub fn get(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        match self.owner_index(key) {
            Some(index) => self.children[index].segment.get(key),
            None => Ok(None),
        }
    }

    /// The least entry strictly greater than `key` across all children.
    pub fn higher(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        let next_index = match self.owner_index(key) {
            Some(index) => {
                if let Some(entry) = self.children[index].segment.higher(key)? {
                    return Ok(Some(entry));
                }
                index + 1
            }
            None => 0,
        };
        match self.children.get(next_index) {
            // Every key of a later child lies above the target.
            Some(child) => child.segment.first_entry(),
            None => Ok(None),
        }
    }

    /// The greatest entry strictly less than `key` across all children.
    pub fn lower(&self, key: &[u8]) -> Result<Option<SegmentEntry>, SegmentError> {
        let Some(index) = self.owner_index(key) else {
            return Ok(None);
        };
        if let Some(entry) = self.children[index].segment.lower(key)? {
            return Ok(Some(entry));
        }
        match index.checked_sub(1) {
            Some(previous) => self.children[previous].segment.last_entry(),
            None => Ok(None),
        }
    }

    /// First entry of the first child.
    pub fn first_entry(&self) -> Result<Option<SegmentEntry>, SegmentError> {
        match self.children.first() {
            Some(child) => child.segment.first_entry(),
            None => Ok(None),
        }
    }

    /// Last entry of the last child.
    pub fn last_entry(&self) -> Result<Option<SegmentEntry>, SegmentError> {
        match self.children.last() {
            Some(child) => child.segment.last_entry(),
            None => Ok(None),
        }
    }
}
