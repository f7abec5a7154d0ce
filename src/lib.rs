//! # basaltdb
//!
//! An embedded, ordered key-value **segment core**: the immutable on-disk
//! segment format and the merge algebra of a log-structured merge tree.
//! This crate is the storage heart an LSM engine builds on — it owns the
//! bytes and the reconciliation semantics, while memory tables, WALs, and
//! compaction scheduling live with the caller.
//!
//! ## Architecture
//!
//! ```text
//!            sorted entries (from a memory table / compaction)
//!                              │
//!                              ▼
//!                      ┌──────────────┐
//!                      │ SegmentWriter │──► closed segment files
//!                      └──────────────┘
//!   ┌───────────────────────────────────────────────────────┐
//!   │ Segment file                                          │
//!   │  [values][sorted index][hash][binary search][bloom]   │
//!   │  [footer · reversed offset · 0x01]                    │
//!   └───────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!            ┌─────────────────────────────────────┐
//!            │ Segment reader                      │
//!            │  bloom → hash → binary search → scan │
//!            └─────────────────────────────────────┘
//!                              │
//!                              ▼
//!                  merge algebra (Merger) resolves
//!                  Put/Remove/Update/Function chains
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`kv`] | Key-value shapes: Put, Remove, Update, Function, PendingApply, ranges |
//! | [`merge`] | Reconciles newer mutations with existing state; function registry |
//! | [`segment`] | Immutable segment files — writer, reader, and every block format |
//! | [`encoding`] | Varint codec family backing the wire format |
//! | [`slice`] | Cursor reads and key prefix compression |
//! | [`cache`] | Lazy single-value cells with synchronised / single-flight modes |
//!
//! ## Key features
//!
//! - **Logical time ordering** — every mutation carries an opaque time
//!   token; per key, the merge algebra makes the highest time win,
//!   exactly once, regardless of arrival order.
//! - **Deferred mutations** — updates, expiries, and user functions
//!   compose into pending chains that collapse when a base value appears.
//! - **Range mutations** — one entry can remove, update, or apply a
//!   function across `[from, to)` lazily.
//! - **Layered point lookups** — bloom filter, perfect-when-lucky hash
//!   index with CRC-checked inlined entries, binary search, and a
//!   bounded sequential scan, in that order.
//! - **Self-describing blocks** — every block carries its own framing,
//!   optional compression, and integrity checks.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use basaltdb::kv::{KeyValue, LexicographicOrder, Put, SegmentEntry, Time};
//! use basaltdb::segment::{Segment, SegmentConfig, SegmentWriter};
//!
//! let comparator = Arc::new(LexicographicOrder);
//!
//! // Write sorted entries into bounded segment files.
//! let mut writer = SegmentWriter::new("/tmp/segments", SegmentConfig::default(), comparator.clone());
//! let entries = (0u64..100).map(|i| {
//!     SegmentEntry::Fixed(KeyValue::Put(Put {
//!         key: format!("key-{i:03}").into_bytes(),
//!         value: Some(b"value".to_vec()),
//!         time: Time::from_counter(i),
//!         deadline: None,
//!     }))
//! });
//! let closed = writer.write_all(entries).unwrap();
//!
//! // Read one back.
//! let segment = Segment::open(&closed[0].path, comparator).unwrap();
//! assert!(segment.get(b"key-042").unwrap().is_some());
//! assert!(segment.higher(b"key-042").unwrap().is_some());
//! ```

pub mod cache;
pub mod encoding;
pub mod kv;
pub mod merge;
pub mod segment;
pub mod slice;
