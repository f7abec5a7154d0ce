//! Key-value entity model.
//!
//! Every persisted entity carries a key, a logical [`Time`], and an
//! optional expiry [`Deadline`].  Five fixed shapes exist:
//!
//! | Shape | Extra data | Meaning |
//! |-------|-----------|---------|
//! | [`Put`] | optional value | Committed value, visible to readers. |
//! | [`Remove`] | — | Tombstone; with a deadline it is an expiry, without one an immediate remove. |
//! | [`Update`] | optional value | Overwrites the current value only if a Put exists. |
//! | [`Function`] | function id | Applies a registered pure function to the resolved value. |
//! | [`PendingApply`] | apply sequence | A composed mutation waiting for a resolvable base. |
//!
//! [`Apply`] is the keyless subset {Remove, Update, Function} stored inside
//! a [`PendingApply`] or as a range value.  A [`PendingApply`]'s sequence is
//! non-empty, contains only apply shapes, is ascending in time, and a
//! single-element sequence collapses to its inner shape — all enforced by
//! [`PendingApply::from_applies`].
//!
//! At the segment layer a [`SegmentEntry`] is either a fixed key-value or a
//! [`RangeEntry`] covering `[from_key, to_key)` whose applies act lazily on
//! every key inside the range.
//!
//! # Ordering contract
//!
//! A caller-supplied [`KeyComparator`] totally orders keys; a
//! [`TimeOrder`] totally orders per-key logical times.  Within one key,
//! higher-time entries subsume lower-time entries.  [`LexicographicOrder`]
//! implements both using plain byte order.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ------------------------------------------------------------------------------------------------
// Ordering contracts
// ------------------------------------------------------------------------------------------------

/// Total order on keys. Governs every key comparison in the crate.
pub trait KeyComparator: Send + Sync {
    /// Compare two keys.
    fn cmp_keys(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Total order on per-key logical times.
pub trait TimeOrder: Send + Sync {
    /// Compare two times.
    fn cmp_times(&self, a: &Time, b: &Time) -> Ordering;
}

/// Plain byte-wise ordering, the default for both keys and times.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicographicOrder;

impl KeyComparator for LexicographicOrder {
    fn cmp_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

impl TimeOrder for LexicographicOrder {
    fn cmp_times(&self, a: &Time, b: &Time) -> Ordering {
        a.as_slice().cmp(b.as_slice())
    }
}

// ------------------------------------------------------------------------------------------------
// Time
// ------------------------------------------------------------------------------------------------

/// Opaque per-entry logical ordering token.
///
/// The only operation the core performs on a time is comparison through a
/// [`TimeOrder`]; the bytes themselves are caller-defined.  An empty time
/// compares lowest under the default order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Time(Vec<u8>);

impl Time {
    /// The empty (lowest) time.
    pub const NONE: Time = Time(Vec::new());

    /// Wrap caller-supplied time bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// A time whose byte order matches the numeric order of `counter`.
    pub fn from_counter(counter: u64) -> Self {
        Self(counter.to_be_bytes().to_vec())
    }

    /// The raw time bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is the empty time.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

// ------------------------------------------------------------------------------------------------
// Deadline
// ------------------------------------------------------------------------------------------------

/// Absolute expiry point with nanosecond resolution.
///
/// Persisted as an unsigned varint of nanoseconds since the UNIX epoch;
/// zero is the wire sentinel for "no deadline".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(u64);

impl Deadline {
    /// A deadline at `nanos` since the UNIX epoch. Zero means absent and
    /// yields `None`.
    pub fn from_nanos(nanos: u64) -> Option<Self> {
        (nanos != 0).then_some(Self(nanos))
    }

    /// A deadline `ttl` from now.
    pub fn after(ttl: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64;
        Self(now.saturating_add(ttl.as_nanos() as u64).max(1))
    }

    /// Nanoseconds since the UNIX epoch.
    pub fn nanos(&self) -> u64 {
        self.0
    }

    /// Whether this deadline has passed at `now_nanos`.
    pub fn has_passed_at(&self, now_nanos: u64) -> bool {
        self.0 <= now_nanos
    }
}

/// The earlier of two optional deadlines.
pub fn nearest_deadline(a: Option<Deadline>, b: Option<Deadline>) -> Option<Deadline> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (some, None) | (None, some) => some,
    }
}

// ------------------------------------------------------------------------------------------------
// Fixed shapes
// ------------------------------------------------------------------------------------------------

/// A committed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    /// Entry key.
    pub key: Vec<u8>,
    /// Stored value; `None` stores "key present, no value".
    pub value: Option<Vec<u8>>,
    /// Logical time of this write.
    pub time: Time,
    /// Optional expiry.
    pub deadline: Option<Deadline>,
}

/// A tombstone or expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remove {
    /// Entry key.
    pub key: Vec<u8>,
    /// Logical time of this write.
    pub time: Time,
    /// `None` = permanent remove; `Some` = expire at the deadline.
    pub deadline: Option<Deadline>,
}

/// An overwrite that only lands on an existing Put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Entry key.
    pub key: Vec<u8>,
    /// Replacement value.
    pub value: Option<Vec<u8>>,
    /// Logical time of this write.
    pub time: Time,
    /// Optional expiry; when absent the merge inherits the old one.
    pub deadline: Option<Deadline>,
}

/// A deferred invocation of a registered function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Entry key.
    pub key: Vec<u8>,
    /// Registered function id.
    pub function: Vec<u8>,
    /// Logical time of this write.
    pub time: Time,
    /// Optional expiry carried alongside the invocation.
    pub deadline: Option<Deadline>,
}

// ------------------------------------------------------------------------------------------------
// Apply — the keyless subset nested in PendingApply and ranges
// ------------------------------------------------------------------------------------------------

/// One deferred mutation inside a [`PendingApply`] or range value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apply {
    /// Deferred remove or expiry.
    Remove {
        /// Logical time.
        time: Time,
        /// `None` = permanent remove; `Some` = expiry.
        deadline: Option<Deadline>,
    },
    /// Deferred overwrite.
    Update {
        /// Replacement value.
        value: Option<Vec<u8>>,
        /// Logical time.
        time: Time,
        /// Optional expiry.
        deadline: Option<Deadline>,
    },
    /// Deferred function invocation.
    Function {
        /// Registered function id.
        function: Vec<u8>,
        /// Logical time.
        time: Time,
        /// Optional expiry.
        deadline: Option<Deadline>,
    },
}

impl Apply {
    /// Logical time of this apply.
    pub fn time(&self) -> &Time {
        match self {
            Apply::Remove { time, .. } | Apply::Update { time, .. } | Apply::Function { time, .. } => {
                time
            }
        }
    }

    /// Deadline of this apply, if any.
    pub fn deadline(&self) -> Option<Deadline> {
        match self {
            Apply::Remove { deadline, .. }
            | Apply::Update { deadline, .. }
            | Apply::Function { deadline, .. } => *deadline,
        }
    }

    /// Re-attach a key, producing the equivalent fixed key-value.
    pub fn into_key_value(self, key: Vec<u8>) -> KeyValue {
        match self {
            Apply::Remove { time, deadline } => KeyValue::Remove(Remove {
                key,
                time,
                deadline,
            }),
            Apply::Update {
                value,
                time,
                deadline,
            } => KeyValue::Update(Update {
                key,
                value,
                time,
                deadline,
            }),
            Apply::Function {
                function,
                time,
                deadline,
            } => KeyValue::Function(Function {
                key,
                function,
                time,
                deadline,
            }),
        }
    }

    /// The function id if this is a function apply.
    pub fn function_id(&self) -> Option<&[u8]> {
        match self {
            Apply::Function { function, .. } => Some(function),
            _ => None,
        }
    }

    /// Whether this apply removes (permanently or by expiry).
    pub fn is_remove(&self) -> bool {
        matches!(self, Apply::Remove { .. })
    }
}

impl From<Remove> for Apply {
    fn from(remove: Remove) -> Self {
        Apply::Remove {
            time: remove.time,
            deadline: remove.deadline,
        }
    }
}

impl From<Update> for Apply {
    fn from(update: Update) -> Self {
        Apply::Update {
            value: update.value,
            time: update.time,
            deadline: update.deadline,
        }
    }
}

impl From<Function> for Apply {
    fn from(function: Function) -> Self {
        Apply::Function {
            function: function.function,
            time: function.time,
            deadline: function.deadline,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PendingApply
// ------------------------------------------------------------------------------------------------

/// A composed mutation sequence waiting for a resolvable base Put.
///
/// Invariants: the sequence is non-empty, ascending in time, and a
/// single-element sequence never exists as a `PendingApply` (it collapses
/// to its inner shape).  Construct through [`PendingApply::from_applies`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApply {
    /// Entry key.
    pub key: Vec<u8>,
    applies: Vec<Apply>,
}

impl PendingApply {
    /// Build a key-value from an apply sequence.
    ///
    /// Returns `None` for an empty sequence; collapses a single apply to
    /// its direct shape; otherwise yields a `PendingApply`.
    pub fn from_applies(key: Vec<u8>, mut applies: Vec<Apply>) -> Option<KeyValue> {
        match applies.len() {
            0 => None,
            1 => applies.pop().map(|apply| apply.into_key_value(key)),
            _ => Some(KeyValue::PendingApply(PendingApply { key, applies })),
        }
    }

    /// The inner apply sequence, ascending in time.
    pub fn applies(&self) -> &[Apply] {
        &self.applies
    }

    /// Consume into the inner apply sequence.
    pub fn into_applies(self) -> Vec<Apply> {
        self.applies
    }

    /// Time of the last (highest) apply.
    pub fn time(&self) -> &Time {
        // Non-empty by construction; fall back to the lowest time rather
        // than panicking if the invariant is ever violated.
        match self.applies.last() {
            Some(apply) => apply.time(),
            None => {
                static NONE: Time = Time::NONE;
                &NONE
            }
        }
    }

    /// The nearest deadline across the sequence.
    pub fn nearest_deadline(&self) -> Option<Deadline> {
        self.applies
            .iter()
            .fold(None, |acc, apply| nearest_deadline(acc, apply.deadline()))
    }
}

// ------------------------------------------------------------------------------------------------
// KeyValue
// ------------------------------------------------------------------------------------------------

/// A fixed (non-range) key-value in one of the five shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    /// Committed value.
    Put(Put),
    /// Tombstone or expiry.
    Remove(Remove),
    /// Conditional overwrite.
    Update(Update),
    /// Deferred function invocation.
    Function(Function),
    /// Composed mutation sequence.
    PendingApply(PendingApply),
}

impl KeyValue {
    /// Entry key.
    pub fn key(&self) -> &[u8] {
        match self {
            KeyValue::Put(kv) => &kv.key,
            KeyValue::Remove(kv) => &kv.key,
            KeyValue::Update(kv) => &kv.key,
            KeyValue::Function(kv) => &kv.key,
            KeyValue::PendingApply(kv) => &kv.key,
        }
    }

    /// Logical time; for a pending apply, the time of its last apply.
    pub fn time(&self) -> &Time {
        match self {
            KeyValue::Put(kv) => &kv.time,
            KeyValue::Remove(kv) => &kv.time,
            KeyValue::Update(kv) => &kv.time,
            KeyValue::Function(kv) => &kv.time,
            KeyValue::PendingApply(kv) => kv.time(),
        }
    }

    /// Deadline; for a pending apply, the nearest across the sequence.
    pub fn deadline(&self) -> Option<Deadline> {
        match self {
            KeyValue::Put(kv) => kv.deadline,
            KeyValue::Remove(kv) => kv.deadline,
            KeyValue::Update(kv) => kv.deadline,
            KeyValue::Function(kv) => kv.deadline,
            KeyValue::PendingApply(kv) => kv.nearest_deadline(),
        }
    }

    /// Whether this is a committed Put.
    pub fn is_put(&self) -> bool {
        matches!(self, KeyValue::Put(_))
    }

    /// Convert to the keyless apply shape, if this shape has one.
    ///
    /// Puts have no apply shape; a pending apply flattens to its sequence
    /// via [`PendingApply::into_applies`] instead.
    pub fn into_apply(self) -> Option<Apply> {
        match self {
            KeyValue::Remove(kv) => Some(kv.into()),
            KeyValue::Update(kv) => Some(kv.into()),
            KeyValue::Function(kv) => Some(kv.into()),
            KeyValue::Put(_) | KeyValue::PendingApply(_) => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Range entries
// ------------------------------------------------------------------------------------------------

/// A deferred mutation covering every key in `[from_key, to_key)`.
///
/// The applies are resolved lazily against the underlying value of each
/// covered key when read or compacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry {
    /// Inclusive start of the covered range.
    pub from_key: Vec<u8>,
    /// Exclusive end of the covered range.
    pub to_key: Vec<u8>,
    /// Non-empty, time-ascending apply sequence.
    pub applies: Vec<Apply>,
}

impl RangeEntry {
    /// Whether `key` falls inside `[from_key, to_key)`.
    pub fn contains(&self, key: &[u8], comparator: &dyn KeyComparator) -> bool {
        comparator.cmp_keys(&self.from_key, key) != Ordering::Greater
            && comparator.cmp_keys(key, &self.to_key) == Ordering::Less
    }

    /// Whether any apply in the range removes.
    pub fn has_remove(&self) -> bool {
        self.applies.iter().any(Apply::is_remove)
    }

    /// The nearest deadline across the range's applies.
    pub fn nearest_deadline(&self) -> Option<Deadline> {
        self.applies
            .iter()
            .fold(None, |acc, apply| nearest_deadline(acc, apply.deadline()))
    }
}

// ------------------------------------------------------------------------------------------------
// SegmentEntry
// ------------------------------------------------------------------------------------------------

/// One entry of a segment's sorted set: a fixed key-value or a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEntry {
    /// A fixed key-value.
    Fixed(KeyValue),
    /// A range mutation.
    Range(RangeEntry),
}

impl SegmentEntry {
    /// The sort key: the fixed key, or the range's from-key.
    pub fn key(&self) -> &[u8] {
        match self {
            SegmentEntry::Fixed(kv) => kv.key(),
            SegmentEntry::Range(range) => &range.from_key,
        }
    }

    /// Nearest deadline carried by this entry.
    pub fn nearest_deadline(&self) -> Option<Deadline> {
        match self {
            SegmentEntry::Fixed(kv) => kv.deadline(),
            SegmentEntry::Range(range) => range.nearest_deadline(),
        }
    }

    /// Whether this entry covers `key`: exact match for fixed entries,
    /// interval containment for ranges.
    pub fn covers(&self, key: &[u8], comparator: &dyn KeyComparator) -> bool {
        match self {
            SegmentEntry::Fixed(kv) => comparator.cmp_keys(kv.key(), key) == Ordering::Equal,
            SegmentEntry::Range(range) => range.contains(key, comparator),
        }
    }
}
