//! Merge algebra — reconciles a newer mutation with existing state.
//!
//! Compaction and reads both funnel through [`Merger::merge`], which takes
//! a `new` and an `old` key-value for the same key and produces the single
//! resolved shape, or a [`PendingApply`] chain when resolution must wait
//! for a base Put from a lower level.
//!
//! ## Rules
//!
//! - **Monotonicity** — if `new.time ≤ old.time` the result is `old`
//!   unchanged. Every rule below assumes `new.time > old.time`.
//! - **Put** as the newer side always wins outright.
//! - **Remove without deadline** is absorbing: as the newer side it
//!   replaces anything; as the older side it absorbs Update and Function,
//!   re-stamped with the newer time so later merges stay monotone.
//! - **Remove with deadline** (an expiry) lands on the old entry: a Put or
//!   Update without a deadline adopts it; entries that already expire keep
//!   the newer expiry; unresolvable bases (Function, PendingApply) defer.
//! - **Update** overwrites Puts and Updates, inheriting the old deadline
//!   when it carries none; against an expiring Remove it becomes the
//!   surviving Update; against Function/PendingApply it defers.
//! - **Function** invokes the registered function immediately when the old
//!   value is resolved (Put/Update), merging the function's output back at
//!   the new time; otherwise it defers.
//! - **PendingApply** folds its sequence left-to-right over a resolved
//!   base ([`Merger::apply_sequence`]); against another PendingApply the
//!   sequences concatenate.
//!
//! Deferred results always collapse a single-element sequence to its inner
//! shape (see [`PendingApply::from_applies`]).
//!
//! Function invocation requires a [`FunctionStore`]; an unregistered id
//! fails the merge with [`MergeError::FunctionNotFound`] rather than
//! guessing.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::kv::{
    Apply, Deadline, Function, KeyValue, PendingApply, Put, Remove, TimeOrder, Update,
};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the merge algebra.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// A Function shape referenced an id with no registered function.
    #[error("no function registered for id {0:02x?}")]
    FunctionNotFound(Vec<u8>),

    /// An apply sequence was empty where the format guarantees non-empty.
    #[error("empty apply sequence")]
    EmptyApplySequence,
}

// ------------------------------------------------------------------------------------------------
// Function registry
// ------------------------------------------------------------------------------------------------

/// Outcome of invoking a registered function on the resolved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionOutput {
    /// Leave the value unchanged.
    Nothing,
    /// Remove the key permanently.
    Remove,
    /// Replace the value.
    Update(Option<Vec<u8>>),
    /// Expire the key at the given deadline.
    Expire(Deadline),
}

/// A registered pure function applied to a key's resolved state.
pub trait SegmentFunction: Send + Sync {
    /// Compute the outcome for `key` given its current value and deadline.
    fn apply(&self, key: &[u8], value: Option<&[u8]>, deadline: Option<Deadline>)
    -> FunctionOutput;
}

impl<F> SegmentFunction for F
where
    F: Fn(&[u8], Option<&[u8]>, Option<Deadline>) -> FunctionOutput + Send + Sync,
{
    fn apply(
        &self,
        key: &[u8],
        value: Option<&[u8]>,
        deadline: Option<Deadline>,
    ) -> FunctionOutput {
        self(key, value, deadline)
    }
}

/// Lookup of registered functions by id.
pub trait FunctionStore: Send + Sync {
    /// The function registered under `id`, if any.
    fn get(&self, id: &[u8]) -> Option<&dyn SegmentFunction>;
}

/// In-memory function registry keyed by id bytes.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<Vec<u8>, Arc<dyn SegmentFunction>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `id`, replacing any previous registration.
    pub fn register(&mut self, id: impl Into<Vec<u8>>, function: Arc<dyn SegmentFunction>) {
        self.functions.insert(id.into(), function);
    }
}

impl FunctionStore for FunctionRegistry {
    fn get(&self, id: &[u8]) -> Option<&dyn SegmentFunction> {
        self.functions.get(id).map(|f| f.as_ref())
    }
}

/// A store with no registered functions; any Function merge fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFunctions;

impl FunctionStore for NoFunctions {
    fn get(&self, _id: &[u8]) -> Option<&dyn SegmentFunction> {
        None
    }
}

// ------------------------------------------------------------------------------------------------
// Merger
// ------------------------------------------------------------------------------------------------

/// The merge algebra, parameterised by the function store and time order.
pub struct Merger<'a> {
    functions: &'a dyn FunctionStore,
    time_order: &'a dyn TimeOrder,
}

impl<'a> Merger<'a> {
    /// A merger over the given collaborators.
    pub fn new(functions: &'a dyn FunctionStore, time_order: &'a dyn TimeOrder) -> Self {
        Self {
            functions,
            time_order,
        }
    }

    /// Reconcile `new` against `old` for the same key.
    pub fn merge(&self, new: KeyValue, old: KeyValue) -> Result<KeyValue, MergeError> {
        if self
            .time_order
            .cmp_times(new.time(), old.time())
            .is_le()
        {
            return Ok(old);
        }
        match new {
            KeyValue::Put(put) => Ok(KeyValue::Put(put)),
            KeyValue::Remove(remove) => self.merge_remove(remove, old),
            KeyValue::Update(update) => self.merge_update(update, old),
            KeyValue::Function(function) => self.merge_function(function, old),
            KeyValue::PendingApply(pending) => self.merge_pending(pending, old),
        }
    }

    /// Left-fold `applies` over a resolved `base`.
    ///
    /// Walks the sequence in order, merging each apply with the running
    /// resolution.  If the running resolution defers at any step, the
    /// remaining applies are appended to the deferred sequence and the
    /// fold stops.
    pub fn apply_sequence(
        &self,
        applies: Vec<Apply>,
        base: KeyValue,
    ) -> Result<KeyValue, MergeError> {
        let key = base.key().to_vec();
        let mut running = base;
        let mut remaining = applies.into_iter();
        while let Some(apply) = remaining.next() {
            running = self.merge(apply.into_key_value(key.clone()), running)?;
            if let KeyValue::PendingApply(pending) = running {
                let mut combined = pending.into_applies();
                combined.extend(remaining);
                return PendingApply::from_applies(key, combined)
                    .ok_or(MergeError::EmptyApplySequence);
            }
        }
        Ok(running)
    }

    // --------------------------------------------------------------------------------------------
    // Per-shape rules (new.time > old.time throughout)
    // --------------------------------------------------------------------------------------------

    fn merge_remove(&self, new: Remove, old: KeyValue) -> Result<KeyValue, MergeError> {
        let Some(new_deadline) = new.deadline else {
            // Permanent tombstone replaces anything.
            return Ok(KeyValue::Remove(new));
        };
        match old {
            KeyValue::Put(old) => Ok(match old.deadline {
                // Expiry lands on the live Put.
                None => KeyValue::Put(Put {
                    deadline: Some(new_deadline),
                    time: new.time,
                    ..old
                }),
                Some(_) => KeyValue::Remove(new),
            }),
            KeyValue::Update(old) => Ok(match old.deadline {
                None => KeyValue::Update(Update {
                    deadline: Some(new_deadline),
                    time: new.time,
                    ..old
                }),
                Some(_) => KeyValue::Remove(new),
            }),
            KeyValue::Remove(old) => Ok(match old.deadline {
                // Expiring an already-removed key leaves it removed.
                None => KeyValue::Remove(Remove {
                    time: new.time,
                    ..old
                }),
                Some(_) => KeyValue::Remove(new),
            }),
            KeyValue::Function(old) => self.deferred(
                new.key.clone(),
                vec![Apply::from(old), Apply::from(new)],
            ),
            KeyValue::PendingApply(old) => {
                let mut applies = old.into_applies();
                applies.push(Apply::from(new.clone()));
                self.deferred(new.key, applies)
            }
        }
    }

    fn merge_update(&self, new: Update, old: KeyValue) -> Result<KeyValue, MergeError> {
        match old {
            // A Put stays a Put under the new value.
            KeyValue::Put(old) => Ok(KeyValue::Put(Put {
                key: new.key,
                value: new.value,
                time: new.time,
                deadline: new.deadline.or(old.deadline),
            })),
            KeyValue::Update(old) => Ok(KeyValue::Update(Update {
                deadline: new.deadline.or(old.deadline),
                ..new
            })),
            KeyValue::Remove(old) => Ok(match old.deadline {
                // A permanent tombstone absorbs updates.
                None => KeyValue::Remove(Remove {
                    time: new.time,
                    ..old
                }),
                Some(old_deadline) => KeyValue::Update(Update {
                    deadline: new.deadline.or(Some(old_deadline)),
                    ..new
                }),
            }),
            KeyValue::Function(old) => self.deferred(
                new.key.clone(),
                vec![Apply::from(old), Apply::from(new)],
            ),
            KeyValue::PendingApply(old) => {
                let mut applies = old.into_applies();
                applies.push(Apply::from(new.clone()));
                self.deferred(new.key, applies)
            }
        }
    }

    fn merge_function(&self, new: Function, old: KeyValue) -> Result<KeyValue, MergeError> {
        match old {
            KeyValue::Put(old) => self.invoke(new, KeyValue::Put(old)),
            KeyValue::Update(old) => self.invoke(new, KeyValue::Update(old)),
            KeyValue::Remove(old) => match old.deadline {
                // A permanent tombstone absorbs functions.
                None => Ok(KeyValue::Remove(Remove {
                    time: new.time,
                    ..old
                })),
                Some(_) => self.deferred(
                    new.key.clone(),
                    vec![Apply::from(old), Apply::from(new)],
                ),
            },
            KeyValue::Function(old) => self.deferred(
                new.key.clone(),
                vec![Apply::from(old), Apply::from(new)],
            ),
            KeyValue::PendingApply(old) => {
                let mut applies = old.into_applies();
                applies.push(Apply::from(new.clone()));
                self.deferred(new.key, applies)
            }
        }
    }

    fn merge_pending(&self, new: PendingApply, old: KeyValue) -> Result<KeyValue, MergeError> {
        match old {
            KeyValue::PendingApply(old) => {
                let key = new.key.clone();
                let mut applies = old.into_applies();
                applies.extend(new.into_applies());
                self.deferred(key, applies)
            }
            fixed => self.apply_sequence(new.into_applies(), fixed),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Helpers
    // --------------------------------------------------------------------------------------------

    /// Invoke the function referenced by `new` on the resolved `old` value
    /// and merge the outcome back at the new time.
    fn invoke(&self, new: Function, old: KeyValue) -> Result<KeyValue, MergeError> {
        let function = self
            .functions
            .get(&new.function)
            .ok_or_else(|| MergeError::FunctionNotFound(new.function.clone()))?;

        let (value, deadline) = match &old {
            KeyValue::Put(put) => (put.value.as_deref(), put.deadline),
            KeyValue::Update(update) => (update.value.as_deref(), update.deadline),
            _ => (None, None),
        };

        match function.apply(&new.key, value, deadline) {
            FunctionOutput::Nothing => Ok(restamp(old, new.time)),
            FunctionOutput::Remove => self.merge(
                KeyValue::Remove(Remove {
                    key: new.key,
                    time: new.time,
                    deadline: None,
                }),
                old,
            ),
            FunctionOutput::Update(value) => self.merge(
                KeyValue::Update(Update {
                    key: new.key,
                    value,
                    time: new.time,
                    deadline: None,
                }),
                old,
            ),
            FunctionOutput::Expire(deadline) => self.merge(
                KeyValue::Remove(Remove {
                    key: new.key,
                    time: new.time,
                    deadline: Some(deadline),
                }),
                old,
            ),
        }
    }

    fn deferred(&self, key: Vec<u8>, applies: Vec<Apply>) -> Result<KeyValue, MergeError> {
        PendingApply::from_applies(key, applies).ok_or(MergeError::EmptyApplySequence)
    }
}

/// Re-stamp a resolved key-value with a newer time, leaving everything
/// else untouched.
fn restamp(key_value: KeyValue, time: crate::kv::Time) -> KeyValue {
    match key_value {
        KeyValue::Put(kv) => KeyValue::Put(Put { time, ..kv }),
        KeyValue::Remove(kv) => KeyValue::Remove(Remove { time, ..kv }),
        KeyValue::Update(kv) => KeyValue::Update(Update { time, ..kv }),
        KeyValue::Function(kv) => KeyValue::Function(Function { time, ..kv }),
        pending @ KeyValue::PendingApply(_) => pending,
    }
}
