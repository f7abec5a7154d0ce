//! Single-value lazy caches.
//!
//! Block bodies and footers are parsed once and then served from memory.
//! [`Lazy`] is the cell that holds such a value, with two concurrency
//! modes chosen at construction:
//!
//! - **Synchronised** — a single caller computes under the cell's write
//!   lock; concurrent callers block briefly and observe the same value.
//! - **Reserved** — single-flight: a caller atomically takes the
//!   reservation marker and computes; callers that lose the race receive a
//!   recoverable [`CacheError::Busy`] and are expected to retry.  Used
//!   where the fetch performs I/O and blocking a reader is worse than a
//!   retry.
//!
//! Neither mode holds a lock across the caller's fetch I/O and the cell's
//! publication in a way that can deadlock: the reserved mode publishes
//! with a short write-lock after the fetch completes.
//!
//! Combinators: [`Lazy::map`] applies a function to the cached value
//! without storing the result; [`Lazy::flat_map`] computes through this
//! cell and stores the mapped result in a child cell.
//! [`Lazy::with_strategy`] picks the mode per input at construction.


use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by lazy-cell access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError<E> {
    /// Another task holds the single-flight reservation; retry later.
    #[error("cache slot is reserved by another task; retry later")]
    Busy,

    /// The caller's fetch failed; the cell remains empty.
    #[error(transparent)]
    Fetch(#[from] E),
}

// ------------------------------------------------------------------------------------------------
// Strategy
// ------------------------------------------------------------------------------------------------

/// Concurrency mode of a [`Lazy`] cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// One caller computes under the lock; others wait and share.
    Synchronised,
    /// Single-flight reservation; losers get [`CacheError::Busy`].
    Reserved,
}

// ------------------------------------------------------------------------------------------------
// Lazy cell
// ------------------------------------------------------------------------------------------------

/// A lazily-populated single value with a configurable concurrency mode.
#[derive(Debug)]
pub struct Lazy<T> {
    strategy: CacheStrategy,
    slot: RwLock<Option<T>>,
    reservation: AtomicBool,
}

impl<T: Clone> Lazy<T> {
    /// An empty cell with the given strategy.
    pub fn new(strategy: CacheStrategy) -> Self {
        Self {
            strategy,
            slot: RwLock::new(None),
            reservation: AtomicBool::new(false),
        }
    }

    /// An empty synchronised cell.
    pub fn synchronised() -> Self {
        Self::new(CacheStrategy::Synchronised)
    }

    /// An empty single-flight cell.
    pub fn reserved() -> Self {
        Self::new(CacheStrategy::Reserved)
    }

    /// An empty cell whose strategy is chosen per input at construction.
    pub fn with_strategy<I>(input: &I, strategy: impl Fn(&I) -> CacheStrategy) -> Self {
        Self::new(strategy(input))
    }

    /// The cached value, computing it through `fetch` on first access.
    ///
    /// In reserved mode a concurrent computation surfaces as
    /// [`CacheError::Busy`]; a failed fetch leaves the cell empty either
    /// way.
    pub fn value<E>(&self, fetch: impl FnOnce() -> Result<T, E>) -> Result<T, CacheError<E>> {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        match self.strategy {
            CacheStrategy::Synchronised => {
                let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
                if let Some(value) = slot.as_ref() {
                    return Ok(value.clone());
                }
                let value = fetch()?;
                *slot = Some(value.clone());
                Ok(value)
            }
            CacheStrategy::Reserved => {
                if self
                    .reservation
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
                    .is_err()
                {
                    return Err(CacheError::Busy);
                }
                // A racing caller may have published between our read and
                // the reservation.
                if let Some(value) = self.get() {
                    self.reservation.store(false, Ordering::Release);
                    return Ok(value);
                }
                let result = fetch();
                let outcome = match result {
                    Ok(value) => {
                        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
                        *slot = Some(value.clone());
                        Ok(value)
                    }
                    Err(error) => Err(CacheError::Fetch(error)),
                };
                self.reservation.store(false, Ordering::Release);
                outcome
            }
        }
    }

    /// Whether a value is currently cached.
    pub fn is_cached(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// The cached value, if present.
    pub fn get(&self) -> Option<T> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The cached value, or `fallback` without caching it.
    pub fn get_or_else(&self, fallback: impl FnOnce() -> T) -> T {
        self.get().unwrap_or_else(fallback)
    }

    /// Drop the cached value; the next access recomputes.
    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// Apply `f` to the cached value without storing the result.
    pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> Option<U> {
        self.get().map(|value| f(&value))
    }

    /// Compute through this cell, then store `f`'s result in `child`.
    pub fn flat_map<U: Clone, E>(
        &self,
        child: &Lazy<U>,
        fetch: impl FnOnce() -> Result<T, E>,
        f: impl FnOnce(&T) -> Result<U, E>,
    ) -> Result<U, CacheError<E>> {
        let value = self.value(fetch)?;
        child.value(|| f(&value))
    }
}
