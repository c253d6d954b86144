//! Unified record id allocation.
//!
//! One allocator per tenant hands out ids for every record kind, so ids
//! never collide across entity types or between cache-originated and
//! relational records. The high-water mark is seeded at open from every
//! place an id may already live and persisted after each allocation.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic id source for one tenant.
#[derive(Debug)]
pub struct IdAllocator {
    last: AtomicI64,
}

impl IdAllocator {
    /// Start allocating after `high_water` (the largest id already in use).
    #[must_use]
    pub fn starting_after(high_water: i64) -> Self {
        Self {
            last: AtomicI64::new(high_water.max(0)),
        }
    }

    /// Return the next unused id.
    pub fn allocate(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raise the high-water mark to at least `id`.
    ///
    /// Returns `true` when the mark moved, i.e. `id` was above every id
    /// seen so far.
    pub fn observe(&self, id: i64) -> bool {
        self.last.fetch_max(id, Ordering::SeqCst) < id
    }

    /// Largest id handed out so far (or the seed).
    #[must_use]
    pub fn high_water(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}
