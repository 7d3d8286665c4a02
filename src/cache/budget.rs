//! Byte accounting for pixel and staging buffers.
//!
//! Allocation failure on an embedded target must degrade to a status, not
//! abort the process. The budget makes that deterministic: every pixel or
//! staging buffer is reserved here before it is allocated, and a refused
//! reservation is the crate's out-of-memory signal, which the manager
//! answers with its single prune-and-retry recovery.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks bytes committed to decoded pixels and preload staging.
#[derive(Debug)]
pub struct MemoryBudget {
    used: AtomicUsize,
    max: usize,
}

impl MemoryBudget {
    /// `limit` of `None` means unbounded (accounting only).
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            used: AtomicUsize::new(0),
            max: limit.unwrap_or(usize::MAX),
        }
    }

    /// Reserve `bytes`, failing without side effect when over budget.
    pub fn try_reserve(&self, bytes: usize) -> bool {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let Some(next) = current.checked_add(bytes) else {
                return false;
            };
            if next > self.max {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Return `bytes` to the budget.
    pub fn release(&self, bytes: usize) {
        let prev = self.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(prev >= bytes, "budget release exceeds reservations");
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes still available.
    pub fn available(&self) -> usize {
        self.max.saturating_sub(self.used())
    }
}
