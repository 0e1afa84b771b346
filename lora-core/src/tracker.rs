//! In-memory dedup tracking for one relay direction.
//!
//! The tracker is a fast first filter in front of the persistent store. It is
//! bounded by clearing itself once it holds more than `capacity` ids; the
//! store's uniqueness constraint remains the final authority.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of ids held before the tracker resets.
pub const DEFAULT_TRACKER_CAPACITY: usize = 2000;

/// Set of recently relayed message ids.
#[derive(Debug)]
pub struct DedupTracker {
    capacity: usize,
    seen: Mutex<HashSet<String>>,
    resets: AtomicU64,
}

impl DedupTracker {
    /// Create a tracker with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACKER_CAPACITY)
    }

    /// Create a tracker that resets after holding more than `capacity` ids.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new(HashSet::new()),
            resets: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `id` has been marked since the last reset.
    pub fn seen(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    /// Mark `id` as relayed.
    pub fn mark(&self, id: &str) {
        let mut seen = self.lock();
        self.insert(&mut seen, id);
    }

    /// Mark `id` and report whether it was new.
    ///
    /// The check and the mark happen under one lock, so of two concurrent
    /// callers with the same id only one sees `true`.
    pub fn check_and_mark(&self, id: &str) -> bool {
        let mut seen = self.lock();
        if seen.contains(id) {
            return false;
        }
        self.insert(&mut seen, id);
        true
    }

    fn insert(&self, seen: &mut HashSet<String>, id: &str) {
        if seen.len() > self.capacity {
            seen.clear();
            self.resets.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(capacity = self.capacity, "dedup tracker reset");
        }
        seen.insert(id.to_string());
    }

    /// Number of ids currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no ids are held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// How many times the tracker has reset.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Forget every id.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new()
    }
}
