//! Bitmap engine counters
//!
//! Counters only, monotonic, relaxed atomics. Exact once all writers and
//! iterators have finished.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by an index manager and its iterators
#[derive(Debug, Default)]
pub struct BitmapMetrics {
    bits_set: AtomicU64,
    bits_cleared: AtomicU64,
    mids_dropped: AtomicU64,
    entries_dropped: AtomicU64,
    consolidations: AtomicU64,
    expansions: AtomicU64,
    iterators_opened: AtomicU64,
    iterators_closed: AtomicU64,
    parallel_segments: AtomicU64,
    writer_waits: AtomicU64,
    snapshots_written: AtomicU64,
    snapshots_restored: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $add:ident, $get:ident, $field:ident) => {
        #[allow(missing_docs)]
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        #[allow(missing_docs)]
        pub fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }

        #[allow(missing_docs)]
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl BitmapMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_bits_set, add_bits_set, bits_set, bits_set);
    counter!(increment_bits_cleared, add_bits_cleared, bits_cleared, bits_cleared);
    counter!(increment_mids_dropped, add_mids_dropped, mids_dropped, mids_dropped);
    counter!(increment_entries_dropped, add_entries_dropped, entries_dropped, entries_dropped);
    counter!(increment_consolidations, add_consolidations, consolidations, consolidations);
    counter!(increment_expansions, add_expansions, expansions, expansions);
    counter!(increment_iterators_opened, add_iterators_opened, iterators_opened, iterators_opened);
    counter!(increment_iterators_closed, add_iterators_closed, iterators_closed, iterators_closed);
    counter!(increment_parallel_segments, add_parallel_segments, parallel_segments, parallel_segments);
    counter!(increment_writer_waits, add_writer_waits, writer_waits, writer_waits);
    counter!(increment_snapshots_written, add_snapshots_written, snapshots_written, snapshots_written);
    counter!(increment_snapshots_restored, add_snapshots_restored, snapshots_restored, snapshots_restored);

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bits_set: self.bits_set(),
            bits_cleared: self.bits_cleared(),
            mids_dropped: self.mids_dropped(),
            entries_dropped: self.entries_dropped(),
            consolidations: self.consolidations(),
            expansions: self.expansions(),
            iterators_opened: self.iterators_opened(),
            iterators_closed: self.iterators_closed(),
            parallel_segments: self.parallel_segments(),
            writer_waits: self.writer_waits(),
            snapshots_written: self.snapshots_written(),
            snapshots_restored: self.snapshots_restored(),
        }
    }

    /// Counters as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub bits_set: u64,
    pub bits_cleared: u64,
    pub mids_dropped: u64,
    pub entries_dropped: u64,
    pub consolidations: u64,
    pub expansions: u64,
    pub iterators_opened: u64,
    pub iterators_closed: u64,
    pub parallel_segments: u64,
    pub writer_waits: u64,
    pub snapshots_written: u64,
    pub snapshots_restored: u64,
}

impl MetricsSnapshot {
    /// Iterators opened but not yet closed
    pub fn open_iterators(&self) -> u64 {
        self.iterators_opened.saturating_sub(self.iterators_closed)
    }
}
