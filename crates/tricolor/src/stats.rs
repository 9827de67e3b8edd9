//! Barrier statistics.
//!
//! Each [`Heap`](crate::Heap) carries one [`BarrierStats`]. Marking barriers
//! count into plain thread-local [`LocalBarrierCounts`] and fold them into the
//! heap's counters when they publish, so the mutator's store path never touches
//! a shared cache line for bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

/// Heap-wide barrier counters.
#[derive(Debug, Default)]
pub struct BarrierStats {
    slow_path_calls: AtomicU64,
    values_enqueued: AtomicU64,
    remembered_set_inserts: AtomicU64,
    reloc_slots_recorded: AtomicU64,
    embedder_handoffs: AtomicU64,
    segments_published: AtomicU64,
}

/// A point-in-time copy of [`BarrierStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierStatsSnapshot {
    /// Marking barrier slow-path invocations.
    pub slow_path_calls: u64,
    /// Objects turned grey and pushed to a worklist.
    pub values_enqueued: u64,
    /// Descriptors appended to any remembered set.
    pub remembered_set_inserts: u64,
    /// Relocation slots recorded for compaction.
    pub reloc_slots_recorded: u64,
    /// Notifications handed to the embedder tracer.
    pub embedder_handoffs: u64,
    /// Worklist segments moved to the global worklist.
    pub segments_published: u64,
}

/// Counters a single barrier accumulates between publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBarrierCounts {
    /// Slow-path invocations.
    pub slow_path_calls: u64,
    /// Objects pushed to the local worklist.
    pub values_enqueued: u64,
    /// Relocation slots recorded.
    pub reloc_slots_recorded: u64,
}

impl BarrierStats {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slow_path_calls: AtomicU64::new(0),
            values_enqueued: AtomicU64::new(0),
            remembered_set_inserts: AtomicU64::new(0),
            reloc_slots_recorded: AtomicU64::new(0),
            embedder_handoffs: AtomicU64::new(0),
            segments_published: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_remembered_set_insert(&self) {
        self.remembered_set_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_embedder_handoff(&self) {
        self.embedder_handoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segments_published(&self, segments: u64) {
        self.segments_published.fetch_add(segments, Ordering::Relaxed);
    }

    /// Fold a barrier's local counts into the heap counters.
    pub(crate) fn absorb(&self, counts: LocalBarrierCounts) {
        self.slow_path_calls
            .fetch_add(counts.slow_path_calls, Ordering::Relaxed);
        self.values_enqueued
            .fetch_add(counts.values_enqueued, Ordering::Relaxed);
        self.reloc_slots_recorded
            .fetch_add(counts.reloc_slots_recorded, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> BarrierStatsSnapshot {
        BarrierStatsSnapshot {
            slow_path_calls: self.slow_path_calls.load(Ordering::Relaxed),
            values_enqueued: self.values_enqueued.load(Ordering::Relaxed),
            remembered_set_inserts: self.remembered_set_inserts.load(Ordering::Relaxed),
            reloc_slots_recorded: self.reloc_slots_recorded.load(Ordering::Relaxed),
            embedder_handoffs: self.embedder_handoffs.load(Ordering::Relaxed),
            segments_published: self.segments_published.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        self.slow_path_calls.store(0, Ordering::Relaxed);
        self.values_enqueued.store(0, Ordering::Relaxed);
        self.remembered_set_inserts.store(0, Ordering::Relaxed);
        self.reloc_slots_recorded.store(0, Ordering::Relaxed);
        self.embedder_handoffs.store(0, Ordering::Relaxed);
        self.segments_published.store(0, Ordering::Relaxed);
    }
}

impl LocalBarrierCounts {
    /// Return the accumulated counts and reset them.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
