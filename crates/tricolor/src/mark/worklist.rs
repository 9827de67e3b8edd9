//! Marking worklists.
//!
//! Every barrier pushes into its own [`LocalWorklist`], a single pre-reserved
//! segment that only its thread touches. A full segment is handed whole to the
//! heap's [`MarkingWorklist`], a lock-free queue of segments the collector
//! drains. A push never allocates beyond reserving the replacement segment.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::address::HeapRef;

/// Heap-wide queue of published worklist segments.
#[derive(Debug, Default)]
pub struct MarkingWorklist {
    segments: SegQueue<Vec<HeapRef>>,
    entries: AtomicUsize,
}

impl MarkingWorklist {
    /// Create an empty worklist.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segments: SegQueue::new(),
            entries: AtomicUsize::new(0),
        }
    }

    /// Publish a segment.
    pub fn push_segment(&self, segment: Vec<HeapRef>) {
        if segment.is_empty() {
            return;
        }
        self.entries.fetch_add(segment.len(), Ordering::Relaxed);
        self.segments.push(segment);
    }

    /// Take the oldest published segment.
    pub fn pop_segment(&self) -> Option<Vec<HeapRef>> {
        let segment = self.segments.pop()?;
        self.entries.fetch_sub(segment.len(), Ordering::Relaxed);
        Some(segment)
    }

    /// Whether nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of published segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of objects across all published segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    /// Take every published object in publication order.
    pub fn drain(&self) -> Vec<HeapRef> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(mut segment) = self.pop_segment() {
            out.append(&mut segment);
        }
        out
    }
}

/// A barrier's private worklist segment.
#[derive(Debug)]
pub struct LocalWorklist {
    current: Vec<HeapRef>,
    capacity: usize,
}

impl LocalWorklist {
    /// Create a worklist with one reserved segment of `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            current: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an object, publishing the segment to `global` first if it is full.
    ///
    /// Returns `true` if a segment was published.
    pub fn push(&mut self, obj: HeapRef, global: &MarkingWorklist) -> bool {
        let published = if self.current.len() == self.capacity {
            let full = std::mem::replace(&mut self.current, Vec::with_capacity(self.capacity));
            global.push_segment(full);
            true
        } else {
            false
        };
        self.current.push(obj);
        published
    }

    /// Move the current segment to `global`.
    ///
    /// Returns `true` if there was anything to publish.
    pub fn publish(&mut self, global: &MarkingWorklist) -> bool {
        if self.current.is_empty() {
            return false;
        }
        let segment = std::mem::replace(&mut self.current, Vec::with_capacity(self.capacity));
        global.push_segment(segment);
        true
    }

    /// Objects pushed since the last publish.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Whether nothing has been pushed since the last publish.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Whether `obj` is pending in this segment.
    #[must_use]
    pub fn contains(&self, obj: HeapRef) -> bool {
        self.current.contains(&obj)
    }

    /// The pending objects in push order.
    #[must_use]
    pub fn pending(&self) -> &[HeapRef] {
        &self.current
    }
}
