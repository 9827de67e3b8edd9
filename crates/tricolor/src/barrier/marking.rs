//! The per-thread marking barrier.
//!
//! A [`MarkingBarrier`] belongs to exactly one thread's [`LocalHeap`]. It keeps
//! the tri-color invariant for the stores that thread performs: a value stored
//! into an object during marking is turned grey and pushed to the barrier's
//! local worklist before the store becomes visible to the collector. Nothing
//! in here is shared, so none of it is synchronized; the only shared writes
//! are the colour bitmap transitions and remembered-set appends.
//!
//! [`LocalHeap`]: crate::LocalHeap

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::num::NonZeroU64;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::address::{HeapRef, Slot};
use crate::barrier::registry;
use crate::chunked::ChunkedBuffer;
use crate::heap::{Heap, Region, ThreadKind};
use crate::mark::{self, LocalWorklist, MarkingMode};
use crate::objects::{ArrayBufferExtension, Code, DescriptorArray, JsArrayBuffer, RelocInfo, RelocSlot};
use crate::remembered_set::{self, RememberedSetKind};
use crate::stats::LocalBarrierCounts;
use crate::verify::{verify, verify_eq};

/// Process-unique identity of a marking barrier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierId(NonZeroU64);

static NEXT_BARRIER_ID: AtomicU64 = AtomicU64::new(1);

impl BarrierId {
    fn next() -> Self {
        let raw = NEXT_BARRIER_ID.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(raw) {
            Some(id) => Self(id),
            None => panic!("marking barrier ids exhausted"),
        }
    }

    /// The raw id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0.get()
    }

    pub(crate) const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }
}

impl fmt::Debug for BarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BarrierId({})", self.0)
    }
}

/// A thread's marking barrier.
pub struct MarkingBarrier {
    id: BarrierId,
    heap: Arc<Heap>,
    worklist: LocalWorklist,
    shared_worklist: LocalWorklist,
    reloc_slots: ChunkedBuffer<RelocSlot>,
    counts: LocalBarrierCounts,
    mode: MarkingMode,
    is_compacting: bool,
    is_main_thread_barrier: bool,
    is_shared_heap: bool,
    epoch: u32,
    generation: u64,
}

impl MarkingBarrier {
    /// Create a barrier for a thread of `kind` working on `heap`.
    ///
    /// If the heap is already marking the barrier starts activated.
    #[must_use]
    pub fn new(heap: &Arc<Heap>, kind: ThreadKind) -> Self {
        let config = heap.config();
        let mut barrier = Self {
            id: BarrierId::next(),
            heap: Arc::clone(heap),
            worklist: LocalWorklist::new(config.worklist_segment_capacity),
            shared_worklist: LocalWorklist::new(config.worklist_segment_capacity),
            reloc_slots: ChunkedBuffer::new(config.local_slot_buffer_capacity),
            counts: LocalBarrierCounts::default(),
            mode: MarkingMode::Off,
            is_compacting: false,
            is_main_thread_barrier: kind == ThreadKind::Main,
            is_shared_heap: heap.is_shared(),
            epoch: heap.marking_epoch(),
            generation: 0,
        };
        barrier.sync_with_heap();
        barrier
    }

    /// The barrier's identity.
    #[must_use]
    pub const fn id(&self) -> BarrierId {
        self.id
    }

    /// The heap the barrier marks.
    #[must_use]
    pub const fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// The marking mode the barrier currently applies.
    #[must_use]
    pub const fn mode(&self) -> MarkingMode {
        self.mode
    }

    /// Whether the barrier takes part in a marking cycle.
    #[must_use]
    pub const fn is_activated(&self) -> bool {
        self.mode.is_active()
    }

    /// Whether the barrier records slots for compaction.
    #[must_use]
    pub const fn is_compacting(&self) -> bool {
        self.is_compacting
    }

    /// Whether this is the barrier of the heap's main thread.
    #[must_use]
    pub const fn is_main_thread_barrier(&self) -> bool {
        self.is_main_thread_barrier
    }

    /// Objects pushed and not yet published.
    #[must_use]
    pub const fn local_worklist(&self) -> &LocalWorklist {
        &self.worklist
    }

    /// Shared-heap objects pushed and not yet published.
    #[must_use]
    pub const fn shared_worklist(&self) -> &LocalWorklist {
        &self.shared_worklist
    }

    /// Relocation slots recorded and not yet published.
    #[must_use]
    pub const fn pending_reloc_slots(&self) -> usize {
        self.reloc_slots.len()
    }

    /// Counters accumulated since the last publish.
    #[must_use]
    pub const fn local_counts(&self) -> LocalBarrierCounts {
        self.counts
    }

    /// Start applying `mode`.
    pub fn activate(&mut self, mode: MarkingMode, is_compacting: bool) {
        verify!(!self.is_activated(), "{:?} activated twice", self.id);
        verify!(mode.is_active(), "activate with MarkingMode::Off");
        self.mode = mode;
        self.is_compacting = is_compacting && mode.is_major();
        self.epoch = self.heap.marking_epoch();

        #[cfg(feature = "tracing")]
        crate::tracing::log_barrier_activated(self.id, mode, self.is_compacting);
    }

    /// Publish everything and stop marking.
    pub fn deactivate(&mut self) {
        self.publish();
        self.mode = MarkingMode::Off;
        self.is_compacting = false;

        #[cfg(feature = "tracing")]
        crate::tracing::log_barrier_deactivated(self.id);
    }

    /// Move the local worklist segment and the buffered relocation slots into
    /// the heap-wide structures.
    pub fn publish(&mut self) {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::span_publish(self.id).entered();
        #[cfg(feature = "tracing")]
        let pending = (self.worklist.len(), self.reloc_slots.len());

        if self.worklist.publish(self.heap.worklist()) {
            self.heap.stats().record_segments_published(1);
        }
        if let Some(shared) = self.heap.shared_heap() {
            if self.shared_worklist.publish(shared.worklist()) {
                self.heap.stats().record_segments_published(1);
            }
        }
        for slot in &self.reloc_slots {
            // SAFETY: buffered slots lie in regions of `self.heap`, which the
            // barrier keeps alive.
            unsafe { slot.insert(RememberedSetKind::OldToOld) };
        }
        self.reloc_slots.clear();
        self.heap.stats().absorb(self.counts.take());

        #[cfg(feature = "tracing")]
        crate::tracing::log_barrier_published(self.id, pending.0, pending.1);
    }

    /// Follow the heap's marking status if it changed since the last look.
    ///
    /// Returns `true` if the status had changed.
    pub fn sync_with_heap(&mut self) -> bool {
        let generation = self.heap.marking_generation();
        if generation == self.generation {
            return false;
        }
        self.generation = generation;
        let mode = self.heap.marking_mode();
        let is_compacting = self.heap.is_compacting();
        if self.is_activated() {
            self.deactivate();
        }
        if mode.is_active() {
            self.activate(mode, is_compacting);
        }
        true
    }

    /// Barrier for a plain field store of `value` into `slot` of `host`.
    ///
    /// A client thread storing into a writable shared object marks for the
    /// shared heap's cycle instead of its own.
    pub fn write(&mut self, host: HeapRef, slot: Slot, value: HeapRef) {
        let is_activated = self.enter();
        if !self.is_shared_heap && Region::of(host).in_writable_shared() {
            self.mark_value_shared(value);
            return;
        }
        if !is_activated {
            return;
        }
        if self.mark_value(host, value) && self.is_compacting {
            verify!(self.mode.is_major());
            Self::record_slot(host, slot, value);
        }
    }

    /// Barrier for a store with no host object, such as a global handle.
    ///
    /// The implicit host is treated as black.
    pub fn write_without_host(&mut self, value: HeapRef) {
        verify!(
            self.is_main_thread_barrier,
            "host-less stores happen on the main thread"
        );
        if !self.enter() {
            return;
        }
        let target = Region::of(value);
        if target.in_read_only() || target.in_shared() != self.is_shared_heap {
            return;
        }
        if self.mode.is_minor() && !target.in_young() {
            return;
        }
        self.white_to_grey_and_push(value);
    }

    /// Barrier for a store of `value` into the relocation entry `rinfo` of
    /// `host`.
    pub fn write_code(&mut self, host: Code, rinfo: &RelocInfo, value: HeapRef) {
        verify!(
            !Region::of(host.object()).in_writable_shared(),
            "code object {host:?} in the writable shared region"
        );
        if !self.enter() {
            return;
        }
        if self.mark_value(host.object(), value) && self.is_compacting {
            verify!(self.mode.is_major());
            self.record_reloc_slot(host, rinfo, value);
        }
    }

    /// Barrier for `host` gaining the off-heap `extension`.
    pub fn write_array_buffer(&mut self, host: JsArrayBuffer, extension: &ArrayBufferExtension) {
        verify!(
            !Region::of(host.object()).in_shared(),
            "array buffer {host:?} in the shared region"
        );
        if !self.enter() {
            return;
        }
        if self.mode.is_minor() {
            if Region::of(host.object()).in_young() {
                extension.young_mark();
            }
        } else {
            extension.mark();
        }
    }

    /// Barrier for `array` growing to `number_of_own_descriptors` initialized
    /// descriptors.
    ///
    /// Marks the header once per cycle, then only the descriptors that became
    /// populated since the previous call. Minor cycles mark the whole
    /// populated prefix on every call. Entries at or beyond
    /// `number_of_own_descriptors` are never read.
    pub fn write_descriptor_array(&mut self, array: DescriptorArray, number_of_own_descriptors: usize) {
        verify!(
            array.map().is_some_and(|map| Region::of(map).in_read_only()),
            "descriptor array {array:?} without a read-only map"
        );
        verify!(
            number_of_own_descriptors <= array.number_of_all_descriptors(),
            "{number_of_own_descriptors} populated descriptors in an array of {}",
            array.number_of_all_descriptors()
        );
        if !self.enter() {
            return;
        }
        let host = array.object();
        if self.mode.is_minor() && !Region::of(host).in_young() {
            return;
        }

        if !mark::is_black(host) {
            mark::white_to_grey(host);
            mark::grey_to_black(host);
            self.mark_range(host, array.first_pointer_slot(), array.descriptor_slot(0));
        }

        let populated = number_of_own_descriptors.min(array.number_of_all_descriptors());
        let new_marked = u16::try_from(populated).unwrap_or(u16::MAX);
        // Minor cycles do not advance the epoch, so the counter may still hold
        // the previous major cycle's progress. Young arrays are marked whole.
        let old_marked = if self.mode.is_minor() {
            0
        } else {
            array.update_number_of_marked_descriptors(self.epoch, new_marked)
        };
        if old_marked < new_marked {
            self.mark_range(
                host,
                array.descriptor_slot(usize::from(old_marked)),
                array.descriptor_slot(populated),
            );
        }
    }

    /// Common prologue of every write. Returns whether the barrier is active.
    fn enter(&mut self) -> bool {
        verify_eq!(
            registry::current_barrier_id(),
            Some(self.id),
            "{:?} used on a thread where it is not installed",
            self.id
        );
        self.counts.slow_path_calls += 1;
        self.sync_with_heap();
        self.is_activated()
    }

    /// Mark `value` if this barrier is responsible for it.
    ///
    /// Returns whether the value was eligible, whether or not it was white.
    fn mark_value(&mut self, host: HeapRef, value: HeapRef) -> bool {
        let target = Region::of(value);
        if target.in_read_only() {
            return false;
        }
        // The shared region has its own cycle, and a shared barrier leaves
        // client objects to their heaps.
        if target.in_shared() != self.is_shared_heap {
            return false;
        }
        verify!(
            !Region::of(host).in_writable_shared() || self.is_shared_heap,
            "client barrier marking for shared host {host:?}"
        );
        if self.mode.is_minor() && !target.in_young() {
            return false;
        }
        self.white_to_grey_and_push(value);
        true
    }

    /// Mark a value stored into a shared object while the shared heap marks.
    fn mark_value_shared(&mut self, value: HeapRef) {
        let target = Region::of(value);
        if !target.in_shared() || !target.is_marking() || !mark::white_to_grey(value) {
            return;
        }
        let Some(shared) = self.heap.shared_heap() else {
            return;
        };
        if self.shared_worklist.push(value, shared.worklist()) {
            self.heap.stats().record_segments_published(1);
        }
        self.counts.values_enqueued += 1;
    }

    fn white_to_grey_and_push(&mut self, value: HeapRef) -> bool {
        if !mark::white_to_grey(value) {
            return false;
        }
        if self.worklist.push(value, self.heap.worklist()) {
            self.heap.stats().record_segments_published(1);
        }
        self.counts.values_enqueued += 1;
        true
    }

    /// Mark every strong or weak reference in `[start, end)` of `host`.
    fn mark_range(&mut self, host: HeapRef, start: Slot, end: Slot) {
        for index in 0..start.distance_to(end) {
            let slot = start.offset(index);
            let Some(value) = slot.load().heap_object() else {
                continue;
            };
            if self.mark_value(host, value) && self.is_compacting {
                Self::record_slot(host, slot, value);
            }
        }
    }

    fn record_slot(host: HeapRef, slot: Slot, value: HeapRef) {
        let source = Region::of(host);
        if Region::of(value).is_evacuation_candidate() && !source.should_skip_slot_recording() {
            remembered_set::insert_slot(source, RememberedSetKind::OldToOld, slot);
        }
    }

    fn record_reloc_slot(&mut self, host: Code, rinfo: &RelocInfo, target: HeapRef) {
        let source = Region::of(host.object());
        if !Region::of(target).is_evacuation_candidate() || source.should_skip_slot_recording() {
            return;
        }
        let slot = rinfo.resolve(host);
        if self.is_main_thread_barrier {
            // SAFETY: the slot was just resolved from the live `host`.
            unsafe { slot.insert(RememberedSetKind::OldToOld) };
        } else {
            self.reloc_slots.push(slot);
        }
        self.counts.reloc_slots_recorded += 1;
    }
}

impl fmt::Debug for MarkingBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkingBarrier")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("is_compacting", &self.is_compacting)
            .field("is_main_thread_barrier", &self.is_main_thread_barrier)
            .field("pending", &self.worklist.len())
            .finish_non_exhaustive()
    }
}

/// A barrier with its identity readable while the barrier is borrowed.
pub struct MarkingBarrierCell {
    id: BarrierId,
    barrier: RefCell<MarkingBarrier>,
}

/// Shared handle to a thread's barrier, as stored in the thread registry.
pub type MarkingBarrierRef = Rc<MarkingBarrierCell>;

impl MarkingBarrierCell {
    /// Wrap a barrier into a registry handle.
    #[must_use]
    pub fn new_ref(barrier: MarkingBarrier) -> MarkingBarrierRef {
        Rc::new(Self {
            id: barrier.id(),
            barrier: RefCell::new(barrier),
        })
    }

    /// The wrapped barrier's identity.
    #[must_use]
    pub const fn id(&self) -> BarrierId {
        self.id
    }

    /// Borrow the barrier.
    ///
    /// # Panics
    ///
    /// Panics if the barrier is in use by a barrier call on this thread.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, MarkingBarrier> {
        match self.barrier.try_borrow() {
            Ok(barrier) => barrier,
            Err(_) => panic!("re-entrant use of marking barrier {:?}", self.id),
        }
    }

    /// Borrow the barrier mutably.
    ///
    /// # Panics
    ///
    /// Panics on re-entrant use from within a barrier call.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, MarkingBarrier> {
        match self.barrier.try_borrow_mut() {
            Ok(barrier) => barrier,
            Err(_) => panic!("re-entrant use of marking barrier {:?}", self.id),
        }
    }
}

impl fmt::Debug for MarkingBarrierCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkingBarrierCell")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{RegionFlags, Residency};
    use crate::test_util::Fixture;
    use crate::LocalHeap;

    #[test]
    fn test_ids_are_unique() {
        let a = BarrierId::next();
        let b = BarrierId::next();
        assert_ne!(a, b);
        assert_eq!(BarrierId::from_raw(a.raw()), Some(a));
        assert_eq!(BarrierId::from_raw(0), None);
    }

    #[test]
    fn test_inactive_barrier_is_a_noop() {
        let fx = Fixture::new();
        let local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(2);
        let value = fx.alloc_regular(2);
        local.marking_barrier().borrow_mut().write(host, host.slot(1), value);
        assert!(mark::is_white(value));
        assert!(local.marking_barrier().borrow().local_worklist().is_empty());
    }

    #[test]
    fn test_barrier_follows_heap_status() {
        let fx = Fixture::new();
        let local = LocalHeap::new_main(&fx.heap);
        fx.heap.start_marking(MarkingMode::Major, true);
        {
            let mut barrier = local.marking_barrier().borrow_mut();
            assert!(barrier.sync_with_heap());
            assert_eq!(barrier.mode(), MarkingMode::Major);
            assert!(barrier.is_compacting());
            assert!(!barrier.sync_with_heap());
        }
        fx.heap.finish_marking();
        local.safepoint();
        assert!(!local.marking_barrier().borrow().is_activated());
    }

    #[test]
    fn test_write_greys_and_pushes_once() {
        let fx = Fixture::new();
        let local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(2);
        let value = fx.alloc_regular(2);
        fx.heap.start_marking(MarkingMode::Major, false);

        let mut barrier = local.marking_barrier().borrow_mut();
        barrier.write(host, host.slot(1), value);
        barrier.write(host, host.slot(1), value);
        assert!(mark::is_grey(value));
        assert_eq!(barrier.local_worklist().pending(), &[value]);
        assert_eq!(barrier.local_counts().slow_path_calls, 2);
        assert_eq!(barrier.local_counts().values_enqueued, 1);
    }

    #[test]
    fn test_deactivate_publishes_worklist() {
        let fx = Fixture::new();
        let local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(2);
        let value = fx.alloc_regular(2);
        fx.heap.start_marking(MarkingMode::Major, false);
        local.safepoint();

        let mut barrier = local.marking_barrier().borrow_mut();
        barrier.write(host, host.slot(1), value);
        barrier.deactivate();
        assert!(barrier.local_worklist().is_empty());
        drop(barrier);
        assert_eq!(fx.heap.drain_worklist(), vec![value]);
        assert_eq!(fx.heap.stats().snapshot().values_enqueued, 1);
    }

    #[test]
    fn test_full_segment_spills_to_heap() {
        let fx = Fixture::with_config(crate::HeapConfig::new().with_worklist_segment_capacity(2));
        let local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(2);
        let values: Vec<_> = (0..3).map(|_| fx.alloc_regular(1)).collect();
        fx.heap.start_marking(MarkingMode::Major, false);

        let mut barrier = local.marking_barrier().borrow_mut();
        for value in &values {
            barrier.write(host, host.slot(1), *value);
        }
        assert_eq!(fx.heap.worklist().len(), 2);
        assert_eq!(barrier.local_worklist().pending(), &values[2..]);
    }

    #[test]
    fn test_minor_mode_ignores_old_values() {
        let fx = Fixture::new();
        let local = LocalHeap::new_main(&fx.heap);
        let young = fx.heap.allocate_region(Residency::Regular, RegionFlags::YOUNG);
        let host = fx.alloc_regular(2);
        let old_value = fx.alloc_regular(2);
        let young_value = young.allocate(2).unwrap();
        fx.heap.start_marking(MarkingMode::Minor, false);

        let mut barrier = local.marking_barrier().borrow_mut();
        barrier.write(host, host.slot(1), old_value);
        barrier.write(host, host.slot(1), young_value);
        assert!(mark::is_white(old_value));
        assert!(mark::is_grey(young_value));
    }
}
