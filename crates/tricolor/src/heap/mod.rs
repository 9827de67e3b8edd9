//! Heap and region management.
//!
//! [`Heap`] owns its regions and the state every barrier of the heap shares:
//! the marking status, the global worklist, the builtin table, the embedder
//! tracer and the statistics. It is always handed out behind an `Arc`.

pub mod classify;
pub mod local;
pub mod region;

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};

use crate::address::HeapRef;
use crate::barrier::BarrierId;
use crate::config::{ConfigError, HeapConfig};
use crate::embedder::EmbedderHeapTracer;
use crate::mark::{self, MarkingMode, MarkingStatus, MarkingWorklist};
use crate::stats::BarrierStats;
use crate::verify::verify;

pub use classify::{is_permanent_and_immovable, residency_of, BuiltinTable};
pub use local::{LocalHeap, ThreadKind};
pub use region::{Region, RegionFlags, Residency, REGION_SIZE};

/// A garbage-collected heap: a set of regions plus shared marking state.
pub struct Heap {
    config: HeapConfig,
    regions: Mutex<Vec<NonNull<Region>>>,
    status: CachePadded<MarkingStatus>,
    worklist: MarkingWorklist,
    builtins: BuiltinTable,
    embedder: RwLock<Option<Arc<dyn EmbedderHeapTracer>>>,
    main_thread_barrier: AtomicU64,
    stats: BarrierStats,
    shared_heap: Option<Arc<Heap>>,
}

// SAFETY: the region pointers are owned by the heap and only freed on drop;
// every region is itself `Send + Sync`. All other state is synchronized.
unsafe impl Send for Heap {}
// SAFETY: see above.
unsafe impl Sync for Heap {}

impl Heap {
    /// Create a heap.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid. Use [`Heap::try_new`] to handle that case.
    #[must_use]
    pub fn new(config: HeapConfig) -> Arc<Self> {
        match Self::try_new(config) {
            Ok(heap) => heap,
            Err(err) => panic!("invalid heap configuration: {err}"),
        }
    }

    /// Create a heap, validating `config` first.
    ///
    /// # Errors
    ///
    /// Returns the reason `config` was rejected.
    pub fn try_new(config: HeapConfig) -> Result<Arc<Self>, ConfigError> {
        Self::build(config, None)
    }

    /// Create a client heap whose objects may reference `shared`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid or describes a shared heap, or if
    /// `shared` is not a shared heap.
    #[must_use]
    pub fn new_client(config: HeapConfig, shared: &Arc<Self>) -> Arc<Self> {
        match Self::try_new_client(config, shared) {
            Ok(heap) => heap,
            Err(err) => panic!("invalid heap configuration: {err}"),
        }
    }

    /// Create a client heap attached to `shared`, validating `config` first.
    ///
    /// # Errors
    ///
    /// Returns the reason `config` was rejected.
    ///
    /// # Panics
    ///
    /// Panics if `config` describes a shared heap or `shared` is not one.
    pub fn try_new_client(config: HeapConfig, shared: &Arc<Self>) -> Result<Arc<Self>, ConfigError> {
        assert!(shared.is_shared(), "client heaps attach to a shared heap");
        assert!(!config.is_shared, "a shared heap cannot be a client");
        Self::build(config, Some(Arc::clone(shared)))
    }

    fn build(config: HeapConfig, shared_heap: Option<Arc<Self>>) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            regions: Mutex::new(Vec::new()),
            status: CachePadded::new(MarkingStatus::new()),
            worklist: MarkingWorklist::new(),
            builtins: BuiltinTable::new(),
            embedder: RwLock::new(None),
            main_thread_barrier: AtomicU64::new(0),
            stats: BarrierStats::new(),
            shared_heap,
        }))
    }

    /// The heap's configuration.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Whether this is the shared heap.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.config.is_shared
    }

    /// The shared heap this client heap is attached to.
    #[must_use]
    pub const fn shared_heap(&self) -> Option<&Arc<Self>> {
        self.shared_heap.as_ref()
    }

    /// Allocate a new region.
    ///
    /// Shared regions belong to the shared heap only. A region created while
    /// the heap is marking starts with the marking flag set.
    ///
    /// The returned reference borrows the heap, which frees the region when it
    /// drops:
    ///
    /// ```compile_fail
    /// use tricolor::heap::{RegionFlags, Residency};
    /// use tricolor::{Heap, HeapConfig};
    ///
    /// let region = {
    ///     let heap = Heap::new(HeapConfig::default());
    ///     heap.allocate_region(Residency::Regular, RegionFlags::empty())
    /// };
    /// let _ = region.flags();
    /// ```
    pub fn allocate_region(&self, residency: Residency, flags: RegionFlags) -> &Region {
        verify!(
            (residency == Residency::Shared) == self.is_shared()
                || residency == Residency::ReadOnly,
            "{residency:?} region requested from a {} heap",
            if self.is_shared() { "shared" } else { "client" }
        );
        // The marking check happens under the region lock so a concurrent
        // `start_marking` either sees the new region or is seen by it.
        let mut regions = self.regions.lock();
        let mut flags = flags;
        if residency != Residency::ReadOnly && self.is_marking() {
            flags = flags | RegionFlags::MARKING;
        }
        let ptr = Region::create(
            self,
            residency,
            flags,
            self.config.remembered_set_chunk_capacity,
        );
        regions.push(ptr);
        drop(regions);

        #[cfg(feature = "tracing")]
        crate::tracing::log_region_allocated(residency, flags);

        // SAFETY: the region lives until the heap drops, and the reference
        // borrows the heap.
        unsafe { &*ptr.as_ptr() }
    }

    /// Run `f` on every region.
    pub fn for_each_region(&self, mut f: impl FnMut(&Region)) {
        for region in self.regions.lock().iter() {
            // SAFETY: regions are freed only when the heap drops.
            f(unsafe { region.as_ref() });
        }
    }

    /// Number of regions.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// The mode of the running marking cycle.
    #[must_use]
    pub fn marking_mode(&self) -> MarkingMode {
        self.status.mode()
    }

    /// Whether a marking cycle is running.
    #[must_use]
    pub fn is_marking(&self) -> bool {
        self.marking_mode().is_active()
    }

    /// Whether the running cycle will compact.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.status.is_compacting()
    }

    /// Epoch of the current (or last) major cycle.
    #[must_use]
    pub fn marking_epoch(&self) -> u32 {
        self.status.epoch()
    }

    pub(crate) fn marking_generation(&self) -> u64 {
        self.status.generation()
    }

    /// Start a marking cycle.
    ///
    /// Raises the marking flag on every writable region and turns the builtins
    /// black. Barriers pick up the new status at their next safepoint or slow
    /// path call.
    pub fn start_marking(&self, mode: MarkingMode, is_compacting: bool) {
        verify!(mode.is_active(), "start_marking with MarkingMode::Off");
        verify!(!self.is_marking(), "marking already started");
        verify!(
            !is_compacting || mode.is_major(),
            "only major cycles compact"
        );

        let epoch = self.status.start(mode, is_compacting);
        self.for_each_region(|region| {
            if !region.in_read_only() {
                region.set_flags(RegionFlags::MARKING);
            }
        });
        self.builtins.for_each(mark::mark_black);

        #[cfg(feature = "tracing")]
        crate::tracing::log_marking_start(mode, epoch, is_compacting);
        #[cfg(not(feature = "tracing"))]
        let _ = epoch;
    }

    /// Stop the running marking cycle.
    pub fn finish_marking(&self) {
        verify!(self.is_marking(), "finish_marking without a running cycle");
        #[cfg(feature = "tracing")]
        let mode = self.marking_mode();

        self.status.stop();
        self.for_each_region(|region| region.clear_flags(RegionFlags::MARKING));

        #[cfg(feature = "tracing")]
        crate::tracing::log_marking_finish(mode, self.worklist.len());
    }

    /// Reset every object of the heap to white.
    pub fn clear_marks(&self) {
        verify!(!self.is_marking(), "clear_marks during marking");
        self.for_each_region(|region| region.colors().clear());
    }

    /// The global worklist barriers publish into.
    #[must_use]
    pub const fn worklist(&self) -> &MarkingWorklist {
        &self.worklist
    }

    /// Take every object published to the global worklist.
    pub fn drain_worklist(&self) -> Vec<HeapRef> {
        self.worklist.drain()
    }

    /// Register an always-rooted builtin code object.
    ///
    /// Builtins live in a never-evacuate region; during marking they are black.
    pub fn register_builtin(&self, code: HeapRef) {
        verify!(
            Region::of(code).never_evacuate(),
            "builtin {code:?} outside a never-evacuate region"
        );
        self.builtins.insert(code);
        if self.is_marking() {
            mark::mark_black(code);
        }
    }

    /// The builtin table.
    #[must_use]
    pub const fn builtins(&self) -> &BuiltinTable {
        &self.builtins
    }

    /// Whether `obj` is a registered builtin.
    #[must_use]
    pub fn is_builtin(&self, obj: HeapRef) -> bool {
        self.builtins.contains(obj)
    }

    /// Attach or detach the embedder tracer, returning the previous one.
    pub fn set_embedder_tracer(
        &self,
        tracer: Option<Arc<dyn EmbedderHeapTracer>>,
    ) -> Option<Arc<dyn EmbedderHeapTracer>> {
        std::mem::replace(&mut *self.embedder.write(), tracer)
    }

    /// The attached embedder tracer.
    #[must_use]
    pub fn embedder_tracer(&self) -> Option<Arc<dyn EmbedderHeapTracer>> {
        self.embedder.read().clone()
    }

    /// Barrier statistics.
    #[must_use]
    pub const fn stats(&self) -> &BarrierStats {
        &self.stats
    }

    /// The barrier of the heap's main thread, if one is attached.
    #[must_use]
    pub fn main_thread_barrier(&self) -> Option<BarrierId> {
        BarrierId::from_raw(self.main_thread_barrier.load(Ordering::Acquire))
    }

    pub(crate) fn attach_main_thread_barrier(&self, id: BarrierId) {
        let previous = self.main_thread_barrier.swap(id.raw(), Ordering::AcqRel);
        verify!(previous == 0, "heap already has a main thread");
    }

    pub(crate) fn detach_main_thread_barrier(&self, id: BarrierId) {
        let result = self.main_thread_barrier.compare_exchange(
            id.raw(),
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        verify!(result.is_ok(), "main thread barrier {id:?} was not attached");
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for region in self.regions.get_mut().drain(..) {
            // SAFETY: every region was created by this heap and is released once.
            unsafe { Region::release(region) };
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("is_shared", &self.is_shared())
            .field("regions", &self.region_count())
            .field("marking_mode", &self.marking_mode())
            .field("is_compacting", &self.is_compacting())
            .field("epoch", &self.marking_epoch())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Fixture;

    #[test]
    fn test_try_new_rejects_invalid_config() {
        let config = HeapConfig::new().with_worklist_segment_capacity(3);
        assert_eq!(
            Heap::try_new(config).err(),
            Some(ConfigError::WorklistSegmentCapacity(3))
        );
    }

    #[test]
    #[should_panic(expected = "invalid heap configuration")]
    fn test_new_panics_on_invalid_config() {
        let _ = Heap::new(HeapConfig::new().with_remembered_set_chunk_capacity(0));
    }

    #[test]
    fn test_start_and_finish_marking_toggle_region_flags() {
        let fx = Fixture::new();
        fx.heap.start_marking(MarkingMode::Major, false);
        assert!(fx.regular().is_marking());
        assert!(!fx.read_only().is_marking());
        let late = fx.heap.allocate_region(Residency::Regular, RegionFlags::empty());
        assert!(late.is_marking());

        fx.heap.finish_marking();
        assert!(!fx.regular().is_marking());
        assert!(!late.is_marking());
    }

    #[test]
    fn test_builtins_are_black_during_marking() {
        let fx = Fixture::new();
        let early = fx.alloc_builtin(4);
        fx.heap.start_marking(MarkingMode::Major, false);
        assert!(mark::is_black(early));

        let late = fx.alloc_builtin(4);
        assert!(mark::is_black(late));
        fx.heap.finish_marking();
    }

    #[test]
    fn test_major_cycles_advance_epoch() {
        let fx = Fixture::new();
        let epoch = fx.heap.marking_epoch();
        fx.heap.start_marking(MarkingMode::Major, false);
        fx.heap.finish_marking();
        fx.heap.start_marking(MarkingMode::Minor, false);
        fx.heap.finish_marking();
        assert_eq!(fx.heap.marking_epoch(), epoch + 1);
    }
}
