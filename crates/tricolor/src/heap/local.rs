//! Per-thread heap execution context.
//!
//! A thread that stores into the heap does so through a [`LocalHeap`]. Creating
//! one builds the thread's [`MarkingBarrier`], installs it in the thread
//! registry and records it as the thread's context; dropping it publishes the
//! barrier's pending work and restores whatever was installed before. Nested
//! local heaps on one thread must be dropped in reverse order of creation.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::barrier::{registry, BarrierId, MarkingBarrier, MarkingBarrierCell, MarkingBarrierRef};
use crate::heap::Heap;
use crate::verify::verify;

thread_local! {
    /// Barrier of the thread's innermost local heap.
    static CURRENT_LOCAL_HEAP: Cell<Option<BarrierId>> = const { Cell::new(None) };
}

/// Role of the thread owning a local heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKind {
    /// The heap's main mutator thread. At most one per heap.
    Main,
    /// Any other mutator or helper thread.
    Background,
}

/// A thread's context on a [`Heap`].
pub struct LocalHeap {
    heap: Arc<Heap>,
    kind: ThreadKind,
    barrier: MarkingBarrierRef,
    previous_barrier: Option<MarkingBarrierRef>,
    previous_context: Option<BarrierId>,
}

impl LocalHeap {
    /// Enter `heap` on the current thread.
    #[must_use]
    pub fn new(heap: &Arc<Heap>, kind: ThreadKind) -> Self {
        let barrier = MarkingBarrierCell::new_ref(MarkingBarrier::new(heap, kind));
        let id = barrier.id();
        if kind == ThreadKind::Main {
            heap.attach_main_thread_barrier(id);
        }
        let previous_context = CURRENT_LOCAL_HEAP.with(|current| current.replace(Some(id)));
        let previous_barrier = registry::set_for_thread(Some(Rc::clone(&barrier)));
        Self {
            heap: Arc::clone(heap),
            kind,
            barrier,
            previous_barrier,
            previous_context,
        }
    }

    /// Enter `heap` as its main thread.
    #[must_use]
    pub fn new_main(heap: &Arc<Heap>) -> Self {
        Self::new(heap, ThreadKind::Main)
    }

    /// Enter `heap` as a background thread.
    #[must_use]
    pub fn new_background(heap: &Arc<Heap>) -> Self {
        Self::new(heap, ThreadKind::Background)
    }

    /// The heap.
    #[must_use]
    pub const fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// Role of the owning thread.
    #[must_use]
    pub const fn kind(&self) -> ThreadKind {
        self.kind
    }

    /// Whether this is the heap's main thread.
    #[must_use]
    pub fn is_main_thread(&self) -> bool {
        self.kind == ThreadKind::Main
    }

    /// The thread's marking barrier.
    #[must_use]
    pub const fn marking_barrier(&self) -> &MarkingBarrierRef {
        &self.barrier
    }

    /// Identity of the thread's marking barrier.
    #[must_use]
    pub fn barrier_id(&self) -> BarrierId {
        self.barrier.id()
    }

    /// Pick up a change in the heap's marking status.
    pub fn safepoint(&self) {
        self.barrier.borrow_mut().sync_with_heap();
    }

    /// Publish the barrier's pending work to the heap.
    pub fn publish(&self) {
        self.barrier.borrow_mut().publish();
    }

    /// Barrier of the innermost local heap entered on this thread.
    #[must_use]
    pub fn current_barrier_id() -> Option<BarrierId> {
        CURRENT_LOCAL_HEAP.with(Cell::get)
    }
}

impl Drop for LocalHeap {
    fn drop(&mut self) {
        {
            let mut barrier = self.barrier.borrow_mut();
            if barrier.is_activated() {
                barrier.deactivate();
            } else {
                barrier.publish();
            }
        }

        let id = self.barrier.id();
        let installed = registry::set_for_thread(self.previous_barrier.take());
        verify!(
            installed.as_ref().map(|b| b.id()) == Some(id),
            "local heaps dropped out of order: {id:?} was not the installed barrier"
        );
        let context = CURRENT_LOCAL_HEAP.with(|current| current.replace(self.previous_context));
        verify!(context == Some(id), "local heaps dropped out of order");

        if self.kind == ThreadKind::Main {
            self.heap.detach_main_thread_barrier(id);
        }
    }
}

impl std::fmt::Debug for LocalHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHeap")
            .field("kind", &self.kind)
            .field("barrier", &self.barrier.id())
            .finish_non_exhaustive()
    }
}
