//! Thread-local lookup of the current thread's marking barrier.

use std::cell::RefCell;
use std::rc::Rc;

use crate::address::HeapRef;
use crate::barrier::{BarrierId, MarkingBarrier, MarkingBarrierRef};
use crate::heap::{LocalHeap, Region};
use crate::verify::VERIFY_BARRIERS;

thread_local! {
    static CURRENT_MARKING_BARRIER: RefCell<Option<MarkingBarrierRef>> = const { RefCell::new(None) };
}

/// Install `barrier` as the current thread's barrier, returning the one it
/// replaces.
///
/// [`LocalHeap`] does this on creation and undoes it on drop; call it directly
/// only to scope a barrier by hand.
pub fn set_for_thread(barrier: Option<MarkingBarrierRef>) -> Option<MarkingBarrierRef> {
    CURRENT_MARKING_BARRIER.with(|current| current.replace(barrier))
}

/// Whether the current thread has a barrier installed.
#[must_use]
pub fn has_marking_barrier() -> bool {
    CURRENT_MARKING_BARRIER.with(|current| current.borrow().is_some())
}

/// Identity of the current thread's barrier.
#[must_use]
pub fn current_barrier_id() -> Option<BarrierId> {
    CURRENT_MARKING_BARRIER.with(|current| current.borrow().as_ref().map(|b| b.id()))
}

/// The barrier responsible for stores into `candidate` on this thread.
///
/// With verification on, the installed barrier is checked against the
/// thread's local heap, or the main thread barrier of the object's heap when
/// the thread has no local heap. Objects in the shared region are exempt from
/// the check since any client thread may write them.
///
/// # Panics
///
/// Panics if no barrier is installed on the current thread.
#[must_use]
pub fn current_marking_barrier(candidate: HeapRef) -> MarkingBarrierRef {
    let installed = CURRENT_MARKING_BARRIER.with(|current| current.borrow().as_ref().map(Rc::clone));
    let Some(barrier) = installed else {
        panic!("no marking barrier installed on this thread");
    };
    if VERIFY_BARRIERS {
        let region = Region::of(candidate);
        if !region.in_shared() {
            let expected =
                LocalHeap::current_barrier_id().or_else(|| region.heap().main_thread_barrier());
            assert!(
                expected.is_none() || expected == Some(barrier.id()),
                "installed {:?} does not match {expected:?} for {candidate:?}",
                barrier.id()
            );
        }
    }
    barrier
}

/// Run `f` on the barrier responsible for stores into `candidate`.
///
/// # Panics
///
/// Panics if no barrier is installed, or if called from within another
/// barrier operation on the same thread.
pub fn with_current_marking_barrier<R>(candidate: HeapRef, f: impl FnOnce(&mut MarkingBarrier) -> R) -> R {
    let barrier = current_marking_barrier(candidate);
    let mut guard = barrier.borrow_mut();
    f(&mut guard)
}
