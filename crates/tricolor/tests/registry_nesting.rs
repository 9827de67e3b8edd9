//! Integration tests for the thread-local barrier registry.

use tricolor::barrier::{
    current_barrier_id, has_marking_barrier, set_for_thread, MarkingBarrier, MarkingBarrierCell,
};
use tricolor::heap::ThreadKind;
use tricolor::test_util::Fixture;
use tricolor::{current_marking_barrier, Heap, HeapConfig, LocalHeap, MarkingMode};

#[test]
fn test_restoring_second_swap_yields_first_barrier() {
    let fx = Fixture::new();
    let b1 = MarkingBarrierCell::new_ref(MarkingBarrier::new(&fx.heap, ThreadKind::Background));
    let b2 = MarkingBarrierCell::new_ref(MarkingBarrier::new(&fx.heap, ThreadKind::Background));

    assert!(set_for_thread(Some(b1.clone())).is_none());
    let previous = set_for_thread(Some(b2.clone()));
    assert_eq!(previous.as_ref().map(|b| b.id()), Some(b1.id()));
    assert_eq!(current_barrier_id(), Some(b2.id()));

    let restored = set_for_thread(previous);
    assert_eq!(restored.map(|b| b.id()), Some(b2.id()));
    assert_eq!(current_barrier_id(), Some(b1.id()));
    assert!(has_marking_barrier());

    assert_eq!(set_for_thread(None).map(|b| b.id()), Some(b1.id()));
    assert!(!has_marking_barrier());
}

#[test]
fn test_nested_local_heaps_restore_in_lifo_order() {
    let fx = Fixture::new();
    let other = Heap::new(HeapConfig::new());
    let outer = LocalHeap::new_main(&fx.heap);
    {
        let inner = LocalHeap::new_main(&other);
        assert_eq!(current_barrier_id(), Some(inner.barrier_id()));
        let obj = other
            .allocate_region(tricolor::heap::Residency::Regular, tricolor::heap::RegionFlags::empty())
            .allocate(1)
            .unwrap();
        assert_eq!(current_marking_barrier(obj).id(), inner.barrier_id());
    }
    assert_eq!(current_barrier_id(), Some(outer.barrier_id()));
    assert_eq!(current_marking_barrier(fx.alloc_regular(1)).id(), outer.barrier_id());
}

#[test]
fn test_each_thread_has_its_own_slot() {
    let fx = Fixture::new();
    let main = LocalHeap::new_main(&fx.heap);
    let main_id = main.barrier_id();
    fx.heap.start_marking(MarkingMode::Major, false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            assert!(!has_marking_barrier());
            let background = LocalHeap::new_background(&fx.heap);
            assert_ne!(background.barrier_id(), main_id);
            assert_eq!(
                current_marking_barrier(fx.alloc_regular(1)).id(),
                background.barrier_id()
            );
            assert!(background.marking_barrier().borrow().is_activated());
        });
    });
    assert_eq!(current_barrier_id(), Some(main_id));
}

#[test]
fn test_main_thread_barrier_is_tracked_by_heap() {
    let fx = Fixture::new();
    assert_eq!(fx.heap.main_thread_barrier(), None);
    let main = LocalHeap::new_main(&fx.heap);
    let background = LocalHeap::new_background(&fx.heap);
    assert_eq!(fx.heap.main_thread_barrier(), Some(main.barrier_id()));
    drop(background);
    drop(main);
    assert_eq!(fx.heap.main_thread_barrier(), None);
}
