//! Integration tests for the checks of the verification layer.
//!
//! The checks exist in debug builds and with the `verify-barriers` feature;
//! without either, these tests are ignored.

use tricolor::barrier::{set_for_thread, write_barrier, MarkingBarrier, MarkingBarrierCell, MarkingBarrierRef};
use tricolor::barrier::from_code::tricolor_marking_from_code;
use tricolor::heap::{RegionFlags, Residency, ThreadKind};
use tricolor::test_util::Fixture;
use tricolor::{current_marking_barrier, LocalHeap, MarkingMode, VERIFY_BARRIERS};

/// Puts the previously installed barrier back, also while unwinding.
struct Restore(Option<MarkingBarrierRef>);

impl Drop for Restore {
    fn drop(&mut self) {
        set_for_thread(self.0.take());
    }
}

#[test]
fn test_verification_follows_build_profile() {
    assert_eq!(
        VERIFY_BARRIERS,
        cfg!(any(debug_assertions, feature = "verify-barriers"))
    );
}

#[test]
#[cfg_attr(not(any(debug_assertions, feature = "verify-barriers")), ignore)]
#[should_panic(expected = "does not match")]
fn test_registry_desync_is_caught() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_main(&fx.heap);
    let stray = MarkingBarrierCell::new_ref(MarkingBarrier::new(&fx.heap, ThreadKind::Background));
    let _restore = Restore(set_for_thread(Some(stray)));
    let _ = current_marking_barrier(fx.alloc_regular(1));
}

#[test]
#[cfg_attr(any(debug_assertions, feature = "verify-barriers"), ignore)]
fn test_registry_desync_is_unchecked_in_production_builds() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_main(&fx.heap);
    let stray = MarkingBarrierCell::new_ref(MarkingBarrier::new(&fx.heap, ThreadKind::Background));
    let stray_id = stray.id();
    let _restore = Restore(set_for_thread(Some(stray)));
    assert_eq!(current_marking_barrier(fx.alloc_regular(1)).id(), stray_id);
}

#[test]
#[cfg_attr(not(any(debug_assertions, feature = "verify-barriers")), ignore)]
#[should_panic(expected = "populated descriptors in an array of")]
fn test_populated_count_above_capacity_is_caught() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_main(&fx.heap);
    let array = fx.alloc_descriptor_array(2);
    fx.heap.start_marking(MarkingMode::Major, false);
    write_barrier::for_descriptor_array(array, 3);
}

#[test]
#[cfg_attr(not(any(debug_assertions, feature = "verify-barriers")), ignore)]
#[should_panic(expected = "host-less stores happen on the main thread")]
fn test_global_handle_store_off_main_thread_is_caught() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_background(&fx.heap);
    let value = fx.alloc_regular(1);
    fx.heap.start_marking(MarkingMode::Major, false);
    write_barrier::for_global_handle(value.to_tagged());
}

#[test]
#[cfg_attr(not(any(debug_assertions, feature = "verify-barriers")), ignore)]
#[should_panic(expected = "skipped a required barrier")]
fn test_skipping_required_barrier_is_caught() {
    let fx = Fixture::new();
    let host = fx.alloc_regular(2);
    let value = fx.alloc_regular(2);
    fx.heap.start_marking(MarkingMode::Major, false);
    write_barrier::store(
        host,
        host.slot(1),
        value.to_tagged(),
        write_barrier::WriteBarrierMode::Skip,
    );
}

#[test]
#[cfg_attr(not(any(debug_assertions, feature = "verify-barriers")), ignore)]
#[should_panic(expected = "while the heap is not marking")]
fn test_marking_from_code_outside_cycle_is_caught() {
    let fx = Fixture::new();
    let host = fx.alloc_regular(2);
    let value = fx.alloc_regular(2);
    host.slot(1).store(value.to_tagged());
    // SAFETY: live host and slot.
    unsafe {
        tricolor_marking_from_code(host.to_tagged().raw(), host.slot(1).address().as_usize());
    }
}

#[test]
#[cfg_attr(not(any(debug_assertions, feature = "verify-barriers")), ignore)]
#[should_panic(expected = "region requested from a client heap")]
fn test_shared_region_from_client_heap_is_caught() {
    let fx = Fixture::new();
    let _ = fx.heap.allocate_region(Residency::Shared, RegionFlags::empty());
}

#[test]
#[cfg_attr(not(any(debug_assertions, feature = "verify-barriers")), ignore)]
#[should_panic(expected = "outside a never-evacuate region")]
fn test_builtin_outside_code_space_is_caught() {
    let fx = Fixture::new();
    fx.heap.register_builtin(fx.alloc_regular(2));
}

#[test]
#[should_panic(expected = "no marking barrier installed")]
fn test_missing_barrier_is_fatal_in_every_build() {
    let fx = Fixture::new();
    let host = fx.alloc_regular(2);
    let value = fx.alloc_regular(2);
    fx.heap.start_marking(MarkingMode::Major, false);
    write_barrier::marking(host, host.slot(1), value.to_tagged());
}
