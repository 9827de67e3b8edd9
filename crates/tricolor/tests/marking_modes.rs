//! Integration tests for minor marking and compaction slot recording.

use tricolor::barrier::write_barrier;
use tricolor::heap::RegionFlags;
use tricolor::mark;
use tricolor::remembered_set::{RememberedSetKind, SlotDescriptor};
use tricolor::test_util::Fixture;
use tricolor::{LocalHeap, MarkingMode};

#[test]
fn test_minor_marking_traces_young_values_only() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_main(&fx.heap);
    let young = fx.region(RegionFlags::YOUNG);
    let host = fx.alloc_regular(3);
    let old_value = fx.alloc_regular(2);
    let young_value = young.allocate(2).unwrap();
    fx.heap.start_marking(MarkingMode::Minor, false);

    write_barrier::marking(host, host.slot(1), old_value.to_tagged());
    write_barrier::marking(host, host.slot(2), young_value.to_tagged());
    assert!(mark::is_white(old_value));
    assert!(mark::is_grey(young_value));

    let handle_old = fx.alloc_regular(1);
    let handle_young = young.allocate(1).unwrap();
    write_barrier::for_global_handle(handle_old.to_tagged());
    write_barrier::for_global_handle(handle_young.to_tagged());
    assert!(mark::is_white(handle_old));
    assert!(mark::is_grey(handle_young));
}

#[test]
fn test_minor_cycles_never_compact() {
    let fx = Fixture::new();
    let local = LocalHeap::new_main(&fx.heap);
    fx.heap.start_marking(MarkingMode::Minor, false);
    local.safepoint();
    assert_eq!(local.marking_barrier().borrow().mode(), MarkingMode::Minor);
    assert!(!local.marking_barrier().borrow().is_compacting());
}

#[test]
fn test_compacting_records_slots_to_evacuation_candidates() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_main(&fx.heap);
    let candidate = fx.region(RegionFlags::EVACUATION_CANDIDATE);
    let host = fx.alloc_regular(3);
    let moving = candidate.allocate(2).unwrap();
    let staying = fx.alloc_regular(2);
    fx.heap.start_marking(MarkingMode::Major, true);

    host.slot(1).store(moving.to_tagged());
    write_barrier::marking(host, host.slot(1), moving.to_tagged());
    host.slot(2).store(staying.to_tagged());
    write_barrier::marking(host, host.slot(2), staying.to_tagged());

    let recorded = fx.regular().remembered_set_snapshot(RememberedSetKind::OldToOld);
    assert_eq!(
        recorded,
        vec![SlotDescriptor::untyped(fx.regular().offset_of(host.slot(1).address()))]
    );
}

#[test]
fn test_already_marked_value_still_has_its_slot_recorded() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_main(&fx.heap);
    let candidate = fx.region(RegionFlags::EVACUATION_CANDIDATE);
    let host = fx.alloc_regular(3);
    let moving = candidate.allocate(2).unwrap();
    fx.heap.start_marking(MarkingMode::Major, true);
    mark::mark_black(moving);

    write_barrier::marking(host, host.slot(1), moving.to_tagged());
    write_barrier::marking(host, host.slot(2), moving.to_tagged());
    assert_eq!(fx.regular().remembered_set_len(RememberedSetKind::OldToOld), 2);
}

#[test]
fn test_skip_slot_recording_region_records_nothing() {
    let fx = Fixture::new();
    let _local = LocalHeap::new_main(&fx.heap);
    let candidate = fx.region(RegionFlags::EVACUATION_CANDIDATE);
    let quiet = fx.region(RegionFlags::SKIP_SLOT_RECORDING);
    let host = quiet.allocate(2).unwrap();
    let moving = candidate.allocate(2).unwrap();
    fx.heap.start_marking(MarkingMode::Major, true);

    write_barrier::marking(host, host.slot(1), moving.to_tagged());
    assert!(mark::is_grey(moving));
    assert_eq!(quiet.remembered_set_len(RememberedSetKind::OldToOld), 0);
}

#[test]
fn test_barrier_leaves_cycle_on_finish() {
    let fx = Fixture::new();
    let local = LocalHeap::new_main(&fx.heap);
    let host = fx.alloc_regular(2);
    let value = fx.alloc_regular(2);
    fx.heap.start_marking(MarkingMode::Major, false);
    write_barrier::marking(host, host.slot(1), value.to_tagged());
    fx.heap.finish_marking();

    // The region flag is down, so the inline check no longer reaches the
    // barrier; the barrier itself follows at its next safepoint.
    let other = fx.alloc_regular(2);
    write_barrier::marking(host, host.slot(1), other.to_tagged());
    assert!(mark::is_white(other));
    local.safepoint();
    assert!(!local.marking_barrier().borrow().is_activated());
    assert_eq!(fx.heap.drain_worklist(), vec![value]);
}
