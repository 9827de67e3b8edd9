//! Raw-address entry points for generated code.
//!
//! Generated code calls these through the C ABI with the tagged host pointer
//! and the untagged slot address. This is the only place raw words coming from
//! generated code become [`HeapRef`]s and [`Slot`]s; past this point the
//! barrier works on typed references only. Both functions return 0 because
//! the calling convention expects a result.

use crate::address::{Address, HeapRef, Slot};
use crate::barrier::write_barrier;
use crate::heap::Region;
use crate::verify::verify;

/// Marking barrier for a store generated code has already performed.
///
/// Reads the stored value back from the slot. If the slot is the host's map
/// word and the crate is built with `map-packing`, the word is unpacked first.
/// Values that are not heap objects are ignored.
///
/// # Safety
///
/// `raw_host` must be a tagged pointer to a live object of a live heap whose
/// region is marking, `raw_slot` the word-aligned address of a slot inside
/// that object, and the calling thread must have a marking barrier installed.
#[no_mangle]
pub unsafe extern "C" fn tricolor_marking_from_code(raw_host: usize, raw_slot: usize) -> i32 {
    // SAFETY: the caller passes a tagged pointer to a live object.
    let Some(host) = (unsafe { HeapRef::from_tagged(raw_host) }) else {
        return 0;
    };
    // SAFETY: the caller passes a slot inside `host`.
    let slot = unsafe { Slot::from_address(Address::from_usize(raw_slot)) };

    #[cfg(feature = "map-packing")]
    let value = if slot == host.slot(0) {
        let raw = crate::tagged::unpack_map_word(slot.load().raw());
        // SAFETY: an unpacked map word is a tagged pointer to the map.
        unsafe { crate::tagged::TaggedValue::from_raw(raw) }
    } else {
        slot.load()
    };
    #[cfg(not(feature = "map-packing"))]
    let value = slot.load();

    let Some(value) = value.heap_object() else {
        return 0;
    };
    verify!(
        Region::of(host).heap().is_marking(),
        "marking barrier called from code for {host:?} while the heap is not marking"
    );
    write_barrier::marking_slow(host, slot, value);
    0
}

/// Shared-region barrier for a store generated code has already performed.
///
/// Remembers the slot in the host region's `OldToShared` set unless the host
/// is itself in the writable shared region.
///
/// # Safety
///
/// `raw_host` must be a tagged pointer to a live object of a live heap and
/// `raw_slot` the word-aligned address of a slot inside that object holding a
/// reference into the shared region.
#[no_mangle]
pub unsafe extern "C" fn tricolor_shared_from_code(raw_host: usize, raw_slot: usize) -> i32 {
    // SAFETY: the caller passes a tagged pointer to a live object.
    let Some(host) = (unsafe { HeapRef::from_tagged(raw_host) }) else {
        return 0;
    };
    // SAFETY: the caller passes a slot inside `host`.
    let slot = unsafe { Slot::from_address(Address::from_usize(raw_slot)) };
    verify!(
        slot.load()
            .heap_object()
            .is_some_and(|value| Region::of(value).in_shared()),
        "shared barrier called from code for {slot:?} which holds no shared object"
    );
    if !Region::of(host).in_writable_shared() {
        write_barrier::shared_heap_barrier_slow(host, slot);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remembered_set::{RememberedSetKind, SlotDescriptor};
    use crate::test_util::Fixture;
    use crate::{mark, LocalHeap, MarkingMode, TaggedValue};

    #[test]
    fn test_marking_from_code_greys_stored_value() {
        let fx = Fixture::new();
        let _local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(3);
        let value = fx.alloc_regular(2);
        fx.heap.start_marking(MarkingMode::Major, false);
        host.slot(2).store(value.to_tagged());

        // SAFETY: live host and slot, barrier installed.
        let status = unsafe {
            tricolor_marking_from_code(host.to_tagged().raw(), host.slot(2).address().as_usize())
        };
        assert_eq!(status, 0);
        assert!(mark::is_grey(value));
    }

    #[test]
    fn test_marking_from_code_ignores_smi() {
        let fx = Fixture::new();
        let local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(2);
        fx.heap.start_marking(MarkingMode::Major, false);
        host.slot(1).store(TaggedValue::smi(3));

        // SAFETY: live host and slot, barrier installed.
        let status = unsafe {
            tricolor_marking_from_code(host.to_tagged().raw(), host.slot(1).address().as_usize())
        };
        assert_eq!(status, 0);
        assert!(local.marking_barrier().borrow().local_worklist().is_empty());
    }

    #[test]
    fn test_shared_from_code_records_slot() {
        let fx = Fixture::new();
        let host = fx.alloc_regular(2);
        let value = fx.alloc_shared(2);
        host.slot(1).store(value.to_tagged());

        // SAFETY: live host and slot.
        let status = unsafe {
            tricolor_shared_from_code(host.to_tagged().raw(), host.slot(1).address().as_usize())
        };
        assert_eq!(status, 0);
        let offset = fx.regular().offset_of(host.slot(1).address());
        assert!(fx
            .regular()
            .remembered_set_contains(RememberedSetKind::OldToShared, SlotDescriptor::untyped(offset)));
    }

    #[test]
    fn test_shared_from_code_skips_writable_shared_host() {
        let fx = Fixture::new();
        let host = fx.alloc_shared(2);
        let value = fx.alloc_shared(2);
        host.slot(1).store(value.to_tagged());

        // SAFETY: live host and slot.
        unsafe {
            tricolor_shared_from_code(host.to_tagged().raw(), host.slot(1).address().as_usize());
        }
        assert_eq!(fx.shared().remembered_set_len(RememberedSetKind::OldToShared), 0);
    }

    #[cfg(feature = "map-packing")]
    #[test]
    fn test_marking_from_code_unpacks_map_word() {
        let fx = Fixture::new();
        let _local = LocalHeap::new_main(&fx.heap);
        let map = fx.alloc_regular(2);
        let host = fx.alloc_regular(2);
        fx.heap.start_marking(MarkingMode::Major, false);
        // SAFETY: a packed map word as the object layout stores it.
        host.slot(0)
            .store(unsafe { TaggedValue::from_raw(crate::tagged::pack_map_word(map)) });

        // SAFETY: live host and slot, barrier installed.
        unsafe {
            tricolor_marking_from_code(host.to_tagged().raw(), host.slot(0).address().as_usize());
        }
        assert!(mark::is_grey(map));
    }
}
