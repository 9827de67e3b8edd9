//! Write barrier entry points.
//!
//! Every heap pointer store is followed by one of the inline checks in this
//! module. They read only the region flags of the host and value, and call the
//! slow paths (the `*_slow*` functions) in two cases:
//!
//! - the host's region is marking: the thread's [`MarkingBarrier`] greys the
//!   value and records compaction slots;
//! - the store creates a reference into the shared region from outside the
//!   writable shared region: the slot is remembered in the host region's
//!   `OldToShared` set, whatever the marking state.
//!
//! The slow paths can also be called directly by code that already knows the
//! store needs them, such as the deserializer.
//!
//! [`MarkingBarrier`]: crate::MarkingBarrier

use crate::address::{HeapRef, Slot};
use crate::barrier::registry::with_current_marking_barrier;
use crate::heap::{is_permanent_and_immovable, Heap, Region};
use crate::objects::{ArrayBufferExtension, Code, DescriptorArray, JsArrayBuffer, RelocInfo};
use crate::remembered_set::{self, RememberedSetKind};
use crate::tagged::TaggedValue;
use crate::verify::verify;

/// Whether a store must run its barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteBarrierMode {
    /// The caller knows the store needs no barrier.
    Skip,
    /// Run the combined barrier.
    #[default]
    Update,
}

// Slow paths.

/// Marking slow path for a field store of `value` into `slot` of `host`.
pub fn marking_slow(host: HeapRef, slot: Slot, value: HeapRef) {
    #[cfg(feature = "tracing")]
    crate::tracing::trace_slow_path("field", Some(host));
    with_current_marking_barrier(host, |barrier| barrier.write(host, slot, value));
}

/// Marking slow path for a store through a global handle.
pub fn marking_slow_from_global_handle(value: HeapRef) {
    #[cfg(feature = "tracing")]
    crate::tracing::trace_slow_path("global_handle", None);
    with_current_marking_barrier(value, |barrier| barrier.write_without_host(value));
}

/// Tell the embedder tracer, if one is attached and in use, that the internal
/// fields of `host` changed.
pub fn marking_slow_from_internal_fields(heap: &Heap, host: HeapRef) {
    let Some(tracer) = heap.embedder_tracer() else {
        return;
    };
    if !tracer.in_use() {
        return;
    }
    heap.stats().record_embedder_handoff();
    #[cfg(feature = "tracing")]
    crate::tracing::log_embedder_handoff(host);
    tracer.write_barrier(heap, host);
}

/// Marking slow path for a store of `value` into the relocation entry `rinfo`
/// of `host`.
pub fn marking_slow_code(host: Code, rinfo: &RelocInfo, value: HeapRef) {
    #[cfg(feature = "tracing")]
    crate::tracing::trace_slow_path("code", Some(host.object()));
    with_current_marking_barrier(host.object(), |barrier| {
        barrier.write_code(host, rinfo, value);
    });
}

/// Shared slow path for a code store: remember the relocation slot in the
/// host region's `OldToShared` set.
pub fn shared_slow_code(host: Code, rinfo: &RelocInfo, value: HeapRef) {
    verify!(
        Region::of(value).in_shared(),
        "shared code barrier for non-shared {value:?}"
    );
    let slot = rinfo.resolve(host);
    // SAFETY: the slot was just resolved from the live `host`.
    unsafe { slot.insert(RememberedSetKind::OldToShared) };
    #[cfg(feature = "tracing")]
    crate::tracing::trace_remembered("code_old_to_shared", slot.offset);
}

/// Marking slow path for `host` gaining `extension`.
pub fn marking_slow_array_buffer(host: JsArrayBuffer, extension: &ArrayBufferExtension) {
    #[cfg(feature = "tracing")]
    crate::tracing::trace_slow_path("array_buffer", Some(host.object()));
    with_current_marking_barrier(host.object(), |barrier| {
        barrier.write_array_buffer(host, extension);
    });
}

/// Marking slow path for `array` growing to `number_of_own_descriptors`.
pub fn marking_slow_descriptor_array(array: DescriptorArray, number_of_own_descriptors: usize) {
    #[cfg(feature = "tracing")]
    crate::tracing::trace_slow_path("descriptor_array", Some(array.object()));
    with_current_marking_barrier(array.object(), |barrier| {
        barrier.write_descriptor_array(array, number_of_own_descriptors);
    });
}

/// Remember `slot` of `host` as pointing into the shared region.
pub fn shared_heap_barrier_slow(host: HeapRef, slot: Slot) {
    let region = Region::of(host);
    verify!(
        !region.in_writable_shared(),
        "old-to-shared slot recorded for shared host {host:?}"
    );
    remembered_set::insert_slot(region, RememberedSetKind::OldToShared, slot);
    #[cfg(feature = "tracing")]
    crate::tracing::trace_remembered("old_to_shared", region.offset_of(slot.address()));
}

// Inline checks.

/// Whether stores into `host` need the marking barrier.
#[must_use]
#[inline]
pub fn is_marking(host: HeapRef) -> bool {
    Region::of(host).is_marking()
}

#[inline]
fn creates_shared_reference(host: HeapRef, value: HeapRef) -> bool {
    Region::of(value).in_shared() && !Region::of(host).in_writable_shared()
}

/// Marking barrier for storing `value` into `slot` of `host`.
#[inline]
pub fn marking(host: HeapRef, slot: Slot, value: TaggedValue) {
    let Some(value) = value.heap_object() else {
        return;
    };
    if !is_marking(host) || Region::of(value).in_read_only() {
        return;
    }
    marking_slow(host, slot, value);
}

/// Shared-region barrier for storing `value` into `slot` of `host`.
#[inline]
pub fn shared(host: HeapRef, slot: Slot, value: TaggedValue) {
    let Some(value) = value.heap_object() else {
        return;
    };
    if creates_shared_reference(host, value) {
        shared_heap_barrier_slow(host, slot);
    }
}

/// Both barriers for a field store.
#[inline]
pub fn combined(host: HeapRef, slot: Slot, value: TaggedValue) {
    let Some(obj) = value.heap_object() else {
        return;
    };
    if creates_shared_reference(host, obj) {
        shared_heap_barrier_slow(host, slot);
    }
    marking(host, slot, value);
}

/// Both barriers for a store of `value` into the relocation entry `rinfo` of
/// `host`.
#[inline]
pub fn for_code(host: Code, rinfo: &RelocInfo, value: HeapRef) {
    if creates_shared_reference(host.object(), value) {
        shared_slow_code(host, rinfo, value);
    }
    if is_marking(host.object()) && !Region::of(value).in_read_only() {
        marking_slow_code(host, rinfo, value);
    }
}

/// Barrier for attaching `extension` to `host`. Detaching needs nothing.
#[inline]
pub fn for_array_buffer(host: JsArrayBuffer, extension: Option<&ArrayBufferExtension>) {
    let Some(extension) = extension else {
        return;
    };
    if is_marking(host.object()) {
        marking_slow_array_buffer(host, extension);
    }
}

/// Barrier for `array` growing to `number_of_own_descriptors` descriptors.
#[inline]
pub fn for_descriptor_array(array: DescriptorArray, number_of_own_descriptors: usize) {
    if is_marking(array.object()) {
        marking_slow_descriptor_array(array, number_of_own_descriptors);
    }
}

/// Barrier for a store of `value` through a global handle.
#[inline]
pub fn for_global_handle(value: TaggedValue) {
    let Some(value) = value.heap_object() else {
        return;
    };
    if is_marking(value) {
        marking_slow_from_global_handle(value);
    }
}

/// Barrier for a write to the embedder-owned internal fields of `host`.
#[inline]
pub fn for_internal_fields(host: HeapRef) {
    marking_slow_from_internal_fields(Region::of(host).heap(), host);
}

/// Whether storing `value` into `host` right now needs any barrier work.
///
/// Small integers and permanent-and-immovable objects never do.
#[must_use]
pub fn is_required(host: HeapRef, value: TaggedValue) -> bool {
    let Some(obj) = value.heap_object() else {
        return false;
    };
    if is_permanent_and_immovable(obj) {
        return false;
    }
    is_marking(host) || creates_shared_reference(host, obj)
}

/// Store `value` into `slot` of `host` and run the barrier `mode` asks for.
///
/// With [`WriteBarrierMode::Skip`] the verification layer checks that the
/// barrier really was unnecessary.
pub fn store(host: HeapRef, slot: Slot, value: TaggedValue, mode: WriteBarrierMode) {
    slot.store(value);
    match mode {
        WriteBarrierMode::Update => combined(host, slot, value),
        WriteBarrierMode::Skip => verify!(
            !is_required(host, value),
            "skipped a required barrier storing {value:?} into {host:?}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mark;
    use crate::test_util::Fixture;
    use crate::{LocalHeap, MarkingMode};

    #[test]
    fn test_marking_filters_smis_and_read_only() {
        let fx = Fixture::new();
        let local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(3);
        let ro = fx.alloc_read_only(2);
        fx.heap.start_marking(MarkingMode::Major, false);

        marking(host, host.slot(1), TaggedValue::smi(7));
        marking(host, host.slot(2), ro.to_tagged());
        assert_eq!(local.marking_barrier().borrow().local_counts().slow_path_calls, 0);
        assert!(mark::is_white(ro));
    }

    #[test]
    fn test_marking_is_inert_when_not_marking() {
        let fx = Fixture::new();
        // No barrier is installed: reaching the slow path would panic.
        let host = fx.alloc_regular(2);
        let value = fx.alloc_regular(2);
        marking(host, host.slot(1), value.to_tagged());
        assert!(mark::is_white(value));
    }

    #[test]
    fn test_shared_records_client_host() {
        let fx = Fixture::new();
        let host = fx.alloc_regular(2);
        let value = fx.alloc_shared(2);
        shared(host, host.slot(1), value.to_tagged());
        assert_eq!(fx.regular().remembered_set_len(RememberedSetKind::OldToShared), 1);
    }

    #[test]
    fn test_shared_ignores_shared_host_and_local_value() {
        let fx = Fixture::new();
        let shared_host = fx.alloc_shared(2);
        let shared_value = fx.alloc_shared(2);
        let host = fx.alloc_regular(2);
        let value = fx.alloc_regular(2);
        shared(shared_host, shared_host.slot(1), shared_value.to_tagged());
        shared(host, host.slot(1), value.to_tagged());
        assert_eq!(fx.shared().remembered_set_len(RememberedSetKind::OldToShared), 0);
        assert_eq!(fx.regular().remembered_set_len(RememberedSetKind::OldToShared), 0);
    }

    #[test]
    fn test_is_required() {
        let fx = Fixture::new();
        let host = fx.alloc_regular(2);
        let value = fx.alloc_regular(2);
        let builtin = fx.alloc_builtin(2);
        assert!(!is_required(host, value.to_tagged()));
        assert!(is_required(host, fx.alloc_shared(1).to_tagged()));
        fx.heap.start_marking(MarkingMode::Major, false);
        assert!(is_required(host, value.to_tagged()));
        assert!(!is_required(host, builtin.to_tagged()));
        assert!(!is_required(host, TaggedValue::smi(1)));
    }

    #[test]
    fn test_store_with_update_runs_barrier() {
        let fx = Fixture::new();
        let _local = LocalHeap::new_main(&fx.heap);
        let host = fx.alloc_regular(2);
        let value = fx.alloc_regular(2);
        fx.heap.start_marking(MarkingMode::Major, false);
        store(host, host.slot(1), value.to_tagged(), WriteBarrierMode::Update);
        assert_eq!(host.slot(1).load(), value.to_tagged());
        assert!(mark::is_grey(value));
    }

    #[test]
    fn test_internal_fields_without_tracer_is_noop() {
        let fx = Fixture::new();
        let host = fx.alloc_regular(2);
        for_internal_fields(host);
        assert_eq!(fx.heap.stats().snapshot().embedder_handoffs, 0);
    }
}
