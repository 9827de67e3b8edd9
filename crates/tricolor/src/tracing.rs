//! Structured tracing for barrier and marking state changes.
//!
//! Compiled only with the `tracing` feature. Call sites are gated on the same
//! feature, so nothing here costs anything otherwise. The per-store path emits
//! `trace`-level events only, everything else is `debug`.

#![cfg(feature = "tracing")]

use ::tracing::{span, Level, Span};

use crate::address::HeapRef;
use crate::barrier::BarrierId;
use crate::heap::{RegionFlags, Residency};
use crate::mark::MarkingMode;

/// A region was created.
pub fn log_region_allocated(residency: Residency, flags: RegionFlags) {
    ::tracing::debug!(?residency, ?flags, "region_allocated");
}

/// The heap started a marking cycle.
pub fn log_marking_start(mode: MarkingMode, epoch: u32, is_compacting: bool) {
    ::tracing::debug!(?mode, epoch, is_compacting, "marking_start");
}

/// The heap stopped marking.
pub fn log_marking_finish(mode: MarkingMode, pending_entries: usize) {
    ::tracing::debug!(?mode, pending_entries, "marking_finish");
}

/// A barrier picked up a running cycle.
pub fn log_barrier_activated(id: BarrierId, mode: MarkingMode, is_compacting: bool) {
    ::tracing::debug!(barrier = id.raw(), ?mode, is_compacting, "barrier_activated");
}

/// A barrier left its cycle.
pub fn log_barrier_deactivated(id: BarrierId) {
    ::tracing::debug!(barrier = id.raw(), "barrier_deactivated");
}

/// Span covering one publish of a barrier's local state.
pub fn span_publish(id: BarrierId) -> Span {
    span!(Level::DEBUG, "barrier_publish", barrier = id.raw())
}

/// A barrier published its worklist segment and buffered relocation slots.
pub fn log_barrier_published(id: BarrierId, entries: usize, reloc_slots: usize) {
    ::tracing::debug!(barrier = id.raw(), entries, reloc_slots, "barrier_published");
}

/// An internal-fields store was handed to the embedder tracer.
pub fn log_embedder_handoff(host: HeapRef) {
    ::tracing::debug!(host = %host.address(), "embedder_handoff");
}

/// A slow path was entered.
pub fn trace_slow_path(kind: &'static str, host: Option<HeapRef>) {
    ::tracing::trace!(kind, host = ?host.map(HeapRef::address), "barrier_slow_path");
}

/// A cross-boundary slot was remembered.
pub fn trace_remembered(kind: &'static str, offset: u32) {
    ::tracing::trace!(kind, offset, "slot_remembered");
}
