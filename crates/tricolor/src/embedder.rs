//! Hand-off to an embedder's own heap tracer.

use crate::address::HeapRef;
use crate::heap::Heap;

/// A tracer for objects the embedder manages outside this heap.
///
/// The barrier only tells the tracer that a host's internal (embedder-owned)
/// fields changed. How the tracer schedules the resulting work is its own
/// concern.
pub trait EmbedderHeapTracer: Send + Sync {
    /// Whether the tracer is taking part in the current cycle.
    fn in_use(&self) -> bool;

    /// The internal fields of `host` were written.
    fn write_barrier(&self, heap: &Heap, host: HeapRef);
}
