//! Write barriers and concurrent-marking synchronization for a region-based
//! tracing garbage collector.
//!
//! `tricolor` is the layer every heap pointer store passes through while one or
//! more collector threads mark the heap concurrently with the mutators. It keeps
//! the **tri-color invariant** (a black object never holds an unrecorded
//! reference to a white one) and the **remembered sets** that let the shared
//! heap and the compactor find cross-boundary slots without rescanning.
//!
//! # Layout
//!
//! - [`heap`]: region-aligned memory blocks with an in-memory header holding the
//!   residency class, flags, color bitmap and remembered sets. [`Heap`] owns the
//!   regions; [`LocalHeap`] is a thread's execution context.
//! - [`barrier`]: the per-thread [`MarkingBarrier`], the thread-local registry
//!   that binds it, the typed slow paths and inline fast checks, and the raw
//!   entry points called from generated code.
//! - [`objects`]: the few object shapes the barrier understands (code objects
//!   and their relocation info, descriptor arrays, array buffer extensions).
//!
//! # Quick Start
//!
//! ```
//! use tricolor::{barrier::write_barrier, Heap, HeapConfig, LocalHeap, MarkingMode};
//! use tricolor::heap::{RegionFlags, Residency};
//! use tricolor::mark;
//!
//! let heap = Heap::new(HeapConfig::default());
//! let local = LocalHeap::new_main(&heap);
//! let region = heap.allocate_region(Residency::Regular, RegionFlags::empty());
//! let host = region.allocate(4).unwrap();
//! let value = region.allocate(2).unwrap();
//!
//! heap.start_marking(MarkingMode::Major, false);
//! local.safepoint();
//! mark::mark_black(host);
//!
//! host.slot(1).store(value.to_tagged());
//! write_barrier::marking(host, host.slot(1), value.to_tagged());
//! assert!(!mark::is_white(value));
//! ```
//!
//! # Thread Safety
//!
//! [`Heap`] is `Send + Sync` and lives behind an `Arc`. A [`MarkingBarrier`] is
//! exclusive to the thread that installed it; [`LocalHeap`] is `!Send`. The only
//! structure written by several threads at once is a region's remembered set,
//! guarded by that region's own mutex.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod barrier;
pub mod chunked;
pub mod config;
pub mod embedder;
pub mod heap;
pub mod mark;
pub mod objects;
pub mod remembered_set;
pub mod stats;
pub mod tagged;
pub mod verify;

mod tracing;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use address::{Address, HeapRef, Slot};
pub use barrier::{current_marking_barrier, set_for_thread, MarkingBarrier, MarkingBarrierRef};
pub use config::{ConfigError, HeapConfig};
pub use embedder::EmbedderHeapTracer;
pub use heap::{Heap, LocalHeap, Region};
pub use mark::{Color, MarkingMode};
pub use stats::{BarrierStats, BarrierStatsSnapshot};
pub use tagged::TaggedValue;
pub use verify::VERIFY_BARRIERS;
