//! Write barriers.
//!
//! [`write_barrier`] holds the entry points the mutator calls around stores:
//! cheap inline checks that fall through to slow paths only while marking or
//! when a store creates an old-to-shared reference. The slow paths locate the
//! thread's [`MarkingBarrier`] through [`registry`] and let it do the work.
//! [`from_code`] exposes the same slow paths to generated code.

pub mod from_code;
pub mod marking;
pub mod registry;
pub mod write_barrier;

pub use marking::{BarrierId, MarkingBarrier, MarkingBarrierCell, MarkingBarrierRef};
pub use registry::{
    current_barrier_id, current_marking_barrier, has_marking_barrier, set_for_thread,
    with_current_marking_barrier,
};
pub use write_barrier::WriteBarrierMode;
