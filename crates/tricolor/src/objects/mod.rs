//! Object shapes the barrier layer understands.
//!
//! The barrier never walks arbitrary objects. It only needs the layout of code
//! objects (to resolve relocation slots), descriptor arrays (to mark a
//! populated prefix) and array buffers (to mark their off-heap extension).

pub mod array_buffer;
pub mod code;
pub mod descriptor_array;

pub use array_buffer::{ArrayBufferExtension, JsArrayBuffer};
pub use code::{Code, RelocInfo, RelocMode, RelocSlot};
pub use descriptor_array::DescriptorArray;
