//! Per-region remembered sets.
//!
//! A remembered set records slots of a region that may point across a heap or
//! generation boundary. Entries over-approximate: duplicates and stale entries
//! are harmless, a missing entry is a heap corruption. The collector consumes
//! and clears a set wholesale between cycles; this layer only appends.
//!
//! Each region guards all of its sets with one mutex. Writers touching
//! different regions never contend, and the critical section is the append.

use crate::address::Slot;
use crate::chunked::ChunkedBuffer;
use crate::heap::Region;

/// Which boundary a remembered set tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RememberedSetKind {
    /// Slots that may point into the shared heap.
    OldToShared = 0,
    /// Slots that may point into an evacuation candidate.
    OldToOld = 1,
}

impl RememberedSetKind {
    /// Number of kinds.
    pub const COUNT: usize = 2;

    const fn index(self) -> usize {
        self as usize
    }
}

/// How a typed slot's value is encoded in a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// Full-width object pointer embedded in the instruction stream.
    EmbeddedObjectFull,
    /// Compressed object pointer embedded in the instruction stream.
    EmbeddedObjectCompressed,
    /// Object pointer embedded as data.
    EmbeddedObjectData,
    /// Call target embedded in the instruction stream.
    CodeEntry,
    /// Full-width object pointer in the constant pool.
    ConstPoolEmbeddedObjectFull,
    /// Compressed object pointer in the constant pool.
    ConstPoolEmbeddedObjectCompressed,
    /// Call target in the constant pool.
    ConstPoolCodeEntry,
    /// Slot the collector has invalidated.
    Cleared,
}

/// One remembered slot, as a byte offset from its region's base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotDescriptor {
    /// A plain tagged field.
    Untyped {
        /// Offset of the slot from the region base.
        offset: u32,
    },
    /// A slot inside a code object whose decoding depends on `slot_type`.
    Typed {
        /// Encoding of the slot.
        slot_type: SlotType,
        /// Offset of the slot from the region base.
        offset: u32,
    },
}

impl SlotDescriptor {
    /// An untyped descriptor.
    #[must_use]
    pub const fn untyped(offset: u32) -> Self {
        Self::Untyped { offset }
    }

    /// A typed descriptor.
    #[must_use]
    pub const fn typed(slot_type: SlotType, offset: u32) -> Self {
        Self::Typed { slot_type, offset }
    }

    /// Offset from the region base.
    #[must_use]
    pub const fn offset(self) -> u32 {
        match self {
            Self::Untyped { offset } | Self::Typed { offset, .. } => offset,
        }
    }
}

/// The remembered sets of one region.
#[derive(Debug)]
pub struct RememberedSets {
    sets: [ChunkedBuffer<SlotDescriptor>; RememberedSetKind::COUNT],
}

impl RememberedSets {
    /// Create empty sets, each reserving one chunk of `chunk_capacity`.
    #[must_use]
    pub fn new(chunk_capacity: usize) -> Self {
        Self {
            sets: [
                ChunkedBuffer::new(chunk_capacity),
                ChunkedBuffer::new(chunk_capacity),
            ],
        }
    }

    /// Append a descriptor.
    pub fn push(&mut self, kind: RememberedSetKind, descriptor: SlotDescriptor) {
        self.sets[kind.index()].push(descriptor);
    }

    /// Number of descriptors in one set, duplicates included.
    #[must_use]
    pub const fn len(&self, kind: RememberedSetKind) -> usize {
        self.sets[kind.index()].len()
    }

    /// Whether one set is empty.
    #[must_use]
    pub const fn is_empty(&self, kind: RememberedSetKind) -> bool {
        self.sets[kind.index()].is_empty()
    }

    /// Whether one set holds `descriptor`.
    #[must_use]
    pub fn contains(&self, kind: RememberedSetKind, descriptor: SlotDescriptor) -> bool {
        self.sets[kind.index()].iter().any(|d| *d == descriptor)
    }

    /// Copy one set in append order.
    #[must_use]
    pub fn to_vec(&self, kind: RememberedSetKind) -> Vec<SlotDescriptor> {
        self.sets[kind.index()].iter().copied().collect()
    }

    /// Move one set out, leaving it empty.
    pub fn take(&mut self, kind: RememberedSetKind) -> Vec<SlotDescriptor> {
        self.sets[kind.index()].take()
    }

    /// Empty one set.
    pub fn clear(&mut self, kind: RememberedSetKind) {
        self.sets[kind.index()].clear();
    }
}

/// Append `descriptor` to `region`'s set of `kind`.
///
/// Safe under any number of concurrent callers.
pub fn insert(region: &Region, kind: RememberedSetKind, descriptor: SlotDescriptor) {
    region.remembered_sets().lock().push(kind, descriptor);
    region.heap().stats().record_remembered_set_insert();
}

/// Append the untyped `slot` of an object in `region`.
pub fn insert_slot(region: &Region, kind: RememberedSetKind, slot: Slot) {
    insert(
        region,
        kind,
        SlotDescriptor::untyped(region.offset_of(slot.address())),
    );
}

/// Append a typed slot at `offset` from `region`'s base.
pub fn insert_typed(region: &Region, kind: RememberedSetKind, slot_type: SlotType, offset: u32) {
    insert(region, kind, SlotDescriptor::typed(slot_type, offset));
}
