//! Descriptor arrays.
//!
//! A descriptor array is filled incrementally: the mutator bumps the number of
//! initialized descriptors while marking may already be running, so the
//! barrier marks only the populated prefix. Which prefix has already been
//! marked in the current cycle is tracked in the array itself by an
//! epoch-tagged counter.
//!
//! Layout, in words from the object start:
//!
//! | word | contents                                              |
//! |------|-------------------------------------------------------|
//! | 0    | map (read-only)                                       |
//! | 1    | descriptor counts, small integer `all | own << 16`    |
//! | 2    | raw marked-descriptor counter, small integer          |
//! | 3    | enum cache (strong header slot)                       |
//! | 4..  | entries of three words: key, details, value           |

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::address::{HeapRef, Slot};
use crate::heap::Region;
use crate::tagged::TaggedValue;

const COUNTS_INDEX: usize = 1;
const MARKED_INDEX: usize = 2;
const ENUM_CACHE_INDEX: usize = 3;
const HEADER_WORDS: usize = 4;

/// Words per descriptor entry.
pub const ENTRY_WORDS: usize = 3;
const ENTRY_KEY: usize = 0;
const ENTRY_DETAILS: usize = 1;
const ENTRY_VALUE: usize = 2;

/// Largest number of descriptors an array may hold.
pub const MAX_NUMBER_OF_DESCRIPTORS: usize = 1020;

const COUNT_BITS: usize = 16;
const COUNT_MASK: usize = (1 << COUNT_BITS) - 1;

/// Bits of the marked counter holding the count. The epoch takes the rest
/// of the word below the small-integer tag.
const MARKED_BITS: u32 = 16;
const MARKED_MASK: usize = (1 << MARKED_BITS) - 1;
const EPOCH_BITS: u32 = usize::BITS - 1 - MARKED_BITS;
const EPOCH_MASK: usize = (1 << EPOCH_BITS) - 1;
/// Largest count the marked counter can encode.
pub const MAX_NUMBER_OF_MARKED_DESCRIPTORS: u16 = u16::MAX;

const _: () = assert!(MAX_NUMBER_OF_DESCRIPTORS <= MAX_NUMBER_OF_MARKED_DESCRIPTORS as usize);

/// Encode a marked count for `epoch`.
///
/// On 64-bit targets the whole epoch is kept, so a stale count only decodes
/// as current after the epoch counter itself wraps.
#[must_use]
pub const fn encode_marked(epoch: u32, marked: u16) -> usize {
    ((epoch as usize & EPOCH_MASK) << MARKED_BITS) | marked as usize
}

/// Decode a marked count, treating counts from another epoch as zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn decode_marked(epoch: u32, raw: usize) -> u16 {
    if raw >> MARKED_BITS == epoch as usize & EPOCH_MASK {
        (raw & MARKED_MASK) as u16
    } else {
        0
    }
}

/// A descriptor array view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorArray(HeapRef);

impl DescriptorArray {
    /// Allocate an empty array with room for `capacity` descriptors.
    ///
    /// Returns `None` if the region is full or `capacity` exceeds
    /// [`MAX_NUMBER_OF_DESCRIPTORS`].
    pub fn allocate(region: &Region, map: HeapRef, capacity: usize) -> Option<Self> {
        if capacity > MAX_NUMBER_OF_DESCRIPTORS {
            return None;
        }
        let obj = region.allocate(HEADER_WORDS + capacity * ENTRY_WORDS)?;
        obj.slot(0).store(map.to_tagged());
        let array = Self(obj);
        array.store_counts(capacity, 0);
        obj.slot(MARKED_INDEX).store(TaggedValue::smi(0));
        obj.slot(ENUM_CACHE_INDEX).store(TaggedValue::smi(0));
        Some(array)
    }

    /// View `obj` as a descriptor array. `obj` must have descriptor array layout.
    #[must_use]
    pub const fn from_object(obj: HeapRef) -> Self {
        Self(obj)
    }

    /// The underlying object.
    #[must_use]
    pub const fn object(self) -> HeapRef {
        self.0
    }

    /// The array's map.
    #[must_use]
    pub fn map(self) -> Option<HeapRef> {
        self.0.slot(0).load().heap_object()
    }

    fn counts(self) -> usize {
        usize::try_from(self.0.slot(COUNTS_INDEX).load().to_smi().unwrap_or(0)).unwrap_or(0)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn store_counts(self, all: usize, own: usize) {
        let packed = (all & COUNT_MASK) | ((own & COUNT_MASK) << COUNT_BITS);
        self.0
            .slot(COUNTS_INDEX)
            .store(TaggedValue::smi(packed as isize));
    }

    /// Capacity in descriptors.
    #[must_use]
    pub fn number_of_all_descriptors(self) -> usize {
        self.counts() & COUNT_MASK
    }

    /// Number of initialized descriptors.
    #[must_use]
    pub fn number_of_descriptors(self) -> usize {
        (self.counts() >> COUNT_BITS) & COUNT_MASK
    }

    /// Set the number of initialized descriptors.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the capacity.
    pub fn set_number_of_descriptors(self, n: usize) {
        let all = self.number_of_all_descriptors();
        assert!(n <= all, "{n} descriptors in an array of {all}");
        self.store_counts(all, n);
    }

    /// First strong header slot.
    #[must_use]
    pub const fn first_pointer_slot(self) -> Slot {
        self.0.slot(ENUM_CACHE_INDEX)
    }

    /// First slot of entry `index`. `descriptor_slot(n)` ends the first `n`
    /// entries.
    #[must_use]
    pub const fn descriptor_slot(self, index: usize) -> Slot {
        self.0.slot(HEADER_WORDS + index * ENTRY_WORDS)
    }

    /// Key slot of entry `index`.
    #[must_use]
    pub const fn key_slot(self, index: usize) -> Slot {
        self.descriptor_slot(index).offset(ENTRY_KEY)
    }

    /// Value slot of entry `index`.
    #[must_use]
    pub const fn value_slot(self, index: usize) -> Slot {
        self.descriptor_slot(index).offset(ENTRY_VALUE)
    }

    /// Initialize entry `index`. The caller runs the descriptor array barrier
    /// after publishing the new count.
    pub fn set_descriptor(self, index: usize, key: TaggedValue, details: isize, value: TaggedValue) {
        let entry = self.descriptor_slot(index);
        entry.offset(ENTRY_KEY).store(key);
        entry.offset(ENTRY_DETAILS).store(TaggedValue::smi(details));
        entry.offset(ENTRY_VALUE).store(value);
    }

    /// Set the enum cache header slot.
    pub fn set_enum_cache(self, value: TaggedValue) {
        self.first_pointer_slot().store(value);
    }

    fn marked_word(&self) -> &AtomicUsize {
        // SAFETY: the counter word lies inside the live array, and the
        // reference does not leave the calling method.
        unsafe { &*self.0.slot(MARKED_INDEX).address().as_ptr::<AtomicUsize>() }
    }

    /// The raw epoch-tagged marked counter.
    #[must_use]
    pub fn raw_number_of_marked_descriptors(self) -> usize {
        self.marked_word().load(Ordering::Acquire) >> 1
    }

    /// Descriptors already marked in `epoch`.
    #[must_use]
    pub fn number_of_marked_descriptors(self, epoch: u32) -> u16 {
        decode_marked(epoch, self.raw_number_of_marked_descriptors())
    }

    /// Raise the marked counter of `epoch` to `new_marked`.
    ///
    /// Returns the count that was marked before. Concurrent callers each get
    /// back the count they raised from, so the ranges they go on to mark never
    /// overlap. A counter already at or above `new_marked` is left alone.
    pub fn update_number_of_marked_descriptors(self, epoch: u32, new_marked: u16) -> u16 {
        let word = self.marked_word();
        let new_raw = encode_marked(epoch, new_marked) << 1;
        let mut old_raw = word.load(Ordering::Acquire);
        let mut old_marked = decode_marked(epoch, old_raw >> 1);
        while old_marked < new_marked {
            match word.compare_exchange(old_raw, new_raw, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => {
                    old_raw = actual;
                    old_marked = decode_marked(epoch, old_raw >> 1);
                }
            }
        }
        old_marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Fixture;

    #[test]
    fn test_marked_encoding_is_epoch_scoped() {
        let raw = encode_marked(5, 7);
        assert_eq!(decode_marked(5, raw), 7);
        assert_eq!(decode_marked(6, raw), 0);
        assert_eq!(decode_marked(9, raw), 0);
        assert_eq!(decode_marked(u32::MAX, encode_marked(u32::MAX, 3)), 3);
    }

    #[test]
    fn test_counts() {
        let fx = Fixture::new();
        let array = fx.alloc_descriptor_array(6);
        assert_eq!(array.number_of_all_descriptors(), 6);
        assert_eq!(array.number_of_descriptors(), 0);
        array.set_number_of_descriptors(4);
        assert_eq!(array.number_of_descriptors(), 4);
        assert_eq!(array.map(), Some(fx.descriptor_array_map));
    }

    #[test]
    #[should_panic(expected = "7 descriptors in an array of 6")]
    fn test_count_above_capacity_panics() {
        let fx = Fixture::new();
        fx.alloc_descriptor_array(6).set_number_of_descriptors(7);
    }

    #[test]
    fn test_update_only_raises() {
        let fx = Fixture::new();
        let array = fx.alloc_descriptor_array(8);
        assert_eq!(array.update_number_of_marked_descriptors(1, 3), 0);
        assert_eq!(array.update_number_of_marked_descriptors(1, 2), 3);
        assert_eq!(array.number_of_marked_descriptors(1), 3);
        assert_eq!(array.update_number_of_marked_descriptors(1, 5), 3);
        assert_eq!(array.number_of_marked_descriptors(1), 5);
        // A new epoch starts from zero.
        assert_eq!(array.number_of_marked_descriptors(2), 0);
        assert_eq!(array.update_number_of_marked_descriptors(2, 1), 0);
    }

    #[test]
    fn test_counter_from_an_old_epoch_reads_as_zero() {
        let fx = Fixture::new();
        let array = fx.alloc_descriptor_array(4);
        array.update_number_of_marked_descriptors(1, 4);
        for epoch in 2..=9 {
            assert_eq!(array.number_of_marked_descriptors(epoch), 0, "epoch {epoch}");
        }
        assert_eq!(array.update_number_of_marked_descriptors(5, 2), 0);
    }

    #[test]
    fn test_marked_counter_stays_a_small_integer() {
        let fx = Fixture::new();
        let array = fx.alloc_descriptor_array(4);
        array.update_number_of_marked_descriptors(3, 4);
        assert!(array.object().slot(MARKED_INDEX).load().is_smi());
    }

    #[test]
    fn test_slot_geometry() {
        let fx = Fixture::new();
        let array = fx.alloc_descriptor_array(3);
        assert_eq!(array.first_pointer_slot().distance_to(array.descriptor_slot(0)), 1);
        assert_eq!(array.descriptor_slot(0).distance_to(array.descriptor_slot(3)), 9);
        assert_eq!(array.value_slot(1), array.descriptor_slot(1).offset(2));
    }
}
