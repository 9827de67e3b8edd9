//! Tagged heap words.
//!
//! Every slot holds one [`TaggedValue`]. The low two bits discriminate:
//!
//! | bits  | meaning                               |
//! |-------|---------------------------------------|
//! | `x0`  | small integer (value in upper bits)   |
//! | `01`  | strong pointer to a heap object       |
//! | `11`  | weak pointer to a heap object         |
//!
//! A weak word whose low 32 bits equal [`CLEARED_WEAK_REFERENCE`] is a cleared
//! weak reference and points nowhere.

use std::fmt;

use crate::address::{Address, HeapRef};

/// Tag of a strong heap object pointer.
pub const HEAP_OBJECT_TAG: usize = 0b01;
/// Tag of a weak heap object pointer.
pub const WEAK_HEAP_OBJECT_TAG: usize = 0b11;
/// Mask covering both tag bits.
pub const HEAP_OBJECT_TAG_MASK: usize = 0b11;
/// Mask of the small-integer tag bit.
pub const SMI_TAG_MASK: usize = 0b01;
/// Low half of a cleared weak reference.
pub const CLEARED_WEAK_REFERENCE: u32 = 0b11;

/// High bits a packed map word may carry as metadata.
pub const MAP_WORD_METADATA_MASK: usize = 0xffff << 48;
/// Bits flipped when a map pointer is packed into an object's first word.
pub const MAP_WORD_XOR_MASK: usize = 0b11;

/// One heap word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct TaggedValue(usize);

impl TaggedValue {
    /// Reinterpret a raw word.
    ///
    /// # Safety
    ///
    /// If `raw` is tagged as a heap object, the untagged address must satisfy
    /// the contract of [`HeapRef::from_address`].
    #[must_use]
    pub const unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Encode a small integer.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn smi(value: isize) -> Self {
        Self((value as usize) << 1)
    }

    /// Strong pointer to `obj`.
    #[must_use]
    pub const fn strong(obj: HeapRef) -> Self {
        Self(obj.address().as_usize() | HEAP_OBJECT_TAG)
    }

    /// Weak pointer to `obj`.
    #[must_use]
    pub const fn weak(obj: HeapRef) -> Self {
        Self(obj.address().as_usize() | WEAK_HEAP_OBJECT_TAG)
    }

    /// The cleared weak reference.
    #[must_use]
    pub const fn cleared() -> Self {
        Self(CLEARED_WEAK_REFERENCE as usize)
    }

    /// The raw word.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Whether this is a small integer.
    #[must_use]
    pub const fn is_smi(self) -> bool {
        self.0 & SMI_TAG_MASK == 0
    }

    /// Decode a small integer.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn to_smi(self) -> Option<isize> {
        if self.is_smi() {
            Some((self.0 as isize) >> 1)
        } else {
            None
        }
    }

    /// Whether this is a strong heap object pointer.
    #[must_use]
    pub const fn is_strong(self) -> bool {
        self.0 & HEAP_OBJECT_TAG_MASK == HEAP_OBJECT_TAG
    }

    /// Whether this is a cleared weak reference.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn is_cleared(self) -> bool {
        self.0 as u32 == CLEARED_WEAK_REFERENCE
    }

    /// Whether this is a live weak heap object pointer.
    #[must_use]
    pub const fn is_weak(self) -> bool {
        self.0 & HEAP_OBJECT_TAG_MASK == WEAK_HEAP_OBJECT_TAG && !self.is_cleared()
    }

    /// The object this word points to, strongly or weakly.
    #[must_use]
    pub fn heap_object(self) -> Option<HeapRef> {
        if self.is_smi() || self.is_cleared() {
            return None;
        }
        // SAFETY: heap-object words are only produced under `from_raw`'s contract.
        unsafe { HeapRef::from_address(Address::from_usize(strip_tag(self.0))) }
    }

    /// The object this word points to strongly.
    #[must_use]
    pub fn strong_heap_object(self) -> Option<HeapRef> {
        if self.is_strong() {
            self.heap_object()
        } else {
            None
        }
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = self.to_smi() {
            write!(f, "Smi({value})")
        } else if self.is_cleared() {
            f.write_str("Cleared")
        } else if self.is_weak() {
            write!(f, "Weak({:#x})", strip_tag(self.0))
        } else {
            write!(f, "Strong({:#x})", strip_tag(self.0))
        }
    }
}

/// Remove the tag bits of a pointer word.
#[must_use]
pub const fn strip_tag(raw: usize) -> usize {
    raw & !HEAP_OBJECT_TAG_MASK
}

/// Pack a map pointer into an object's first word.
#[must_use]
pub const fn pack_map_word(map: HeapRef) -> usize {
    (map.address().as_usize() | HEAP_OBJECT_TAG) ^ MAP_WORD_XOR_MASK
}

/// Recover the tagged map pointer from a packed map word.
#[must_use]
pub const fn unpack_map_word(raw: usize) -> usize {
    (raw & !MAP_WORD_METADATA_MASK & !MAP_WORD_XOR_MASK) | HEAP_OBJECT_TAG
}
