//! Raw addresses, object references and slots.
//!
//! [`HeapRef`] and [`Slot`] are the typed side of the barrier layer. Both are
//! trusted tokens: a `HeapRef` names a live object inside a region of a live
//! [`Heap`](crate::Heap), and a `Slot` names a word inside such an object (or
//! inside a code object's instruction stream). Converting a raw address into
//! either one is `unsafe`; everything built on top of them is safe.

use std::fmt;
use std::num::NonZeroUsize;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::tagged::TaggedValue;

/// Size of a heap word in bytes.
pub const BYTES_IN_WORD: usize = std::mem::size_of::<usize>();

/// Log2 of [`BYTES_IN_WORD`].
pub const LOG_BYTES_IN_WORD: usize = BYTES_IN_WORD.trailing_zeros() as usize;

/// A raw machine address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw address.
    #[must_use]
    pub const fn from_usize(raw: usize) -> Self {
        Self(raw)
    }

    /// Address of a pointer.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// The raw address.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Whether this is the null address.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Round down to a power-of-two alignment.
    #[must_use]
    pub const fn align_down(self, align: usize) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Whether the address is a multiple of a power-of-two alignment.
    #[must_use]
    pub const fn is_aligned_to(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }

    /// Byte distance from `base` to `self`. `base` must not be above `self`.
    #[must_use]
    pub const fn offset_from(self, base: Self) -> usize {
        self.0 - base.0
    }

    /// Reinterpret as a raw pointer.
    #[must_use]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Reinterpret as a raw mutable pointer.
    #[must_use]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl Add<usize> for Address {
    type Output = Self;

    fn add(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }
}

impl Sub<usize> for Address {
    type Output = Self;

    fn sub(self, bytes: usize) -> Self {
        Self(self.0 - bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Untagged, non-null, word-aligned address of a heap object.
///
/// A `HeapRef` carries no ownership: the object is owned by the region it lives
/// in. It stays valid for as long as the heap that allocated it is alive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HeapRef(NonZeroUsize);

impl HeapRef {
    /// Build a reference to the object at `addr`.
    ///
    /// Returns `None` for a null or misaligned address.
    ///
    /// # Safety
    ///
    /// A non-null, aligned `addr` must be the start of a live object inside a
    /// region of a live heap.
    #[must_use]
    pub unsafe fn from_address(addr: Address) -> Option<Self> {
        if !addr.is_aligned_to(BYTES_IN_WORD) {
            return None;
        }
        NonZeroUsize::new(addr.as_usize()).map(Self)
    }

    /// Build a reference from a tagged pointer word, stripping the tag bits.
    ///
    /// Returns `None` if `raw` does not encode a heap object.
    ///
    /// # Safety
    ///
    /// Same contract as [`HeapRef::from_address`] for the untagged address.
    #[must_use]
    pub unsafe fn from_tagged(raw: usize) -> Option<Self> {
        // SAFETY: `TaggedValue` only hands out objects under the caller's contract.
        unsafe { TaggedValue::from_raw(raw) }.heap_object()
    }

    /// The object's address.
    #[must_use]
    pub const fn address(self) -> Address {
        Address(self.0.get())
    }

    /// The `index`-th word of the object.
    #[must_use]
    pub const fn slot(self, index: usize) -> Slot {
        Slot(Address(self.0.get() + index * BYTES_IN_WORD))
    }

    /// A strong tagged pointer to this object.
    #[must_use]
    pub const fn to_tagged(self) -> TaggedValue {
        TaggedValue::strong(self)
    }

    /// A weak tagged pointer to this object.
    #[must_use]
    pub const fn to_weak(self) -> TaggedValue {
        TaggedValue::weak(self)
    }
}

impl fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({:#x})", self.0)
    }
}

/// Address of one tagged word.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Slot(Address);

impl Slot {
    /// Wrap a raw slot address.
    ///
    /// # Safety
    ///
    /// `addr` must be word-aligned and point into a live object (or a live
    /// code object's instruction stream) for as long as the slot is used.
    #[must_use]
    pub const unsafe fn from_address(addr: Address) -> Self {
        Self(addr)
    }

    /// The slot's address.
    #[must_use]
    pub const fn address(self) -> Address {
        self.0
    }

    /// The slot `words` words after this one.
    #[must_use]
    pub const fn offset(self, words: usize) -> Self {
        Self(Address(self.0 .0 + words * BYTES_IN_WORD))
    }

    /// Number of slots in `[self, end)`.
    #[must_use]
    pub const fn distance_to(self, end: Self) -> usize {
        (end.0 .0 - self.0 .0) / BYTES_IN_WORD
    }

    fn word(&self) -> &AtomicUsize {
        // SAFETY: slots are only built over live, word-aligned heap memory,
        // and the reference does not leave the calling method.
        unsafe { &*self.0.as_ptr::<AtomicUsize>() }
    }

    /// Relaxed load of the slot's value.
    #[must_use]
    pub fn load(self) -> TaggedValue {
        // SAFETY: heap words only ever hold values written through `store`.
        unsafe { TaggedValue::from_raw(self.word().load(Ordering::Relaxed)) }
    }

    /// Relaxed store into the slot.
    ///
    /// This is the raw store; the caller runs the write barrier after it.
    pub fn store(self, value: TaggedValue) {
        self.word().store(value.raw(), Ordering::Relaxed);
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({:#x})", self.0 .0)
    }
}
