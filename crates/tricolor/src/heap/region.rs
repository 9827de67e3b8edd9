//! Region-aligned heap partitions.
//!
//! A region is one [`REGION_SIZE`] block aligned to its own size. Its
//! [`Region`] header sits at the block's base, so the region of any object is
//! found by masking the object's address. The header holds everything the
//! barrier consults per store: residency, flags, the color bitmap and the
//! remembered sets.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::fmt;
use std::ops::BitOr;
use std::ptr::{addr_of_mut, NonNull};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::address::{Address, HeapRef, BYTES_IN_WORD, LOG_BYTES_IN_WORD};
use crate::heap::Heap;
use crate::mark::ColorBitmap;
use crate::remembered_set::{RememberedSetKind, RememberedSets, SlotDescriptor};
use crate::verify::verify_eq;

/// Log2 of [`REGION_SIZE`].
pub const LOG_REGION_SIZE: usize = 18;

/// Size and alignment of a region (256 KiB).
pub const REGION_SIZE: usize = 1 << LOG_REGION_SIZE;

/// Heap words in one region.
pub const WORDS_IN_REGION: usize = REGION_SIZE >> LOG_BYTES_IN_WORD;

/// Magic number identifying a region header.
pub const MAGIC_REGION: u32 = 0x5452_4743; // "TRGC"

/// Offset of the first object from the region base.
pub const OBJECT_AREA_OFFSET: usize = std::mem::size_of::<Region>().next_multiple_of(16);

const REGION_LAYOUT: Layout = match Layout::from_size_align(REGION_SIZE, REGION_SIZE) {
    Ok(layout) => layout,
    Err(_) => panic!("invalid region layout"),
};

/// Where a region's objects live and who may write them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Residency {
    /// Immutable after startup; never marked, never moved.
    ReadOnly = 0,
    /// The shared heap, reachable from every client heap.
    Shared = 1,
    /// A client heap's ordinary region.
    Regular = 2,
}

/// Region flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegionFlags(u32);

impl RegionFlags {
    /// The compactor never evacuates this region.
    pub const NEVER_EVACUATE: Self = Self(1 << 0);
    /// The region is being evacuated this cycle.
    pub const EVACUATION_CANDIDATE: Self = Self(1 << 1);
    /// The region holds young-generation objects.
    pub const YOUNG: Self = Self(1 << 2);
    /// The owning heap is marking. Read by the inline fast checks.
    pub const MARKING: Self = Self(1 << 3);
    /// A shared region that already accepts stores from every thread.
    pub const WRITABLE_SHARED: Self = Self(1 << 4);
    /// Slots of this region are not recorded for compaction.
    pub const SKIP_SLOT_RECORDING: Self = Self(1 << 5);

    /// No flags.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Whether every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Both sets of flags.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for RegionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for RegionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(RegionFlags, &str); 6] = [
            (RegionFlags::NEVER_EVACUATE, "NEVER_EVACUATE"),
            (RegionFlags::EVACUATION_CANDIDATE, "EVACUATION_CANDIDATE"),
            (RegionFlags::YOUNG, "YOUNG"),
            (RegionFlags::MARKING, "MARKING"),
            (RegionFlags::WRITABLE_SHARED, "WRITABLE_SHARED"),
            (RegionFlags::SKIP_SLOT_RECORDING, "SKIP_SLOT_RECORDING"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Header at the base of every region.
#[repr(C)]
pub struct Region {
    magic: u32,
    residency: Residency,
    flags: AtomicU32,
    heap: *const Heap,
    cursor: AtomicUsize,
    remembered: Mutex<RememberedSets>,
    colors: ColorBitmap,
}

// SAFETY: every mutable field is atomic or behind the mutex; `heap` points at
// the `Sync` heap that owns the region and outlives it.
unsafe impl Send for Region {}
// SAFETY: see above.
unsafe impl Sync for Region {}

impl Region {
    /// Allocate and initialize a region owned by `heap`.
    pub(crate) fn create(
        heap: &Heap,
        residency: Residency,
        flags: RegionFlags,
        chunk_capacity: usize,
    ) -> NonNull<Self> {
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(REGION_LAYOUT) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(REGION_LAYOUT);
        };
        // REGION_SIZE alignment is stricter than the header's.
        #[allow(clippy::cast_ptr_alignment)]
        let header = base.as_ptr().cast::<Self>();

        // SAFETY: `header` is valid for writes of a whole `Region`. The color
        // bitmap is left as zeroed memory, which is an all-white bitmap.
        unsafe {
            addr_of_mut!((*header).magic).write(MAGIC_REGION);
            addr_of_mut!((*header).residency).write(residency);
            addr_of_mut!((*header).flags).write(AtomicU32::new(flags.bits()));
            addr_of_mut!((*header).heap).write(std::ptr::from_ref(heap));
            addr_of_mut!((*header).cursor).write(AtomicUsize::new(OBJECT_AREA_OFFSET));
            addr_of_mut!((*header).remembered)
                .write(Mutex::new(RememberedSets::new(chunk_capacity)));
            NonNull::new_unchecked(header)
        }
    }

    /// Drop the header and free the region's memory.
    ///
    /// # Safety
    ///
    /// `region` came from [`Region::create`], is released once, and no object
    /// of it is used afterwards.
    pub(crate) unsafe fn release(region: NonNull<Self>) {
        // SAFETY: guaranteed by the caller.
        unsafe {
            std::ptr::drop_in_place(region.as_ptr());
            dealloc(region.as_ptr().cast(), REGION_LAYOUT);
        }
    }

    /// The region containing `obj`.
    ///
    /// Only for the barrier's own use while it holds the heap that allocated
    /// `obj`; the reference must not outlive that heap.
    #[must_use]
    pub(crate) fn of(obj: HeapRef) -> &'static Self {
        // SAFETY: a live object lies inside a region whose header sits at the
        // region-aligned base below it.
        unsafe { Self::containing(obj.address()) }
    }

    /// The region containing `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must lie inside a region of a live heap, and that heap must
    /// outlive `'a`.
    #[must_use]
    pub unsafe fn containing<'a>(addr: Address) -> &'a Self {
        // SAFETY: guaranteed by the caller.
        let region = unsafe { &*addr.align_down(REGION_SIZE).as_ptr::<Self>() };
        verify_eq!(region.magic, MAGIC_REGION, "{addr:?} is not inside a region");
        region
    }

    /// Address of the region's first byte.
    #[must_use]
    pub fn base(&self) -> Address {
        Address::from_ptr(std::ptr::from_ref(self))
    }

    /// Whether `addr` lies inside this region.
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        let base = self.base();
        addr >= base && addr.offset_from(base) < REGION_SIZE
    }

    /// Byte offset of `addr` from the region base.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn offset_of(&self, addr: Address) -> u32 {
        // A region is far smaller than 4 GiB.
        (addr.as_usize() & (REGION_SIZE - 1)) as u32
    }

    /// Word index of `addr` in the color bitmap.
    #[must_use]
    pub fn word_index(&self, addr: Address) -> usize {
        (addr.as_usize() & (REGION_SIZE - 1)) >> LOG_BYTES_IN_WORD
    }

    /// The heap that owns this region.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        // SAFETY: a heap frees its regions only when it is dropped.
        unsafe { &*self.heap }
    }

    /// Whether this region belongs to `heap`.
    #[must_use]
    pub fn is_owned_by(&self, heap: &Heap) -> bool {
        std::ptr::eq(self.heap, heap)
    }

    /// Residency class.
    #[must_use]
    pub const fn residency(&self) -> Residency {
        self.residency
    }

    /// Whether the region is read-only.
    #[must_use]
    pub fn in_read_only(&self) -> bool {
        self.residency == Residency::ReadOnly
    }

    /// Whether the region belongs to the shared heap.
    #[must_use]
    pub fn in_shared(&self) -> bool {
        self.residency == Residency::Shared
    }

    /// Whether the region is shared and already writable from every thread.
    #[must_use]
    pub fn in_writable_shared(&self) -> bool {
        self.in_shared() && self.has_flags(RegionFlags::WRITABLE_SHARED)
    }

    /// Current flags.
    #[must_use]
    pub fn flags(&self) -> RegionFlags {
        RegionFlags(self.flags.load(Ordering::Acquire))
    }

    /// Whether every flag of `flags` is set.
    #[must_use]
    pub fn has_flags(&self, flags: RegionFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Set flags.
    pub fn set_flags(&self, flags: RegionFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear flags.
    pub fn clear_flags(&self, flags: RegionFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Whether the owning heap is marking. The inline barrier check.
    #[must_use]
    pub fn is_marking(&self) -> bool {
        self.has_flags(RegionFlags::MARKING)
    }

    /// Whether the region holds young objects.
    #[must_use]
    pub fn in_young(&self) -> bool {
        self.has_flags(RegionFlags::YOUNG)
    }

    /// Whether the compactor never evacuates the region.
    #[must_use]
    pub fn never_evacuate(&self) -> bool {
        self.has_flags(RegionFlags::NEVER_EVACUATE)
    }

    /// Whether the region is being evacuated.
    #[must_use]
    pub fn is_evacuation_candidate(&self) -> bool {
        self.has_flags(RegionFlags::EVACUATION_CANDIDATE)
    }

    /// Whether slots of this region skip compaction recording.
    #[must_use]
    pub fn should_skip_slot_recording(&self) -> bool {
        self.has_flags(RegionFlags::SKIP_SLOT_RECORDING)
    }

    /// Bump-allocate an object of `words` zeroed words.
    ///
    /// Returns `None` when the region is full.
    pub fn allocate(&self, words: usize) -> Option<HeapRef> {
        let bytes = words.max(1).checked_mul(BYTES_IN_WORD)?;
        let mut cursor = self.cursor.load(Ordering::Relaxed);
        loop {
            let end = cursor.checked_add(bytes)?;
            if end > REGION_SIZE {
                return None;
            }
            match self.cursor.compare_exchange_weak(
                cursor,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => cursor = current,
            }
        }
        // SAFETY: `[cursor, end)` lies in this region's object area and was
        // reserved by the exchange above.
        unsafe { HeapRef::from_address(self.base() + cursor) }
    }

    /// Bytes handed out by [`Region::allocate`].
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.cursor.load(Ordering::Relaxed) - OBJECT_AREA_OFFSET
    }

    /// The region's color bitmap.
    #[must_use]
    pub const fn colors(&self) -> &ColorBitmap {
        &self.colors
    }

    /// The lock guarding this region's remembered sets.
    #[must_use]
    pub const fn remembered_sets(&self) -> &Mutex<RememberedSets> {
        &self.remembered
    }

    /// Number of descriptors in one remembered set.
    #[must_use]
    pub fn remembered_set_len(&self, kind: RememberedSetKind) -> usize {
        self.remembered.lock().len(kind)
    }

    /// Whether one remembered set holds `descriptor`.
    #[must_use]
    pub fn remembered_set_contains(
        &self,
        kind: RememberedSetKind,
        descriptor: SlotDescriptor,
    ) -> bool {
        self.remembered.lock().contains(kind, descriptor)
    }

    /// Copy one remembered set.
    #[must_use]
    pub fn remembered_set_snapshot(&self, kind: RememberedSetKind) -> Vec<SlotDescriptor> {
        self.remembered.lock().to_vec(kind)
    }

    /// Move one remembered set out for processing.
    pub fn take_remembered_set(&self, kind: RememberedSetKind) -> Vec<SlotDescriptor> {
        self.remembered.lock().take(kind)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base())
            .field("residency", &self.residency)
            .field("flags", &self.flags())
            .field("allocated_bytes", &self.allocated_bytes())
            .finish_non_exhaustive()
    }
}
