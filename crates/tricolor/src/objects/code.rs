//! Code objects and relocation info.
//!
//! Layout, in words from the object start:
//!
//! | word | contents                                   |
//! |------|--------------------------------------------|
//! | 0    | map                                        |
//! | 1    | instruction size in bytes (small integer)  |
//! | 2    | constant pool offset in bytes (small int)  |
//! | 3..  | instruction stream, then the constant pool |
//!
//! References embedded in the instruction stream sit at arbitrary byte
//! offsets, so they are read and written unaligned.

use crate::address::{Address, HeapRef, BYTES_IN_WORD};
use crate::heap::Region;
use crate::remembered_set::{self, RememberedSetKind, SlotType};
use crate::tagged::TaggedValue;
use crate::verify::verify;

const INSTRUCTION_SIZE_INDEX: usize = 1;
const CONSTANT_POOL_OFFSET_INDEX: usize = 2;
const HEADER_WORDS: usize = 3;

/// Byte offset of the instruction stream from the object start.
pub const INSTRUCTION_START_OFFSET: usize = HEADER_WORDS * BYTES_IN_WORD;

/// Size of the pointer-compression cage compressed references are relative to.
pub const COMPRESSION_CAGE_SIZE: usize = 1 << 32;

/// A compiled code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(HeapRef);

impl Code {
    /// Allocate a code object in `region`.
    ///
    /// The instruction stream is `instruction_bytes` long and zeroed, followed
    /// by `constant_pool_entries` word-sized constant pool entries.
    pub fn allocate(
        region: &Region,
        map: HeapRef,
        instruction_bytes: usize,
        constant_pool_entries: usize,
    ) -> Option<Self> {
        let instruction_words = instruction_bytes.div_ceil(BYTES_IN_WORD);
        let obj = region.allocate(HEADER_WORDS + instruction_words + constant_pool_entries)?;
        let constant_pool_offset = INSTRUCTION_START_OFFSET + instruction_words * BYTES_IN_WORD;
        obj.slot(0).store(map.to_tagged());
        obj.slot(INSTRUCTION_SIZE_INDEX)
            .store(TaggedValue::smi(isize::try_from(instruction_bytes).ok()?));
        obj.slot(CONSTANT_POOL_OFFSET_INDEX)
            .store(TaggedValue::smi(isize::try_from(constant_pool_offset).ok()?));
        Some(Self(obj))
    }

    /// View `obj` as a code object. `obj` must have code layout.
    #[must_use]
    pub const fn from_object(obj: HeapRef) -> Self {
        Self(obj)
    }

    /// The code object whose instruction stream starts at `entry`.
    ///
    /// # Safety
    ///
    /// `entry` must be the instruction start of a live code object.
    #[must_use]
    pub unsafe fn from_instruction_start(entry: Address) -> Option<Self> {
        // SAFETY: guaranteed by the caller.
        unsafe { HeapRef::from_address(entry - INSTRUCTION_START_OFFSET) }.map(Self)
    }

    /// The underlying object.
    #[must_use]
    pub const fn object(self) -> HeapRef {
        self.0
    }

    /// First byte of the instruction stream.
    #[must_use]
    pub fn instruction_start(self) -> Address {
        self.0.address() + INSTRUCTION_START_OFFSET
    }

    /// Length of the instruction stream in bytes.
    #[must_use]
    pub fn instruction_size(self) -> usize {
        self.header_field(INSTRUCTION_SIZE_INDEX)
    }

    /// Address of the `index`-th constant pool entry.
    #[must_use]
    pub fn constant_pool_entry(self, index: usize) -> Address {
        self.0.address() + self.header_field(CONSTANT_POOL_OFFSET_INDEX) + index * BYTES_IN_WORD
    }

    /// Whether this is a registered builtin of its heap.
    #[must_use]
    pub fn is_builtin(self) -> bool {
        Region::of(self.0).heap().is_builtin(self.0)
    }

    #[allow(clippy::cast_sign_loss)]
    fn header_field(self, index: usize) -> usize {
        self.0.slot(index).load().to_smi().unwrap_or(0) as usize
    }
}

/// How a relocation entry encodes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocMode {
    /// Full-width tagged object pointer.
    FullEmbeddedObject,
    /// 32-bit tagged object pointer relative to the compression cage.
    CompressedEmbeddedObject,
    /// Full-width object pointer stored as data.
    DataEmbeddedObject,
    /// Address of another code object's instruction stream.
    CodeTarget,
}

/// A cursor over one relocation entry of a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocInfo {
    pc: Address,
    rmode: RelocMode,
    constant_pool_entry: Option<Address>,
}

/// A relocation entry resolved to a remembered-set location.
#[derive(Debug, Clone, Copy)]
pub struct RelocSlot {
    /// Base address of the region holding the slot.
    pub region: Address,
    /// Encoding of the slot.
    pub slot_type: SlotType,
    /// Offset of the slot from the region base.
    pub offset: u32,
}

impl RelocSlot {
    /// Insert the slot into the `kind` remembered set of its region.
    ///
    /// # Safety
    ///
    /// The heap that owns the region must still be alive.
    pub(crate) unsafe fn insert(&self, kind: RememberedSetKind) {
        // SAFETY: guaranteed by the caller.
        let region = unsafe { Region::containing(self.region) };
        remembered_set::insert_typed(region, kind, self.slot_type, self.offset);
    }
}

impl RelocInfo {
    /// An entry whose target is encoded at `pc`.
    #[must_use]
    pub const fn new(pc: Address, rmode: RelocMode) -> Self {
        Self {
            pc,
            rmode,
            constant_pool_entry: None,
        }
    }

    /// An entry at `pc` whose target lives in the constant pool entry `entry`.
    #[must_use]
    pub const fn in_constant_pool(pc: Address, rmode: RelocMode, entry: Address) -> Self {
        Self {
            pc,
            rmode,
            constant_pool_entry: Some(entry),
        }
    }

    /// Address of the instruction the entry describes.
    #[must_use]
    pub const fn pc(&self) -> Address {
        self.pc
    }

    /// Encoding of the target.
    #[must_use]
    pub const fn rmode(&self) -> RelocMode {
        self.rmode
    }

    /// Whether the target is stored in the constant pool.
    #[must_use]
    pub const fn is_in_constant_pool(&self) -> bool {
        self.constant_pool_entry.is_some()
    }

    /// Where the target bytes live.
    #[must_use]
    pub fn target_address(&self) -> Address {
        self.constant_pool_entry.unwrap_or(self.pc)
    }

    /// The slot type recorded for this entry.
    #[must_use]
    pub const fn slot_type(&self) -> SlotType {
        match (self.constant_pool_entry.is_some(), self.rmode) {
            (false, RelocMode::FullEmbeddedObject) => SlotType::EmbeddedObjectFull,
            (false, RelocMode::CompressedEmbeddedObject) => SlotType::EmbeddedObjectCompressed,
            (false, RelocMode::DataEmbeddedObject) => SlotType::EmbeddedObjectData,
            (false, RelocMode::CodeTarget) => SlotType::CodeEntry,
            (true, RelocMode::CodeTarget) => SlotType::ConstPoolCodeEntry,
            (true, RelocMode::CompressedEmbeddedObject) => {
                SlotType::ConstPoolEmbeddedObjectCompressed
            }
            (true, RelocMode::FullEmbeddedObject | RelocMode::DataEmbeddedObject) => {
                SlotType::ConstPoolEmbeddedObjectFull
            }
        }
    }

    /// Resolve the entry to the region, slot type and offset of its target.
    #[must_use]
    pub fn resolve(&self, host: Code) -> RelocSlot {
        let addr = self.target_address();
        let region = Region::of(host.object());
        verify!(
            region.contains(self.pc) && region.contains(addr),
            "relocation entry at {:?} lies outside the region of {host:?}",
            self.pc
        );
        RelocSlot {
            region: region.base(),
            slot_type: self.slot_type(),
            offset: region.offset_of(addr),
        }
    }

    /// The object the entry currently refers to.
    #[must_use]
    pub fn target_object(&self) -> Option<HeapRef> {
        let addr = self.target_address();
        match self.rmode {
            RelocMode::FullEmbeddedObject | RelocMode::DataEmbeddedObject => {
                // SAFETY: relocation targets lie inside the host code object.
                let raw = unsafe { addr.as_ptr::<usize>().read_unaligned() };
                // SAFETY: embedded words are written by `set_target_object`.
                unsafe { TaggedValue::from_raw(raw) }.heap_object()
            }
            RelocMode::CompressedEmbeddedObject => {
                // SAFETY: relocation targets lie inside the host code object.
                let compressed = unsafe { addr.as_ptr::<u32>().read_unaligned() };
                let cage = self.pc.align_down(COMPRESSION_CAGE_SIZE).as_usize();
                // SAFETY: compressed words are written by `set_target_object`.
                unsafe { TaggedValue::from_raw(cage | compressed as usize) }.heap_object()
            }
            RelocMode::CodeTarget => {
                // SAFETY: relocation targets lie inside the host code object.
                let entry = unsafe { addr.as_ptr::<usize>().read_unaligned() };
                // SAFETY: code targets hold the instruction start of a code object.
                unsafe { Code::from_instruction_start(Address::from_usize(entry)) }
                    .map(Code::object)
            }
        }
    }

    /// Point the entry at `target`. The caller runs the code write barrier
    /// afterwards.
    pub fn set_target_object(&self, target: HeapRef) {
        let addr = self.target_address().as_mut_ptr::<u8>();
        match self.rmode {
            RelocMode::FullEmbeddedObject | RelocMode::DataEmbeddedObject => {
                // SAFETY: relocation targets lie inside the host code object.
                unsafe { addr.cast::<usize>().write_unaligned(target.to_tagged().raw()) };
            }
            RelocMode::CompressedEmbeddedObject => {
                verify!(
                    target.address().align_down(COMPRESSION_CAGE_SIZE)
                        == self.pc.align_down(COMPRESSION_CAGE_SIZE),
                    "{target:?} lies outside the compression cage of {:?}",
                    self.pc
                );
                #[allow(clippy::cast_possible_truncation)]
                let compressed = target.to_tagged().raw() as u32;
                // SAFETY: relocation targets lie inside the host code object.
                unsafe { addr.cast::<u32>().write_unaligned(compressed) };
            }
            RelocMode::CodeTarget => {
                let entry = Code::from_object(target).instruction_start().as_usize();
                // SAFETY: relocation targets lie inside the host code object.
                unsafe { addr.cast::<usize>().write_unaligned(entry) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Fixture;

    #[test]
    fn test_layout() {
        let fx = Fixture::new();
        let code = fx.alloc_code(13, 2);
        assert_eq!(code.instruction_size(), 13);
        assert_eq!(
            code.instruction_start(),
            code.object().address() + INSTRUCTION_START_OFFSET
        );
        assert_eq!(
            code.constant_pool_entry(1),
            code.instruction_start() + 2 * BYTES_IN_WORD + BYTES_IN_WORD
        );
    }

    #[test]
    fn test_embedded_target_roundtrip_unaligned() {
        let fx = Fixture::new();
        let code = fx.alloc_code(32, 0);
        let target = fx.alloc_regular(2);
        let rinfo = RelocInfo::new(code.instruction_start() + 3, RelocMode::FullEmbeddedObject);
        rinfo.set_target_object(target);
        assert_eq!(rinfo.target_object(), Some(target));
    }

    #[test]
    fn test_code_target_points_at_instruction_start() {
        let fx = Fixture::new();
        let code = fx.alloc_code(32, 0);
        let callee = fx.alloc_code(8, 0);
        let rinfo = RelocInfo::new(code.instruction_start() + 1, RelocMode::CodeTarget);
        rinfo.set_target_object(callee.object());
        assert_eq!(rinfo.target_object(), Some(callee.object()));
    }

    #[test]
    fn test_resolve_direct_and_constant_pool() {
        let fx = Fixture::new();
        let code = fx.alloc_code(16, 1);
        let region = Region::of(code.object());

        let pc = code.instruction_start() + 5;
        let direct = RelocInfo::new(pc, RelocMode::FullEmbeddedObject).resolve(code);
        assert_eq!(direct.slot_type, SlotType::EmbeddedObjectFull);
        assert_eq!(direct.offset, region.offset_of(pc));
        assert_eq!(direct.region, region.base());

        let entry = code.constant_pool_entry(0);
        let pooled = RelocInfo::in_constant_pool(pc, RelocMode::CodeTarget, entry).resolve(code);
        assert_eq!(pooled.slot_type, SlotType::ConstPoolCodeEntry);
        assert_eq!(pooled.offset, region.offset_of(entry));
    }

    #[test]
    fn test_slot_types() {
        let pc = Address::from_usize(0x1000);
        let entry = Address::from_usize(0x1100);
        assert_eq!(
            RelocInfo::new(pc, RelocMode::CompressedEmbeddedObject).slot_type(),
            SlotType::EmbeddedObjectCompressed
        );
        assert_eq!(
            RelocInfo::new(pc, RelocMode::DataEmbeddedObject).slot_type(),
            SlotType::EmbeddedObjectData
        );
        assert_eq!(
            RelocInfo::in_constant_pool(pc, RelocMode::FullEmbeddedObject, entry).slot_type(),
            SlotType::ConstPoolEmbeddedObjectFull
        );
        assert_eq!(
            RelocInfo::in_constant_pool(pc, RelocMode::CompressedEmbeddedObject, entry)
                .slot_type(),
            SlotType::ConstPoolEmbeddedObjectCompressed
        );
    }
}
