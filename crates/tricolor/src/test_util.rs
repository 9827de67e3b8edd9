//! Heap fixtures for tests.
//!
//! Compiled for the crate's own unit tests and, with the `test-util` feature,
//! for integration tests and benchmarks.

#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use crate::address::{Address, HeapRef};
use crate::config::HeapConfig;
use crate::heap::{Heap, Region, RegionFlags, Residency};
use crate::objects::{Code, DescriptorArray};

/// A client heap attached to a shared heap, with one region of each kind.
pub struct Fixture {
    /// The client heap.
    pub heap: Arc<Heap>,
    /// The shared heap `heap` is attached to.
    pub shared_heap: Arc<Heap>,
    regular: Address,
    shared: Address,
    read_only: Address,
    code_space: Address,
    /// Read-only map of descriptor arrays.
    pub descriptor_array_map: HeapRef,
    /// Read-only map of code objects.
    pub code_map: HeapRef,
}

impl Fixture {
    /// Fixture with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    /// Fixture whose client heap uses `config`.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        let shared_heap = Heap::new(HeapConfig {
            is_shared: true,
            ..config
        });
        let heap = Heap::new_client(config, &shared_heap);
        let regular = heap.allocate_region(Residency::Regular, RegionFlags::empty()).base();
        let shared = shared_heap
            .allocate_region(Residency::Shared, RegionFlags::WRITABLE_SHARED)
            .base();
        let read_only = heap.allocate_region(Residency::ReadOnly, RegionFlags::NEVER_EVACUATE);
        let descriptor_array_map = read_only.allocate(2).expect("read-only region full");
        let code_map = read_only.allocate(2).expect("read-only region full");
        let read_only = read_only.base();
        let code_space = heap.allocate_region(Residency::Regular, RegionFlags::NEVER_EVACUATE).base();
        Self {
            heap,
            shared_heap,
            regular,
            shared,
            read_only,
            code_space,
            descriptor_array_map,
            code_map,
        }
    }

    /// A regular old-generation region of `heap`.
    #[must_use]
    pub fn regular(&self) -> &Region {
        // SAFETY: the fixture holds the heap that owns the region.
        unsafe { Region::containing(self.regular) }
    }

    /// A writable shared region of `shared_heap`.
    #[must_use]
    pub fn shared(&self) -> &Region {
        // SAFETY: see `regular`.
        unsafe { Region::containing(self.shared) }
    }

    /// A read-only region of `heap`.
    #[must_use]
    pub fn read_only(&self) -> &Region {
        // SAFETY: see `regular`.
        unsafe { Region::containing(self.read_only) }
    }

    /// A never-evacuate region of `heap` for code and builtins.
    #[must_use]
    pub fn code_space(&self) -> &Region {
        // SAFETY: see `regular`.
        unsafe { Region::containing(self.code_space) }
    }

    /// Allocate `words` words in the regular region.
    #[must_use]
    pub fn alloc_regular(&self, words: usize) -> HeapRef {
        self.regular().allocate(words).expect("regular region full")
    }

    /// Allocate `words` words in the shared region.
    #[must_use]
    pub fn alloc_shared(&self, words: usize) -> HeapRef {
        self.shared().allocate(words).expect("shared region full")
    }

    /// Allocate `words` words in the read-only region.
    #[must_use]
    pub fn alloc_read_only(&self, words: usize) -> HeapRef {
        self.read_only().allocate(words).expect("read-only region full")
    }

    /// Allocate `words` words in the code space and register them as a
    /// builtin.
    #[must_use]
    pub fn alloc_builtin(&self, words: usize) -> HeapRef {
        let obj = self.code_space().allocate(words).expect("code space full");
        self.heap.register_builtin(obj);
        obj
    }

    /// Allocate a code object in the code space.
    #[must_use]
    pub fn alloc_code(&self, instruction_bytes: usize, constant_pool_entries: usize) -> Code {
        Code::allocate(
            self.code_space(),
            self.code_map,
            instruction_bytes,
            constant_pool_entries,
        )
        .expect("code space full")
    }

    /// Allocate a descriptor array with room for `capacity` descriptors in the
    /// regular region.
    #[must_use]
    pub fn alloc_descriptor_array(&self, capacity: usize) -> DescriptorArray {
        DescriptorArray::allocate(self.regular(), self.descriptor_array_map, capacity)
            .expect("regular region full")
    }

    /// Allocate a fresh region of `heap` with `flags`.
    #[must_use]
    pub fn region(&self, flags: RegionFlags) -> &Region {
        self.heap.allocate_region(Residency::Regular, flags)
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("heap", &self.heap)
            .field("shared_heap", &self.shared_heap)
            .finish_non_exhaustive()
    }
}
