//! Heap configuration.

use thiserror::Error;

/// Default number of entries in one worklist segment.
pub const DEFAULT_WORKLIST_SEGMENT_CAPACITY: usize = 64;
/// Default number of descriptors in one remembered-set chunk.
pub const DEFAULT_REMEMBERED_SET_CHUNK_CAPACITY: usize = 256;
/// Default number of relocation slots a background barrier buffers per chunk.
pub const DEFAULT_LOCAL_SLOT_BUFFER_CAPACITY: usize = 128;

/// Configuration of a [`Heap`](crate::Heap).
///
/// Every capacity is reserved up front so the barrier slow paths append into
/// existing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Entries per worklist segment. Must be a non-zero power of two.
    pub worklist_segment_capacity: usize,
    /// Descriptors per remembered-set chunk.
    pub remembered_set_chunk_capacity: usize,
    /// Relocation slots per chunk of a background barrier's local buffer.
    pub local_slot_buffer_capacity: usize,
    /// This heap is the shared heap whose objects other heaps may reference.
    pub is_shared: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Configuration with the default capacities for a client heap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            worklist_segment_capacity: DEFAULT_WORKLIST_SEGMENT_CAPACITY,
            remembered_set_chunk_capacity: DEFAULT_REMEMBERED_SET_CHUNK_CAPACITY,
            local_slot_buffer_capacity: DEFAULT_LOCAL_SLOT_BUFFER_CAPACITY,
            is_shared: false,
        }
    }

    /// Configuration of the shared heap.
    #[must_use]
    pub const fn shared() -> Self {
        Self {
            is_shared: true,
            ..Self::new()
        }
    }

    /// Set the worklist segment capacity.
    #[must_use]
    pub const fn with_worklist_segment_capacity(mut self, capacity: usize) -> Self {
        self.worklist_segment_capacity = capacity;
        self
    }

    /// Set the remembered-set chunk capacity.
    #[must_use]
    pub const fn with_remembered_set_chunk_capacity(mut self, capacity: usize) -> Self {
        self.remembered_set_chunk_capacity = capacity;
        self
    }

    /// Set the local relocation slot buffer capacity.
    #[must_use]
    pub const fn with_local_slot_buffer_capacity(mut self, capacity: usize) -> Self {
        self.local_slot_buffer_capacity = capacity;
        self
    }

    /// Check every capacity.
    ///
    /// # Errors
    ///
    /// Returns the first capacity that is out of range.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if !self.worklist_segment_capacity.is_power_of_two() {
            return Err(ConfigError::WorklistSegmentCapacity(
                self.worklist_segment_capacity,
            ));
        }
        if self.remembered_set_chunk_capacity == 0 {
            return Err(ConfigError::RememberedSetChunkCapacity);
        }
        if self.local_slot_buffer_capacity == 0 {
            return Err(ConfigError::LocalSlotBufferCapacity);
        }
        Ok(())
    }
}

/// An invalid [`HeapConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The worklist segment capacity is zero or not a power of two.
    #[error("worklist segment capacity must be a non-zero power of two, got {0}")]
    WorklistSegmentCapacity(usize),
    /// The remembered-set chunk capacity is zero.
    #[error("remembered set chunk capacity must be non-zero")]
    RememberedSetChunkCapacity,
    /// The local slot buffer capacity is zero.
    #[error("local slot buffer capacity must be non-zero")]
    LocalSlotBufferCapacity,
}
