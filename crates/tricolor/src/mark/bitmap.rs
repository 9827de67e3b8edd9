//! Tri-color bitmap for region-level object marking.
//!
//! Two bits per heap word, kept in two parallel bit arrays so a color transition
//! is a single `fetch_or` on one word:
//!
//! | marked | black | color |
//! |--------|-------|-------|
//! | 0      | 0     | white |
//! | 1      | 0     | grey  |
//! | 1      | 1     | black |

use std::sync::atomic::{AtomicU64, Ordering};

use crate::heap::region::WORDS_IN_REGION;
use crate::mark::Color;

/// Number of `u64` words backing one bit array.
pub const BITMAP_CELLS: usize = WORDS_IN_REGION / 64;

/// Per-region color bitmap, indexed by word offset from the region base.
///
/// Lives inline in the region header. All-zero memory is a valid, all-white
/// bitmap.
#[derive(Debug)]
#[repr(C)]
pub struct ColorBitmap {
    marked: [AtomicU64; BITMAP_CELLS],
    black: [AtomicU64; BITMAP_CELLS],
}

impl Default for ColorBitmap {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
const fn cell_and_mask(index: usize) -> (usize, u64) {
    (index / 64, 1u64 << (index % 64))
}

impl ColorBitmap {
    /// Create an all-white bitmap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            marked: [const { AtomicU64::new(0) }; BITMAP_CELLS],
            black: [const { AtomicU64::new(0) }; BITMAP_CELLS],
        }
    }

    /// Color of the object starting at word `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the region.
    #[must_use]
    pub fn color(&self, index: usize) -> Color {
        let (cell, mask) = cell_and_mask(index);
        if self.black[cell].load(Ordering::Acquire) & mask != 0 {
            Color::Black
        } else if self.marked[cell].load(Ordering::Acquire) & mask != 0 {
            Color::Grey
        } else {
            Color::White
        }
    }

    /// Turn a white object grey.
    ///
    /// Returns `true` only for the caller that performed the transition, so an
    /// object is pushed to a worklist at most once per cycle.
    pub fn white_to_grey(&self, index: usize) -> bool {
        let (cell, mask) = cell_and_mask(index);
        self.marked[cell].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    /// Turn a grey object black.
    ///
    /// Returns `true` only for the caller that performed the transition.
    pub fn grey_to_black(&self, index: usize) -> bool {
        let (cell, mask) = cell_and_mask(index);
        debug_assert!(
            self.marked[cell].load(Ordering::Relaxed) & mask != 0,
            "grey_to_black on a white object"
        );
        self.black[cell].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    /// Whether the object has been marked (grey or black).
    #[must_use]
    pub fn is_marked(&self, index: usize) -> bool {
        let (cell, mask) = cell_and_mask(index);
        self.marked[cell].load(Ordering::Acquire) & mask != 0
    }

    /// Number of marked objects.
    #[must_use]
    pub fn marked_count(&self) -> usize {
        self.marked
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Reset every object to white.
    pub fn clear(&self) {
        for cell in self.marked.iter().chain(self.black.iter()) {
            cell.store(0, Ordering::Relaxed);
        }
    }
}
