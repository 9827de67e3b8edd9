//! Marking state.
//!
//! The collector decides when a cycle runs and drains the worklists. This module
//! is the oracle the barrier queries: which mode is active and what color an
//! object currently has.

pub mod bitmap;
pub mod worklist;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::address::HeapRef;
use crate::heap::Region;

pub use bitmap::ColorBitmap;
pub use worklist::{LocalWorklist, MarkingWorklist};

/// Which generation a marking cycle traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkingMode {
    /// No cycle running; barriers are no-ops.
    Off = 0,
    /// Young-generation marking.
    Minor = 1,
    /// Full-heap marking.
    Major = 2,
}

impl MarkingMode {
    #[must_use]
    #[allow(clippy::use_self)]
    pub(crate) const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Minor,
            2 => Self::Major,
            _ => Self::Off,
        }
    }

    /// Whether a cycle is running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Whether this is young-generation marking.
    #[must_use]
    pub const fn is_minor(self) -> bool {
        matches!(self, Self::Minor)
    }

    /// Whether this is full-heap marking.
    #[must_use]
    pub const fn is_major(self) -> bool {
        matches!(self, Self::Major)
    }
}

/// Tri-color state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    /// Not yet discovered.
    White,
    /// Discovered, fields not yet processed.
    Grey,
    /// Fully processed.
    Black,
}

/// Color of `obj`.
#[must_use]
pub fn color(obj: HeapRef) -> Color {
    let region = Region::of(obj);
    region.colors().color(region.word_index(obj.address()))
}

/// Whether `obj` has not been discovered this cycle.
#[must_use]
pub fn is_white(obj: HeapRef) -> bool {
    color(obj) == Color::White
}

/// Whether `obj` has been fully processed this cycle.
#[must_use]
pub fn is_black(obj: HeapRef) -> bool {
    color(obj) == Color::Black
}

/// Whether `obj` is discovered but not yet processed.
#[must_use]
pub fn is_grey(obj: HeapRef) -> bool {
    color(obj) == Color::Grey
}

/// Turn `obj` grey. Returns `true` for the single caller that did it.
pub fn white_to_grey(obj: HeapRef) -> bool {
    let region = Region::of(obj);
    region.colors().white_to_grey(region.word_index(obj.address()))
}

/// Turn a grey `obj` black. Returns `true` for the single caller that did it.
pub fn grey_to_black(obj: HeapRef) -> bool {
    let region = Region::of(obj);
    region.colors().grey_to_black(region.word_index(obj.address()))
}

/// Turn `obj` black whatever its current color.
pub fn mark_black(obj: HeapRef) {
    let region = Region::of(obj);
    let index = region.word_index(obj.address());
    region.colors().white_to_grey(index);
    region.colors().grey_to_black(index);
}

/// Heap-wide marking status, written by the scheduler and read by barriers.
///
/// `generation` advances on every start and stop so a barrier can tell cheaply
/// whether the status moved since it last looked.
#[derive(Debug)]
pub(crate) struct MarkingStatus {
    mode: AtomicU8,
    compacting: AtomicBool,
    epoch: AtomicU32,
    generation: AtomicU64,
}

impl MarkingStatus {
    pub(crate) const fn new() -> Self {
        Self {
            mode: AtomicU8::new(MarkingMode::Off as u8),
            compacting: AtomicBool::new(false),
            epoch: AtomicU32::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn mode(&self) -> MarkingMode {
        MarkingMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub(crate) fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::Acquire)
    }

    pub(crate) fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Enter `mode`. Major cycles advance the epoch.
    pub(crate) fn start(&self, mode: MarkingMode, is_compacting: bool) -> u32 {
        let epoch = if mode.is_major() {
            self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
        } else {
            self.epoch()
        };
        self.compacting.store(is_compacting, Ordering::Release);
        self.mode.store(mode as u8, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        epoch
    }

    pub(crate) fn stop(&self) {
        self.mode.store(MarkingMode::Off as u8, Ordering::Release);
        self.compacting.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_u8() {
        assert_eq!(MarkingMode::from_u8(0), MarkingMode::Off);
        assert_eq!(MarkingMode::from_u8(1), MarkingMode::Minor);
        assert_eq!(MarkingMode::from_u8(2), MarkingMode::Major);
        assert_eq!(MarkingMode::from_u8(9), MarkingMode::Off);
    }

    #[test]
    fn test_status_start_stop() {
        let status = MarkingStatus::new();
        assert_eq!(status.start(MarkingMode::Major, true), 1);
        assert_eq!(status.mode(), MarkingMode::Major);
        assert!(status.is_compacting());
        status.stop();
        assert_eq!(status.mode(), MarkingMode::Off);
        assert!(!status.is_compacting());

        // Minor cycles keep the epoch.
        assert_eq!(status.start(MarkingMode::Minor, false), 1);
        assert_eq!(status.generation(), 3);
    }
}
