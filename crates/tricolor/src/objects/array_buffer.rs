//! Array buffers and their off-heap extensions.
//!
//! The backing store of an array buffer is tracked by an
//! [`ArrayBufferExtension`] living outside the heap. The sweeper frees the
//! backing store of every extension that was not marked in the cycle, so the
//! barrier marks an extension as soon as a buffer gains it during marking.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::address::HeapRef;

/// Off-heap bookkeeping for one array buffer backing store.
#[derive(Debug, Default)]
pub struct ArrayBufferExtension {
    marked: AtomicBool,
    young_marked: AtomicBool,
    accounting_length: AtomicUsize,
}

impl ArrayBufferExtension {
    /// Create an unmarked extension accounting for `length` bytes.
    #[must_use]
    pub const fn new(length: usize) -> Self {
        Self {
            marked: AtomicBool::new(false),
            young_marked: AtomicBool::new(false),
            accounting_length: AtomicUsize::new(length),
        }
    }

    /// Mark for a major cycle.
    pub fn mark(&self) {
        self.marked.store(true, Ordering::Relaxed);
    }

    /// Clear the major mark.
    pub fn unmark(&self) {
        self.marked.store(false, Ordering::Relaxed);
    }

    /// Whether the extension is marked for a major cycle.
    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Relaxed)
    }

    /// Mark for a minor cycle.
    pub fn young_mark(&self) {
        self.young_marked.store(true, Ordering::Relaxed);
    }

    /// Clear the minor mark.
    pub fn young_unmark(&self) {
        self.young_marked.store(false, Ordering::Relaxed);
    }

    /// Whether the extension is marked for a minor cycle.
    #[must_use]
    pub fn is_young_marked(&self) -> bool {
        self.young_marked.load(Ordering::Relaxed)
    }

    /// Bytes of external memory the extension accounts for.
    #[must_use]
    pub fn accounting_length(&self) -> usize {
        self.accounting_length.load(Ordering::Relaxed)
    }

    /// Replace the accounted length, returning the previous one.
    pub fn set_accounting_length(&self, length: usize) -> usize {
        self.accounting_length.swap(length, Ordering::Relaxed)
    }
}

/// An array buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JsArrayBuffer(HeapRef);

impl JsArrayBuffer {
    /// View `obj` as an array buffer.
    #[must_use]
    pub const fn from_object(obj: HeapRef) -> Self {
        Self(obj)
    }

    /// The underlying object.
    #[must_use]
    pub const fn object(self) -> HeapRef {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_are_independent() {
        let ext = ArrayBufferExtension::new(64);
        ext.young_mark();
        assert!(ext.is_young_marked());
        assert!(!ext.is_marked());
        ext.mark();
        ext.young_unmark();
        assert!(ext.is_marked());
        assert!(!ext.is_young_marked());
        ext.unmark();
        assert!(!ext.is_marked());
    }

    #[test]
    fn test_accounting_length() {
        let ext = ArrayBufferExtension::new(64);
        assert_eq!(ext.set_accounting_length(128), 64);
        assert_eq!(ext.accounting_length(), 128);
    }
}
