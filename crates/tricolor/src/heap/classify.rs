//! Residency queries and barrier elision.

use parking_lot::RwLock;

use crate::address::HeapRef;
use crate::heap::region::{Region, Residency};

/// Residency class of the region holding `obj`.
#[must_use]
pub fn residency_of(obj: HeapRef) -> Residency {
    Region::of(obj).residency()
}

/// Whether `obj` can never move and never be collected.
///
/// True for read-only objects and for registered builtins in never-evacuate
/// regions. A store of such a value needs no barrier. The predicate may miss
/// objects that qualify, it never accepts one that does not.
#[must_use]
pub fn is_permanent_and_immovable(obj: HeapRef) -> bool {
    let region = Region::of(obj);
    if region.in_read_only() {
        return true;
    }
    if !region.never_evacuate() {
        return false;
    }
    region.heap().is_builtin(obj)
}

/// Sorted set of a heap's builtin code objects.
#[derive(Debug, Default)]
pub struct BuiltinTable {
    entries: RwLock<Vec<HeapRef>>,
}

impl BuiltinTable {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Add a builtin. Adding one twice is a no-op.
    pub fn insert(&self, code: HeapRef) {
        let mut entries = self.entries.write();
        if let Err(pos) = entries.binary_search(&code) {
            entries.insert(pos, code);
        }
    }

    /// Whether `obj` is a builtin.
    #[must_use]
    pub fn contains(&self, obj: HeapRef) -> bool {
        self.entries.read().binary_search(&obj).is_ok()
    }

    /// Number of builtins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run `f` on every builtin.
    pub fn for_each(&self, f: impl FnMut(HeapRef)) {
        self.entries.read().iter().copied().for_each(f);
    }
}
