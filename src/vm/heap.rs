// src/vm/heap.rs

use std::cell::Cell;
use std::cell::RefCell;

use hashbrown::HashSet;

use crate::vm::value::LStr;

/// Default collection threshold for a fresh heap.
const DEFAULT_GC_THRESHOLD: usize = 1 << 20;

/// String interner plus allocation accounting with a GC threshold.
///
/// The loader creates objects that are not yet rooted, so it pauses
/// collection for the whole load by raising the threshold through
/// [`Heap::pause_gc`]; the guard restores it on every exit path,
/// including early returns on malformed input.
#[derive(Debug)]
pub struct Heap {
    strings: RefCell<HashSet<LStr>>,
    gc_threshold: Cell<usize>,
    total_bytes: Cell<usize>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            strings: RefCell::new(HashSet::new()),
            gc_threshold: Cell::new(DEFAULT_GC_THRESHOLD),
            total_bytes: Cell::new(0),
        }
    }

    /// Intern a string: equal contents share one allocation.
    pub fn intern(&self, s: &str) -> LStr {
        let mut strings = self.strings.borrow_mut();
        if let Some(existing) = strings.get(s) {
            return existing.clone();
        }
        let interned: LStr = s.into();
        self.note_allocation(s.len());
        strings.insert(interned.clone());
        interned
    }

    pub fn interned_count(&self) -> usize {
        self.strings.borrow().len()
    }

    pub fn note_allocation(&self, bytes: usize) {
        self.total_bytes.set(self.total_bytes.get() + bytes);
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.get()
    }

    pub fn gc_threshold(&self) -> usize {
        self.gc_threshold.get()
    }

    pub fn set_gc_threshold(&self, threshold: usize) {
        self.gc_threshold.set(threshold);
    }

    /// True when enough has been allocated that the runtime should
    /// collect at its next safepoint.
    pub fn should_collect(&self) -> bool {
        self.total_bytes.get() >= self.gc_threshold.get()
    }

    /// Pause collection: the saved threshold comes back when the guard
    /// drops, no matter how the scope exits.
    pub fn pause_gc(&self) -> GcPauseGuard<'_> {
        let saved = self.gc_threshold.replace(usize::MAX);
        GcPauseGuard { heap: self, saved }
    }
}

pub struct GcPauseGuard<'h> {
    heap: &'h Heap,
    saved: usize,
}

impl Drop for GcPauseGuard<'_> {
    fn drop(&mut self) {
        self.heap.gc_threshold.set(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn interning_shares_allocations() {
        let heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(heap.interned_count(), 1);
    }

    #[test]
    fn pause_guard_restores_on_drop() {
        let heap = Heap::new();
        heap.set_gc_threshold(123);
        {
            let _pause = heap.pause_gc();
            assert_eq!(heap.gc_threshold(), usize::MAX);
            assert!(!heap.should_collect());
        }
        assert_eq!(heap.gc_threshold(), 123);
    }

    #[test]
    fn pause_guard_restores_on_early_exit() {
        let heap = Heap::new();
        heap.set_gc_threshold(456);
        let failing = || -> Result<(), ()> {
            let _pause = heap.pause_gc();
            Err(())
        };
        assert!(failing().is_err());
        assert_eq!(heap.gc_threshold(), 456);
    }
}
