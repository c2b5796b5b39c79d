//! Heap Objects & Mark/Sweep Collector
//!
//! Strings (over six bytes), arrays, and quotations live on the heap as
//! [`HeapCell`]s. Every cell is threaded onto a single thread-local
//! allocation list at creation; the list link doubles as the mark bit
//! (stored in the pointer's low bit, which is always clear in a real
//! address).
//!
//! Collection is stop-the-world mark/sweep, invoked explicitly between
//! evaluations: mark every value reachable from the data stack and the
//! vocabulary stack, then [`sweep`]. The collector must not run while a
//! word is executing, because the data stack is the root set.

use std::cell::Cell;

use crate::value::Value;
use crate::word::Word;

/// Payload of a heap cell.
pub enum Obj {
    /// A string too long to store inline in a [`Value`].
    Str(Box<str>),
    /// An ordered sequence of values.
    Array(Vec<Value>),
    /// A quotation: an anonymous compiled word.
    Quote(Word),
}

/// A garbage-collected allocation: intrusive list link plus payload.
pub struct HeapCell {
    /// Next cell in the allocation list, with the mark bit in bit 0.
    next_and_mark: Cell<usize>,
    pub obj: Obj,
}

const MARK_BIT: usize = 0x1;

thread_local! {
    /// Head of the allocation list.
    static FIRST: Cell<*mut HeapCell> = const { Cell::new(std::ptr::null_mut()) };
    /// Number of live cells.
    static COUNT: Cell<usize> = const { Cell::new(0) };
}

impl HeapCell {
    /// Allocate a cell, linking it onto the allocation list.
    /// The returned pointer stays valid until a sweep frees the cell.
    pub fn alloc(obj: Obj) -> *mut HeapCell {
        let cell = Box::into_raw(Box::new(HeapCell {
            next_and_mark: Cell::new(FIRST.get() as usize),
            obj,
        }));
        FIRST.set(cell);
        COUNT.set(COUNT.get() + 1);
        cell
    }

    pub fn next(&self) -> *mut HeapCell {
        (self.next_and_mark.get() & !MARK_BIT) as *mut HeapCell
    }

    pub fn is_marked(&self) -> bool {
        self.next_and_mark.get() & MARK_BIT != 0
    }

    /// Set the mark bit. Returns false if the cell was already marked,
    /// so recursive marking terminates on shared structure.
    pub fn mark(&self) -> bool {
        if self.is_marked() {
            return false;
        }
        self.next_and_mark.set(self.next_and_mark.get() | MARK_BIT);
        true
    }

    fn unmark(&self) {
        self.next_and_mark.set(self.next_and_mark.get() & !MARK_BIT);
    }

    fn set_next(&self, next: *mut HeapCell) {
        let mark = self.next_and_mark.get() & MARK_BIT;
        self.next_and_mark.set(next as usize | mark);
    }
}

/// Number of heap cells currently allocated.
pub fn instance_count() -> usize {
    COUNT.get()
}

/// Mark every value on the data stack (bottom to top).
pub fn scan_stack(values: &[Value]) {
    for v in values {
        v.mark();
    }
}

/// Sweep the allocation list: marked cells are unmarked and kept,
/// unmarked cells are freed. Returns `(kept, freed)`.
pub fn sweep() -> (usize, usize) {
    let mut kept = 0;
    let mut freed = 0;
    let mut first = FIRST.get();
    // Unlink from the head until the first survivor...
    unsafe {
        while !first.is_null() && !(*first).is_marked() {
            let next = (*first).next();
            drop(Box::from_raw(first));
            freed += 1;
            first = next;
        }
        FIRST.set(first);
        // ...then splice out dead cells behind a trailing survivor.
        let mut prev = first;
        while !prev.is_null() {
            (*prev).unmark();
            kept += 1;
            let mut cur = (*prev).next();
            while !cur.is_null() && !(*cur).is_marked() {
                let next = (*cur).next();
                drop(Box::from_raw(cur));
                freed += 1;
                cur = next;
            }
            (*prev).set_next(cur);
            prev = cur;
        }
    }
    debug_assert_eq!(kept + freed, COUNT.get());
    COUNT.set(kept);
    (kept, freed)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The heap is thread-local and the test runner gives every test its
    // own thread, so these tests cannot interfere with each other.

    #[test]
    fn test_sweep_frees_unmarked() {
        let a = HeapCell::alloc(Obj::Str("first".into()));
        let _b = HeapCell::alloc(Obj::Str("second".into()));
        let c = HeapCell::alloc(Obj::Str("third".into()));
        assert_eq!(instance_count(), 3);

        unsafe {
            (*a).mark();
            (*c).mark();
        }
        let (kept, freed) = sweep();
        assert_eq!((kept, freed), (2, 1));
        assert_eq!(instance_count(), 2);

        // Survivors were unmarked by the sweep, so an immediate second
        // sweep with no new marks frees everything.
        let (kept, freed) = sweep();
        assert_eq!((kept, freed), (0, 2));
        assert_eq!(instance_count(), 0);
    }

    #[test]
    fn test_mark_is_idempotent() {
        let a = HeapCell::alloc(Obj::Str("again".into()));
        unsafe {
            assert!((*a).mark());
            assert!(!(*a).mark());
        }
        sweep();
        sweep();
    }

    #[test]
    fn test_sweep_empty_heap() {
        assert_eq!(sweep(), (0, 0));
    }
}
