//! Vocabularies
//!
//! A [`Vocabulary`] maps case-insensitive names to words. Vocabularies
//! stack: lookup searches from the innermost scope down to the core
//! words, and new definitions go into the distinguished "current"
//! vocabulary. The engine is single-threaded, so the active stack is
//! thread-local state, mutated only between evaluations.
//!
//! Words defined at runtime are owned by their vocabulary and keep a
//! stable address for the life of the stack; compiled code refers to
//! them by pointer. Redefining a name retires the old word rather than
//! freeing it, since existing bytecode may still call it.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::word::Word;
use crate::words;

#[derive(Default)]
pub struct Vocabulary {
    words: HashMap<String, *const Word>,
    owned: Vec<Box<Word>>,
    retired: Vec<Box<Word>>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Vocabulary::default()
    }

    /// The vocabulary of core (native) words.
    pub fn core() -> Self {
        let mut v = Vocabulary::new();
        for word in words::core_words() {
            v.words
                .insert(word.name().unwrap_or_default().to_uppercase(), word);
        }
        v
    }

    /// Add a word, taking ownership. Returns its stable address.
    pub fn define(&mut self, word: Word) -> *const Word {
        let key = word
            .name()
            .expect("can't register an anonymous word")
            .to_uppercase();
        let boxed = Box::new(word);
        let ptr: *const Word = &*boxed;
        if let Some(old) = self.words.insert(key, ptr) {
            // Keep a shadowed definition alive; code may still call it.
            if let Some(i) = self.owned.iter().position(|b| std::ptr::eq(&**b, old)) {
                let old_box = self.owned.swap_remove(i);
                self.retired.push(old_box);
            }
        }
        self.owned.push(boxed);
        ptr
    }

    pub fn lookup(&self, name: &str) -> Option<*const Word> {
        self.words.get(&name.to_uppercase()).copied()
    }

    /// Every word reachable from this vocabulary, including retired
    /// definitions (their literals must stay alive too).
    pub fn words(&self) -> impl Iterator<Item = &Word> {
        self.words
            .values()
            .map(|&p| unsafe { &*p })
            .chain(self.retired.iter().map(|b| &**b))
    }
}

/// A stack of vocabularies: index 0 holds the core words, the top is
/// searched first, and `current` receives new definitions.
pub struct VocabularyStack {
    active: Vec<Vocabulary>,
    current: usize,
}

impl VocabularyStack {
    pub fn new() -> Self {
        VocabularyStack {
            active: vec![Vocabulary::core(), Vocabulary::new()],
            current: 1,
        }
    }

    pub fn push(&mut self, v: Vocabulary) {
        self.active.push(v);
        self.current = self.active.len() - 1;
    }

    pub fn pop(&mut self) {
        assert!(self.active.len() > 2, "can't pop the base vocabularies");
        self.active.pop();
        self.current = self.current.min(self.active.len() - 1);
    }

    /// Look a name up, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<*const Word> {
        self.active.iter().rev().find_map(|v| v.lookup(name))
    }

    /// Add a definition to the current vocabulary.
    pub fn define(&mut self, word: Word) -> *const Word {
        self.active[self.current].define(word)
    }

    /// GC hook: mark every literal in every reachable word.
    pub fn gc_scan(&self) {
        for vocab in &self.active {
            for word in vocab.words() {
                word.mark_literals();
            }
        }
    }
}

impl Default for VocabularyStack {
    fn default() -> Self {
        VocabularyStack::new()
    }
}

thread_local! {
    static ACTIVE: RefCell<VocabularyStack> = RefCell::new(VocabularyStack::new());
}

/// Run `f` with the thread's active vocabulary stack.
pub fn with_active<R>(f: impl FnOnce(&mut VocabularyStack) -> R) -> R {
    ACTIVE.with(|a| f(&mut a.borrow_mut()))
}

/// Look a name up in the active vocabulary stack.
pub fn lookup(name: &str) -> Option<*const Word> {
    with_active(|v| v.lookup(name))
}

/// Register a word in the active stack's current vocabulary.
pub fn define(word: Word) -> *const Word {
    with_active(|v| v.define(word))
}

/// Mark every literal reachable from the active vocabularies.
pub fn gc_scan() {
    with_active(|v| v.gc_scan());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::StackEffect;
    use crate::instruction::{CodeWriter, Opcode};
    use crate::word::WordFlags;

    fn dummy(name: &str) -> Word {
        let mut w = CodeWriter::new();
        w.push_op(Opcode::Return);
        Word::interp(
            Some(name.into()),
            StackEffect::new(),
            w.finish(),
            WordFlags::empty(),
        )
    }

    #[test]
    fn test_core_lookup_is_case_insensitive() {
        let v = Vocabulary::core();
        let a = v.lookup("dup").unwrap();
        let b = v.lookup("DUP").unwrap();
        assert!(std::ptr::eq(a, b));
        assert!(v.lookup("+").is_some());
        assert!(v.lookup("nothere").is_none());
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let mut stack = VocabularyStack::new();
        stack.define(dummy("thing"));
        let outer = stack.lookup("THING").unwrap();

        let mut inner = Vocabulary::new();
        inner.define(dummy("thing"));
        stack.push(inner);
        let shadowed = stack.lookup("thing").unwrap();
        assert!(!std::ptr::eq(outer, shadowed));

        stack.pop();
        assert!(std::ptr::eq(stack.lookup("thing").unwrap(), outer));
    }

    #[test]
    fn test_redefinition_retires_old_word() {
        let mut v = Vocabulary::new();
        let first = v.define(dummy("w"));
        let second = v.define(dummy("w"));
        assert!(!std::ptr::eq(first, second));
        assert!(std::ptr::eq(v.lookup("w").unwrap(), second));
        // The shadowed word is still reachable for the GC scan.
        assert_eq!(v.words().count(), 2);
        // And its storage is still valid.
        assert_eq!(unsafe { (*first).name() }, Some("w"));
    }
}
