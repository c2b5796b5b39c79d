//! Words
//!
//! A [`Word`] is a named (or anonymous) callable unit: either a native
//! primitive identified by its [`Opcode`], or an interpreted word owning
//! a compiled byte sequence. Every word carries its declared
//! [`StackEffect`] and a small flag set.

use bitflags::bitflags;

use crate::effect::StackEffect;
use crate::instruction::{self, Opcode, ParamKind};

bitflags! {
    /// Word attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WordFlags: u8 {
        /// Not addressable from source code (compiler-internal).
        const MAGIC = 0x01;
        /// Body should be spliced into the caller instead of called.
        const INLINE = 0x02;
    }
}

/// How a word executes.
#[derive(Debug, Clone)]
pub enum WordKind {
    /// A primitive, handled directly by the dispatch loop.
    Native(Opcode),
    /// Compiled bytecode, entered via `_INTERP`/`_TAILINTERP`/`CALL`.
    Interp(Box<[u8]>),
}

/// A Forth word definition: name, stack effect, flags, and code.
#[derive(Debug, Clone)]
pub struct Word {
    name: Option<String>,
    effect: StackEffect,
    flags: WordFlags,
    kind: WordKind,
}

impl Word {
    pub fn native(name: &str, opcode: Opcode, effect: StackEffect, flags: WordFlags) -> Word {
        Word {
            name: Some(name.to_string()),
            effect,
            flags,
            kind: WordKind::Native(opcode),
        }
    }

    pub fn interp(
        name: Option<String>,
        effect: StackEffect,
        code: Box<[u8]>,
        flags: WordFlags,
    ) -> Word {
        Word {
            name,
            effect,
            flags,
            kind: WordKind::Interp(code),
        }
    }

    /// A copy of this word under a new name (used by `DEFINE`).
    #[must_use]
    pub fn with_name(&self, name: &str) -> Word {
        let mut copy = self.clone();
        copy.name = Some(name.to_string());
        copy
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn effect(&self) -> &StackEffect {
        &self.effect
    }

    pub fn flags(&self) -> WordFlags {
        self.flags
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, WordKind::Native(_))
    }

    pub fn is_magic(&self) -> bool {
        self.flags.contains(WordFlags::MAGIC)
    }

    pub fn is_inline(&self) -> bool {
        self.flags.contains(WordFlags::INLINE)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self.kind {
            WordKind::Native(op) => Some(op),
            WordKind::Interp(_) => None,
        }
    }

    /// The compiled body of an interpreted word.
    pub fn code(&self) -> Option<&[u8]> {
        match &self.kind {
            WordKind::Interp(code) => Some(code),
            WordKind::Native(_) => None,
        }
    }

    /// True for a native word whose opcode wants an instruction
    /// parameter; such words can't be named in source code.
    pub fn takes_param(&self) -> bool {
        self.opcode()
            .is_some_and(|op| op.param_kind() != ParamKind::None)
    }

    /// True if the body is nothing but `_RETURN` (the "empty quote" of
    /// the truthiness rule).
    pub fn has_empty_body(&self) -> bool {
        self.code().is_some_and(|c| c.len() <= 1)
    }

    /// GC hook: mark every value embedded in the body as a `_LITERAL`.
    pub fn mark_literals(&self) {
        if let Some(code) = self.code() {
            instruction::for_each_literal(code, |v| v.mark());
        }
    }
}

impl std::fmt::Display for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "<anonymous>"),
        }
    }
}
