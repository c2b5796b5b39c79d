//! The Core Words
//!
//! One [`Word`] per opcode, each with its declared stack effect. The
//! table is built once and lives for the process; the vocabulary stack's
//! bottom entry serves these words to both parsers, and the checker
//! reads their effects. Opcodes whose effect depends on a parameter or
//! on runtime values are declared *weird* and special-cased by the
//! checker; those words are also magic, so no source token can name
//! them.

use std::sync::LazyLock;

use crate::effect::StackEffect;
use crate::effect_parser::parse_effect;
use crate::instruction::{OPCODE_COUNT, Opcode};
use crate::word::{Word, WordFlags};

static CORE_WORDS: LazyLock<Vec<Word>> = LazyLock::new(|| {
    (0..OPCODE_COUNT as u8)
        .map(|b| declare(Opcode::try_from(b).expect("dense opcode enum")))
        .collect()
});

/// The native word implementing an opcode.
pub fn core_word(op: Opcode) -> &'static Word {
    &CORE_WORDS[u8::from(op) as usize]
}

/// All native words, in opcode order.
pub fn core_words() -> &'static [Word] {
    &CORE_WORDS
}

fn fx(decl: &str) -> StackEffect {
    parse_effect(decl).expect("core word effect").effect
}

fn declare(op: Opcode) -> Word {
    use Opcode::*;
    let magic = WordFlags::MAGIC;
    let none = WordFlags::empty();
    let (effect, flags) = match op {
        // Call/dispatch: effects depend on the callee.
        Interp | Interp2 | Interp3 | Interp4 => (StackEffect::weird(), magic),
        TailInterp | TailInterp2 | TailInterp3 | TailInterp4 => (StackEffect::weird(), magic),
        Return => (StackEffect::new(), magic),
        Recurse => (StackEffect::weird(), magic),
        // CALL is checkable from source: the checker demands a literal
        // quotation, whose effect it then applies.
        Call => (StackEffect::weird(), none),
        // Literals. The declared effects are loose; the checker sees the
        // actual parameter value on its simulated stack.
        Literal => (fx("-- v"), magic),
        SmallInt => (fx("-- #"), magic),
        // Control flow.
        Branch => (fx("--"), magic),
        ZBranch => (fx("b --"), magic),
        IfElse => (StackEffect::weird(), none),
        // Stack gymnastics.
        Nop => (fx("--"), none),
        Drop => (fx("a --"), none),
        Dup => (fx("a -- a a"), none),
        Over => (fx("a b -- a b a"), none),
        Rot => (fx("a b c -- b c a"), none),
        RotN => (StackEffect::weird(), magic),
        Swap => (fx("a b -- b a"), none),
        // Constants.
        Zero | One => (fx("-- #"), none),
        // Comparison is total (structural equality, type-tag ordering).
        Eq | Ne | Ge | Gt | Le | Lt => (fx("x y -- #"), none),
        EqZero | NeZero | GtZero | LtZero => (fx("a -- #"), none),
        // Arithmetic. `+` also concatenates strings and appends to
        // arrays, so its operands are wider than the other ops'; the
        // result mirrors the left operand, which keeps `3 4 + ABS`
        // checkable as numbers.
        Plus => (fx("a#$[] b#$[] -- a#$[]"), none),
        Minus | Mult | Div | Mod => (fx("a# b# -- #"), none),
        Abs => (fx("a# -- #"), none),
        Max | Min => (fx("a# b# -- #"), none),
        // Value queries.
        Null => (fx("-- ?"), none),
        Length => (fx("x$[] -- #"), none),
        // Definitions.
        Define => (fx("{q} name$ --"), none),
        // Locals: offsets give these parameter-dependent effects.
        GetArg | SetArg | Locals | DropArgs => (StackEffect::weird(), magic),
        // I/O.
        Print => (fx("a --"), none),
        Sp | Nl | Nlq => (fx("--"), none),
    };
    Word::native(op.forth_name(), op, effect, flags)
}
