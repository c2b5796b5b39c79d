//! Opcodes & Instruction Encoding
//!
//! Interpreted code is a contiguous byte sequence: each instruction is
//! one [`Opcode`] byte, optionally followed by a packed parameter whose
//! shape the opcode declares — a 16-bit branch offset, a pair of 8-bit
//! counts, one or more pointer-sized word references, or a full
//! [`Value`] cell. Branch offsets are signed and measured from the byte
//! after the offset itself.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::value::Value;
use crate::word::Word;

/// The Tails bytecodes. Names starting with `_` are "magic": internal
/// to the compiler and not addressable from source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // Call / dispatch
    Interp,
    Interp2,
    Interp3,
    Interp4,
    TailInterp,
    TailInterp2,
    TailInterp3,
    TailInterp4,
    Return,
    Recurse,
    Call,
    // Literals
    Literal,
    SmallInt,
    // Control
    Branch,
    ZBranch,
    IfElse,
    // Stack gymnastics
    Nop,
    Drop,
    Dup,
    Over,
    Rot,
    RotN,
    Swap,
    // Constants
    Zero,
    One,
    // Comparison & arithmetic
    Eq,
    Ne,
    EqZero,
    NeZero,
    Ge,
    Gt,
    GtZero,
    Le,
    Lt,
    LtZero,
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    Abs,
    Max,
    Min,
    // Value queries
    Null,
    Length,
    // Definitions
    Define,
    // Locals
    GetArg,
    SetArg,
    Locals,
    DropArgs,
    // I/O
    Print,
    Sp,
    Nl,
    Nlq,
}

/// Number of opcodes (the enum is dense from zero).
pub const OPCODE_COUNT: usize = Opcode::Nlq as usize + 1;

/// The parameter shape following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    None,
    /// A little-endian `i16`: branch offset, small integer, arg/local
    /// offset, locals count, or rotate distance.
    Offset,
    /// Two bytes: locals to drop, results to keep (`_DROPARGS`).
    DropCounts,
    /// `n` pointer-sized word references (`_INTERPn` / `_TAILINTERPn`).
    Words(u8),
    /// A full 8-byte `Value` (`_LITERAL`).
    Literal,
}

impl ParamKind {
    /// Encoded size in bytes.
    pub fn size(self) -> usize {
        match self {
            ParamKind::None => 0,
            ParamKind::Offset | ParamKind::DropCounts => 2,
            ParamKind::Words(n) => n as usize * size_of::<usize>(),
            ParamKind::Literal => 8,
        }
    }
}

impl Opcode {
    pub fn param_kind(self) -> ParamKind {
        use Opcode::*;
        match self {
            Interp | TailInterp => ParamKind::Words(1),
            Interp2 | TailInterp2 => ParamKind::Words(2),
            Interp3 | TailInterp3 => ParamKind::Words(3),
            Interp4 | TailInterp4 => ParamKind::Words(4),
            Literal => ParamKind::Literal,
            SmallInt | Branch | ZBranch | RotN | GetArg | SetArg | Locals => ParamKind::Offset,
            DropArgs => ParamKind::DropCounts,
            _ => ParamKind::None,
        }
    }

    /// For the interpreted-call bundles: how many word refs follow and
    /// whether the final call is in tail position.
    pub fn interp_parts(self) -> Option<(u8, bool)> {
        use Opcode::*;
        match self {
            Interp => Some((1, false)),
            Interp2 => Some((2, false)),
            Interp3 => Some((3, false)),
            Interp4 => Some((4, false)),
            TailInterp => Some((1, true)),
            TailInterp2 => Some((2, true)),
            TailInterp3 => Some((3, true)),
            TailInterp4 => Some((4, true)),
            _ => None,
        }
    }

    /// The interp bundle for a run of `count` calls (1-4).
    pub fn interp_for(count: u8, tail: bool) -> Opcode {
        use Opcode::*;
        match (count, tail) {
            (1, false) => Interp,
            (2, false) => Interp2,
            (3, false) => Interp3,
            (4, false) => Interp4,
            (1, true) => TailInterp,
            (2, true) => TailInterp2,
            (3, true) => TailInterp3,
            (4, true) => TailInterp4,
            _ => unreachable!("bad interp run length {count}"),
        }
    }

    /// The word's name as written in Forth source.
    pub fn forth_name(self) -> &'static str {
        use Opcode::*;
        match self {
            Interp => "_INTERP",
            Interp2 => "_INTERP2",
            Interp3 => "_INTERP3",
            Interp4 => "_INTERP4",
            TailInterp => "_TAILINTERP",
            TailInterp2 => "_TAILINTERP2",
            TailInterp3 => "_TAILINTERP3",
            TailInterp4 => "_TAILINTERP4",
            Return => "_RETURN",
            Recurse => "RECURSE",
            Call => "CALL",
            Literal => "_LITERAL",
            SmallInt => "_INT",
            Branch => "_BRANCH",
            ZBranch => "_ZBRANCH",
            IfElse => "IFELSE",
            Nop => "NOP",
            Drop => "DROP",
            Dup => "DUP",
            Over => "OVER",
            Rot => "ROT",
            RotN => "_ROTN",
            Swap => "SWAP",
            Zero => "0",
            One => "1",
            Eq => "=",
            Ne => "<>",
            EqZero => "0=",
            NeZero => "0<>",
            Ge => ">=",
            Gt => ">",
            GtZero => "0>",
            Le => "<=",
            Lt => "<",
            LtZero => "0<",
            Plus => "+",
            Minus => "-",
            Mult => "*",
            Div => "/",
            Mod => "MOD",
            Abs => "ABS",
            Max => "MAX",
            Min => "MIN",
            Null => "NULL",
            Length => "LENGTH",
            Define => "DEFINE",
            GetArg => "_GETARG",
            SetArg => "_SETARG",
            Locals => "_LOCALS",
            DropArgs => "_DROPARGS",
            Print => ".",
            Sp => "SP.",
            Nl => "NL.",
            Nlq => "NL?",
        }
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Appends encoded instructions to a byte buffer.
#[derive(Default)]
pub struct CodeWriter {
    bytes: Vec<u8>,
}

impl CodeWriter {
    pub fn new() -> Self {
        CodeWriter::default()
    }

    /// Current write position (the next instruction's address).
    pub fn pos(&self) -> usize {
        self.bytes.len()
    }

    pub fn push_op(&mut self, op: Opcode) {
        self.bytes.push(op.into());
    }

    pub fn push_offset(&mut self, offset: i16) {
        self.bytes.extend_from_slice(&offset.to_le_bytes());
    }

    pub fn push_drop_counts(&mut self, locals: u8, results: u8) {
        self.bytes.push(locals);
        self.bytes.push(results);
    }

    pub fn push_word(&mut self, word: *const Word) {
        self.bytes
            .extend_from_slice(&(word as usize).to_le_bytes());
    }

    pub fn push_value(&mut self, value: Value) {
        self.bytes.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    /// Overwrite a previously written offset (branch fixup).
    pub fn patch_offset(&mut self, at: usize, offset: i16) {
        self.bytes[at..at + 2].copy_from_slice(&offset.to_le_bytes());
    }

    pub fn finish(self) -> Box<[u8]> {
        self.bytes.into_boxed_slice()
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Decodes instructions from a byte buffer.
#[derive(Clone, Copy)]
pub struct CodeReader<'a> {
    code: &'a [u8],
    pc: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        CodeReader { code, pc: 0 }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// The whole code buffer this reader walks.
    pub fn code(&self) -> &'a [u8] {
        self.code
    }

    pub fn at_end(&self) -> bool {
        self.pc >= self.code.len()
    }

    /// Peek at the opcode under the cursor without advancing.
    pub fn peek_op(&self) -> Option<Opcode> {
        self.code
            .get(self.pc)
            .and_then(|&b| Opcode::try_from(b).ok())
    }

    pub fn read_op(&mut self) -> Opcode {
        let op = Opcode::try_from(self.code[self.pc]).expect("invalid opcode byte");
        self.pc += 1;
        op
    }

    pub fn read_offset(&mut self) -> i16 {
        let v = i16::from_le_bytes([self.code[self.pc], self.code[self.pc + 1]]);
        self.pc += 2;
        v
    }

    pub fn read_drop_counts(&mut self) -> (u8, u8) {
        let v = (self.code[self.pc], self.code[self.pc + 1]);
        self.pc += 2;
        v
    }

    pub fn read_word(&mut self) -> *const Word {
        let mut bytes = [0u8; size_of::<usize>()];
        bytes.copy_from_slice(&self.code[self.pc..self.pc + size_of::<usize>()]);
        self.pc += size_of::<usize>();
        usize::from_le_bytes(bytes) as *const Word
    }

    pub fn read_value(&mut self) -> Value {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.code[self.pc..self.pc + 8]);
        self.pc += 8;
        Value::from_bits(u64::from_le_bytes(bytes))
    }

    pub fn skip_param(&mut self, kind: ParamKind) {
        self.pc += kind.size();
    }

    /// Apply a branch offset (measured from the current cursor).
    pub fn jump(&mut self, offset: i16) {
        let target = self.pc as isize + offset as isize;
        debug_assert!(target >= 0 && target <= self.code.len() as isize);
        self.pc = target as usize;
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }
}

/// Walk a word's code, yielding every `_LITERAL` parameter. Used by the
/// garbage collector to find values embedded in instruction streams.
pub fn for_each_literal(code: &[u8], mut f: impl FnMut(Value)) {
    let mut r = CodeReader::new(code);
    while !r.at_end() {
        let op = r.read_op();
        if op == Opcode::Literal {
            f(r.read_value());
        } else {
            r.skip_param(op.param_kind());
        }
        if op == Opcode::Return {
            break;
        }
    }
}
