//! The Compiler
//!
//! Assembles an interpreted word from an ordered list of word
//! references. The list is an arena of [`SourceWord`] entries whose
//! last element is always a `NOP` placeholder, so "the current end" has
//! a stable index that branches can target before the code that follows
//! exists. Finalization replaces the placeholder with `_RETURN`, runs
//! the stack checker, and assembles bytes — packing runs of up to four
//! consecutive interpreted calls into one `_INTERP*`/`_TAILINTERP*`
//! instruction and resolving branch offsets.

use tails_core::effect::StackEffect;
use tails_core::error::{CompileError, Result};
use tails_core::instruction::{CodeWriter, Opcode, ParamKind};
use tails_core::value::Value;
use tails_core::word::{Word, WordFlags};
use tails_core::{TypeSet, core_word};

use crate::checker::{self, EffectStack};

/// An instruction parameter, in compiler form (branch offsets live as
/// entry indices until assembly).
#[derive(Debug, Clone, Copy)]
pub enum Param {
    None,
    /// Branch offset, small int, arg/local offset, locals count, or
    /// rotate distance.
    Offset(i32),
    /// `_DROPARGS`: locals to drop, results to keep.
    Drop(u8, u8),
    /// `_LITERAL`: the value to push.
    Literal(Value),
}

/// A reference to a word plus its parameter, the unit the parsers feed
/// the compiler.
#[derive(Debug, Clone, Copy)]
pub struct WordRef {
    pub word: *const Word,
    pub param: Param,
}

impl WordRef {
    /// A parameterless native word.
    pub fn of(op: Opcode) -> WordRef {
        debug_assert_eq!(op.param_kind(), ParamKind::None);
        WordRef {
            word: core_word(op),
            param: Param::None,
        }
    }

    /// A native word with an offset-shaped parameter.
    pub fn with_offset(op: Opcode, offset: i32) -> WordRef {
        WordRef {
            word: core_word(op),
            param: Param::Offset(offset),
        }
    }

    /// A `_LITERAL` pushing `value`.
    pub fn literal(value: Value) -> WordRef {
        WordRef {
            word: core_word(Opcode::Literal),
            param: Param::Literal(value),
        }
    }

    /// A `_DROPARGS` frame teardown.
    pub fn drop_args(locals: u8, results: u8) -> WordRef {
        WordRef {
            word: core_word(Opcode::DropArgs),
            param: Param::Drop(locals, results),
        }
    }

    /// A call to a word by address (native or interpreted).
    pub fn word(word: *const Word) -> WordRef {
        WordRef {
            word,
            param: Param::None,
        }
    }

    pub(crate) fn word_ref(&self) -> &Word {
        // Words are owned by the core table, a vocabulary, or a rooted
        // quote; all outlive the compilation that references them.
        unsafe { &*self.word }
    }
}

/// A [`WordRef`] plus the compiler's bookkeeping.
pub(crate) struct SourceWord {
    pub word: *const Word,
    pub param: Param,
    /// Byte offset of the token this entry came from.
    pub source_pos: Option<usize>,
    /// Index of the entry a `_BRANCH`/`_ZBRANCH` jumps to.
    pub branch_to: Option<usize>,
    /// Some other entry branches here; constrains run packing.
    pub is_branch_target: bool,
    /// Stack memoized by the checker at control-flow joins.
    pub known_stack: Option<EffectStack>,
    /// Original `_GETARG`/`_SETARG` offset, kept so the checker's
    /// renormalization stays stable when an entry is walked again.
    pub raw_offset: Option<i32>,
    /// Byte address, assigned during assembly.
    pub pc: usize,
}

impl SourceWord {
    fn new(r: WordRef, source_pos: Option<usize>) -> SourceWord {
        SourceWord {
            word: r.word,
            param: r.param,
            source_pos,
            branch_to: None,
            is_branch_target: false,
            known_stack: None,
            raw_offset: None,
            pc: 0,
        }
    }

    pub(crate) fn word_ref(&self) -> &Word {
        unsafe { &*self.word }
    }

    pub(crate) fn opcode(&self) -> Option<Opcode> {
        self.word_ref().opcode()
    }

    fn is_interp_call(&self) -> bool {
        !self.word_ref().is_native()
    }
}

/// Position of an entry in the compiler's arena, stable across later
/// additions (entries are never removed or reordered).
pub type InstructionPos = usize;

pub struct Compiler {
    name: Option<String>,
    flags: WordFlags,
    pub(crate) entries: Vec<SourceWord>,
    pub(crate) effect: StackEffect,
    pub(crate) can_add_inputs: bool,
    pub(crate) can_add_outputs: bool,
    /// Whether output *types* may widen at joins after the output count
    /// is fixed (false once an exact effect is declared).
    pub(crate) can_add_output_types: bool,
    control_stack: Vec<(char, InstructionPos)>,
    locals_entry: Option<InstructionPos>,
    n_locals: u16,
    /// Source offset of the token being compiled, for error locations.
    pub(crate) cur_pos: Option<usize>,
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler {
            name: None,
            flags: WordFlags::empty(),
            entries: vec![SourceWord::new(WordRef::of(Opcode::Nop), None)],
            effect: StackEffect::new(),
            can_add_inputs: true,
            can_add_outputs: true,
            can_add_output_types: true,
            control_stack: Vec::new(),
            locals_entry: None,
            n_locals: 0,
            cur_pos: None,
        }
    }

    pub fn named(name: &str) -> Compiler {
        let mut c = Compiler::new();
        c.name = Some(name.to_string());
        c
    }

    /// Declare the word's stack effect. The checker verifies the body
    /// against it exactly.
    pub fn set_stack_effect(&mut self, effect: StackEffect) {
        self.effect = effect;
        self.can_add_inputs = false;
        self.can_add_outputs = false;
        self.can_add_output_types = false;
    }

    /// Declare the inputs from an actual stack (REPL lines): the body
    /// may consume at most these, and leaves whatever outputs it likes.
    pub fn set_input_stack(&mut self, values: &[Value]) {
        let mut effect = StackEffect::new();
        for v in values {
            effect.add_input(TypeSet::from_type(v.value_type()));
        }
        self.effect = effect;
        self.can_add_inputs = false;
        self.can_add_outputs = true;
    }

    pub fn set_inline(&mut self) {
        self.flags |= WordFlags::INLINE;
    }

    pub fn flags(&self) -> WordFlags {
        self.flags
    }

    /// The effect as declared so far (used by `RECURSE`).
    pub fn declared_effect(&self) -> &StackEffect {
        &self.effect
    }

    pub fn has_declared_effect(&self) -> bool {
        !self.can_add_inputs && !self.can_add_outputs
    }

    // =========================================================================
    // Adding words
    // =========================================================================

    /// Append an entry, returning its stable position.
    pub fn add(&mut self, r: WordRef, source_pos: Option<usize>) -> InstructionPos {
        // Overwrite the placeholder, then append a fresh one so the
        // "current end" keeps a stable index for branch fixups.
        let pos = self.entries.len() - 1;
        let target_flag = self.entries[pos].is_branch_target;
        self.entries[pos] = SourceWord::new(r, source_pos);
        self.entries[pos].is_branch_target = target_flag;
        self.entries
            .push(SourceWord::new(WordRef::of(Opcode::Nop), None));
        pos
    }

    pub fn add_literal(&mut self, value: Value, source_pos: Option<usize>) -> InstructionPos {
        self.add(WordRef::literal(value), source_pos)
    }

    /// Append a call to `word`, or splice its body if it is flagged
    /// inline. Inlining is refused for words that manage a locals frame;
    /// those opcodes must stay with their owning word.
    pub fn add_inline(&mut self, word: *const Word, source_pos: Option<usize>) -> Result<()> {
        let w = unsafe { &*word };
        if !w.is_inline() || w.is_native() {
            self.add(WordRef::word(word), source_pos);
            return Ok(());
        }
        let refs = crate::disassembler::disassemble(w.code().expect("interp body"))?;
        for (_, r) in &refs {
            if let Some(op) = unsafe { (*r.word).opcode() } {
                if matches!(
                    op,
                    Opcode::Locals | Opcode::DropArgs | Opcode::GetArg | Opcode::SetArg
                ) {
                    return Err(CompileError {
                        message: format!("can't inline `{w}`: it has local variables"),
                        location: source_pos,
                    });
                }
            }
        }
        self.add_refs(&refs, source_pos)
    }

    /// Splice disassembled references, reconstructing branch targets
    /// from their byte addresses. A trailing `_RETURN` reference is not
    /// added itself; branches to it land on the current placeholder.
    pub(crate) fn add_refs(
        &mut self,
        refs: &[(usize, WordRef)],
        source_pos: Option<usize>,
    ) -> Result<()> {
        let mut refs = refs;
        let mut end_pc = None;
        if let Some((pc, last)) = refs.last() {
            if last.word_ref().opcode() == Some(Opcode::Return) {
                end_pc = Some(*pc);
                refs = &refs[..refs.len() - 1];
            }
        }
        let end_pc =
            end_pc.unwrap_or_else(|| refs.last().map(|(pc, r)| pc + ref_size(r)).unwrap_or(0));

        let base = self.entries.len() - 1;
        let mut pcs = Vec::with_capacity(refs.len());
        for (pc, r) in refs {
            pcs.push(*pc);
            self.add(*r, source_pos);
        }
        for (i, (pc, r)) in refs.iter().enumerate() {
            let op = unsafe { (*r.word).opcode() };
            if matches!(op, Some(Opcode::Branch | Opcode::ZBranch)) {
                let Param::Offset(off) = r.param else {
                    return Err(CompileError::new("branch reference without an offset"));
                };
                let target_pc = (pc + 3) as i64 + off as i64;
                let target = if target_pc == end_pc as i64 {
                    self.entries.len() - 1
                } else {
                    base + pcs
                        .iter()
                        .position(|&p| p as i64 == target_pc)
                        .ok_or_else(|| CompileError::new("branch lands between instructions"))?
                };
                self.entries[base + i].branch_to = Some(target);
                self.entries[target].is_branch_target = true;
            }
        }
        Ok(())
    }

    /// Append an unconditional branch back to an earlier position.
    pub fn add_branch_back_to(&mut self, pos: InstructionPos) {
        let src = self.add(WordRef::with_offset(Opcode::Branch, -1), self.cur_pos);
        self.entries[src].branch_to = Some(pos);
        self.entries[pos].is_branch_target = true;
    }

    /// Point a pending branch at the next instruction to be written.
    pub fn fix_branch(&mut self, src: InstructionPos) {
        let end = self.entries.len() - 1;
        self.entries[src].branch_to = Some(end);
        self.entries[end].is_branch_target = true;
    }

    /// Append a recursive call to the word being compiled.
    pub fn add_recurse(&mut self) {
        self.add(WordRef::of(Opcode::Recurse), self.cur_pos);
    }

    pub fn add_get_arg(&mut self, offset: i32, source_pos: Option<usize>) {
        self.add(WordRef::with_offset(Opcode::GetArg, offset), source_pos);
    }

    pub fn add_set_arg(&mut self, offset: i32, source_pos: Option<usize>) {
        self.add(WordRef::with_offset(Opcode::SetArg, offset), source_pos);
    }

    /// Start a locals frame: a `_LOCALS 0` prologue whose count grows as
    /// locals are reserved. Emitted as nothing if it stays zero.
    pub fn begin_frame(&mut self) {
        debug_assert!(self.locals_entry.is_none());
        self.locals_entry = Some(self.add(WordRef::with_offset(Opcode::Locals, 0), None));
    }

    /// Reserve a local slot; returns its positive offset id.
    pub fn reserve_local_variable(&mut self) -> Result<i32> {
        let entry = self.locals_entry.ok_or_else(|| {
            CompileError::new("local variables need a frame (compiler bug)")
        })?;
        self.n_locals += 1;
        self.entries[entry].param = Param::Offset(self.n_locals as i32);
        Ok(self.n_locals as i32)
    }

    pub fn locals_count(&self) -> u16 {
        self.n_locals
    }

    // =========================================================================
    // Control-flow stack (for the postfix parser)
    // =========================================================================

    /// Push a pending control-flow target, optionally emitting a branch
    /// instruction with its destination yet to be fixed.
    pub fn push_branch(&mut self, kind: char, branch: Option<Opcode>) {
        let pos = match branch {
            Some(op) => self.add(WordRef::with_offset(op, -1), self.cur_pos),
            None => {
                // Points at the next word to be added.
                let end = self.entries.len() - 1;
                self.entries[end].is_branch_target = true;
                end
            }
        };
        self.control_stack.push((kind, pos));
    }

    /// True if the top pending control-flow target has the given kind.
    pub fn control_top_is(&self, kind: char) -> bool {
        self.control_stack.last().is_some_and(|&(k, _)| k == kind)
    }

    /// Pop the control-flow stack, requiring one of `matching` kinds.
    pub fn pop_branch(&mut self, matching: &str) -> Result<InstructionPos> {
        if let Some(&(kind, pos)) = self.control_stack.last() {
            if matching.contains(kind) {
                self.control_stack.pop();
                return Ok(pos);
            }
        }
        Err(CompileError {
            message: "no matching IF or WHILE".into(),
            location: self.cur_pos,
        })
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    /// Finish the word: terminate with `_RETURN`, run the stack checker,
    /// and assemble bytecode. The compiler is consumed.
    pub fn finish(mut self) -> Result<Word> {
        if !self.control_stack.is_empty() {
            return Err(CompileError {
                message: "unfinished IF-ELSE-THEN or BEGIN-WHILE-REPEAT".into(),
                location: self.cur_pos,
            });
        }
        // The placeholder becomes the RETURN.
        let end = self.entries.len() - 1;
        debug_assert_eq!(self.entries[end].opcode(), Some(Opcode::Nop));
        let keep_target = self.entries[end].is_branch_target;
        self.entries[end] = SourceWord::new(WordRef::of(Opcode::Return), None);
        self.entries[end].is_branch_target = keep_target;

        checker::compute_effect(&mut self)?;

        // Tail-call candidate: an interpreted call just before RETURN.
        let tail_candidate = (self.entries.len() >= 2)
            .then(|| self.entries.len() - 2)
            .filter(|&i| self.entries[i].is_interp_call());

        let code = self.assemble(tail_candidate)?;
        tracing::debug!(
            name = self.name.as_deref().unwrap_or("<anon>"),
            effect = %self.effect,
            bytes = code.len(),
            "compiled word"
        );
        Ok(Word::interp(self.name, self.effect, code, self.flags))
    }

    /// Build an anonymous word from a plain list of references (used by
    /// tests and the disassembler round-trip).
    pub fn compile(refs: &[(usize, WordRef)]) -> Result<Word> {
        let mut c = Compiler::new();
        c.add_refs(refs, None)?;
        c.finish()
    }

    fn assemble(&mut self, tail_candidate: Option<usize>) -> Result<Box<[u8]>> {
        let n = self.entries.len();

        // Pass 1: group interpreted calls into runs and assign byte
        // addresses. A run never extends over a branch target, so every
        // branch lands on an opcode boundary.
        let mut run_len = vec![0u8; n];
        let mut pc = 0usize;
        let mut i = 0;
        while i < n {
            if self.entries[i].is_interp_call() {
                let mut len = 1usize;
                while len < 4
                    && i + len < n
                    && self.entries[i + len].is_interp_call()
                    && !self.entries[i + len].is_branch_target
                {
                    len += 1;
                }
                run_len[i] = len as u8;
                self.entries[i].pc = pc;
                pc += 1; // the _INTERPn opcode
                for k in 0..len {
                    if k > 0 {
                        self.entries[i + k].pc = pc;
                    }
                    pc += size_of::<usize>();
                }
                i += len;
            } else {
                self.entries[i].pc = pc;
                pc += self.entry_size(i);
                i += 1;
            }
        }

        // Pass 2: emit.
        let mut w = CodeWriter::new();
        let mut param_at = vec![0usize; n];
        let mut i = 0;
        while i < n {
            let len = run_len[i];
            if len > 0 {
                let tail = tail_candidate == Some(i + len as usize - 1);
                w.push_op(Opcode::interp_for(len, tail));
                for k in 0..len as usize {
                    w.push_word(self.entries[i + k].word);
                }
                i += len as usize;
                continue;
            }
            let e = &self.entries[i];
            let op = e.opcode().expect("native entry");
            match (op, e.param) {
                (Opcode::Locals, Param::Offset(0)) => {} // empty frame
                (Opcode::Literal, Param::Literal(v)) => {
                    if let Some(small) = small_int(v) {
                        w.push_op(Opcode::SmallInt);
                        w.push_offset(small);
                    } else {
                        w.push_op(Opcode::Literal);
                        w.push_value(v);
                    }
                }
                (_, Param::None) => w.push_op(op),
                (_, Param::Offset(off)) => {
                    w.push_op(op);
                    param_at[i] = w.pos();
                    let off = i16::try_from(off).map_err(|_| CompileError {
                        message: "instruction parameter out of range".into(),
                        location: e.source_pos,
                    })?;
                    w.push_offset(off);
                }
                (_, Param::Drop(locals, results)) => {
                    w.push_op(op);
                    w.push_drop_counts(locals, results);
                }
                (_, Param::Literal(_)) => unreachable!("literal param on {op:?}"),
            }
            i += 1;
        }

        // Pass 3: resolve branches.
        for i in 0..n {
            if let Some(dest) = self.entries[i].branch_to {
                let after_param = self.entries[i].pc + 3;
                let delta = self.entries[dest].pc as i64 - after_param as i64;
                let delta = i16::try_from(delta).map_err(|_| CompileError {
                    message: "branch offset too large".into(),
                    location: self.entries[i].source_pos,
                })?;
                w.patch_offset(param_at[i], delta);
            }
        }
        Ok(w.finish())
    }

    /// Encoded size of a non-run entry.
    fn entry_size(&self, i: usize) -> usize {
        let e = &self.entries[i];
        let op = e.opcode().expect("native entry");
        match (op, e.param) {
            (Opcode::Locals, Param::Offset(0)) => 0,
            (Opcode::Literal, Param::Literal(v)) => {
                if small_int(v).is_some() {
                    1 + 2
                } else {
                    1 + 8
                }
            }
            (_, Param::None) => 1,
            _ => 1 + 2,
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

/// Encoded size of a disassembled reference (for pc arithmetic).
fn ref_size(r: &WordRef) -> usize {
    let w = unsafe { &*r.word };
    match w.opcode() {
        Some(op) => 1 + op.param_kind().size(),
        None => size_of::<usize>(), // one slot of an interp run
    }
}

/// A literal emitted compactly as `_INT` when it is an integral double
/// in `i16` range.
fn small_int(v: Value) -> Option<i16> {
    let n = v.as_number()?;
    if n == n.trunc() && (f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&n) {
        Some(n as i16)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tails_core::{DataStack, run};

    fn run_new(word: &Word, inputs: &[f64]) -> Vec<Value> {
        let mut stack = DataStack::new();
        for &n in inputs {
            stack.push(Value::number(n));
        }
        run(word, &mut stack).unwrap();
        stack.values().to_vec()
    }

    #[test]
    fn test_straight_line_compile_and_run() {
        let mut c = Compiler::new();
        c.add_literal(Value::number(3.0), None);
        c.add_literal(Value::number(4.0), None);
        c.add(WordRef::of(Opcode::Plus), None);
        c.add(WordRef::of(Opcode::Dup), None);
        c.add(WordRef::of(Opcode::Mult), None);
        let word = c.finish().unwrap();
        assert_eq!(word.effect().to_string(), "-- #");
        assert_eq!(run_new(&word, &[]), vec![Value::number(49.0)]);
    }

    #[test]
    fn test_small_literals_are_compact() {
        let mut c = Compiler::new();
        c.add_literal(Value::number(7.0), None);
        let word = c.finish().unwrap();
        // _INT(2 bytes param) + _RETURN
        assert_eq!(word.code().unwrap().len(), 4);

        let mut c = Compiler::new();
        c.add_literal(Value::number(0.5), None);
        let word = c.finish().unwrap();
        // _LITERAL(8 bytes param) + _RETURN
        assert_eq!(word.code().unwrap().len(), 10);
    }

    #[test]
    fn test_interp_runs_are_packed() {
        // Define four tiny interpreted words and call them in a row.
        let incr = {
            let mut c = Compiler::new();
            c.add(WordRef::of(Opcode::One), None);
            c.add(WordRef::of(Opcode::Plus), None);
            c.finish().unwrap()
        };
        let incr_ptr = tails_core::vocabulary::define(incr.with_name("INCR"));

        let mut c = Compiler::new();
        c.add_literal(Value::number(0.0), None);
        for _ in 0..5 {
            c.add(WordRef::word(incr_ptr), None);
        }
        let word = c.finish().unwrap();
        // _INT n + _INTERP4 w w w w + _TAILINTERP w + _RETURN
        let expected = 3 + (1 + 4 * size_of::<usize>()) + (1 + size_of::<usize>()) + 1;
        assert_eq!(word.code().unwrap().len(), expected);
        assert_eq!(run_new(&word, &[]), vec![Value::number(5.0)]);
    }

    #[test]
    fn test_branch_resolution() {
        // IF-like: cond ZBRANCH else; 10; BRANCH end; else: 20; end.
        let mut c = Compiler::new();
        let zb = c.add(WordRef::with_offset(Opcode::ZBranch, -1), None);
        c.add_literal(Value::number(10.0), None);
        let br = c.add(WordRef::with_offset(Opcode::Branch, -1), None);
        c.fix_branch(zb);
        c.add_literal(Value::number(20.0), None);
        c.fix_branch(br);
        let word = c.finish().unwrap();
        assert_eq!(run_new(&word, &[1.0]), vec![Value::number(10.0)]);
        assert_eq!(run_new(&word, &[0.0]), vec![Value::number(20.0)]);
    }

    #[test]
    fn test_loop_via_branch_back() {
        // 5 BEGIN DUP WHILE 1 - REPEAT DROP -> empty
        let mut c = Compiler::new();
        c.add_literal(Value::number(5.0), None);
        c.push_branch('b', None);
        c.add(WordRef::of(Opcode::Dup), None);
        c.push_branch('w', Some(Opcode::ZBranch));
        c.add(WordRef::of(Opcode::One), None);
        c.add(WordRef::of(Opcode::Minus), None);
        let while_pos = c.pop_branch("w").unwrap();
        let begin_pos = c.pop_branch("b").unwrap();
        c.add_branch_back_to(begin_pos);
        c.fix_branch(while_pos);
        c.add(WordRef::of(Opcode::Drop), None);
        let word = c.finish().unwrap();
        assert_eq!(run_new(&word, &[]), Vec::<Value>::new());
    }

    #[test]
    fn test_inline_words_are_spliced() {
        let incr = {
            let mut c = Compiler::new();
            c.set_inline();
            c.add(WordRef::of(Opcode::One), None);
            c.add(WordRef::of(Opcode::Plus), None);
            c.finish().unwrap()
        };
        assert!(incr.is_inline());
        let ptr = tails_core::vocabulary::define(incr.with_name("INCR"));

        let mut c = Compiler::new();
        c.add_literal(Value::number(5.0), None);
        c.add_inline(ptr, None).unwrap();
        let word = c.finish().unwrap();
        // _INT 5, ONE, PLUS, _RETURN: the body was spliced, not called.
        assert_eq!(word.code().unwrap().len(), 6);
        assert_eq!(run_new(&word, &[]), vec![Value::number(6.0)]);
    }

    #[test]
    fn test_unbalanced_control_errors() {
        let mut c = Compiler::new();
        c.push_branch('i', Some(Opcode::ZBranch));
        assert!(c.finish().is_err());

        let mut c = Compiler::new();
        assert!(c.pop_branch("i").is_err());
    }
}
