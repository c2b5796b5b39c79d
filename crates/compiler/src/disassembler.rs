//! Disassembler
//!
//! Reads a compiled byte stream back into the [`WordRef`] form the
//! compiler consumes, resolving `_INTERP*` bundles into their member
//! calls. Each reference carries the byte address of an opcode
//! boundary, so branch targets can be reconstructed when re-adding the
//! references (inlining, or the round-trip property test).

use tails_core::error::{CompileError, Result};
use tails_core::instruction::{CodeReader, Opcode, ParamKind};
use tails_core::value::Value;

use crate::compiler::WordRef;

/// Disassemble a word body into `(byte address, reference)` pairs,
/// ending with the `_RETURN`.
pub fn disassemble(code: &[u8]) -> Result<Vec<(usize, WordRef)>> {
    let mut refs = Vec::new();
    let mut r = CodeReader::new(code);
    while !r.at_end() {
        let pc = r.pc();
        let Some(op) = r.peek_op() else {
            return Err(CompileError::new(format!(
                "unknown instruction byte at {pc}"
            )));
        };
        r.read_op();
        if let Some((n, _tail)) = op.interp_parts() {
            // The first member stands for the bundle's opcode boundary.
            for k in 0..n {
                let slot_pc = r.pc();
                let word = r.read_word();
                refs.push((if k == 0 { pc } else { slot_pc }, WordRef::word(word)));
            }
            continue;
        }
        match op.param_kind() {
            ParamKind::None => refs.push((pc, WordRef::of(op))),
            ParamKind::Offset => {
                let off = r.read_offset();
                if op == Opcode::SmallInt {
                    refs.push((pc, WordRef::literal(Value::number(off as f64))));
                } else {
                    refs.push((pc, WordRef::with_offset(op, off as i32)));
                }
            }
            ParamKind::DropCounts => {
                let (locals, results) = r.read_drop_counts();
                refs.push((pc, WordRef::drop_args(locals, results)));
            }
            ParamKind::Literal => {
                let v = r.read_value();
                refs.push((pc, WordRef::literal(v)));
            }
            ParamKind::Words(_) => unreachable!("handled above"),
        }
        if op == Opcode::Return {
            break;
        }
    }
    if !matches!(refs.last(), Some((_, r)) if r.word_ref().opcode() == Some(Opcode::Return)) {
        return Err(CompileError::new("code does not end in _RETURN"));
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use tails_core::{DataStack, run};

    #[test]
    fn test_roundtrip_straight_line() {
        let mut c = Compiler::new();
        c.add_literal(Value::number(6.0), None);
        c.add_literal(Value::number(7.0), None);
        c.add(WordRef::of(Opcode::Mult), None);
        let word = c.finish().unwrap();

        let refs = disassemble(word.code().unwrap()).unwrap();
        let recompiled = Compiler::compile(&refs).unwrap();

        let mut stack = DataStack::new();
        run(&recompiled, &mut stack).unwrap();
        assert_eq!(stack.values(), &[Value::number(42.0)]);
        assert_eq!(recompiled.effect().to_string(), word.effect().to_string());
    }

    #[test]
    fn test_roundtrip_with_branches() {
        // cond IF 123 ELSE 666 THEN
        let mut c = Compiler::new();
        let zb = c.add(WordRef::with_offset(Opcode::ZBranch, -1), None);
        c.add_literal(Value::number(123.0), None);
        let br = c.add(WordRef::with_offset(Opcode::Branch, -1), None);
        c.fix_branch(zb);
        c.add_literal(Value::number(666.0), None);
        c.fix_branch(br);
        let word = c.finish().unwrap();

        let refs = disassemble(word.code().unwrap()).unwrap();
        let recompiled = Compiler::compile(&refs).unwrap();

        for (input, expected) in [(1.0, 123.0), (0.0, 666.0)] {
            for w in [&word, &recompiled] {
                let mut stack = DataStack::new();
                stack.push(Value::number(input));
                run(w, &mut stack).unwrap();
                assert_eq!(stack.values(), &[Value::number(expected)], "input {input}");
            }
        }
    }

    #[test]
    fn test_disassemble_resolves_interp_members() {
        let helper = {
            let mut c = Compiler::new();
            c.add(WordRef::of(Opcode::Dup), None);
            c.add(WordRef::of(Opcode::Plus), None);
            c.finish().unwrap()
        };
        let helper_ptr = tails_core::vocabulary::define(helper.with_name("DBL"));

        let mut c = Compiler::new();
        c.add(WordRef::word(helper_ptr), None);
        c.add(WordRef::word(helper_ptr), None);
        let word = c.finish().unwrap();

        let refs = disassemble(word.code().unwrap()).unwrap();
        // Two member calls plus the _RETURN.
        assert_eq!(refs.len(), 3);
        assert!(std::ptr::eq(refs[0].1.word, helper_ptr));
        assert!(std::ptr::eq(refs[1].1.word, helper_ptr));
    }
}
