//! The Threaded Interpreter
//!
//! Executes compiled bytecode against a [`DataStack`]. Rust offers no
//! guaranteed tail calls, so instead of ending every primitive with a
//! jump into a dispatch routine, [`execute`] is a trampoline: one loop
//! that decodes the next opcode and branches through a jump table (the
//! `match`). Nested interpreted calls (`_INTERP*`) recurse on the host
//! stack; `_TAILINTERP*` and tail `_RECURSE` replace the running frame
//! in place, so leaf loops and tail recursion run in constant host
//! stack.
//!
//! Handlers assume the stack checker has validated the code: underflow
//! and type confusion are `debug_assert`s, not recoverable errors.
//! Arithmetic on ill-typed operands lands on null per the value rules.

use std::cell::Cell;
use std::io::Write;

use crate::error::{CompileError, Result};
use crate::instruction::{CodeReader, Opcode};
use crate::stack::DataStack;
use crate::value::Value;
use crate::vocabulary;
use crate::word::Word;

/// Run an interpreted word. The stack must already hold the word's
/// declared inputs.
pub fn run(word: &Word, stack: &mut DataStack) -> Result<()> {
    let code = word
        .code()
        .ok_or_else(|| CompileError::new("can't run a native word directly"))?;
    let effect = word.effect();
    if !effect.is_weird() {
        if effect.input_count() > stack.len() {
            return Err(CompileError::new("stack would underflow"));
        }
        if !effect.is_unbounded() {
            stack.reserve(effect.max() as usize);
        }
    }
    tracing::trace!(word = %word, depth = stack.len(), "run");
    unsafe { execute(code, stack) };
    Ok(())
}

/// Borrow a word's body through a raw pointer. Words are owned by the
/// vocabulary stack, the core table, or a heap cell that cannot be
/// swept mid-run, so the body outlives the execution that entered it.
unsafe fn word_code<'a>(word: *const Word) -> &'a [u8] {
    unsafe { (*word).code().expect("interp of a native word") }
}

unsafe fn execute(code: &[u8], stack: &mut DataStack) {
    let mut r = CodeReader::new(code);
    loop {
        let op = r.read_op();
        match op {
            // ---- Call / dispatch
            Opcode::Interp | Opcode::Interp2 | Opcode::Interp3 | Opcode::Interp4 => {
                let (n, _) = op.interp_parts().unwrap();
                for _ in 0..n {
                    let callee = r.read_word();
                    unsafe { execute(word_code(callee), stack) };
                }
            }
            Opcode::TailInterp
            | Opcode::TailInterp2
            | Opcode::TailInterp3
            | Opcode::TailInterp4 => {
                let (n, _) = op.interp_parts().unwrap();
                for _ in 0..n - 1 {
                    let callee = r.read_word();
                    unsafe { execute(word_code(callee), stack) };
                }
                // The final call reuses this frame.
                let callee = r.read_word();
                r = CodeReader::new(unsafe { word_code(callee) });
            }
            Opcode::Return => return,
            Opcode::Recurse => {
                if r.peek_op() == Some(Opcode::Return) {
                    r.set_pc(0); // tail recursion: restart in place
                } else {
                    unsafe { execute(r.code(), stack) };
                }
            }
            Opcode::Call => {
                let q = stack.pop();
                let word = q.as_quote().expect("CALL of a non-quote");
                unsafe { execute(word.code().expect("quote body"), stack) };
            }
            Opcode::IfElse => {
                let otherwise = stack.pop();
                let then = stack.pop();
                let cond = stack.pop();
                let chosen = if cond.truthy() { then } else { otherwise };
                let word = chosen.as_quote().expect("IFELSE of a non-quote");
                unsafe { execute(word.code().expect("quote body"), stack) };
            }

            // ---- Literals
            Opcode::Literal => {
                let v = r.read_value();
                stack.push(v);
            }
            Opcode::SmallInt => {
                let n = r.read_offset();
                stack.push(Value::number(n as f64));
            }

            // ---- Control
            Opcode::Branch => {
                let off = r.read_offset();
                r.jump(off);
            }
            Opcode::ZBranch => {
                let off = r.read_offset();
                if !stack.pop().truthy() {
                    r.jump(off);
                }
            }

            // ---- Stack gymnastics
            Opcode::Nop => {}
            Opcode::Drop => {
                stack.pop();
            }
            Opcode::Dup => stack.push(stack.top()),
            Opcode::Over => stack.push(stack.peek(1)),
            Opcode::Rot => stack.rotate(2),
            Opcode::RotN => {
                let n = r.read_offset();
                stack.rotate(n as i32);
            }
            Opcode::Swap => {
                let top = stack.top();
                let below = stack.peek(1);
                stack.set(0, below);
                stack.set(1, top);
            }

            // ---- Constants
            Opcode::Zero => stack.push(Value::number(0.0)),
            Opcode::One => stack.push(Value::number(1.0)),

            // ---- Comparison & arithmetic
            Opcode::Eq => stack.binary(|a, b| bool_value(a == b)),
            Opcode::Ne => stack.binary(|a, b| bool_value(a != b)),
            Opcode::EqZero => {
                let v = stack.top();
                stack.set(0, bool_value(v == Value::number(0.0)));
            }
            Opcode::NeZero => {
                let v = stack.top();
                stack.set(0, bool_value(v != Value::number(0.0)));
            }
            Opcode::Ge => stack.binary(|a, b| bool_value(a.cmp_value(b).is_ge())),
            Opcode::Gt => stack.binary(|a, b| bool_value(a.cmp_value(b).is_gt())),
            Opcode::Le => stack.binary(|a, b| bool_value(a.cmp_value(b).is_le())),
            Opcode::Lt => stack.binary(|a, b| bool_value(a.cmp_value(b).is_lt())),
            Opcode::GtZero => {
                let v = stack.top();
                stack.set(0, bool_value(v.cmp_value(&Value::number(0.0)).is_gt()));
            }
            Opcode::LtZero => {
                let v = stack.top();
                stack.set(0, bool_value(v.cmp_value(&Value::number(0.0)).is_lt()));
            }
            Opcode::Plus => stack.binary(|a, b| a.add(b)),
            Opcode::Minus => stack.binary(|a, b| a.sub(b)),
            Opcode::Mult => stack.binary(|a, b| a.mul(b)),
            Opcode::Div => stack.binary(|a, b| a.div(b)),
            Opcode::Mod => stack.binary(|a, b| a.rem(b)),
            Opcode::Abs => {
                let v = stack.top();
                let out = match v.as_number() {
                    Some(n) => Value::number(n.abs()),
                    None => Value::NULL,
                };
                stack.set(0, out);
            }
            Opcode::Max => stack.binary(numeric_max),
            Opcode::Min => stack.binary(numeric_min),

            // ---- Value queries
            Opcode::Null => stack.push(Value::NULL),
            Opcode::Length => {
                let v = stack.top();
                stack.set(0, v.length());
            }

            // ---- Definitions
            Opcode::Define => {
                let name = stack.pop();
                let quote = stack.pop();
                let name = name.as_str().expect("DEFINE needs a name string");
                let word = quote.as_quote().expect("DEFINE needs a quotation");
                let named = word.with_name(name);
                tracing::debug!(name, effect = %named.effect(), "define");
                vocabulary::define(named);
            }

            // ---- Locals
            Opcode::GetArg => {
                let off = r.read_offset();
                debug_assert!(off <= 0);
                stack.push(stack.peek(-off as usize));
            }
            Opcode::SetArg => {
                let off = r.read_offset();
                debug_assert!(off < 0);
                let v = stack.top();
                stack.set(-off as usize, v);
                stack.pop();
            }
            Opcode::Locals => {
                let n = r.read_offset();
                for _ in 0..n {
                    stack.push(Value::NULL);
                }
            }
            Opcode::DropArgs => {
                let (locals, results) = r.read_drop_counts();
                stack.drop_under(results as usize, locals as usize);
            }

            // ---- I/O
            Opcode::Print => {
                print!("{}", stack.pop());
                AT_LEFT_MARGIN.set(false);
            }
            Opcode::Sp => {
                print!(" ");
                AT_LEFT_MARGIN.set(false);
            }
            Opcode::Nl => {
                println!();
                AT_LEFT_MARGIN.set(true);
            }
            Opcode::Nlq => end_line(),
        }
    }
}

#[inline]
fn bool_value(b: bool) -> Value {
    Value::number(if b { 1.0 } else { 0.0 })
}

fn numeric_max(a: &Value, b: &Value) -> Value {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => Value::number(x.max(y)),
        _ => Value::NULL,
    }
}

fn numeric_min(a: &Value, b: &Value) -> Value {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => Value::number(x.min(y)),
        _ => Value::NULL,
    }
}

thread_local! {
    /// Whether standard output sits at the start of a line.
    static AT_LEFT_MARGIN: Cell<bool> = const { Cell::new(true) };
}

/// Emit a newline only if output is mid-line (the `NL?` word; also used
/// by the REPL before printing the stack).
pub fn end_line() {
    if !AT_LEFT_MARGIN.get() {
        println!();
        AT_LEFT_MARGIN.set(true);
    }
    let _ = std::io::stdout().flush();
}
