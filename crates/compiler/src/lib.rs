//! Tails Compiler
//!
//! Turns source text into runnable words: two front ends (classical
//! postfix syntax and the infix "Smol" syntax) feed a shared
//! [`Compiler`], whose output is verified by the symbolic stack checker
//! before bytes are assembled. A word that compiles is stack-safe: it
//! cannot underflow, leave an inconsistent depth, or apply an operation
//! to a type the checker couldn't prove acceptable.
//!
//! The usual entry points are [`eval`] and [`eval_smol`], which compile
//! one source line against the current data stack and run it.

pub mod checker;
pub mod compiler;
pub mod disassembler;
pub mod forth;
pub mod smol;
pub mod symbol;
pub mod tokenizer;

pub use compiler::{Compiler, InstructionPos, Param, WordRef};
pub use disassembler::disassemble;
pub use forth::compile_forth;
pub use smol::compile_smol;

use tails_core::error::Result;
use tails_core::{DataStack, run};

/// Compile a line of postfix source against the current stack and run
/// it. The stack's contents become the line's declared inputs.
pub fn eval(source: &str, stack: &mut DataStack) -> Result<()> {
    let word = compile_forth(source, stack.values())?;
    tracing::debug!(effect = %word.effect(), "eval");
    run(&word, stack)
}

/// Compile a line of infix (Smol) source and run it. A leading
/// `( … -- … )` signature makes the line consume stack values as named
/// parameters; otherwise it only pushes its results.
pub fn eval_smol(source: &str, stack: &mut DataStack) -> Result<()> {
    let word = compile_smol(source)?;
    tracing::debug!(effect = %word.effect(), "eval smol");
    run(&word, stack)
}
