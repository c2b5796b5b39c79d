//! The Tails REPL
//!
//! Reads a line, evaluates it against the persistent data stack,
//! prints the stack, and collects garbage. An empty line clears the
//! stack; EOF exits. Compile errors print a caret under the offending
//! source position.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;

use tails_compiler::{eval, eval_smol};
use tails_core::error::CompileError;
use tails_core::{DataStack, collect_garbage, interp};

#[derive(Parser)]
#[command(name = "tails", about = "The Tails language interpreter", version)]
struct Cli {
    /// Script to evaluate, line by line, instead of running a REPL.
    script: Option<PathBuf>,

    /// Evaluate one expression and print the resulting stack.
    #[arg(short = 'e', long = "eval", value_name = "SRC")]
    expression: Option<String>,

    /// Use the infix "Smol" syntax instead of postfix.
    #[arg(long)]
    smol: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stack = DataStack::new();

    if let Some(src) = &cli.expression {
        return match eval_line(src, &mut stack, cli.smol) {
            Ok(()) => {
                interp::end_line();
                println!("{}", format_stack(&stack));
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(src, &e);
                ExitCode::FAILURE
            }
        };
    }

    if let Some(path) = &cli.script {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: can't read {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        };
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = eval_line(line, &mut stack, cli.smol) {
                report(line, &e);
                return ExitCode::FAILURE;
            }
            collect_garbage(&stack);
        }
        interp::end_line();
        if !stack.is_empty() {
            println!("{}", format_stack(&stack));
        }
        return ExitCode::SUCCESS;
    }

    repl(&mut stack, cli.smol)
}

fn repl(stack: &mut DataStack, smol: bool) -> ExitCode {
    println!("Tails interpreter. Empty line clears the stack; ctrl-D exits.");
    let mut editor = match rustyline::DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("error: can't open terminal: {e}");
            return ExitCode::FAILURE;
        }
    };
    loop {
        let prompt = format!("{} ➤ ", format_stack(stack));
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    stack.clear();
                    collect_garbage(stack);
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match eval_line(&line, stack, smol) {
                    Ok(()) => interp::end_line(),
                    Err(e) => report(&line, &e),
                }
                collect_garbage(stack);
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn eval_line(line: &str, stack: &mut DataStack, smol: bool) -> Result<(), CompileError> {
    if smol {
        eval_smol(line, stack)
    } else {
        eval(line, stack)
    }
}

/// The stack, bottom to top, space-separated.
fn format_stack(stack: &DataStack) -> String {
    stack
        .values()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print a compile error, with a caret when it carries a location.
fn report(line: &str, error: &CompileError) {
    interp::end_line();
    if let Some(at) = error.location.filter(|&at| at <= line.len()) {
        eprintln!("  {line}");
        eprintln!("  {}⬆", " ".repeat(at));
    }
    eprintln!("error: {}", error.message);
}
