//! End-to-end evaluation scenarios, driven the way the REPL drives the
//! engine: compile a line against the current stack, run it, collect
//! garbage, repeat.

use tails_compiler::{eval, eval_smol};
use tails_core::{DataStack, Value, collect_garbage, vocabulary};

/// Evaluate one postfix line REPL-style.
fn line(stack: &mut DataStack, src: &str) {
    eval(src, stack).unwrap_or_else(|e| panic!("`{src}` failed: {e}"));
    collect_garbage(stack);
}

fn eval_new(src: &str) -> Vec<Value> {
    let mut stack = DataStack::new();
    line(&mut stack, src);
    stack.values().to_vec()
}

fn num(n: f64) -> Value {
    Value::number(n)
}

#[test]
fn test_arithmetic_lines() {
    assert_eq!(eval_new("3 -4 -"), vec![num(7.0)]);
    assert_eq!(eval_new("4 3 + DUP + ABS"), vec![num(14.0)]);
    assert_eq!(eval_new("10 7 MOD 3 MAX"), vec![num(3.0)]);
}

#[test]
fn test_stack_persists_across_lines() {
    let mut stack = DataStack::new();
    line(&mut stack, "3");
    line(&mut stack, "4 +");
    assert_eq!(stack.values(), &[num(7.0)]);
}

#[test]
fn test_conditionals() {
    assert_eq!(eval_new("1 IF 123 ELSE 666 THEN"), vec![num(123.0)]);
    assert_eq!(eval_new("0 IF 123 ELSE 666 THEN"), vec![num(666.0)]);
}

#[test]
fn test_factorial_loop() {
    assert_eq!(
        eval_new("1 5 BEGIN DUP WHILE SWAP OVER * SWAP 1 - REPEAT DROP"),
        vec![num(120.0)]
    );
}

#[test]
fn test_strings_and_arrays() {
    assert_eq!(eval_new("\"Hi\" \"There\" +"), vec![Value::string("HiThere")]);
    assert_eq!(eval_new("[12 34 56] LENGTH"), vec![num(3.0)]);
}

#[test]
fn test_define_square_then_use() {
    let mut stack = DataStack::new();
    line(&mut stack, "{ (# -- #) DUP * } \"SQUARE\" DEFINE");
    assert!(stack.is_empty());
    line(&mut stack, "4 3 + SQUARE DUP + SQUARE ABS");
    assert_eq!(stack.values(), &[num(9604.0)]);

    let square = vocabulary::lookup("square").expect("registered");
    assert_eq!(unsafe { (*square).effect() }.to_string(), "# -- #");
}

#[test]
fn test_division_by_zero_is_null() {
    assert_eq!(eval_new("1 0 /"), vec![Value::NULL]);
    assert_eq!(eval_new("7 0 MOD"), vec![Value::NULL]);
}

#[test]
fn test_ifelse_combinator() {
    assert_eq!(eval_new("1 { 123 } { 666 } IFELSE"), vec![num(123.0)]);
    assert_eq!(eval_new("0 { 123 } { 666 } IFELSE"), vec![num(666.0)]);
}

#[test]
fn test_smol_expressions() {
    let mut stack = DataStack::new();
    eval_smol("3+4*5", &mut stack).unwrap();
    assert_eq!(stack.values(), &[num(23.0)]);

    let mut stack = DataStack::new();
    eval_smol("let z = 3+4; z", &mut stack).unwrap();
    assert_eq!(stack.values(), &[num(7.0)]);

    // `x if: 1+2 else: 0` with x = 0 from the stack.
    let mut stack = DataStack::new();
    stack.push(num(0.0));
    eval_smol("(x# -- #) x if: 1+2 else: 0", &mut stack).unwrap();
    assert_eq!(stack.values(), &[num(0.0)]);
}

#[test]
fn test_tail_and_nontail_recursion() {
    let mut stack = DataStack::new();
    line(
        &mut stack,
        "{ (f# i# -- r#) DUP IF SWAP OVER * SWAP 1 - RECURSE ELSE DROP THEN } \"FACT\" DEFINE",
    );
    line(&mut stack, "1 5 FACT");
    assert_eq!(stack.values(), &[num(120.0)]);

    let fact = vocabulary::lookup("FACT").unwrap();
    let fx = unsafe { (*fact).effect() };
    assert!(!fx.is_unbounded(), "tail recursion has bounded stack");
    assert!(fx.max() <= 2);

    let mut stack = DataStack::new();
    line(
        &mut stack,
        "{ (n# -- #) DUP 0= IF DROP 1 ELSE DUP 1 - RECURSE * THEN } \"NFACT\" DEFINE",
    );
    line(&mut stack, "5 NFACT");
    assert_eq!(stack.values(), &[num(120.0)]);

    let nfact = vocabulary::lookup("NFACT").unwrap();
    assert!(
        unsafe { (*nfact).effect() }.is_unbounded(),
        "non-tail recursion is marked unbounded"
    );
}

#[test]
fn test_rejections() {
    let mut stack = DataStack::new();
    // A branch with an output on only one arm.
    assert!(eval("0 IF 123 THEN", &mut stack).is_err());
    // `+` with a non-numeric top.
    assert!(eval("1 NULL +", &mut stack).is_err());
    // RECURSE in an unannotated word.
    assert!(eval("RECURSE", &mut stack).is_err());
    // Nothing was pushed by the failed lines.
    assert!(stack.is_empty());
}

#[test]
fn test_error_locations_point_into_source() {
    let mut stack = DataStack::new();
    let err = eval("1 2 nosuchword", &mut stack).unwrap_err();
    assert_eq!(err.location, Some(4));
}

#[test]
fn test_gc_is_idempotent_between_lines() {
    let mut stack = DataStack::new();
    line(&mut stack, "\"a longer string\" [1 2 3] \"another long one\"");
    let (kept, _) = collect_garbage(&stack);
    assert!(kept >= 3);
    // No allocations since: nothing to free, everything kept.
    assert_eq!(collect_garbage(&stack), (kept, 0));

    stack.clear();
    // Vocabulary-held literals survive even with an empty stack.
    let before = collect_garbage(&stack);
    assert_eq!(collect_garbage(&stack), (before.0, 0));
}

#[test]
fn test_quote_values_are_gc_roots() {
    let mut stack = DataStack::new();
    line(&mut stack, "{ (a# -- #) 1 + }");
    assert_eq!(stack.len(), 1);
    // The quote survives collection while it sits on the stack.
    collect_garbage(&stack);
    assert!(stack.top().as_quote().is_some());
    assert_eq!(stack.top().to_string(), "{(# -- #)}");
    line(&mut stack, "DROP");

    // CALL applies a quotation known at compile time. (A quote that is
    // merely quote-*typed*, like one read back off the stack, is
    // rejected: its effect isn't known.)
    let mut stack = DataStack::new();
    line(&mut stack, "{ (a# -- #) 1 + } 41 SWAP CALL");
    assert_eq!(stack.values(), &[num(42.0)]);

    let mut stack = DataStack::new();
    stack.push(Value::number(41.0));
    line(&mut stack, "{ (a# -- #) 1 + }");
    assert!(eval("CALL", &mut stack).is_err());
}
