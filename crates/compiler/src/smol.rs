//! The Smol Front End
//!
//! A top-down operator-precedence (Pratt) parser for the infix syntax,
//! driven by the symbol table in [`crate::symbol`]. Expressions compile
//! directly into a [`Compiler`] as they parse; the value returned up
//! the parse tree is each subexpression's [`StackEffect`], which the
//! grammar rules combine with [`StackEffect::then`] and use for arity
//! checks. The stack checker still verifies the final word, so these
//! parse-time effects only need to be right about counts.
//!
//! A function may open with a stack-effect signature — `(a# b# -- #)`
//! — which declares the word's effect and binds the input names as
//! parameter symbols. Parameters and `let` locals compile to
//! `_GETARG`/`_SETARG`; the frame is torn down by an implicit
//! `_DROPARGS` before the return.

use tails_core::effect::{StackEffect, TypeSet};
use tails_core::error::{CompileError, Result};
use tails_core::instruction::Opcode;
use tails_core::value::{Value, ValueType};
use tails_core::word::Word;
use tails_core::{core_word, parse_effect};

use crate::compiler::{Compiler, WordRef};
use crate::symbol::{
    InfixRule, NO_PRIORITY, ParamBinding, PostfixRule, PrefixRule, Priority, Symbol, SymbolTable,
};
use crate::tokenizer::{TokenType, Tokenizer};

/// Compile one Smol expression (or signature + body) into a word.
pub fn compile_smol(source: &str) -> Result<Word> {
    SmolParser::new(source).compile()
}

/// The fixed grammar, priorities as in the language definition.
fn grammar() -> SymbolTable {
    use InfixRule::CallWord;
    let mut t = SymbolTable::new();

    // Arithmetic & comparison operators:
    t.add(Symbol::for_word(core_word(Opcode::Mult)).infix(60, 61, CallWord));
    t.add(Symbol::for_word(core_word(Opcode::Div)).infix(60, 61, CallWord));
    t.add(Symbol::for_word(core_word(Opcode::Plus)).infix(50, 51, CallWord));
    t.add(
        Symbol::for_word(core_word(Opcode::Minus))
            .infix(50, 51, CallWord)
            .prefix(50, PrefixRule::UnaryMinus),
    );
    t.add(Symbol::for_word(core_word(Opcode::Lt)).infix(40, 41, CallWord));
    t.add(Symbol::for_word(core_word(Opcode::Le)).infix(40, 41, CallWord));
    t.add(Symbol::for_word(core_word(Opcode::Gt)).infix(40, 41, CallWord));
    t.add(Symbol::for_word(core_word(Opcode::Ge)).infix(40, 41, CallWord));
    t.add(Symbol::bare("==").with_word(core_word(Opcode::Eq)).infix(30, 31, CallWord));
    t.add(Symbol::bare("!=").with_word(core_word(Opcode::Ne)).infix(30, 31, CallWord));
    t.add(Symbol::bare("≠").with_word(core_word(Opcode::Ne)).infix(30, 31, CallWord));

    // Parentheses: prefix groups, postfix is a call on a quotation.
    t.add(Symbol::bare(")"));
    t.add(
        Symbol::bare("(")
            .prefix(5, PrefixRule::Group)
            .postfix(60, PostfixRule::CallQuote),
    );

    // Curly braces compile a nested quotation.
    t.add(Symbol::bare("}"));
    t.add(Symbol::bare("{").prefix(2, PrefixRule::Quote));

    // `;` sequences expressions, dropping all but the last's outputs.
    t.add(Symbol::bare(";").infix(3, 4, InfixRule::Sequence));

    // `<cond> if: <expr> else: <expr>`
    t.add(Symbol::bare("else:"));
    t.add(Symbol::bare("if:").infix(5, 6, InfixRule::IfColon));

    // Assignment tokens. `:=` is consumed by parameter symbols and `=`
    // by `let`; in operator position both are errors.
    t.add(Symbol::bare(":=").infix(11, 10, InfixRule::Reject));
    t.add(Symbol::bare("=").infix(21, 20, InfixRule::Reject));

    // `let <var> = <value>` declares a local.
    t.add(Symbol::bare("let").prefix(5, PrefixRule::Let));

    // Function-call symbols.
    t.add(
        Symbol::bare("RECURSE")
            .with_word(core_word(Opcode::Recurse))
            .prefix(80, PrefixRule::FunctionCall),
    );
    t.add(Symbol::bare(","));
    for op in [Opcode::Abs, Opcode::Max, Opcode::Min] {
        t.add(Symbol::for_word(core_word(op)).prefix(80, PrefixRule::FunctionCall));
    }
    t
}

/// A copied-out view of a symbol, so parse rules can run while the
/// table is borrowed mutably (adding locals).
struct SymbolView {
    token: String,
    word: Option<*const Word>,
    prefix_priority: Priority,
    left_priority: Priority,
    postfix_priority: Priority,
    prefix_rule: Option<PrefixRule>,
    infix_rule: Option<InfixRule>,
    postfix_rule: Option<PostfixRule>,
    param: Option<ParamBinding>,
}

impl SymbolView {
    fn of(s: &Symbol) -> SymbolView {
        SymbolView {
            token: s.token.clone(),
            word: s.word,
            prefix_priority: s.prefix_priority,
            left_priority: s.left_priority,
            postfix_priority: s.postfix_priority,
            prefix_rule: s.prefix_rule,
            infix_rule: s.infix_rule,
            postfix_rule: s.postfix_rule,
            param: s.param,
        }
    }
}

struct SmolParser<'s> {
    tokens: Tokenizer<'s>,
    symbols: SymbolTable,
    compiler: Compiler,
    /// The declared signature, when the source opened with one.
    signature: Option<StackEffect>,
    src: &'s str,
}

impl<'s> SmolParser<'s> {
    fn new(src: &'s str) -> SmolParser<'s> {
        let mut symbols = grammar();
        symbols.push_scope(); // parameters and locals
        let mut compiler = Compiler::new();
        compiler.begin_frame();
        SmolParser {
            tokens: Tokenizer::new(src),
            symbols,
            compiler,
            signature: None,
            src,
        }
    }

    fn compile(mut self) -> Result<Word> {
        let fx = self.parse_top_level()?;
        if !self.tokens.at_end(&self.symbols)? {
            return Err(self.fail("expected input to end here"));
        }
        self.finish_frame(&fx)?;
        self.compiler.finish()
    }

    /// Parse an optional leading signature, then the body expression.
    /// A leading `(` that doesn't parse as a signature is rewound and
    /// treated as an ordinary grouping parenthesis.
    fn parse_top_level(&mut self) -> Result<StackEffect> {
        let mark = self.tokens.mark();
        if self.if_token("(")? && !self.parse_signature()? {
            self.tokens.rewind(mark);
        }
        self.next_expression(NO_PRIORITY)
    }

    /// `( name type* … -- type* )`: declares the word's stack effect and
    /// binds each input name as a parameter symbol. Returns false,
    /// consuming nothing conclusive, when the text between the
    /// parentheses isn't an effect declaration.
    fn parse_signature(&mut self) -> Result<bool> {
        let begin = self.tokens.position();
        let Some(end) = self.tokens.skip_through(')') else {
            return Ok(false);
        };
        let Ok(decl) = parse_effect(&self.src[begin..end - 1]) else {
            return Ok(false);
        };
        for (i, name) in decl.input_names.iter().enumerate() {
            if name.is_empty() {
                return Err(CompileError::at("unnamed parameter", begin));
            }
            // Input i counts from the top: the last parameter is slot 0.
            self.symbols.add(Symbol::param(
                name,
                decl.effect.input(i).without_match(),
                -(i as i32),
            ));
        }
        self.compiler.set_stack_effect(decl.effect.clone());
        self.signature = Some(decl.effect);
        Ok(true)
    }

    /// The implicit frame teardown: drop parameters and locals, keep
    /// the expression's results.
    fn finish_frame(&mut self, fx: &StackEffect) -> Result<()> {
        let params = self.signature.as_ref().map_or(0, |s| s.input_count());
        let frame = params + self.compiler.locals_count() as usize;
        if frame == 0 {
            return Ok(());
        }
        let results = fx.output_count();
        let (frame, results) = (
            u8::try_from(frame).map_err(|_| self.fail("too many locals"))?,
            u8::try_from(results).map_err(|_| self.fail("too many results"))?,
        );
        self.compiler
            .add(WordRef::drop_args(frame, results), Some(self.tokens.position()));
        Ok(())
    }

    // =========================================================================
    // The Pratt core
    // =========================================================================

    /// Parse and compile an expression until an operator binds less
    /// tightly than `min_priority`. Returns the expression's effect.
    fn next_expression(&mut self, min_priority: Priority) -> Result<StackEffect> {
        let first = self.tokens.next(&self.symbols)?;
        let mut effect = match first.ttype {
            TokenType::End => return Err(self.fail("unexpected end of input")),
            TokenType::Number => self.compile_literal(Value::number(first.number_value)),
            TokenType::Str => self.compile_literal(Value::string(&first.string_value)),
            TokenType::Identifier | TokenType::Operator => {
                let Some(sym) = self.symbols.get(&first.literal).map(SymbolView::of) else {
                    return Err(self.fail(format!("unknown symbol `{}`", first.literal)));
                };
                if sym.prefix_rule.is_some() {
                    self.parse_prefix(&sym)?
                } else {
                    return Err(
                        self.fail(format!("`{}` cannot begin an expression", sym.token))
                    );
                }
            }
        };

        loop {
            let op = self.tokens.peek(&self.symbols)?.clone();
            match op.ttype {
                TokenType::End => break,
                TokenType::Number | TokenType::Str => {
                    return Err(self.fail("expected an operator"));
                }
                TokenType::Identifier | TokenType::Operator => {
                    let Some(sym) = self.symbols.get(&op.literal).map(SymbolView::of) else {
                        return Err(self.fail(format!("unknown symbol `{}`", op.literal)));
                    };
                    if sym.postfix_rule.is_some() {
                        if sym.postfix_priority < min_priority {
                            break;
                        }
                        self.tokens.consume_peeked();
                        effect = self.parse_postfix(effect, &sym)?;
                    } else if sym.infix_rule.is_some() {
                        if sym.left_priority < min_priority {
                            break;
                        }
                        self.tokens.consume_peeked();
                        effect = self.parse_infix(effect, &sym)?;
                    } else {
                        break;
                    }
                }
            }
        }
        Ok(effect)
    }

    fn parse_prefix(&mut self, sym: &SymbolView) -> Result<StackEffect> {
        match sym.prefix_rule.expect("prefix symbol") {
            PrefixRule::CallWord => {
                let operand = self.next_expression(sym.prefix_priority)?;
                self.call_with_operands(sym, operand)
            }
            PrefixRule::UnaryMinus => self.parse_unary_minus(),
            PrefixRule::Group => {
                let fx = self.next_expression(5)?;
                self.require_token(")")?;
                Ok(fx)
            }
            PrefixRule::Quote => {
                let quote = self.parse_quote()?;
                self.compile_literal(Value::quote(quote));
                Ok(StackEffect::from_lists(
                    vec![],
                    vec![TypeSet::from_type(ValueType::Quote)],
                ))
            }
            PrefixRule::Let => self.parse_let(),
            PrefixRule::FunctionCall => self.parse_function_call(sym),
            PrefixRule::Param => self.parse_param(sym),
        }
    }

    fn parse_infix(&mut self, lhs: StackEffect, sym: &SymbolView) -> Result<StackEffect> {
        match sym.infix_rule.expect("infix symbol") {
            InfixRule::CallWord => {
                let rhs = self.next_expression(sym.left_priority)?;
                let operands = lhs.then(&rhs).map_err(|e| self.locate(e))?;
                self.call_with_operands(sym, operands)
            }
            InfixRule::Sequence => self.parse_sequence(lhs),
            InfixRule::IfColon => self.parse_if(lhs),
            InfixRule::Reject => {
                Err(self.fail(format!("`{}` cannot be used here", sym.token)))
            }
        }
    }

    fn parse_postfix(&mut self, lhs: StackEffect, sym: &SymbolView) -> Result<StackEffect> {
        match sym.postfix_rule.expect("postfix symbol") {
            PostfixRule::CallQuote => {
                if lhs.output_count() != 1
                    || lhs.output(0) != TypeSet::from_type(ValueType::Quote)
                {
                    return Err(self.fail("this isn't callable"));
                }
                let n_args = self.parse_parameter_list("a quote", None)?;
                if n_args > 0 {
                    // Bring the quotation above its arguments.
                    let pos = self.tokens.position();
                    self.compiler.add(
                        WordRef::with_offset(Opcode::RotN, n_args as i32),
                        Some(pos),
                    );
                }
                self.compile_call(core_word(Opcode::Call));
                // The real effect comes from the checker, which knows
                // the quotation; the parser only assumes one output.
                Ok(StackEffect::from_lists(vec![], vec![TypeSet::any()]))
            }
        }
    }

    /// Compile a call to the symbol's word after its operands.
    fn call_with_operands(
        &mut self,
        sym: &SymbolView,
        operands: StackEffect,
    ) -> Result<StackEffect> {
        let word = sym.word.expect("operator without a word");
        let word_fx = unsafe { (*word).effect().clone() };
        if word_fx.input_count() != operands.output_count() {
            return Err(self.fail(format!(
                "`{}` expects {} values, found {}",
                sym.token,
                word_fx.input_count(),
                operands.output_count()
            )));
        }
        self.compile_call(word);
        operands.then(&word_fx).map_err(|e| self.locate(e))
    }

    /// Prefix `-`: fold into a number literal when one follows, else
    /// compile `0 <operand> -`.
    fn parse_unary_minus(&mut self) -> Result<StackEffect> {
        if self.tokens.peek(&self.symbols)?.ttype == TokenType::Number {
            let n = self.tokens.next(&self.symbols)?.number_value;
            return Ok(self.compile_literal(Value::number(-n)));
        }
        self.compile_call(core_word(Opcode::Zero));
        let operand = self.next_expression(50)?;
        if operand.input_count() != 0 || operand.output_count() != 1 {
            return Err(self.fail("invalid operand for prefix `-`"));
        }
        self.compile_call(core_word(Opcode::Minus));
        Ok(StackEffect::from_lists(
            vec![],
            vec![TypeSet::from_type(ValueType::Number)],
        ))
    }

    /// `;`: all but the last expression's outputs are dropped. A
    /// trailing `;` is a no-op.
    fn parse_sequence(&mut self, lhs: StackEffect) -> Result<StackEffect> {
        if self.tokens.at_end(&self.symbols)? || self.tokens.peek(&self.symbols)?.is("}") {
            return Ok(lhs);
        }
        for _ in 0..lhs.output_count() {
            self.compile_call(core_word(Opcode::Drop));
        }
        let rhs = self.next_expression(1)?;
        if rhs.input_count() > 0 {
            return Err(self.fail("stack underflow on the right of `;`"));
        }
        Ok(StackEffect::from_lists(
            lhs.inputs().to_vec(),
            rhs.outputs().to_vec(),
        ))
    }

    /// `cond if: a else: b` — the arms must agree on their output
    /// count; `else:` may be omitted when the `if:` arm yields nothing.
    fn parse_if(&mut self, lhs: StackEffect) -> Result<StackEffect> {
        if lhs.output_count() != 1 {
            return Err(self.fail("the condition of `if:` must have a value"));
        }
        let pos = self.tokens.position();
        let mut pending = self
            .compiler
            .add(WordRef::with_offset(Opcode::ZBranch, -1), Some(pos));
        let mut if_fx = self.next_expression(6)?;

        if self.if_token("else:")? {
            let else_pos = self.tokens.position();
            let else_branch = self
                .compiler
                .add(WordRef::with_offset(Opcode::Branch, -1), Some(else_pos));
            self.compiler.fix_branch(pending);
            pending = else_branch;
            let else_fx = self.next_expression(6)?;
            if else_fx.output_count() != if_fx.output_count() {
                return Err(self.fail(
                    "`if:` and `else:` clauses must return the same number of values",
                ));
            }
            for i in 0..if_fx.output_count() {
                *if_fx.output_mut(i) = if_fx.output(i) | else_fx.output(i);
            }
        } else if if_fx.output_count() != 0 {
            return Err(self.fail("`if:` without `else:` cannot return a value"));
        }
        self.compiler.fix_branch(pending);
        Ok(StackEffect::from_lists(
            lhs.inputs().to_vec(),
            if_fx.outputs().to_vec(),
        ))
    }

    /// `let <name> = <expr>`: reserves a local slot typed by the RHS.
    fn parse_let(&mut self) -> Result<StackEffect> {
        let tok = self.tokens.next(&self.symbols)?;
        if tok.ttype != TokenType::Identifier || tok.literal.ends_with(':') {
            return Err(self.fail("expected a local variable name"));
        }
        let name = tok.literal;
        if self.symbols.innermost_has(&name) {
            return Err(self.fail(format!("`{name}` is already a local variable")));
        }
        if !self.if_token("=")? {
            return Err(self.fail(format!("expected `=` after `let {name}`")));
        }
        let rhs = self.next_expression(5)?;
        if rhs.input_count() != 0 || rhs.output_count() != 1 {
            return Err(self.fail(format!("no value to assign to `{name}`")));
        }
        let types = rhs.output(0).without_match();
        let offset = self.compiler.reserve_local_variable()?;
        self.symbols.add(Symbol::param(&name, types, offset));
        let pos = self.tokens.position();
        self.compiler.add_set_arg(offset, Some(pos));
        Ok(StackEffect::new())
    }

    /// A parameter or local in expression position: either an
    /// assignment (`name := expr`) or a read.
    fn parse_param(&mut self, sym: &SymbolView) -> Result<StackEffect> {
        let binding = sym.param.expect("param symbol");
        if self.if_token(":=")? {
            let rhs = self.next_expression(10)?;
            if rhs.input_count() != 0 || rhs.output_count() != 1 {
                return Err(
                    self.fail("the right-hand side of an assignment must have a value")
                );
            }
            if (rhs.output(0) - binding.types).first_type().is_some() {
                return Err(self.fail(format!("type mismatch assigning to `{}`", sym.token)));
            }
            let pos = self.tokens.position();
            self.compiler.add_set_arg(binding.stack_pos, Some(pos));
            Ok(StackEffect::new())
        } else {
            let pos = self.tokens.position();
            self.compiler.add_get_arg(binding.stack_pos, Some(pos));
            Ok(StackEffect::from_lists(vec![], vec![binding.types]))
        }
    }

    /// `name(arg, …)` — a call to a bound word, or `RECURSE(…)`, whose
    /// effect is the enclosing word's declared signature.
    fn parse_function_call(&mut self, sym: &SymbolView) -> Result<StackEffect> {
        let word = sym.word.expect("function symbol");
        let is_recurse = std::ptr::eq(word, core_word(Opcode::Recurse));
        let word_fx = if is_recurse {
            if !self.compiler.has_declared_effect() {
                return Err(
                    self.fail("RECURSE requires an explicit stack effect declaration")
                );
            }
            self.compiler.declared_effect().clone()
        } else {
            unsafe { (*word).effect().clone() }
        };
        self.require_token("(")?;
        self.parse_parameter_list(&sym.token, Some(word_fx.input_count()))?;
        if is_recurse {
            self.compiler.add_recurse();
        } else {
            self.compile_call(word);
        }
        Ok(StackEffect::from_lists(vec![], word_fx.outputs().to_vec()))
    }

    /// The comma-separated arguments of a function call, up to `)`.
    fn parse_parameter_list(&mut self, name: &str, expected: Option<usize>) -> Result<usize> {
        let mut n_args = 0usize;
        while !self.if_token(")")? {
            if let Some(exp) = expected {
                if n_args >= exp {
                    return Err(
                        self.fail(format!("too many arguments; {name} expects {exp}"))
                    );
                }
            }
            if n_args > 0 {
                self.require_token(",")?;
            }
            let arg = self.next_expression(10)?;
            if arg.input_count() != 0 || arg.output_count() == 0 {
                return Err(self.fail("invalid function argument"));
            }
            if arg.output_count() > 1 {
                return Err(self.fail("invalid function argument: multi-valued expression"));
            }
            n_args += 1;
        }
        if let Some(exp) = expected {
            if n_args < exp {
                return Err(self.fail(format!("too few arguments; {name} expects {exp}")));
            }
        }
        Ok(n_args)
    }

    /// `{ … }`: compile the body as its own word with a fresh symbol
    /// scope and frame; enclosing parameters are not visible inside.
    fn parse_quote(&mut self) -> Result<Word> {
        let saved_symbols = std::mem::replace(&mut self.symbols, {
            let mut s = grammar();
            s.push_scope();
            s
        });
        let saved_compiler = std::mem::replace(&mut self.compiler, Compiler::new());
        let saved_signature = self.signature.take();
        self.compiler.begin_frame();

        let result = (|| {
            let fx = self.parse_top_level()?;
            self.require_token("}")?;
            self.finish_frame(&fx)?;
            std::mem::replace(&mut self.compiler, Compiler::new()).finish()
        })();

        self.symbols = saved_symbols;
        self.compiler = saved_compiler;
        self.signature = saved_signature;
        result
    }

    // =========================================================================
    // Small helpers
    // =========================================================================

    fn compile_literal(&mut self, v: Value) -> StackEffect {
        let pos = self.tokens.position();
        self.compiler.add_literal(v, Some(pos));
        StackEffect::from_lists(vec![], vec![TypeSet::from_type(v.value_type())])
    }

    fn compile_call(&mut self, word: *const Word) {
        let pos = self.tokens.position();
        self.compiler.cur_pos = Some(pos);
        self.compiler.add(WordRef::word(word), Some(pos));
    }

    /// Consume the next token if it matches.
    fn if_token(&mut self, literal: &str) -> Result<bool> {
        if self.tokens.peek(&self.symbols)?.is(literal) {
            self.tokens.consume_peeked();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn require_token(&mut self, literal: &str) -> Result<()> {
        if self.if_token(literal)? {
            Ok(())
        } else {
            Err(self.fail(format!("expected `{literal}`")))
        }
    }

    fn fail(&self, message: impl Into<String>) -> CompileError {
        CompileError::at(message, self.tokens.position())
    }

    fn locate(&self, e: CompileError) -> CompileError {
        e.with_location(self.tokens.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tails_core::{DataStack, run};

    fn eval(src: &str) -> Vec<Value> {
        let word = compile_smol(src).unwrap_or_else(|e| panic!("{src}: {e}"));
        let mut stack = DataStack::new();
        run(&word, &mut stack).unwrap();
        stack.values().to_vec()
    }

    fn eval_on(src: &str, inputs: &[f64]) -> Vec<Value> {
        let word = compile_smol(src).unwrap_or_else(|e| panic!("{src}: {e}"));
        let mut stack = DataStack::new();
        for &n in inputs {
            stack.push(Value::number(n));
        }
        run(&word, &mut stack).unwrap();
        stack.values().to_vec()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("3+4*5"), vec![Value::number(23.0)]);
        assert_eq!(eval("(3+4)*5"), vec![Value::number(35.0)]);
        assert_eq!(eval("3*4+5*6"), vec![Value::number(42.0)]);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval("-4"), vec![Value::number(-4.0)]);
        assert_eq!(eval("3 - -4"), vec![Value::number(7.0)]);
        assert_eq!(eval("-(3+4)"), vec![Value::number(-7.0)]);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("3 < 4"), vec![Value::number(1.0)]);
        assert_eq!(eval("3 == 4"), vec![Value::number(0.0)]);
        assert_eq!(eval("3 != 4"), vec![Value::number(1.0)]);
    }

    #[test]
    fn test_let_and_sequence() {
        assert_eq!(eval("let z = 3+4; z"), vec![Value::number(7.0)]);
        assert_eq!(eval("let a = 2; let b = a*3; b+a"), vec![Value::number(8.0)]);
        // All but the last expression's outputs are dropped.
        assert_eq!(eval("1+1; 5"), vec![Value::number(5.0)]);
        // A trailing `;` is a no-op.
        assert_eq!(eval("42;"), vec![Value::number(42.0)]);
    }

    #[test]
    fn test_parameters() {
        assert_eq!(eval_on("(a# b# -- #) a+b*2", &[10.0, 3.0]), vec![
            Value::number(16.0)
        ]);
        assert_eq!(eval_on("(x# -- #) x*x", &[9.0]), vec![Value::number(81.0)]);
    }

    #[test]
    fn test_param_assignment() {
        assert_eq!(
            eval_on("(x# -- #) x := x+1; x", &[5.0]),
            vec![Value::number(6.0)]
        );
    }

    #[test]
    fn test_if_else() {
        assert_eq!(eval_on("(x# -- #) x if: 1+2 else: 0", &[1.0]), vec![
            Value::number(3.0)
        ]);
        assert_eq!(eval_on("(x# -- #) x if: 1+2 else: 0", &[0.0]), vec![
            Value::number(0.0)
        ]);
    }

    #[test]
    fn test_if_arm_mismatch() {
        assert!(compile_smol("(x# -- #) x if: 1").is_err());
        assert!(compile_smol("(x# --) x if: 1 else: 2 3").is_err());
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(eval("ABS(-4)+1"), vec![Value::number(5.0)]);
        assert_eq!(eval("MAX(3, 4*5)"), vec![Value::number(20.0)]);
        assert_eq!(eval("MIN(3, 4)"), vec![Value::number(3.0)]);
        assert!(compile_smol("MAX(3)").is_err());
        assert!(compile_smol("MAX(1, 2, 3)").is_err());
    }

    #[test]
    fn test_tail_recursive_factorial() {
        let word = compile_smol(
            "(f# i# -- r#) i == 0 if: f else: RECURSE(f*i, i-1)",
        )
        .unwrap();
        // Tail recursion: the recorded max growth is a small constant
        // (the expression temporaries), not unbounded.
        assert!(!word.effect().is_unbounded());
        assert!(word.effect().max() <= 3);

        let mut stack = DataStack::new();
        stack.push(Value::number(1.0));
        stack.push(Value::number(5.0));
        run(&word, &mut stack).unwrap();
        assert_eq!(stack.values(), &[Value::number(120.0)]);
    }

    #[test]
    fn test_recurse_needs_signature() {
        let err = compile_smol("RECURSE(1)").unwrap_err();
        assert!(err.message.contains("RECURSE"), "{}", err.message);
    }

    #[test]
    fn test_quote_literal_and_call() {
        assert_eq!(eval("{ (x# -- #) x*2 }(21)"), vec![Value::number(42.0)]);
        tails_core::heap::sweep();
    }

    #[test]
    fn test_duplicate_local_rejected() {
        assert!(compile_smol("let x = 1; let x = 2; x").is_err());
    }

    #[test]
    fn test_assignment_to_unknown_name() {
        let err = compile_smol("y := 3").unwrap_err();
        assert!(err.message.contains("unknown symbol"), "{}", err.message);
    }

    #[test]
    fn test_string_expression() {
        assert_eq!(eval("\"Hi\"+\"There\""), vec![Value::string("HiThere")]);
        tails_core::heap::sweep();
    }
}
