//! The Stack Checker
//!
//! A symbolic interpreter that runs over the compiler's entry list
//! before assembly. It simulates the runtime stack with an
//! [`EffectStack`] whose items are either a [`TypeSet`] (type known,
//! value unknown) or a literal [`Value`] (both known), follows every
//! flow of control, and verifies that each opcode's declared effect is
//! satisfiable: enough items, compatible types, consistent depths where
//! flows join. On success the word's overall [`StackEffect`] — inputs,
//! outputs, max growth — is known and recorded.
//!
//! `IFELSE` and `CALL` are the opcodes whose compile-time effect
//! depends on stack *values*: both demand literal quotations on the
//! simulated stack so the callee's effect is known.

use tails_core::effect::{StackEffect, TypeSet};
use tails_core::error::{CompileError, Result};
use tails_core::instruction::Opcode;
use tails_core::value::{Value, ValueType};
use tails_core::word::WordFlags;

use crate::compiler::{Compiler, Param};

/// One simulated stack slot.
#[derive(Clone)]
pub(crate) enum Item {
    /// A set of possible types; the value is unknown.
    Types(TypeSet),
    /// An exact literal value.
    Literal(Value),
}

impl Item {
    fn types(&self) -> TypeSet {
        match self {
            Item::Types(t) => *t,
            Item::Literal(v) => TypeSet::from_type(v.value_type()),
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Item) -> bool {
        match (self, other) {
            (Item::Types(a), Item::Types(b)) => a == b,
            (Item::Literal(a), Item::Literal(b)) => a == b,
            _ => false,
        }
    }
}

/// Simulates the runtime stack at compile time.
#[derive(Clone, Default)]
pub(crate) struct EffectStack {
    stack: Vec<Item>,
    initial_depth: usize,
    max_depth: usize,
    /// Set when an applied effect has unbounded max (non-tail recursion).
    unbounded: bool,
}

impl PartialEq for EffectStack {
    fn eq(&self, other: &EffectStack) -> bool {
        self.stack == other.stack
    }
}

impl EffectStack {
    fn from_effect(initial: &StackEffect) -> EffectStack {
        let stack: Vec<Item> = initial.inputs().iter().map(|&t| Item::Types(t)).collect();
        let depth = stack.len();
        EffectStack {
            stack,
            initial_depth: depth,
            max_depth: depth,
            unbounded: false,
        }
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }

    fn max_growth(&self) -> usize {
        self.max_depth - self.initial_depth
    }

    fn at(&self, i: usize) -> &Item {
        &self.stack[self.stack.len() - 1 - i]
    }

    fn literal_at(&self, i: usize) -> Option<Value> {
        if i < self.depth() {
            if let Item::Literal(v) = self.at(i) {
                return Some(*v);
            }
        }
        None
    }

    fn push(&mut self, item: Item) {
        self.stack.push(item);
        self.max_depth = self.max_depth.max(self.depth());
    }

    fn pop(&mut self) -> Item {
        self.stack.pop().expect("symbolic stack underflow")
    }

    /// Insert at the bottom — used when inferring a quotation's inputs.
    fn add_at_bottom(&mut self, entry: TypeSet) {
        self.stack.insert(0, Item::Types(entry));
        self.initial_depth += 1;
        self.max_depth = self.max_depth.max(self.depth()).max(self.initial_depth);
    }

    fn set_type_at(&mut self, i: usize, t: TypeSet) {
        let n = self.stack.len();
        self.stack[n - 1 - i] = Item::Types(t);
    }

    fn rotate(&mut self, n: i32) {
        let len = self.stack.len();
        if n > 0 {
            let item = self.stack.remove(len - 1 - n as usize);
            self.stack.push(item);
        } else if n < 0 {
            let item = self.stack.pop().expect("symbolic stack underflow");
            self.stack.insert(len - 1 - (-n) as usize, item);
        }
    }

    fn erase_under(&mut self, results: usize, locals: usize) {
        let len = self.stack.len();
        self.stack.drain(len - results - locals..len - results);
    }

    /// Apply a word's stack effect: verify the inputs, pop them, push
    /// the outputs (propagating exact items for input-match outputs).
    fn apply(
        &mut self,
        name: &str,
        effect: &StackEffect,
        source_pos: Option<usize>,
    ) -> Result<()> {
        let n_inputs = effect.input_count();
        if n_inputs > self.depth() {
            return Err(CompileError {
                message: format!(
                    "calling `{name}` would underflow ({n_inputs} needed, {} available)",
                    self.depth()
                ),
                location: source_pos,
            });
        }
        for i in 0..n_inputs {
            let bad = self.at(i).types() - effect.input(i);
            if let Some(bad_type) = bad.first_type() {
                return Err(CompileError {
                    message: format!(
                        "type mismatch passing {bad_type} to `{name}` (depth {i})"
                    ),
                    location: source_pos,
                });
            }
        }
        let inputs: Vec<Item> = (0..n_inputs).map(|i| self.at(i).clone()).collect();

        if effect.is_unbounded() {
            self.unbounded = true;
        } else {
            self.max_depth = self.max_depth.max(self.depth() + effect.max() as usize);
        }

        self.stack.truncate(self.depth() - n_inputs);
        for i in (0..effect.output_count()).rev() {
            let out = effect.output(i);
            match out.input_match() {
                Some(m) if m < n_inputs => self.push(inputs[m].clone()),
                _ => self.push(Item::Types(out.without_match())),
            }
        }
        Ok(())
    }

    /// Merge with the stack from another flow of control.
    fn merge_with(&mut self, other: &EffectStack, source_pos: Option<usize>) -> Result<()> {
        if self.depth() != other.depth() {
            return Err(CompileError {
                message: "inconsistent stack depth".into(),
                location: source_pos,
            });
        }
        let n = self.stack.len();
        for i in 0..n {
            let mine = &self.stack[n - 1 - i];
            let theirs = other.at(i);
            if mine != theirs {
                let union = mine.types() | theirs.types();
                self.stack[n - 1 - i] = Item::Types(union);
            }
        }
        self.unbounded |= other.unbounded;
        self.max_depth = self.max_depth.max(other.max_depth);
        Ok(())
    }

    /// Verify the stack against the declared outputs at a `_RETURN`,
    /// extending them when the declaration is open. When the output
    /// count is fixed but the types are not (undeclared effects reached
    /// along a second flow of control), a wider type widens the record
    /// instead of failing.
    fn check_outputs(
        &self,
        effect: &mut StackEffect,
        can_add_outputs: bool,
        can_add_output_types: bool,
    ) -> Result<()> {
        let n_outputs = effect.output_count();
        let depth = self.depth();
        if n_outputs > depth {
            return Err(CompileError::new(format!(
                "insufficient outputs: have {depth}, declared {n_outputs}"
            )));
        }
        for i in 0..n_outputs {
            let bad = self.at(i).types() - effect.output(i);
            if let Some(bad_type) = bad.first_type() {
                if can_add_output_types {
                    *effect.output_mut(i) = effect.output(i) | self.at(i).types();
                } else {
                    return Err(CompileError::new(format!(
                        "output type mismatch: can't be {bad_type} (depth {i})"
                    )));
                }
            }
        }
        for i in n_outputs..depth {
            if !can_add_outputs {
                return Err(CompileError::new(format!(
                    "too many outputs: have {depth}, declared {n_outputs}"
                )));
            }
            effect.add_output_at_bottom(self.at(i).types());
        }
        Ok(())
    }
}

/// Compute and verify the stack effect of a compiled word, rewriting
/// `_GETARG`/`_SETARG` offsets into their runtime form along the way.
pub(crate) fn compute_effect(comp: &mut Compiler) -> Result<()> {
    let initial = EffectStack::from_effect(&comp.effect);
    Checker { comp }.walk(0, initial)
}

struct Checker<'a> {
    comp: &'a mut Compiler,
}

impl Checker<'_> {
    fn walk(&mut self, mut i: usize, mut cur: EffectStack) -> Result<()> {
        loop {
            debug_assert!(i < self.comp.entries.len());

            // Where flows of control join, compare against the memoized
            // stack: identical means this path is already covered; a
            // different stack of equal depth merges and re-walks.
            if self.comp.entries[i].is_branch_target {
                if let Some(known) = self.comp.entries[i].known_stack.clone() {
                    if known == cur {
                        return Ok(());
                    }
                    cur.merge_with(&known, self.comp.entries[i].source_pos)?;
                }
                self.comp.entries[i].known_stack = Some(cur.clone());
            }

            let source_pos = self.comp.entries[i].source_pos;
            let op = self.step(i, &mut cur).map_err(|e| match source_pos {
                Some(p) => e.with_location(p),
                None => e,
            })?;

            match op {
                Some(Opcode::Return) => return Ok(()),
                Some(Opcode::Branch) => {
                    i = self.comp.entries[i].branch_to.expect("unresolved branch");
                }
                Some(Opcode::ZBranch) => {
                    // Fall-through path first, then follow the branch.
                    self.walk(i + 1, cur.clone())?;
                    i = self.comp.entries[i].branch_to.expect("unresolved branch");
                }
                _ => i += 1,
            }
        }
    }

    /// Apply one entry's compile-time behavior. Returns its opcode when
    /// native (for control-flow handling).
    fn step(&mut self, i: usize, cur: &mut EffectStack) -> Result<Option<Opcode>> {
        let entry = &self.comp.entries[i];
        let word = entry.word_ref();
        let param = entry.param;
        let source_pos = entry.source_pos;
        let Some(op) = word.opcode() else {
            // A call to an interpreted word: its declared effect applies.
            let effect = word.effect().clone();
            if effect.is_weird() {
                return Err(CompileError::new(format!(
                    "don't know the stack effect of `{word}`"
                )));
            }
            let name = word.name().unwrap_or("<anon>").to_string();
            self.apply_default(cur, &name, &effect, source_pos)?;
            return Ok(None);
        };
        match op {
            Opcode::Literal => {
                let Param::Literal(v) = param else {
                    return Err(CompileError::new("_LITERAL without a value"));
                };
                cur.push(Item::Literal(v));
            }
            Opcode::SmallInt => {
                let Param::Offset(n) = param else {
                    return Err(CompileError::new("_INT without a value"));
                };
                cur.push(Item::Literal(Value::number(n as f64)));
            }
            Opcode::RotN => {
                let Param::Offset(n) = param else {
                    return Err(CompileError::new("_ROTN without a distance"));
                };
                let needed = n.unsigned_abs() as usize + 1;
                if cur.depth() < needed {
                    return Err(CompileError::new(format!(
                        "rotating {needed} deep would underflow"
                    )));
                }
                cur.rotate(n);
            }
            Opcode::GetArg | Opcode::SetArg => self.check_arg(i, cur)?,
            Opcode::Locals => {
                let Param::Offset(n) = param else {
                    return Err(CompileError::new("_LOCALS without a count"));
                };
                for _ in 0..n {
                    // Type is fixed by the first assignment.
                    cur.push(Item::Types(TypeSet::none()));
                }
            }
            Opcode::DropArgs => {
                let Param::Drop(locals, results) = param else {
                    return Err(CompileError::new("_DROPARGS without counts"));
                };
                let (locals, results) = (locals as usize, results as usize);
                if locals + results > cur.depth() {
                    return Err(CompileError::new("frame teardown would underflow"));
                }
                let actual = cur.depth() - locals;
                if actual != results {
                    return Err(CompileError::new(format!(
                        "should return {results} values, not {actual}"
                    )));
                }
                cur.erase_under(results, locals);
            }
            Opcode::Call => {
                let callee = cur
                    .literal_at(0)
                    .and_then(|v| v.as_quote().map(|w| w.effect().clone()));
                let Some(effect) = callee else {
                    return Err(CompileError::new(
                        "CALL needs a literal quotation with a known stack effect",
                    ));
                };
                cur.pop();
                let name = "CALL".to_string();
                self.apply_default(cur, &name, &effect, source_pos)?;
            }
            Opcode::IfElse => {
                let effect = self.effect_of_ifelse(cur)?;
                self.apply_default(cur, "IFELSE", &effect, source_pos)?;
            }
            Opcode::Recurse => {
                if self.comp.can_add_inputs || self.comp.can_add_outputs {
                    return Err(CompileError::new(
                        "RECURSE requires an explicit stack effect declaration",
                    ));
                }
                let mut effect = self.comp.effect.clone();
                if !self.returns_immediately(i + 1) {
                    if self.comp.flags().contains(WordFlags::INLINE) {
                        return Err(CompileError::new("illegal recursion in an inline word"));
                    }
                    effect = effect.with_unknown_max();
                }
                self.apply_default(cur, "RECURSE", &effect, source_pos)?;
            }
            Opcode::Return => {
                cur.check_outputs(
                    &mut self.comp.effect,
                    self.comp.can_add_outputs,
                    self.comp.can_add_output_types,
                )?;
                self.comp.can_add_outputs = false;
                if cur.unbounded {
                    self.comp.effect = self.comp.effect.clone().with_unknown_max();
                } else if cur.max_growth() as i32 > self.comp.effect.max() as i32 {
                    self.comp.effect.set_max(cur.max_growth() as i32);
                }
            }
            _ => {
                // Every other opcode is covered by its declared effect.
                let effect = word.effect().clone();
                debug_assert!(!effect.is_weird(), "unhandled weird opcode {op:?}");
                let name = word.name().unwrap_or("?").to_string();
                self.apply_default(cur, &name, &effect, source_pos)?;
            }
        }
        Ok(Some(op))
    }

    /// The default check: infer missing quotation inputs if allowed,
    /// then apply the effect.
    fn apply_default(
        &mut self,
        cur: &mut EffectStack,
        name: &str,
        effect: &StackEffect,
        source_pos: Option<usize>,
    ) -> Result<()> {
        if self.comp.can_add_inputs {
            let n_inputs = effect.input_count();
            while cur.depth() < n_inputs {
                let entry = effect.input(cur.depth());
                cur.add_at_bottom(entry);
                self.comp.effect.add_input_at_bottom(entry);
            }
        }
        cur.apply(name, effect, source_pos)
    }

    /// `_GETARG`/`_SETARG`: renormalize the stored offset so it
    /// addresses the same slot from the *current* stack top, then apply
    /// the read or write.
    fn check_arg(&mut self, i: usize, cur: &mut EffectStack) -> Result<()> {
        let entry = &self.comp.entries[i];
        let is_get = entry.opcode() == Some(Opcode::GetArg);
        // Work from the original offset: a control-flow merge can walk
        // an entry twice, and renormalizing twice would corrupt it.
        let raw = match entry.raw_offset {
            Some(raw) => raw,
            None => {
                let Param::Offset(raw) = entry.param else {
                    return Err(CompileError::new("arg access without an offset"));
                };
                self.comp.entries[i].raw_offset = Some(raw);
                raw
            }
        };
        let delta = cur.depth() as i32 - self.comp.effect.input_count() as i32;

        if raw <= 0 {
            // A function parameter. Its type comes from the declaration.
            if (-raw) as usize >= self.comp.effect.input_count() {
                return Err(CompileError::new("argument offset out of range"));
            }
            let new_off = raw - delta;
            self.comp.entries[i].param = Param::Offset(new_off);
            let param_type = self.comp.effect.input((-raw) as usize);
            if is_get {
                cur.push(Item::Types(param_type.without_match()));
            } else {
                let fx = StackEffect::from_lists(vec![param_type.without_match()], vec![]);
                cur.apply("_SETARG", &fx, self.comp.entries[i].source_pos)?;
            }
        } else {
            // A local slot, identified by its positive id.
            let new_off = raw - delta;
            self.comp.entries[i].param = Param::Offset(new_off);
            if new_off > 0 {
                return Err(CompileError::new("local slot used before it is reserved"));
            }
            let idx = (-new_off) as usize;
            if is_get {
                let item = cur.at(idx).clone();
                if !item.types().exists() {
                    return Err(CompileError::new(
                        "reading a local before it's assigned a value",
                    ));
                }
                cur.push(item);
            } else {
                let local_type = cur.at(idx).types();
                let value_type = cur.at(0).types();
                if local_type.exists() {
                    if (value_type - local_type).first_type().is_some() {
                        return Err(CompileError::new("type mismatch assigning to local"));
                    }
                } else {
                    cur.set_type_at(idx, value_type);
                }
                cur.pop();
            }
        }
        Ok(())
    }

    /// True if control falls straight through to `_RETURN` from entry
    /// `i` (possibly via branches and the frame teardown) without doing
    /// further work — the condition for a recursion to be a tail call.
    fn returns_immediately(&self, i: usize) -> bool {
        let entry = &self.comp.entries[i];
        match entry.opcode() {
            Some(Opcode::Return) => true,
            Some(Opcode::Branch) => entry
                .branch_to
                .is_some_and(|dest| self.returns_immediately(dest)),
            Some(Opcode::DropArgs) => self.returns_immediately(i + 1),
            _ => false,
        }
    }

    /// The combined compile-time effect of `IFELSE`: both top items must
    /// be literal quotations; their effects merge (input intersection,
    /// output union, equal nets), plus the three operands of `IFELSE`
    /// itself.
    fn effect_of_ifelse(&self, cur: &EffectStack) -> Result<StackEffect> {
        let quote_effect = |i: usize| -> Result<StackEffect> {
            cur.literal_at(i)
                .and_then(|v| v.as_quote().map(|w| w.effect().clone()))
                .ok_or_else(|| {
                    CompileError::new("IFELSE must be preceded by two quotations")
                })
        };
        let a = quote_effect(1)?;
        let b = quote_effect(0)?;
        if a.net() != b.net() {
            return Err(CompileError::new(
                "IFELSE quotes have inconsistent stack depths",
            ));
        }

        let mut fx = a.clone();
        for i in 0..b.input_count() {
            let entry = b.input(i);
            if i < fx.input_count() {
                let merged = entry & fx.input(i);
                if !merged.exists() {
                    return Err(CompileError::new(format!(
                        "IFELSE quotes have incompatible parameter #{i}"
                    )));
                }
                *fx.input_mut(i) = merged;
            } else {
                fx.add_input(entry);
            }
        }
        for i in 0..b.output_count() {
            let entry = b.output(i);
            if i < fx.output_count() {
                *fx.output_mut(i) = fx.output(i) | entry;
            } else {
                fx.add_output(entry);
            }
        }

        // The test value and the two quotes are consumed as well.
        fx.add_input(TypeSet::any());
        fx.add_input(TypeSet::from_type(ValueType::Quote));
        fx.add_input(TypeSet::from_type(ValueType::Quote));

        if a.is_unbounded() || b.is_unbounded() {
            Ok(fx.with_unknown_max())
        } else {
            let max = (a.max().max(b.max()) as i32 - 3).max(0);
            Ok(fx.with_max(max))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::WordRef;
    use tails_core::Value;

    fn num(n: f64) -> Value {
        Value::number(n)
    }

    #[test]
    fn test_effect_inferred_from_body() {
        let mut c = Compiler::new();
        c.add(WordRef::of(Opcode::Plus), None);
        let word = c.finish().unwrap();
        // Inputs inferred from PLUS's requirements; one output.
        assert_eq!(word.effect().input_count(), 2);
        assert_eq!(word.effect().output_count(), 1);
    }

    #[test]
    fn test_literal_type_flows_through_dup() {
        let mut c = Compiler::new();
        c.add_literal(Value::string("hi"), None);
        c.add(WordRef::of(Opcode::Dup), None);
        c.add(WordRef::of(Opcode::Plus), None);
        let word = c.finish().unwrap();
        assert_eq!(word.effect().input_count(), 0);
        assert_eq!(word.effect().output_count(), 1);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        // 1 "x" + : number below string, + requires both #$[].
        // A quote literal under + is an outright type error.
        let mut c = Compiler::new();
        let empty = Compiler::new().finish().unwrap();
        c.add_literal(Value::quote(empty), None);
        c.add_literal(num(2.0), None);
        c.add(WordRef::of(Opcode::Plus), None);
        let err = c.finish().unwrap_err();
        assert!(err.message.contains("type mismatch"), "{}", err.message);
        tails_core::heap::sweep();
    }

    #[test]
    fn test_declared_effect_is_enforced() {
        let mut c = Compiler::new();
        c.set_stack_effect(tails_core::parse_effect("a# -- #").unwrap().effect);
        c.add(WordRef::of(Opcode::Dup), None);
        c.add(WordRef::of(Opcode::Plus), None);
        let word = c.finish().unwrap();
        assert_eq!(word.effect().to_string(), "# -- #");

        // Declared one output, body leaves two.
        let mut c = Compiler::new();
        c.set_stack_effect(tails_core::parse_effect("a# -- #").unwrap().effect);
        c.add(WordRef::of(Opcode::Dup), None);
        let err = c.finish().unwrap_err();
        assert!(err.message.contains("too many outputs"), "{}", err.message);
    }

    #[test]
    fn test_inconsistent_join_depth() {
        // IF-arm pushes a value, no ELSE: join depths differ.
        let mut c = Compiler::new();
        c.add_literal(num(0.0), None);
        let zb = c.add(WordRef::with_offset(Opcode::ZBranch, -1), None);
        c.add_literal(num(123.0), None);
        c.fix_branch(zb);
        let err = c.finish().unwrap_err();
        assert!(
            err.message.contains("inconsistent stack depth"),
            "{}",
            err.message
        );
    }

    #[test]
    fn test_balanced_join_merges_types() {
        // cond IF "s" ELSE 3 THEN -> one output, string-or-number.
        let mut c = Compiler::new();
        c.add_literal(num(1.0), None);
        let zb = c.add(WordRef::with_offset(Opcode::ZBranch, -1), None);
        c.add_literal(Value::string("a string here"), None);
        let br = c.add(WordRef::with_offset(Opcode::Branch, -1), None);
        c.fix_branch(zb);
        c.add_literal(num(3.0), None);
        c.fix_branch(br);
        let word = c.finish().unwrap();
        let out = word.effect().output(0);
        assert!(out.can_be(ValueType::String) && out.can_be(ValueType::Number));
        tails_core::heap::sweep();
    }

    #[test]
    fn test_recurse_needs_declaration() {
        let mut c = Compiler::new();
        c.add_recurse();
        let err = c.finish().unwrap_err();
        assert!(err.message.contains("RECURSE"), "{}", err.message);
    }

    #[test]
    fn test_nontail_recursion_is_unbounded() {
        // (n# -- #):  DUP 0= IF DROP 1 ELSE DUP 1 - RECURSE * THEN
        let mut c = Compiler::new();
        c.set_stack_effect(tails_core::parse_effect("n# -- #").unwrap().effect);
        c.add(WordRef::of(Opcode::Dup), None);
        c.add(WordRef::of(Opcode::EqZero), None);
        let zb = c.add(WordRef::with_offset(Opcode::ZBranch, -1), None);
        c.add(WordRef::of(Opcode::Drop), None);
        c.add_literal(num(1.0), None);
        let br = c.add(WordRef::with_offset(Opcode::Branch, -1), None);
        c.fix_branch(zb);
        c.add(WordRef::of(Opcode::Dup), None);
        c.add(WordRef::of(Opcode::One), None);
        c.add(WordRef::of(Opcode::Minus), None);
        c.add_recurse();
        c.add(WordRef::of(Opcode::Mult), None);
        c.fix_branch(br);
        let word = c.finish().unwrap();
        assert!(word.effect().is_unbounded());
    }

    #[test]
    fn test_ifelse_requires_literal_quotes() {
        // A quote-typed but non-literal operand is rejected.
        let mut c = Compiler::new();
        c.set_stack_effect(
            tails_core::parse_effect("x q1{} q2{} -- r").unwrap().effect,
        );
        c.add(WordRef::of(Opcode::IfElse), None);
        let err = c.finish().unwrap_err();
        assert!(err.message.contains("two quotations"), "{}", err.message);
    }
}
