//! Stack Effects
//!
//! A [`StackEffect`] is the declared contract of a word: the types it
//! consumes from the stack, the types it leaves, and how far the stack
//! may grow while it runs. Each position is a [`TypeSet`], a five-bit
//! bitmap over the value types; an output's TypeSet can additionally
//! declare that it mirrors one of the inputs ("input match"), which lets
//! the checker propagate exact types and literal values through words
//! like `DUP`.

use std::fmt;

use crate::error::{CompileError, Result};
use crate::value::ValueType;

// =============================================================================
// TypeSet
// =============================================================================

/// Number of value types, and the mask covering their flag bits.
const NUM_TYPES: u32 = 5;
const TYPE_FLAGS: u8 = (1 << NUM_TYPES) - 1;
const MATCH_FLAGS: u8 = !TYPE_FLAGS;

/// A set of value types describing one input or output of a stack effect.
#[derive(Clone, Copy, Default, Eq)]
pub struct TypeSet(u8);

impl TypeSet {
    /// The empty set (no type admitted).
    pub const fn none() -> Self {
        TypeSet(0)
    }

    /// The set admitting every type.
    pub const fn any() -> Self {
        TypeSet(TYPE_FLAGS)
    }

    pub const fn from_type(t: ValueType) -> Self {
        TypeSet(1 << t as u8)
    }

    pub fn exists(self) -> bool {
        self.type_flags() != 0
    }

    pub fn can_be_any(self) -> bool {
        self.type_flags() == TYPE_FLAGS
    }

    pub fn can_be(self, t: ValueType) -> bool {
        self.0 & (1 << t as u8) != 0
    }

    pub fn add_type(&mut self, t: ValueType) {
        self.0 |= 1 << t as u8;
    }

    pub fn add_all_types(&mut self) {
        self.0 |= TYPE_FLAGS;
    }

    /// Some type in this set, if any. Used for error messages.
    pub fn first_type(self) -> Option<ValueType> {
        (0..NUM_TYPES as u8)
            .find(|i| self.0 & (1 << i) != 0)
            .map(ValueType::from_index)
    }

    /// The input position (from the top) whose runtime type this output
    /// mirrors, if declared.
    pub fn input_match(self) -> Option<usize> {
        let m = (self.0 & MATCH_FLAGS) >> NUM_TYPES;
        if m == 0 { None } else { Some(m as usize - 1) }
    }

    /// Declare that this entry mirrors input `input_no` (from the top),
    /// keeping that input's type flags.
    pub fn set_input_match(&mut self, input: TypeSet, input_no: usize) {
        debug_assert!(input_no <= 6);
        self.0 = (((input_no + 1) as u8) << NUM_TYPES) | input.type_flags();
    }

    pub const fn type_flags(self) -> u8 {
        self.0 & TYPE_FLAGS
    }

    /// The set with any input-match annotation removed.
    pub const fn without_match(self) -> Self {
        TypeSet(self.type_flags())
    }
}

/// Set operations work on the type flags only; match annotations are
/// carried by the left operand for `|` and dropped by `&` and `-`.
impl std::ops::BitOr for TypeSet {
    type Output = TypeSet;
    fn bitor(self, rhs: TypeSet) -> TypeSet {
        TypeSet((self.0 | rhs.type_flags()) & TYPE_FLAGS)
    }
}

impl std::ops::BitAnd for TypeSet {
    type Output = TypeSet;
    fn bitand(self, rhs: TypeSet) -> TypeSet {
        TypeSet(self.type_flags() & rhs.type_flags())
    }
}

impl std::ops::Sub for TypeSet {
    type Output = TypeSet;
    fn sub(self, rhs: TypeSet) -> TypeSet {
        TypeSet(self.type_flags() & !rhs.type_flags())
    }
}

/// Equality considers the admitted types, not match annotations.
impl PartialEq for TypeSet {
    fn eq(&self, other: &TypeSet) -> bool {
        self.type_flags() == other.type_flags()
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.can_be_any() {
            return write!(f, "x");
        }
        if !self.exists() {
            return write!(f, "∅");
        }
        const SIGILS: [&str; 5] = ["?", "#", "$", "[]", "{}"];
        for (i, sigil) in SIGILS.iter().enumerate() {
            if self.0 & (1 << i) != 0 {
                write!(f, "{sigil}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.input_match() {
            Some(m) => write!(f, "TypeSet({self}/{m})"),
            None => write!(f, "TypeSet({self})"),
        }
    }
}

// =============================================================================
// StackEffect
// =============================================================================

/// Max-growth value meaning "unbounded" (set by non-tail recursion).
pub const UNBOUNDED_MAX: u16 = u16::MAX;

/// Declared stack shape of a word: inputs and outputs (each stored
/// bottom-to-top), plus the maximum stack growth while running.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StackEffect {
    inputs: Vec<TypeSet>,
    outputs: Vec<TypeSet>,
    max: u16,
    weird: bool,
}

impl StackEffect {
    /// The empty effect: no inputs, no outputs, no growth.
    pub fn new() -> Self {
        StackEffect::default()
    }

    /// An effect from input and output lists, each bottom-to-top.
    pub fn from_lists(inputs: Vec<TypeSet>, outputs: Vec<TypeSet>) -> Self {
        let mut fx = StackEffect {
            inputs,
            outputs,
            max: 0,
            weird: false,
        };
        fx.set_max(0);
        fx
    }

    /// An effect that is not fixed at compile time (call/dispatch ops,
    /// parameterized stack ops). The checker special-cases these.
    pub fn weird() -> Self {
        StackEffect {
            weird: true,
            ..StackEffect::default()
        }
    }

    pub fn is_weird(&self) -> bool {
        self.weird
    }

    pub fn input_count(&self) -> usize {
        debug_assert!(!self.weird);
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        debug_assert!(!self.weird);
        self.outputs.len()
    }

    /// Net change in stack depth: `outputs - inputs`.
    pub fn net(&self) -> i32 {
        self.outputs.len() as i32 - self.inputs.len() as i32
    }

    /// Max stack growth while running ([`UNBOUNDED_MAX`] = unbounded).
    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn is_unbounded(&self) -> bool {
        self.max == UNBOUNDED_MAX
    }

    /// Input `i`, counting from the top of the stack.
    pub fn input(&self, i: usize) -> TypeSet {
        self.inputs[self.inputs.len() - 1 - i]
    }

    /// Output `i`, counting from the top of the stack.
    pub fn output(&self, i: usize) -> TypeSet {
        self.outputs[self.outputs.len() - 1 - i]
    }

    pub fn input_mut(&mut self, i: usize) -> &mut TypeSet {
        let n = self.inputs.len();
        &mut self.inputs[n - 1 - i]
    }

    pub fn output_mut(&mut self, i: usize) -> &mut TypeSet {
        let n = self.outputs.len();
        &mut self.outputs[n - 1 - i]
    }

    /// Inputs bottom-to-top.
    pub fn inputs(&self) -> &[TypeSet] {
        &self.inputs
    }

    /// Outputs bottom-to-top.
    pub fn outputs(&self) -> &[TypeSet] {
        &self.outputs
    }

    pub fn add_input(&mut self, entry: TypeSet) {
        self.inputs.push(entry);
    }

    pub fn add_output(&mut self, entry: TypeSet) {
        self.outputs.push(entry);
    }

    /// Insert an input below all existing ones. Used when the checker
    /// infers the inputs of a quotation from its body.
    pub fn add_input_at_bottom(&mut self, entry: TypeSet) {
        self.inputs.insert(0, entry);
    }

    pub fn add_output_at_bottom(&mut self, entry: TypeSet) {
        self.outputs.insert(0, entry);
    }

    /// Raise the max-growth to at least `m` (and never below the net).
    pub fn set_max(&mut self, m: i32) {
        if self.max == UNBOUNDED_MAX {
            return;
        }
        let m = m.max(self.net()).max(self.max as i32).max(0);
        debug_assert!(m < UNBOUNDED_MAX as i32, "stack max too deep");
        self.max = m as u16;
    }

    #[must_use]
    pub fn with_max(mut self, m: i32) -> Self {
        self.set_max(m);
        self
    }

    /// Mark the max growth as unknown (non-tail recursion).
    #[must_use]
    pub fn with_unknown_max(mut self) -> Self {
        self.max = UNBOUNDED_MAX;
        self
    }

    /// The effect of running `self` and then `other`, per the rules:
    /// inputs = `max(a.in, b.in - a.net)`, net = `a.net + b.net`,
    /// max = `max(a.max, b.max + a.net)`. Overflow of any field is a
    /// hard error, as is sequencing a weird effect.
    ///
    /// Input-match annotations cannot survive composition and are
    /// stripped from the result's outputs.
    pub fn then(&self, other: &StackEffect) -> Result<StackEffect> {
        if self.weird || other.weird {
            return Err(CompileError::new(
                "can't combine an unknown stack effect",
            ));
        }
        // Inputs: mine, plus whatever `other` consumes beyond my outputs,
        // appended at the bottom (they lie beneath my inputs on entry).
        let extra = other.inputs.len().saturating_sub(self.outputs.len());
        let mut inputs: Vec<TypeSet> =
            other.inputs[..extra].iter().map(|t| t.without_match()).collect();
        inputs.extend(self.inputs.iter().map(|t| t.without_match()));

        // Outputs: my leftovers below everything `other` leaves.
        let leftover = self.outputs.len() - (other.inputs.len() - extra);
        let mut outputs: Vec<TypeSet> =
            self.outputs[..leftover].iter().map(|t| t.without_match()).collect();
        outputs.extend(other.outputs.iter().map(|t| t.without_match()));

        if inputs.len() > u8::MAX as usize || outputs.len() > u8::MAX as usize {
            return Err(CompileError::new("combined stack effect too large"));
        }

        let mut fx = StackEffect {
            inputs,
            outputs,
            max: 0,
            weird: false,
        };
        if self.is_unbounded() || other.is_unbounded() {
            fx.max = UNBOUNDED_MAX;
        } else {
            let max = (self.max as i32).max(self.net() + other.max as i32);
            if max >= UNBOUNDED_MAX as i32 {
                return Err(CompileError::new("combined stack effect too deep"));
            }
            fx.set_max(max);
        }
        Ok(fx)
    }
}

impl fmt::Display for StackEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weird {
            return write!(f, "???");
        }
        for input in &self.inputs {
            write!(f, "{input} ")?;
        }
        write!(f, "--")?;
        for output in &self.outputs {
            write!(f, " {output}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(inputs: &[TypeSet], outputs: &[TypeSet]) -> StackEffect {
        StackEffect::from_lists(inputs.to_vec(), outputs.to_vec())
    }

    const NUM: TypeSet = TypeSet::from_type(ValueType::Number);
    const STR: TypeSet = TypeSet::from_type(ValueType::String);

    #[test]
    fn test_typeset_ops() {
        let ns = NUM | STR;
        assert!(ns.can_be(ValueType::Number) && ns.can_be(ValueType::String));
        assert!(!ns.can_be(ValueType::Array));
        assert_eq!(ns & NUM, NUM);
        assert_eq!(ns - NUM, STR);
        assert!(!(NUM & STR).exists());
        assert_eq!(TypeSet::any() - TypeSet::any(), TypeSet::none());
    }

    #[test]
    fn test_input_match() {
        let mut out = TypeSet::none();
        out.set_input_match(NUM | STR, 1);
        assert_eq!(out.input_match(), Some(1));
        assert_eq!(out.type_flags(), (NUM | STR).type_flags());
        assert_eq!(out.without_match().input_match(), None);
    }

    #[test]
    fn test_counts_and_indexing() {
        // ( # $ -- $ ): string on top of the inputs.
        let e = fx(&[NUM, STR], &[STR]);
        assert_eq!(e.input_count(), 2);
        assert_eq!(e.input(0), STR);
        assert_eq!(e.input(1), NUM);
        assert_eq!(e.net(), -1);
        assert_eq!(e.max(), 0);
    }

    #[test]
    fn test_max_never_below_net() {
        let e = fx(&[], &[NUM, NUM]);
        assert_eq!(e.max(), 2);
        assert_eq!(e.with_max(5).max(), 5);
    }

    #[test]
    fn test_then_consumes_and_leaves() {
        // ( -- # # ) then ( # # -- # )  =>  ( -- # ) with max 2
        let a = fx(&[], &[NUM, NUM]);
        let b = fx(&[NUM, NUM], &[NUM]);
        let c = a.then(&b).unwrap();
        assert_eq!(c.input_count(), 0);
        assert_eq!(c.output_count(), 1);
        assert_eq!(c.max(), 2);

        // ( # -- ) then ( $ $ -- ) reaches two deeper than `a` provides.
        let a = fx(&[NUM], &[]);
        let b = fx(&[STR, STR], &[]);
        let c = a.then(&b).unwrap();
        assert_eq!(c.input_count(), 3);
        assert_eq!(c.input(0), NUM); // my input stays topmost
        assert_eq!(c.input(1), STR);
        assert_eq!(c.net(), -3);
    }

    #[test]
    fn test_then_identity() {
        let a = fx(&[NUM, STR], &[STR]).with_max(3);
        let empty = StackEffect::new();
        assert_eq!(empty.then(&a).unwrap(), a);
        assert_eq!(a.then(&empty).unwrap(), a);
    }

    #[test]
    fn test_then_associative() {
        let a = fx(&[NUM], &[NUM, NUM]);
        let b = fx(&[NUM, NUM], &[STR]);
        let c = fx(&[STR], &[]);
        let left = a.then(&b).unwrap().then(&c).unwrap();
        let right = a.then(&b.then(&c).unwrap()).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn test_then_rejects_weird() {
        assert!(StackEffect::weird().then(&StackEffect::new()).is_err());
    }

    #[test]
    fn test_unbounded_propagates() {
        let a = fx(&[], &[NUM]).with_unknown_max();
        let b = fx(&[NUM], &[]);
        assert!(a.then(&b).unwrap().is_unbounded());
        assert!(b.then(&a).unwrap().is_unbounded());
    }

    #[test]
    fn test_display() {
        let e = fx(&[NUM, TypeSet::any()], &[STR]);
        assert_eq!(e.to_string(), "# x -- $");
        assert_eq!(StackEffect::new().to_string(), "--");
    }
}
