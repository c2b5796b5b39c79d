//! Grammar Symbols
//!
//! The infix grammar is driven entirely by a table of [`Symbol`]s. A
//! symbol may be usable in prefix, infix, and/or postfix position, each
//! with its own binding priority and parse rule; most rules just bind a
//! word to call, while the structural ones (parentheses, braces, `;`,
//! `if:`, `let`, parameters) have dedicated rules the parser interprets.
//!
//! The table is a chain of scopes: lookups consult the innermost scope
//! first. Function parameters and `let` locals live in an inner scope on
//! top of the fixed grammar.

use std::collections::HashMap;

use tails_core::effect::TypeSet;
use tails_core::word::Word;

/// Binding priority of an operator. Higher binds tighter.
pub type Priority = i32;

/// "Not usable in this position".
pub const NO_PRIORITY: Priority = i32::MIN;

/// How to parse a symbol in prefix position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixRule {
    /// Parse an operand, then call the bound word.
    CallWord,
    /// `-`: fold a literal, or compile `0 swap -`.
    UnaryMinus,
    /// `(`: parenthesized subexpression.
    Group,
    /// `{`: compile a nested quotation.
    Quote,
    /// `let name = expr`.
    Let,
    /// `name(args)`: call the bound word with a parenthesized list.
    FunctionCall,
    /// A function parameter or local: read it, or `name := expr`.
    Param,
}

/// How to parse a symbol in infix position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixRule {
    /// Parse the RHS, then call the bound word.
    CallWord,
    /// `;`: drop the LHS outputs, continue with the RHS.
    Sequence,
    /// `cond if: a else: b`.
    IfColon,
    /// Registered for tokenization only (`=` outside `let`).
    Reject,
}

/// How to parse a symbol in postfix position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixRule {
    /// `(`: apply the LHS quotation to an argument list.
    CallQuote,
}

/// A parameter or local bound to a stack slot.
#[derive(Debug, Clone, Copy)]
pub struct ParamBinding {
    pub types: TypeSet,
    /// Slot id: 0, -1, … for parameters; +1, +2, … for locals.
    pub stack_pos: i32,
}

/// One grammar symbol.
pub struct Symbol {
    pub token: String,
    /// The word the default rules compile a call to.
    pub word: Option<*const Word>,
    pub prefix_priority: Priority,
    pub left_priority: Priority,
    pub right_priority: Priority,
    pub postfix_priority: Priority,
    pub prefix_rule: Option<PrefixRule>,
    pub infix_rule: Option<InfixRule>,
    pub postfix_rule: Option<PostfixRule>,
    pub param: Option<ParamBinding>,
}

impl Symbol {
    /// A symbol with no parse positions: recognized by the tokenizer,
    /// meaningful only as a delimiter (`)`, `}`, `,`, `else:`).
    pub fn bare(token: &str) -> Symbol {
        Symbol {
            token: token.to_string(),
            word: None,
            prefix_priority: NO_PRIORITY,
            left_priority: NO_PRIORITY,
            right_priority: NO_PRIORITY,
            postfix_priority: NO_PRIORITY,
            prefix_rule: None,
            infix_rule: None,
            postfix_rule: None,
            param: None,
        }
    }

    /// A symbol named after, and bound to, a word.
    pub fn for_word(word: *const Word) -> Symbol {
        let name = unsafe { (*word).name().unwrap_or_default().to_string() };
        let mut s = Symbol::bare(&name);
        s.word = Some(word);
        s
    }

    /// A parameter/local reference symbol.
    pub fn param(name: &str, types: TypeSet, stack_pos: i32) -> Symbol {
        let mut s = Symbol::bare(name);
        s.prefix_priority = 99;
        s.prefix_rule = Some(PrefixRule::Param);
        s.param = Some(ParamBinding { types, stack_pos });
        s
    }

    #[must_use]
    pub fn with_word(mut self, word: *const Word) -> Symbol {
        self.word = Some(word);
        self
    }

    #[must_use]
    pub fn prefix(mut self, priority: Priority, rule: PrefixRule) -> Symbol {
        self.prefix_priority = priority;
        self.prefix_rule = Some(rule);
        self
    }

    #[must_use]
    pub fn infix(mut self, left: Priority, right: Priority, rule: InfixRule) -> Symbol {
        self.left_priority = left;
        self.right_priority = right;
        self.infix_rule = Some(rule);
        self
    }

    #[must_use]
    pub fn postfix(mut self, priority: Priority, rule: PostfixRule) -> Symbol {
        self.postfix_priority = priority;
        self.postfix_rule = Some(rule);
        self
    }

    pub fn is_prefix(&self) -> bool {
        self.prefix_rule.is_some()
    }

    pub fn is_infix(&self) -> bool {
        self.infix_rule.is_some()
    }

    pub fn is_postfix(&self) -> bool {
        self.postfix_rule.is_some()
    }
}

/// A chain of symbol scopes. Names are case-insensitive.
#[derive(Default)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            scopes: vec![HashMap::new()],
        }
    }

    /// Add a symbol to the innermost scope.
    pub fn add(&mut self, symbol: Symbol) {
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .insert(symbol.token.to_uppercase(), symbol);
    }

    /// Open an inner scope (function parameters and locals).
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Look a name up, innermost scope first.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        let key = name.to_uppercase();
        self.scopes.iter().rev().find_map(|s| s.get(&key))
    }

    /// True if the innermost scope itself defines `name`.
    pub fn innermost_has(&self, name: &str) -> bool {
        self.scopes
            .last()
            .expect("at least one scope")
            .contains_key(&name.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_lookup() {
        let mut t = SymbolTable::new();
        t.add(Symbol::bare("+").infix(50, 51, InfixRule::CallWord));
        t.push_scope();
        t.add(Symbol::param("x", TypeSet::any(), 0));

        assert!(t.get("+").unwrap().is_infix());
        assert!(t.get("X").unwrap().is_prefix());
        assert!(t.innermost_has("x"));
        assert!(!t.innermost_has("+"));
    }

    #[test]
    fn test_case_insensitive() {
        let mut t = SymbolTable::new();
        t.add(Symbol::bare("abs"));
        assert!(t.get("ABS").is_some());
        assert!(t.get("Abs").is_some());
    }
}
