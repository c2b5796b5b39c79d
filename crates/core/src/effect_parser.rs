//! Stack-Effect Literals
//!
//! Parses human-readable stack effect declarations like `"a# b$ -- c"`:
//! tokens before the `--` are inputs, tokens after are outputs, each a
//! name and/or type sigils:
//!
//! - `?` null, `#` number, `$` string, `[` `]` array, `{` `}` quote
//! - letters, digits and `_` form the entry's name (one contiguous run)
//! - no sigils (or only `?`) means any type
//! - an output whose name matches an input's declares that it has the
//!   same runtime type (and value) as that input
//!
//! Used both for the primitives' built-in declarations and for the
//! `( … -- … )` heads of quotations and Smol functions.

use crate::error::{CompileError, Result};
use crate::effect::{StackEffect, TypeSet};
use crate::value::ValueType;

/// A parsed effect declaration: the effect plus the names given to each
/// entry (empty string = unnamed), ordered top of stack first.
#[derive(Debug, Clone)]
pub struct EffectDecl {
    pub effect: StackEffect,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
}

/// Parse an effect declaration. Error locations are byte offsets into
/// `src`.
pub fn parse_effect(src: &str) -> Result<EffectDecl> {
    Parser {
        src,
        decl: EffectDecl {
            effect: StackEffect::new(),
            input_names: Vec::new(),
            output_names: Vec::new(),
        },
    }
    .parse()
}

struct Parser<'a> {
    src: &'a str,
    decl: EffectDecl,
}

impl Parser<'_> {
    fn parse(mut self) -> Result<EffectDecl> {
        let mut inputs = true;
        let bytes = self.src.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b' ' | b'\t' | b'\n' | b'\r' => i += 1,
                b'-' => {
                    if !inputs || bytes.get(i + 1) != Some(&b'-') {
                        return Err(CompileError::at("invalid stack separator", i));
                    }
                    inputs = false;
                    i += 2;
                }
                _ => i = self.parse_token(i, inputs)?,
            }
        }
        if inputs {
            return Err(CompileError::at("missing stack separator", self.src.len()));
        }
        self.decl.effect.set_max(0);
        // Present names top-of-stack first.
        self.decl.input_names.reverse();
        self.decl.output_names.reverse();
        Ok(self.decl)
    }

    /// Parse one entry token starting at `start`; returns the offset
    /// just past it.
    fn parse_token(&mut self, start: usize, is_input: bool) -> Result<usize> {
        let bytes = self.src.as_bytes();
        let mut types = TypeSet::none();
        let mut name_range: Option<(usize, usize)> = None;
        let mut name_done = false;
        let mut i = start;
        while i < bytes.len() {
            let c = bytes[i];
            match c {
                b'?' => types.add_type(ValueType::Null),
                b'#' => types.add_type(ValueType::Number),
                b'$' => types.add_type(ValueType::String),
                b'[' | b']' => types.add_type(ValueType::Array),
                b'{' | b'}' => types.add_type(ValueType::Quote),
                _ if c.is_ascii_alphanumeric() || c == b'_' => {
                    if name_done {
                        return Err(CompileError::at("invalid parameter or result name", i));
                    }
                    match name_range.as_mut() {
                        None => {
                            if c.is_ascii_digit() {
                                return Err(CompileError::at(
                                    "parameter name can't start with a digit",
                                    i,
                                ));
                            }
                            name_range = Some((i, i + 1));
                        }
                        Some((_, end)) => *end = i + 1,
                    }
                }
                b' ' | b'\t' | b'\n' | b'\r' | b'-' => break,
                _ => return Err(CompileError::at("unknown stack type symbol", i)),
            }
            if name_range.is_some() && !(c.is_ascii_alphanumeric() || c == b'_') {
                name_done = true;
            }
            i += 1;
        }

        // No sigils, or only `?`, admits any type.
        if !types.exists() || types == TypeSet::from_type(ValueType::Null) {
            types.add_all_types();
        }
        let name = name_range
            .map(|(a, b)| self.src[a..b].to_string())
            .unwrap_or_default();

        if is_input {
            if !name.is_empty() && self.decl.input_names.contains(&name) {
                return Err(CompileError::at("duplicate parameter name", start));
            }
            self.decl.effect.add_input(types);
            self.decl.input_names.push(name);
        } else {
            // An output named like an input mirrors that input's type.
            if !name.is_empty() {
                if let Some(idx) = self.decl.input_names.iter().position(|n| *n == name) {
                    // Input index counted from the top of the stack.
                    let from_top = self.decl.input_names.len() - 1 - idx;
                    let input_types = self.decl.effect.input(from_top);
                    types.set_input_match(input_types, from_top);
                }
            }
            self.decl.effect.add_output(types);
            self.decl.output_names.push(name);
        }
        Ok(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_inputs_and_outputs() {
        let d = parse_effect("a# b$ -- c").unwrap();
        let fx = &d.effect;
        assert_eq!(fx.input_count(), 2);
        assert_eq!(fx.output_count(), 1);
        assert_eq!(fx.input(0), TypeSet::from_type(ValueType::String)); // b on top
        assert_eq!(fx.input(1), TypeSet::from_type(ValueType::Number));
        assert!(fx.output(0).can_be_any());
        assert_eq!(d.input_names, vec!["b", "a"]); // top first
    }

    #[test]
    fn test_output_matches_input_by_name() {
        let d = parse_effect("a b -- a b a").unwrap();
        assert_eq!(d.effect.output(0).input_match(), Some(1)); // a is one below the top
        assert_eq!(d.effect.output(1).input_match(), Some(0));
        assert_eq!(d.effect.output(2).input_match(), Some(1));
    }

    #[test]
    fn test_sigil_combinations() {
        let d = parse_effect("x#$ -- n#").unwrap();
        let input = d.effect.input(0);
        assert!(input.can_be(ValueType::Number) && input.can_be(ValueType::String));
        assert!(!input.can_be(ValueType::Array));
        // A name alone doesn't restrict the type.
        let d = parse_effect("x -- ").unwrap();
        assert!(d.effect.input(0).can_be_any());
        // `?` alone means any, not null-only.
        let d = parse_effect("x? --").unwrap();
        assert!(d.effect.input(0).can_be_any());
        // Brackets and braces denote array and quote.
        let d = parse_effect("a[] q{} --").unwrap();
        assert_eq!(d.effect.input(0), TypeSet::from_type(ValueType::Quote));
        assert_eq!(d.effect.input(1), TypeSet::from_type(ValueType::Array));
    }

    #[test]
    fn test_empty_effect() {
        let d = parse_effect("--").unwrap();
        assert_eq!(d.effect.input_count(), 0);
        assert_eq!(d.effect.output_count(), 0);
    }

    #[test]
    fn test_max_defaults_to_net() {
        let d = parse_effect("-- a b c").unwrap();
        assert_eq!(d.effect.max(), 3);
    }

    #[test]
    fn test_missing_separator() {
        let err = parse_effect("a b").unwrap_err();
        assert!(err.message.contains("separator"));
    }

    #[test]
    fn test_duplicate_input_name() {
        assert!(parse_effect("a a -- b").is_err());
    }

    #[test]
    fn test_bad_symbol() {
        let err = parse_effect("a% -- b").unwrap_err();
        assert_eq!(err.location, Some(1));
    }
}
