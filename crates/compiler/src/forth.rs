//! The Postfix Front End
//!
//! Classical Forth-style syntax: whitespace-separated tokens, compiled
//! left to right into a [`Compiler`]. `"` starts a string literal, `[`
//! an array literal, `{` a quotation (optionally headed by a `(stack
//! effect)` declaration). IF/ELSE/THEN and BEGIN/WHILE/REPEAT compile
//! to branches whose destinations are tracked on the compiler's
//! control-flow stack. Anything else is looked up in the active
//! vocabularies, then tried as a number.

use tails_core::error::{CompileError, Result};
use tails_core::instruction::Opcode;
use tails_core::value::Value;
use tails_core::word::Word;
use tails_core::{parse_effect, vocabulary};

use crate::compiler::{Compiler, WordRef};

/// Compile a line of postfix source against the given input stack
/// (the word may consume at most those values).
pub fn compile_forth(source: &str, inputs: &[Value]) -> Result<Word> {
    let mut comp = Compiler::new();
    comp.set_input_stack(inputs);
    let mut parser = ForthParser {
        src: source,
        pos: 0,
    };
    parser.parse_into(&mut comp)?;
    parser.skip_whitespace();
    if parser.pos < parser.src.len() {
        return Err(CompileError::at(
            "unexpected delimiter; expected end of input",
            parser.pos,
        ));
    }
    comp.finish()
}

struct ForthParser<'s> {
    src: &'s str,
    pos: usize,
}

impl ForthParser<'_> {
    fn skip_whitespace(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_char(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.src.as_bytes().get(self.pos).copied()
    }

    /// Read the next token: a string literal (with its quotes), a
    /// single `( { [` delimiter, or a run of characters up to
    /// whitespace or a closing delimiter. Returns its byte offset.
    fn read_token(&mut self) -> (usize, &'_ str) {
        self.skip_whitespace();
        let bytes = self.src.as_bytes();
        let start = self.pos;
        match bytes.get(self.pos) {
            None => {}
            Some(b'"') => {
                self.pos += 1;
                while let Some(&c) = bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\\' && self.pos < bytes.len() {
                        self.pos += 1; // escaped character
                    } else if c == b'"' {
                        break;
                    }
                }
            }
            Some(b'(' | b'{' | b'[') => self.pos += 1,
            Some(_) => {
                // At least one character, then up to whitespace or a
                // closing delimiter.
                self.pos += 1;
                while let Some(&c) = bytes.get(self.pos) {
                    if c.is_ascii_whitespace() || matches!(c, b')' | b'}' | b']') {
                        break;
                    }
                    self.pos += 1;
                }
            }
        }
        (start, &self.src[start..self.pos])
    }

    fn parse_into(&mut self, comp: &mut Compiler) -> Result<()> {
        loop {
            let (off, token) = self.read_token();
            comp.cur_pos = Some(off);
            if token.is_empty() {
                break;
            } else if token == "}" {
                // End of a nested quotation: leave the `}` unconsumed.
                self.pos -= 1;
                break;
            } else if token.starts_with('"') {
                let s = parse_string(token, off)?;
                comp.add_literal(Value::string(&s), Some(off));
            } else if token == "[" {
                let array = self.parse_array(off)?;
                comp.add_literal(array, Some(off));
            } else if token == "{" {
                let quote = self.parse_quote(off)?;
                comp.add_literal(Value::quote(quote), Some(off));
            } else if token.eq_ignore_ascii_case("IF") {
                // IF compiles to 0BRANCH with its offset still pending.
                comp.push_branch('i', Some(Opcode::ZBranch));
            } else if token.eq_ignore_ascii_case("ELSE") {
                let if_pos = comp.pop_branch("i")?;
                comp.push_branch('e', Some(Opcode::Branch));
                comp.fix_branch(if_pos);
            } else if token.eq_ignore_ascii_case("THEN") {
                // No code; completes the branch from IF or ELSE.
                let pos = comp.pop_branch("ie")?;
                comp.fix_branch(pos);
            } else if token.eq_ignore_ascii_case("BEGIN") {
                comp.push_branch('b', None);
            } else if token.eq_ignore_ascii_case("WHILE") {
                if !comp.control_top_is('b') {
                    return Err(CompileError::at("no matching BEGIN for this WHILE", off));
                }
                comp.push_branch('w', Some(Opcode::ZBranch));
            } else if token.eq_ignore_ascii_case("REPEAT") {
                let while_pos = comp.pop_branch("w")?;
                let begin_pos = comp.pop_branch("b")?;
                comp.add_branch_back_to(begin_pos);
                comp.fix_branch(while_pos);
            } else if token.eq_ignore_ascii_case("RECURSE") {
                comp.add_recurse();
            } else if let Some(word) = vocabulary::lookup(token) {
                self.add_word(comp, word, off)?;
            } else if let Some(n) = as_number(token, off)? {
                comp.add_literal(Value::number(n), Some(off));
            } else {
                return Err(CompileError::at(format!("unknown word `{token}`"), off));
            }
        }
        Ok(())
    }

    fn add_word(&mut self, comp: &mut Compiler, word: *const Word, off: usize) -> Result<()> {
        let w = unsafe { &*word };
        if w.is_magic() {
            return Err(CompileError::at(
                format!("the word `{w}` is internal and cannot be used in source"),
                off,
            ));
        }
        if w.takes_param() {
            let (p_off, p_token) = self.read_token();
            let n = as_number(p_token, p_off)?
                .filter(|n| *n == n.trunc())
                .ok_or_else(|| {
                    CompileError::at(format!("`{w}` needs an integer parameter"), p_off)
                })?;
            let op = w.opcode().expect("parameterized words are native");
            comp.add(WordRef::with_offset(op, n as i32), Some(off));
            return Ok(());
        }
        comp.add_inline(word, Some(off))
    }

    /// `[ ... ]`: a recursive literal; elements are numbers, strings,
    /// or nested arrays.
    fn parse_array(&mut self, start: usize) -> Result<Value> {
        let mut items = Vec::new();
        loop {
            let (off, token) = self.read_token();
            if token == "]" {
                break;
            } else if token.is_empty() {
                return Err(CompileError::at("unfinished array literal", start));
            } else if token.starts_with('"') {
                items.push(Value::string(&parse_string(token, off)?));
            } else if token == "[" {
                items.push(self.parse_array(off)?);
            } else if let Some(n) = as_number(token, off)? {
                items.push(Value::number(n));
            } else {
                return Err(CompileError::at(
                    format!("invalid literal `{token}` in an array"),
                    off,
                ));
            }
        }
        Ok(Value::array(items))
    }

    /// `{ (effect)? ... }`: compile the body as an anonymous word. With
    /// no declared effect the inputs are inferred from the body.
    fn parse_quote(&mut self, start: usize) -> Result<Word> {
        let mut quote_comp = Compiler::new();
        if self.peek_char() == Some(b'(') {
            let effect_start = self.pos + 1;
            let rest = &self.src[effect_start..];
            let end = rest.find(')').ok_or_else(|| {
                CompileError::at("missing ')' to end the quotation's stack effect", start)
            })?;
            let decl = parse_effect(&rest[..end]).map_err(|e| e.offset_by(effect_start))?;
            quote_comp.set_stack_effect(decl.effect);
            self.pos = effect_start + end + 1;
        }
        self.parse_into(&mut quote_comp)?;
        if self.src.as_bytes().get(self.pos) == Some(&b'}') {
            self.pos += 1;
        } else {
            return Err(CompileError::at("missing '}'; unfinished quotation", start));
        }
        quote_comp.finish()
    }
}

/// Decode a string token (quotes included) into its contents.
fn parse_string(token: &str, off: usize) -> Result<String> {
    if token.len() < 2 || !token.ends_with('"') {
        return Err(CompileError::at("unfinished string literal", off));
    }
    let inner = &token[1..token.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => return Err(CompileError::at("unfinished string literal", off)),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Try to read a token as a number. Overflowing numerals are an error;
/// anything non-numeric (including `nan`/`inf` spellings) is `None` so
/// the caller reports an unknown word instead.
fn as_number(token: &str, off: usize) -> Result<Option<f64>> {
    match token.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Some(n)),
        Ok(_) => {
            if token.bytes().next().is_some_and(|c| c.is_ascii_digit())
                || (token.starts_with('-')
                    && token.as_bytes().get(1).is_some_and(|c| c.is_ascii_digit()))
            {
                Err(CompileError::at("number out of range", off))
            } else {
                Ok(None)
            }
        }
        Err(_) => Ok(None),
    }
}
