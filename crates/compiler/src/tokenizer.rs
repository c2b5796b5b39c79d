//! Tokenizer for the infix front end
//!
//! A fairly typical C-like tokenizer: numbers, double-quoted strings
//! with backslash escapes, identifiers (which may end in `:` to form
//! keywords like `if:`), and operators. Which punctuation sequences are
//! operators is decided by the symbol table, using greedy longest match
//! up to three UTF-8 characters. Bytes outside ASCII are treated as
//! identifier characters.

use tails_core::error::{CompileError, Result};

use crate::symbol::SymbolTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// Numeric literal (decimal or float; NaN/Inf are rejected).
    Number,
    /// Double-quoted string literal.
    Str,
    /// Alphanumeric identifier; `_` allowed, may end in `:`.
    Identifier,
    /// A registered operator (longest match wins).
    Operator,
    /// End of input.
    End,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub ttype: TokenType,
    /// The token exactly as written.
    pub literal: String,
    /// Decoded contents, for `Str` tokens.
    pub string_value: String,
    /// Parsed value, for `Number` tokens.
    pub number_value: f64,
}

impl Token {
    fn end() -> Token {
        Token {
            ttype: TokenType::End,
            literal: String::new(),
            string_value: String::new(),
            number_value: 0.0,
        }
    }

    pub fn is(&self, literal: &str) -> bool {
        self.ttype != TokenType::End && self.literal == literal
    }
}

pub struct Tokenizer<'s> {
    src: &'s str,
    /// Next byte to be lexed.
    next: usize,
    /// Start of the most recent token (error locations).
    cur_pos: usize,
    peeked: Option<Token>,
}

impl<'s> Tokenizer<'s> {
    pub fn new(src: &'s str) -> Self {
        Tokenizer {
            src,
            next: 0,
            cur_pos: 0,
            peeked: None,
        }
    }

    /// Byte offset of the latest token's start.
    pub fn position(&self) -> usize {
        self.cur_pos
    }

    /// The next token, consumed. Operators are recognized against
    /// `symbols`.
    pub fn next(&mut self, symbols: &SymbolTable) -> Result<Token> {
        match self.peeked.take() {
            Some(t) => Ok(t),
            None => self.read_token(symbols),
        }
    }

    /// The next token, not consumed. Idempotent.
    pub fn peek(&mut self, symbols: &SymbolTable) -> Result<&Token> {
        if self.peeked.is_none() {
            let t = self.read_token(symbols)?;
            self.peeked = Some(t);
        }
        Ok(self.peeked.as_ref().expect("just peeked"))
    }

    pub fn consume_peeked(&mut self) {
        self.peeked = None;
        self.cur_pos = self.next;
    }

    /// A position that [`rewind`](Self::rewind) can return to. Accounts
    /// for a pending peeked token.
    pub fn mark(&self) -> usize {
        if self.peeked.is_some() {
            self.cur_pos
        } else {
            self.next
        }
    }

    /// Back the tokenizer up to a previously taken mark.
    pub fn rewind(&mut self, mark: usize) {
        self.next = mark;
        self.cur_pos = mark;
        self.peeked = None;
    }

    pub fn at_end(&mut self, symbols: &SymbolTable) -> Result<bool> {
        Ok(self.peek(symbols)?.ttype == TokenType::End)
    }

    /// Skip ahead through the next occurrence of `c`; returns the byte
    /// offset just past it, or None if not found. Discards any peeked
    /// token.
    pub fn skip_through(&mut self, c: char) -> Option<usize> {
        let rest = &self.src[self.next..];
        let at = rest.find(c)?;
        self.next += at + c.len_utf8();
        self.peeked = None;
        Some(self.next)
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.src.as_bytes();
        while self.next < bytes.len() && bytes[self.next].is_ascii_whitespace() {
            self.next += 1;
        }
    }

    fn read_token(&mut self, symbols: &SymbolTable) -> Result<Token> {
        self.skip_whitespace();
        let start = self.next;
        self.cur_pos = start;
        let bytes = self.src.as_bytes();
        if start >= bytes.len() {
            return Ok(Token::end());
        }
        let c = bytes[start];
        if c == b'"' {
            self.read_string(start)
        } else if c.is_ascii_digit() {
            // A leading `-` is always the operator; unary minus folds
            // the literal in the parser.
            self.read_number(start)
        } else if c.is_ascii_alphabetic() || c == b'_' {
            self.read_identifier(start, symbols)
        } else if c >= 0x80 {
            // Non-ASCII: a registered operator (like `≠`) wins,
            // otherwise it starts an identifier.
            match self.read_symbol_at(start, symbols) {
                Some(end) => Ok(self.operator_token(start, end)),
                None => self.read_identifier(start, symbols),
            }
        } else {
            // Punctuation: longest registered operator wins.
            let Some(end) = self.read_symbol_at(start, symbols) else {
                return Err(CompileError::at(
                    format!("unknown token `{}`", self.char_at(start)),
                    start,
                ));
            };
            Ok(self.operator_token(start, end))
        }
    }

    fn operator_token(&mut self, start: usize, end: usize) -> Token {
        self.next = end;
        Token {
            ttype: TokenType::Operator,
            literal: self.src[start..end].to_string(),
            string_value: String::new(),
            number_value: 0.0,
        }
    }

    fn digit_at(&self, i: usize) -> bool {
        self.src.as_bytes().get(i).is_some_and(|b| b.is_ascii_digit())
    }

    fn char_at(&self, i: usize) -> char {
        self.src[i..].chars().next().unwrap_or('\0')
    }

    fn read_string(&mut self, start: usize) -> Result<Token> {
        let bytes = self.src.as_bytes();
        let mut value = String::new();
        let mut i = start + 1;
        loop {
            if i >= bytes.len() {
                return Err(CompileError::at("unclosed string literal", start));
            }
            match bytes[i] {
                b'"' => break,
                b'\\' => {
                    let escaped = bytes
                        .get(i + 1)
                        .ok_or_else(|| CompileError::at("unclosed string literal", start))?;
                    value.push(match escaped {
                        b'n' => '\n',
                        b't' => '\t',
                        b'r' => '\r',
                        b'0' => '\0',
                        other => *other as char,
                    });
                    i += 2;
                }
                _ => {
                    // Copy a whole UTF-8 character.
                    let ch = self.char_at(i);
                    value.push(ch);
                    i += ch.len_utf8();
                }
            }
        }
        self.next = i + 1; // past the closing quote
        Ok(Token {
            ttype: TokenType::Str,
            literal: self.src[start..self.next].to_string(),
            string_value: value,
            number_value: 0.0,
        })
    }

    fn read_number(&mut self, start: usize) -> Result<Token> {
        let bytes = self.src.as_bytes();
        let mut i = start;
        while self.digit_at(i) {
            i += 1;
        }
        if bytes.get(i) == Some(&b'.') && self.digit_at(i + 1) {
            i += 1;
            while self.digit_at(i) {
                i += 1;
            }
        }
        if matches!(bytes.get(i), Some(b'e' | b'E')) {
            let mut j = i + 1;
            if matches!(bytes.get(j), Some(b'+' | b'-')) {
                j += 1;
            }
            if self.digit_at(j) {
                i = j;
                while self.digit_at(i) {
                    i += 1;
                }
            }
        }
        let text = &self.src[start..i];
        let n: f64 = text
            .parse()
            .map_err(|_| CompileError::at("invalid number", start))?;
        if !n.is_finite() {
            return Err(CompileError::at("number out of range", start));
        }
        self.next = i;
        Ok(Token {
            ttype: TokenType::Number,
            literal: text.to_string(),
            string_value: String::new(),
            number_value: n,
        })
    }

    fn read_identifier(&mut self, start: usize, symbols: &SymbolTable) -> Result<Token> {
        let mut i = start;
        while i < self.src.len() {
            let ch = self.char_at(i);
            let is_ident = if ch.is_ascii() {
                ch.is_ascii_alphanumeric() || ch == '_'
            } else {
                // Non-ASCII continues the identifier unless it is a
                // registered operator.
                self.read_symbol_at(i, symbols).is_none()
            };
            if !is_ident {
                break;
            }
            i += ch.len_utf8();
        }
        // Keyword identifiers may end in a colon (`if:`, `else:`).
        if self.src.as_bytes().get(i) == Some(&b':') {
            i += 1;
        }
        self.next = i;
        Ok(Token {
            ttype: TokenType::Identifier,
            literal: self.src[start..i].to_string(),
            string_value: String::new(),
            number_value: 0.0,
        })
    }

    /// Longest registered operator starting at `start`, up to three
    /// UTF-8 characters long.
    fn read_symbol_at(&self, start: usize, symbols: &SymbolTable) -> Option<usize> {
        let mut end = None;
        let mut pos = start;
        for _ in 0..3 {
            let ch = self.src[pos..].chars().next()?;
            pos += ch.len_utf8();
            if symbols.get(&self.src[start..pos]).is_some() {
                end = Some(pos);
            }
            if pos >= self.src.len() {
                break;
            }
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;

    fn symbols() -> SymbolTable {
        let mut t = SymbolTable::new();
        for op in ["+", "-", "*", "==", "=", ":=", "(", ")", ";"] {
            t.add(Symbol::bare(op));
        }
        t
    }

    fn lex(src: &str) -> Vec<(TokenType, String)> {
        let syms = symbols();
        let mut tok = Tokenizer::new(src);
        let mut out = Vec::new();
        loop {
            let t = tok.next(&syms).unwrap();
            if t.ttype == TokenType::End {
                break;
            }
            out.push((t.ttype, t.literal));
        }
        out
    }

    #[test]
    fn test_numbers_and_operators() {
        let tokens = lex("3+4*5");
        assert_eq!(
            tokens,
            vec![
                (TokenType::Number, "3".into()),
                (TokenType::Operator, "+".into()),
                (TokenType::Number, "4".into()),
                (TokenType::Operator, "*".into()),
                (TokenType::Number, "5".into()),
            ]
        );
    }

    #[test]
    fn test_longest_match_wins() {
        let tokens = lex("a:=b==c=d");
        let ops: Vec<_> = tokens
            .iter()
            .filter(|(t, _)| *t == TokenType::Operator)
            .map(|(_, l)| l.clone())
            .collect();
        assert_eq!(ops, vec![":=", "==", "="]);
    }

    #[test]
    fn test_identifier_with_colon() {
        let tokens = lex("x if: 1 else: 2");
        assert_eq!(tokens[1], (TokenType::Identifier, "if:".into()));
        assert_eq!(tokens[3], (TokenType::Identifier, "else:".into()));
    }

    #[test]
    fn test_minus_is_always_an_operator() {
        assert_eq!(lex("-4")[0], (TokenType::Operator, "-".into()));
        let tokens = lex("a-4");
        assert_eq!(tokens[1], (TokenType::Operator, "-".into()));
    }

    #[test]
    fn test_string_escapes() {
        let syms = symbols();
        let mut tok = Tokenizer::new(r#""a\"b\nc""#);
        let t = tok.next(&syms).unwrap();
        assert_eq!(t.ttype, TokenType::Str);
        assert_eq!(t.string_value, "a\"b\nc");
    }

    #[test]
    fn test_unclosed_string() {
        let syms = symbols();
        let mut tok = Tokenizer::new("\"oops");
        assert!(tok.next(&syms).is_err());
    }

    #[test]
    fn test_unknown_token() {
        let syms = symbols();
        let mut tok = Tokenizer::new("@");
        let err = tok.next(&syms).unwrap_err();
        assert!(err.message.contains("unknown token"));
    }

    #[test]
    fn test_utf8_identifier() {
        let tokens = lex("héllo");
        assert_eq!(tokens, vec![(TokenType::Identifier, "héllo".into())]);
    }

    #[test]
    fn test_unicode_operator_breaks_identifier() {
        let mut syms = symbols();
        syms.add(Symbol::bare("≠"));
        let mut tok = Tokenizer::new("a≠b");
        assert_eq!(tok.next(&syms).unwrap().literal, "a");
        let op = tok.next(&syms).unwrap();
        assert_eq!(op.ttype, TokenType::Operator);
        assert_eq!(op.literal, "≠");
        assert_eq!(tok.next(&syms).unwrap().literal, "b");
    }
}
