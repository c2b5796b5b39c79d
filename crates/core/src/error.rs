//! Compile-time error reporting
//!
//! Every failure on the compile path (lexing, parsing, stack checking,
//! assembly) is a [`CompileError`] carrying an optional byte offset into
//! the source line, so the REPL can print a caret under the offending
//! token.

use std::fmt;

/// An error produced while compiling a word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Byte offset into the source text, if the error has a location.
    pub location: Option<usize>,
}

impl CompileError {
    /// Create an error with no source location.
    pub fn new(message: impl Into<String>) -> Self {
        CompileError {
            message: message.into(),
            location: None,
        }
    }

    /// Create an error at a byte offset in the source.
    pub fn at(message: impl Into<String>, location: usize) -> Self {
        CompileError {
            message: message.into(),
            location: Some(location),
        }
    }

    /// Attach a location if the error doesn't already have one.
    #[must_use]
    pub fn with_location(mut self, location: usize) -> Self {
        self.location.get_or_insert(location);
        self
    }

    /// Shift the error's location by `base` bytes. Used when a nested
    /// parser reported an offset relative to a sub-slice of the source.
    #[must_use]
    pub fn offset_by(mut self, base: usize) -> Self {
        if let Some(loc) = self.location.as_mut() {
            *loc += base;
        }
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{} (at offset {})", self.message, loc),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Result alias used throughout the compile path.
pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_location_keeps_existing() {
        let err = CompileError::at("bad token", 7).with_location(99);
        assert_eq!(err.location, Some(7));
    }

    #[test]
    fn test_offset_by() {
        let err = CompileError::at("bad type", 2).offset_by(10);
        assert_eq!(err.location, Some(12));
        let err = CompileError::new("no loc").offset_by(10);
        assert_eq!(err.location, None);
    }
}
