//! Parser Types and Constants
//!
//! Shared error type, state flags, and keyword tables used across parser modules.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Category of a parse failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing keyword or token, malformed redirect, bad `for ((;;))` triple
    Syntax,
    /// Unclosed quote, `${`, `$(`, backtick, bracket or other matched pair.
    /// Always reported at the opening position.
    Unterminated,
    /// Malformed arithmetic; the position is relative to the expression text
    Arithmetic,
}

/// Error raised when parsing fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: usize,
    pub line: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line != 0 && self.pos != 0 {
            write!(
                f,
                "Parse error at line {}, position {}: {}",
                self.line, self.pos, self.message
            )
        } else if self.pos != 0 {
            write!(f, "Parse error at position {}: {}", self.pos, self.message)
        } else {
            write!(f, "Parse error: {}", self.message)
        }
    }
}

impl ParseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, pos: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            pos,
            line: 0,
        }
    }

    pub fn syntax(message: impl Into<String>, pos: usize) -> Self {
        Self::new(ErrorKind::Syntax, message, pos)
    }

    pub fn unterminated(message: impl Into<String>, pos: usize) -> Self {
        Self::new(ErrorKind::Unterminated, message, pos)
    }

    pub fn arithmetic(message: impl Into<String>, pos: usize) -> Self {
        Self::new(ErrorKind::Arithmetic, message, pos)
    }

    /// Attach a 1-based line number computed from the source text.
    pub fn with_line_from(mut self, source: &[char]) -> Self {
        if self.kind != ErrorKind::Arithmetic && self.line == 0 && self.pos != 0 {
            let end = self.pos.min(source.len());
            self.line = 1 + source[..end].iter().filter(|&&c| c == '\n').count();
        }
        self
    }

    /// True for the "unterminated matched construct" family
    pub fn is_unterminated(&self) -> bool {
        self.kind == ErrorKind::Unterminated
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

// =============================================================================
// PARSER STATE FLAGS
// =============================================================================

pub const PST_CASEPAT: u32 = 0x1;
pub const PST_CMDSUBST: u32 = 0x2;
pub const PST_CASESTMT: u32 = 0x4;
pub const PST_CONDEXPR: u32 = 0x8;
pub const PST_COMPASSIGN: u32 = 0x10;
pub const PST_ARITH: u32 = 0x20;
pub const PST_HEREDOC: u32 = 0x40;
pub const PST_REGEXP: u32 = 0x80;
pub const PST_SUBSHELL: u32 = 0x200;
/// A specific character (`eof_token`) terminates the current list
pub const PST_EOFTOKEN: u32 = 0x1000;

// Matched-pair scan flags
pub const MP_DQUOTE: u32 = 0x1;
pub const MP_DOLBRACE: u32 = 0x2;
pub const MP_ARITH: u32 = 0x8;
pub const MP_ALLOWESC: u32 = 0x10;
pub const MP_EXTGLOB: u32 = 0x20;
pub const MP_ARRAYSUB: u32 = 0x80;

/// Where inside `${...}` the scanner currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DolbraceState {
    #[default]
    None,
    Param,
    Op,
    Word,
    Quote,
    Quote2,
}

/// Word-scanning mode; decides which characters end a word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordContext {
    #[default]
    Normal,
    /// Inside `[[ ... ]]`
    Cond,
    /// Right-hand operand of `=~`
    Regex,
}

// =============================================================================
// KEYWORD TABLES
// =============================================================================

lazy_static::lazy_static! {
    /// Reserved words in bash
    pub static ref RESERVED_WORDS: HashSet<&'static str> = [
        "case", "coproc", "do", "done", "elif", "else", "esac", "fi", "for",
        "function", "if", "in", "select", "then", "until", "while",
    ]
    .into_iter()
    .collect();

    /// Unary operators accepted inside `[[ ... ]]`
    pub static ref COND_UNARY_OPS: HashSet<&'static str> = [
        "-G", "-L", "-N", "-O", "-R", "-S", "-a", "-b", "-c", "-d", "-e", "-f",
        "-g", "-h", "-k", "-n", "-o", "-p", "-r", "-s", "-t", "-u", "-v", "-w",
        "-x", "-z",
    ]
    .into_iter()
    .collect();

    /// Binary operators accepted inside `[[ ... ]]`
    pub static ref COND_BINARY_OPS: HashSet<&'static str> = [
        "!=", "-ef", "-eq", "-ge", "-gt", "-le", "-lt", "-ne", "-nt", "-ot",
        "<", "=", "==", "=~", ">",
    ]
    .into_iter()
    .collect();

    /// Keywords that open a compound command (valid coproc bodies)
    pub static ref COMPOUND_KEYWORDS: HashSet<&'static str> =
        ["case", "for", "if", "select", "until", "while"].into_iter().collect();

    /// Builtins whose arguments may be array assignments
    pub static ref ASSIGNMENT_BUILTINS: HashSet<&'static str> = [
        "alias", "declare", "eval", "export", "let", "local", "readonly", "typeset",
    ]
    .into_iter()
    .collect();
}

/// Reserved word, or one of the tokens the grammar treats like one
pub fn is_reserved_like(word: &str) -> bool {
    RESERVED_WORDS.contains(word) || matches!(word, "{" | "}" | "[[" | "]]" | "!" | "time")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let e = ParseError::syntax("Expected 'fi'", 12);
        assert_eq!(e.to_string(), "Parse error at position 12: Expected 'fi'");

        let e = ParseError::syntax("Syntax error", 0);
        assert_eq!(e.to_string(), "Parse error: Syntax error");

        let src: Vec<char> = "a\nb\nc".chars().collect();
        let e = ParseError::unterminated("unexpected EOF", 4).with_line_from(&src);
        assert_eq!(e.line, 3);
        assert_eq!(e.to_string(), "Parse error at line 3, position 4: unexpected EOF");
        assert!(e.is_unterminated());
    }

    #[test]
    fn test_reserved_like() {
        assert!(is_reserved_like("esac"));
        assert!(is_reserved_like("[["));
        assert!(is_reserved_like("time"));
        assert!(!is_reserved_like("echo"));
    }
}
