//! Parser module for bash scripts
//!
//! This module contains the lexer and the recursive descent parser. All
//! grammar methods live on a single [`Parser`], split across files by the
//! part of the language they handle.

pub mod types;
pub mod lexer;
pub(crate) mod scan;
pub(crate) mod context;
pub mod arithmetic_primaries;
pub mod arithmetic_parser;
pub mod word_parser;
pub mod expansion_parser;
pub mod parser_substitution;
pub mod conditional_parser;
pub mod compound_parser;
pub mod command_parser;
pub mod parser;

// Re-exports
pub use types::{ErrorKind, ParseError, ParseResult};
pub use lexer::{Token, TokenType};
pub use parser::{parse, Parser, MAX_INPUT_SIZE};
