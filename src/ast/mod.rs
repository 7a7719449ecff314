//! Abstract Syntax Tree (AST) Types for Bash
//!
//! One closed [`types::Node`] enum covers commands, compound commands,
//! redirections, word-level expansions, conditional terms and arithmetic.
//! Every node is owned by exactly one parent.
//!
//! Architecture:
//!   Input → Lexer → Parser → AST → S-expression

pub mod types;
