//! parable - A bash parser that mirrors bash's own parse dump
//!
//! This library parses bash source into an AST and renders every node as
//! the S-expression bash-oracle prints for the same input.

pub mod ast;
pub mod parser;
pub mod sexp;

pub use ast::types::*;
pub use parser::{parse, ErrorKind, ParseError, ParseResult, Parser};

/// Parse `source` and render each top-level node, one per line.
pub fn to_sexp(source: &str, extglob: bool) -> ParseResult<String> {
    let nodes = parse(source, extglob)?;
    Ok(nodes
        .iter()
        .map(Node::to_sexp)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sexp_joins_top_level_nodes() {
        assert_eq!(
            to_sexp("a\nb", false).unwrap(),
            "(command (word \"a\"))\n(command (word \"b\"))"
        );
    }

    #[test]
    fn test_to_sexp_of_blank_input() {
        assert_eq!(to_sexp("   \n", false).unwrap(), "");
    }

    #[test]
    fn test_unterminated_quote_reports_kind() {
        let err = to_sexp("echo 'open", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
    }
}
