//! Arithmetic Expression Parser
//!
//! Parses bash arithmetic expressions like:
//! - $((1 + 2))
//! - $((x++))
//! - $((a ? b : c))
//! - $((2#1010))
//!
//! Expressions are parsed from their own character buffer (`arith_src`)
//! with a separate cursor, so an expansion nested inside the expression
//! can swap buffers and restore them afterwards. Error positions are
//! relative to the expression text.

use crate::ast::types::{
    ArithAssign, ArithBinaryOp, ArithComma, ArithTernary, ArithmeticExpansion, Node,
};
use crate::parser::parser::Parser;
use crate::parser::scan::is_whitespace;
use crate::parser::types::{ParseResult, PST_ARITH};

/// Assignment operators, longest first so `<<=` wins over `<`
const ARITH_ASSIGN_OPS: [&str; 11] = [
    "<<=", ">>=", "+=", "-=", "*=", "/=", "%=", "&=", "^=", "|=", "=",
];

type Level = fn(&mut Parser) -> ParseResult<Node>;
type OpMatcher = fn(&Parser) -> Option<&'static str>;

pub(crate) fn binary(op: &str, left: Node, right: Node) -> Node {
    Node::ArithBinaryOp(ArithBinaryOp {
        op: op.to_string(),
        left: Box::new(left),
        right: Box::new(right),
    })
}

impl Parser {
    // =========================================================================
    // $(( ... ))
    // =========================================================================

    /// `$((expr))`. Backs off (returns `None`) when the body does not parse
    /// as arithmetic so the caller can retry it as `$( (...) )`.
    pub(crate) fn parse_arithmetic_expansion(&mut self) -> ParseResult<Option<(Node, String)>> {
        if self.peek() != Some('$')
            || self.char_at(self.pos + 1) != Some('(')
            || self.char_at(self.pos + 2) != Some('(')
        {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 3;
        let content_start = self.pos;
        let mut depth = 2;
        // end of the expression if `))` is split, as in `$(( (a) ) )`
        let mut first_close: Option<usize> = None;

        while let Some(c) = self.peek() {
            match c {
                '\'' => {
                    self.pos += 1;
                    while self.peek().is_some_and(|q| q != '\'') {
                        self.pos += 1;
                    }
                    if !self.at_end() {
                        self.pos += 1;
                    }
                }
                '"' => {
                    self.pos += 1;
                    while let Some(q) = self.peek() {
                        if q == '\\' && self.char_at(self.pos + 1).is_some() {
                            self.pos += 2;
                        } else {
                            self.pos += 1;
                            if q == '"' {
                                break;
                            }
                        }
                    }
                }
                '\\' if self.char_at(self.pos + 1).is_some() => self.pos += 2,
                '(' => {
                    depth += 1;
                    self.pos += 1;
                }
                ')' => {
                    if depth == 2 {
                        first_close = Some(self.pos);
                    }
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    self.pos += 1;
                }
                _ => {
                    if depth == 1 {
                        first_close = None;
                    }
                    self.pos += 1;
                }
            }
        }

        if depth != 0 {
            if self.at_end() {
                return Err(crate::parser::types::ParseError::unterminated(
                    "unexpected EOF looking for `))'",
                    start,
                ));
            }
            self.pos = start;
            return Ok(None);
        }
        let content = self.text(content_start, first_close.unwrap_or(self.pos));
        self.pos += 1;
        let text = self.text(start, self.pos);

        match self.parse_arith_expr(&content) {
            Ok(expr) => Ok(Some((
                Node::ArithmeticExpansion(ArithmeticExpansion {
                    expression: expr.map(Box::new),
                }),
                text,
            ))),
            Err(_) => {
                self.pos = start;
                Ok(None)
            }
        }
    }

    /// Parse `content` as a full arithmetic expression; `None` when blank.
    pub(crate) fn parse_arith_expr(&mut self, content: &str) -> ParseResult<Option<Node>> {
        let saved_src = std::mem::replace(&mut self.arith_src, content.chars().collect());
        let saved_pos = std::mem::replace(&mut self.arith_pos, 0);
        let saved_state = self.state;
        self.set_state(PST_ARITH);

        self.arith_skip_ws();
        let result = if self.arith_at_end() {
            Ok(None)
        } else {
            self.arith_parse_comma().map(Some)
        };

        self.state = saved_state;
        self.arith_src = saved_src;
        self.arith_pos = saved_pos;
        result
    }

    // =========================================================================
    // CURSOR
    // =========================================================================

    pub(crate) fn arith_at_end(&self) -> bool {
        self.arith_pos >= self.arith_src.len()
    }

    pub(crate) fn arith_peek(&self, offset: usize) -> Option<char> {
        self.arith_src.get(self.arith_pos + offset).copied()
    }

    pub(crate) fn arith_advance(&mut self) -> Option<char> {
        let c = self.arith_peek(0)?;
        self.arith_pos += 1;
        Some(c)
    }

    /// Skip blanks and backslash-newline pairs.
    pub(crate) fn arith_skip_ws(&mut self) {
        while let Some(c) = self.arith_peek(0) {
            if is_whitespace(c) {
                self.arith_pos += 1;
            } else if c == '\\' && self.arith_peek(1) == Some('\n') {
                self.arith_pos += 2;
            } else {
                break;
            }
        }
    }

    pub(crate) fn arith_match(&self, s: &str) -> bool {
        crate::parser::scan::starts_with(&self.arith_src, self.arith_pos, s)
    }

    pub(crate) fn arith_consume(&mut self, s: &str) -> bool {
        if self.arith_match(s) {
            self.arith_pos += s.chars().count();
            true
        } else {
            false
        }
    }

    /// `c` followed by something other than the listed characters
    fn arith_single(&self, c: char, not_followed_by: &[char]) -> bool {
        self.arith_peek(0) == Some(c)
            && !self.arith_peek(1).is_some_and(|n| not_followed_by.contains(&n))
    }

    // =========================================================================
    // PRECEDENCE LEVELS
    // =========================================================================

    pub(crate) fn arith_parse_comma(&mut self) -> ParseResult<Node> {
        let mut left = self.arith_parse_assign()?;
        loop {
            self.arith_skip_ws();
            if !self.arith_consume(",") {
                return Ok(left);
            }
            self.arith_skip_ws();
            let right = self.arith_parse_assign()?;
            left = Node::ArithComma(ArithComma {
                left: Box::new(left),
                right: Box::new(right),
            });
        }
    }

    fn arith_parse_assign(&mut self) -> ParseResult<Node> {
        let left = self.arith_parse_ternary()?;
        self.arith_skip_ws();
        for op in ARITH_ASSIGN_OPS {
            if !self.arith_match(op) {
                continue;
            }
            if op == "=" && self.arith_peek(1) == Some('=') {
                break;
            }
            self.arith_consume(op);
            self.arith_skip_ws();
            let right = self.arith_parse_assign()?;
            return Ok(Node::ArithAssign(ArithAssign {
                op: op.to_string(),
                target: Box::new(left),
                value: Box::new(right),
            }));
        }
        Ok(left)
    }

    fn arith_parse_ternary(&mut self) -> ParseResult<Node> {
        let condition = self.arith_parse_logical_or()?;
        self.arith_skip_ws();
        if !self.arith_consume("?") {
            return Ok(condition);
        }
        self.arith_skip_ws();
        let if_true = if self.arith_match(":") {
            None
        } else {
            Some(self.arith_parse_assign()?)
        };
        self.arith_skip_ws();
        let mut if_false = None;
        if self.arith_consume(":") {
            self.arith_skip_ws();
            if !self.arith_at_end() && self.arith_peek(0) != Some(')') {
                if_false = Some(self.arith_parse_ternary()?);
            }
        }
        Ok(Node::ArithTernary(ArithTernary {
            condition: Box::new(condition),
            if_true: if_true.map(Box::new),
            if_false: if_false.map(Box::new),
        }))
    }

    /// One left-associative binary level.
    fn arith_left_assoc(&mut self, next: Level, op_at: OpMatcher) -> ParseResult<Node> {
        let mut left = next(self)?;
        loop {
            self.arith_skip_ws();
            let Some(op) = op_at(self) else {
                return Ok(left);
            };
            self.arith_pos += op.len();
            self.arith_skip_ws();
            let right = next(self)?;
            left = binary(op, left, right);
        }
    }

    fn arith_parse_logical_or(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_logical_and, |p| {
            p.arith_match("||").then_some("||")
        })
    }

    fn arith_parse_logical_and(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_bitwise_or, |p| {
            p.arith_match("&&").then_some("&&")
        })
    }

    fn arith_parse_bitwise_or(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_bitwise_xor, |p| {
            p.arith_single('|', &['|', '=']).then_some("|")
        })
    }

    fn arith_parse_bitwise_xor(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_bitwise_and, |p| {
            p.arith_single('^', &['=']).then_some("^")
        })
    }

    fn arith_parse_bitwise_and(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_equality, |p| {
            p.arith_single('&', &['&', '=']).then_some("&")
        })
    }

    fn arith_parse_equality(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_comparison, |p| {
            ["==", "!="].into_iter().find(|op| p.arith_match(op))
        })
    }

    fn arith_parse_comparison(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_shift, |p| {
            if p.arith_match("<=") {
                Some("<=")
            } else if p.arith_match(">=") {
                Some(">=")
            } else if p.arith_single('<', &['<', '=']) {
                Some("<")
            } else if p.arith_single('>', &['>', '=']) {
                Some(">")
            } else {
                None
            }
        })
    }

    fn arith_parse_shift(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_additive, |p| {
            if p.arith_match("<<=") || p.arith_match(">>=") {
                return None;
            }
            ["<<", ">>"].into_iter().find(|op| p.arith_match(op))
        })
    }

    fn arith_parse_additive(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_multiplicative, |p| {
            if p.arith_single('+', &['+', '=']) {
                Some("+")
            } else if p.arith_single('-', &['-', '=']) {
                Some("-")
            } else {
                None
            }
        })
    }

    fn arith_parse_multiplicative(&mut self) -> ParseResult<Node> {
        self.arith_left_assoc(Parser::arith_parse_exponentiation, |p| {
            if p.arith_single('*', &['*', '=']) {
                Some("*")
            } else if p.arith_single('/', &['=']) {
                Some("/")
            } else if p.arith_single('%', &['=']) {
                Some("%")
            } else {
                None
            }
        })
    }

    /// `**` is right-associative.
    fn arith_parse_exponentiation(&mut self) -> ParseResult<Node> {
        let left = self.arith_parse_unary()?;
        self.arith_skip_ws();
        if !self.arith_consume("**") {
            return Ok(left);
        }
        self.arith_skip_ws();
        let right = self.arith_parse_exponentiation()?;
        Ok(binary("**", left, right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::types::ArithUnaryOp;

    fn expr(src: &str) -> Node {
        let mut p = Parser::new("", false, false);
        p.parse_arith_expr(src).unwrap().unwrap()
    }

    fn num(n: &str) -> Node {
        Node::ArithNumber(n.to_string())
    }

    fn var(n: &str) -> Node {
        Node::ArithVar(n.to_string())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("1 + 2 * 3"),
            binary("+", num("1"), binary("*", num("2"), num("3")))
        );
        assert_eq!(
            expr("a - b - c"),
            binary("-", binary("-", var("a"), var("b")), var("c"))
        );
    }

    #[test]
    fn test_exponent_is_right_associative() {
        assert_eq!(
            expr("2 ** 3 ** 2"),
            binary("**", num("2"), binary("**", num("3"), num("2")))
        );
    }

    #[test]
    fn test_assignment_and_comparison() {
        match expr("x <<= 2") {
            Node::ArithAssign(a) => assert_eq!(a.op, "<<="),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(expr("a == b"), binary("==", var("a"), var("b")));
        assert_eq!(expr("a <= b"), binary("<=", var("a"), var("b")));
    }

    #[test]
    fn test_ternary_with_missing_branch() {
        match expr("c ? : 2") {
            Node::ArithTernary(t) => {
                assert!(t.if_true.is_none());
                assert_eq!(t.if_false.map(|b| *b), Some(num("2")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unary_and_comma() {
        assert_eq!(
            expr("-x, !y"),
            Node::ArithComma(ArithComma {
                left: Box::new(Node::ArithUnaryOp(ArithUnaryOp {
                    op: "-".to_string(),
                    operand: Box::new(var("x")),
                })),
                right: Box::new(Node::ArithUnaryOp(ArithUnaryOp {
                    op: "!".to_string(),
                    operand: Box::new(var("y")),
                })),
            })
        );
    }

    #[test]
    fn test_blank_expression() {
        let mut p = Parser::new("", false, false);
        assert_eq!(p.parse_arith_expr("  ").unwrap(), None);
    }

    #[test]
    fn test_expansion_text_and_fallback() {
        let mut p = Parser::new("$((1+2)) x", false, false);
        let (node, text) = p.parse_arithmetic_expansion().unwrap().unwrap();
        assert_eq!(text, "$((1+2))");
        assert_eq!(node.kind(), "arith");

        // not arithmetic: left for the command substitution parser
        let mut p = Parser::new("$((@x))", false, false);
        assert!(p.parse_arithmetic_expansion().unwrap().is_none());
        assert_eq!(p.pos, 0);
    }

    #[test]
    fn test_unclosed_arithmetic_expansion() {
        let mut p = Parser::new("$((1 +", false, false);
        let err = p.parse_arithmetic_expansion().unwrap_err();
        assert!(err.is_unterminated());
        assert_eq!(err.pos, 0);
    }
}
