//! Arithmetic Primary Parsing
//!
//! Unary and postfix operators plus the leaves of an arithmetic
//! expression: numbers (including `base#digits`), variables, parameter
//! expansions, nested `$((...))`, command substitutions and quoted text.

use crate::ast::types::{
    ArithSubscript, ArithUnaryOp, ArithmeticExpansion, CommandSubstitution, Node, ParamExpansion,
    ParamLength,
};
use crate::parser::parser::Parser;
use crate::parser::scan::{is_digit, is_special_param};
use crate::parser::types::{ParseError, ParseResult};

/// Characters that end a primary without consuming anything
const ARITH_STOP_CHARS: &str = ")]:,;?|&<>=!+-*/%^~#{}";

/// `${name OP ...}` operators recognised inside arithmetic, longest first
const BRACED_PARAM_OPS: [&str; 12] = [
    ":-", ":=", ":+", ":?", ":", "##", "#", "%%", "%", "//", "/", "",
];

fn is_param_expansion_op(c: char) -> bool {
    matches!(
        c,
        ':' | '-' | '=' | '+' | '?' | '#' | '%' | '/' | '^' | ',' | '@' | '*' | '['
    )
}

fn unary(op: &str, operand: Node) -> Node {
    Node::ArithUnaryOp(ArithUnaryOp {
        op: op.to_string(),
        operand: Box::new(operand),
    })
}

fn command_sub(cmd: Option<Node>) -> Node {
    Node::CommandSubstitution(CommandSubstitution {
        command: Box::new(cmd.unwrap_or(Node::Empty)),
        brace: false,
    })
}

impl Parser {
    fn arith_error(&self, message: impl Into<String>) -> ParseError {
        ParseError::arithmetic(message, self.arith_pos)
    }

    fn arith_take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.arith_peek(0).filter(|&c| pred(c)) {
            out.push(c);
            self.arith_pos += 1;
        }
        out
    }

    // =========================================================================
    // UNARY / POSTFIX
    // =========================================================================

    pub(crate) fn arith_parse_unary(&mut self) -> ParseResult<Node> {
        self.arith_skip_ws();
        if self.arith_consume("++") {
            self.arith_skip_ws();
            return Ok(Node::ArithPreIncr(Box::new(self.arith_parse_unary()?)));
        }
        if self.arith_consume("--") {
            self.arith_skip_ws();
            return Ok(Node::ArithPreDecr(Box::new(self.arith_parse_unary()?)));
        }
        if let Some(c @ ('!' | '~' | '+' | '-')) = self.arith_peek(0) {
            // `++`/`--` were taken above
            self.arith_pos += 1;
            self.arith_skip_ws();
            let operand = self.arith_parse_unary()?;
            return Ok(unary(&c.to_string(), operand));
        }
        self.arith_parse_postfix()
    }

    fn arith_parse_postfix(&mut self) -> ParseResult<Node> {
        let mut left = self.arith_parse_primary()?;
        loop {
            self.arith_skip_ws();
            if self.arith_consume("++") {
                left = Node::ArithPostIncr(Box::new(left));
            } else if self.arith_consume("--") {
                left = Node::ArithPostDecr(Box::new(left));
            } else if self.arith_peek(0) == Some('[') {
                let Node::ArithVar(name) = &left else {
                    return Ok(left);
                };
                let array = name.clone();
                self.arith_pos += 1;
                self.arith_skip_ws();
                let index = self.arith_parse_comma()?;
                self.arith_skip_ws();
                if !self.arith_consume("]") {
                    return Err(self.arith_error("Expected ']' in array subscript"));
                }
                left = Node::ArithSubscript(ArithSubscript {
                    array,
                    index: Box::new(index),
                });
            } else {
                return Ok(left);
            }
        }
    }

    // =========================================================================
    // PRIMARIES
    // =========================================================================

    fn arith_parse_primary(&mut self) -> ParseResult<Node> {
        self.arith_skip_ws();
        let Some(c) = self.arith_peek(0) else {
            return Ok(Node::ArithEmpty);
        };
        match c {
            '(' => {
                self.arith_pos += 1;
                self.arith_skip_ws();
                let expr = self.arith_parse_comma()?;
                self.arith_skip_ws();
                if !self.arith_consume(")") {
                    return Err(self.arith_error("Expected ')' in arithmetic expression"));
                }
                Ok(expr)
            }
            '#' if self.arith_peek(1) == Some('$') => {
                self.arith_pos += 1;
                self.arith_parse_expansion()
            }
            '$' => self.arith_parse_expansion(),
            '\'' => {
                let content = self.arith_read_quoted('\'', false)?;
                Ok(Node::ArithNumber(content))
            }
            '"' => {
                let content = self.arith_read_quoted('"', true)?;
                Ok(Node::ArithNumber(content))
            }
            '`' => {
                let content = self.arith_read_quoted('`', true)?;
                let mut sub = Parser::new(&content, false, self.extglob);
                Ok(command_sub(sub.parse_detached_list()?))
            }
            '\\' => {
                self.arith_pos += 1;
                match self.arith_advance() {
                    Some(escaped) => Ok(Node::ArithEscape(escaped.to_string())),
                    None => Err(self.arith_error("Unexpected end after backslash in arithmetic")),
                }
            }
            c if ARITH_STOP_CHARS.contains(c) => Ok(Node::ArithEmpty),
            _ => self.arith_parse_number_or_var(),
        }
    }

    /// Quoted run ending at `quote`; `escapes` lets a backslash skip the next char.
    fn arith_read_quoted(&mut self, quote: char, escapes: bool) -> ParseResult<String> {
        self.arith_pos += 1;
        let start = self.arith_pos;
        while let Some(c) = self.arith_peek(0) {
            if c == quote {
                break;
            }
            self.arith_pos += if escapes && c == '\\' { 2 } else { 1 };
        }
        self.arith_pos = self.arith_pos.min(self.arith_src.len());
        let content: String = self.arith_src[start..self.arith_pos].iter().collect();
        if !self.arith_consume(&quote.to_string()) {
            let what = match quote {
                '\'' => "single quote",
                '"' => "double quote",
                _ => "backtick",
            };
            return Err(self.arith_error(format!("Unterminated {} in arithmetic", what)));
        }
        Ok(content)
    }

    fn arith_parse_expansion(&mut self) -> ParseResult<Node> {
        if !self.arith_consume("$") {
            return Err(self.arith_error("Expected '$'"));
        }
        match self.arith_peek(0) {
            Some('(') => return self.arith_parse_cmdsub(),
            Some('{') => return self.arith_parse_braced_param(),
            _ => {}
        }
        let mut name = String::new();
        while let Some(ch) = self.arith_peek(0) {
            if ch.is_alphanumeric() || ch == '_' {
                name.push(ch);
                self.arith_pos += 1;
            } else if (is_special_param(ch) || is_digit(ch)) && name.is_empty() {
                name.push(ch);
                self.arith_pos += 1;
                break;
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.arith_error("Expected variable name after $"));
        }
        Ok(Node::ParamExpansion(ParamExpansion::simple(name)))
    }

    /// `$(...)` or a nested `$((...))`; the cursor is on the first `(`.
    fn arith_parse_cmdsub(&mut self) -> ParseResult<Node> {
        self.arith_pos += 1;
        if self.arith_peek(0) == Some('(') {
            self.arith_pos += 1;
            let start = self.arith_pos;
            let mut depth = 1;
            while let Some(ch) = self.arith_peek(0) {
                if ch == '(' {
                    depth += 1;
                } else if ch == ')' {
                    if depth == 1 && self.arith_peek(1) == Some(')') {
                        break;
                    }
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                self.arith_pos += 1;
            }
            let content: String = self.arith_src[start..self.arith_pos].iter().collect();
            self.arith_pos = (self.arith_pos + 2).min(self.arith_src.len());
            let inner = self.parse_arith_expr(&content)?;
            return Ok(Node::ArithmeticExpansion(ArithmeticExpansion {
                expression: inner.map(Box::new),
            }));
        }

        let start = self.arith_pos;
        let mut depth = 1;
        while let Some(ch) = self.arith_peek(0) {
            if ch == '(' {
                depth += 1;
            } else if ch == ')' {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            self.arith_pos += 1;
        }
        let content: String = self.arith_src[start..self.arith_pos].iter().collect();
        self.arith_advance();
        let mut sub = Parser::new(&content, false, self.extglob);
        Ok(command_sub(sub.parse_detached_list()?))
    }

    fn arith_parse_braced_param(&mut self) -> ParseResult<Node> {
        self.arith_pos += 1;
        match self.arith_peek(0) {
            Some('!') => {
                self.arith_pos += 1;
                let name = self.arith_take_while(|c| c != '}');
                self.arith_consume("}");
                return Ok(Node::ParamIndirect(ParamExpansion::simple(name)));
            }
            Some('#') => {
                self.arith_pos += 1;
                let param = self.arith_take_while(|c| c != '}');
                self.arith_consume("}");
                return Ok(Node::ParamLength(ParamLength { param }));
            }
            _ => {}
        }

        let name = self.arith_take_while(|c| c != '}' && !is_param_expansion_op(c));
        if self.arith_consume("}") {
            return Ok(Node::ParamExpansion(ParamExpansion::simple(name)));
        }

        let mut rest = String::new();
        let mut depth = 1;
        while let Some(ch) = self.arith_peek(0) {
            if ch == '{' {
                depth += 1;
            } else if ch == '}' {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            rest.push(ch);
            self.arith_pos += 1;
        }
        self.arith_consume("}");

        let op = BRACED_PARAM_OPS
            .into_iter()
            .find(|op| rest.starts_with(op))
            .unwrap_or("");
        let arg = rest[op.len()..].to_string();
        Ok(Node::ParamExpansion(ParamExpansion::new(name, op, arg)))
    }

    fn arith_parse_number_or_var(&mut self) -> ParseResult<Node> {
        self.arith_skip_ws();
        let Some(c) = self.arith_peek(0) else {
            return Err(self.arith_error("Unexpected end of arithmetic expression"));
        };
        if c.is_numeric() {
            let prefix = self.arith_take_while(|ch| ch.is_alphanumeric() || ch == '#' || ch == '_');
            if self.arith_peek(0) == Some('$') {
                let expansion = self.arith_parse_expansion()?;
                return Ok(Node::ArithConcat(vec![Node::ArithNumber(prefix), expansion]));
            }
            return Ok(Node::ArithNumber(prefix));
        }
        if c.is_alphabetic() || c == '_' {
            let name = self.arith_take_while(|ch| ch.is_alphanumeric() || ch == '_');
            return Ok(Node::ArithVar(name));
        }
        Err(self.arith_error(format!(
            "Unexpected character '{}' in arithmetic expression",
            c
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Node {
        let mut p = Parser::new("", false, false);
        p.parse_arith_expr(src).unwrap().unwrap()
    }

    #[test]
    fn test_numbers_and_bases() {
        assert_eq!(expr("16#ff"), Node::ArithNumber("16#ff".to_string()));
        assert_eq!(
            expr("2#$x"),
            Node::ArithConcat(vec![
                Node::ArithNumber("2#".to_string()),
                Node::ParamExpansion(ParamExpansion::simple("x")),
            ])
        );
    }

    #[test]
    fn test_increments() {
        assert_eq!(
            expr("++i"),
            Node::ArithPreIncr(Box::new(Node::ArithVar("i".to_string())))
        );
        assert_eq!(
            expr("i--"),
            Node::ArithPostDecr(Box::new(Node::ArithVar("i".to_string())))
        );
    }

    #[test]
    fn test_subscript() {
        match expr("a[i+1]") {
            Node::ArithSubscript(s) => {
                assert_eq!(s.array, "a");
                assert_eq!(s.index.kind(), "binary-op");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_expansions() {
        assert_eq!(expr("$1"), Node::ParamExpansion(ParamExpansion::simple("1")));
        assert_eq!(
            expr("${x:-3}"),
            Node::ParamExpansion(ParamExpansion::new("x", ":-", "3"))
        );
        assert_eq!(
            expr("${#arr}"),
            Node::ParamLength(ParamLength { param: "arr".to_string() })
        );
        assert_eq!(expr("$((1))").kind(), "arith");
        assert_eq!(expr("$(echo 1)").kind(), "cmdsub");
    }

    #[test]
    fn test_quotes_and_escapes() {
        assert_eq!(expr("'12'"), Node::ArithNumber("12".to_string()));
        assert_eq!(expr("\\x"), Node::ArithEscape("x".to_string()));
    }

    #[test]
    fn test_missing_operand_is_empty() {
        match expr("1 +") {
            Node::ArithBinaryOp(b) => assert_eq!(*b.right, Node::ArithEmpty),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_errors() {
        let mut p = Parser::new("", false, false);
        let err = p.parse_arith_expr("(1 + 2").unwrap_err();
        assert_eq!(err.message, "Expected ')' in arithmetic expression");
        assert_eq!(err.pos, 6);

        let err = p.parse_arith_expr("@").unwrap_err();
        assert_eq!(err.message, "Unexpected character '@' in arithmetic expression");
        assert_eq!(err.pos, 0);
    }
}
