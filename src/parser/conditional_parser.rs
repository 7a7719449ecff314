//! Conditional Expression Parser
//!
//! Handles parsing of `[[ ... ]]` conditional commands.
//!
//! Grammar:
//!   cond_or   ::= cond_and ('||' cond_or)?
//!   cond_and  ::= cond_term ('&&' cond_and)?
//!   cond_term ::= '!' cond_term | '(' cond_or ')' | unary_op word
//!               | word binary_op word | word
//!
//! Words inside the brackets are read in the `Cond` word context, where `<`
//! and `>` are comparison operators rather than redirections. The operand
//! of `=~` is read in the `Regex` context.

use crate::ast::types::{BinaryTest, CondBinary, ConditionalExpr, Node, UnaryTest, Word};
use crate::parser::parser::Parser;
use crate::parser::scan::{is_redirect_char, is_whitespace, is_whitespace_no_newline};
use crate::parser::types::{
    ErrorKind, ParseError, ParseResult, WordContext, COND_BINARY_OPS, COND_UNARY_OPS, PST_CONDEXPR,
    PST_REGEXP,
};

impl Parser {
    /// Parse `[[ expr ]]`. Returns `None` when the cursor is not at `[[`
    /// followed by a blank.
    pub(crate) fn parse_conditional_expr(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if !self.lookahead_is("[[") {
            return Ok(None);
        }
        let after = self.pos + 2;
        if let Some(c) = self.char_at(after) {
            let continuation = c == '\\' && self.char_at(after + 1) == Some('\n');
            if !is_whitespace(c) && !continuation {
                return Ok(None);
            }
        }
        let open = self.pos;
        self.pos += 2;
        self.set_state(PST_CONDEXPR);
        self.mode.context = WordContext::Cond;

        let body = self.parse_cond_or().and_then(|body| {
            while self.peek().is_some_and(is_whitespace_no_newline) {
                self.pos += 1;
            }
            if !self.lookahead_is("]]") {
                return Err(ParseError::syntax(
                    "Expected ]] to close conditional expression",
                    self.pos,
                ));
            }
            self.pos += 2;
            Ok(body)
        });
        self.clear_state(PST_CONDEXPR);
        self.mode.context = WordContext::Normal;
        // running out of input before `]]` leaves the conditional unclosed
        let body = body.map_err(|e| {
            if e.kind == ErrorKind::Syntax && self.at_end() {
                ParseError::unterminated("unexpected EOF while looking for `]]'", open)
            } else {
                e
            }
        });

        Ok(Some(Node::ConditionalExpr(ConditionalExpr {
            body: Box::new(body?),
            redirects: self.collect_redirects()?,
        })))
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Blanks, newlines and line continuations are all insignificant here
    fn cond_skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if is_whitespace_no_newline(c) || c == '\n' {
                self.pos += 1;
            } else if c == '\\' && self.char_at(self.pos + 1) == Some('\n') {
                self.pos += 2;
            } else {
                break;
            }
        }
    }

    fn cond_at_end(&self) -> bool {
        self.at_end() || self.lookahead_is("]]")
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn parse_cond_or(&mut self) -> ParseResult<Node> {
        self.cond_skip_whitespace();
        let left = self.parse_cond_and()?;
        self.cond_skip_whitespace();
        if !self.cond_at_end() && self.lookahead_is("||") {
            self.pos += 2;
            let right = self.parse_cond_or()?;
            return Ok(Node::CondOr(CondBinary {
                left: Box::new(left),
                right: Box::new(right),
            }));
        }
        Ok(left)
    }

    fn parse_cond_and(&mut self) -> ParseResult<Node> {
        self.cond_skip_whitespace();
        let left = self.parse_cond_term()?;
        self.cond_skip_whitespace();
        if !self.cond_at_end() && self.lookahead_is("&&") {
            self.pos += 2;
            let right = self.parse_cond_and()?;
            return Ok(Node::CondAnd(CondBinary {
                left: Box::new(left),
                right: Box::new(right),
            }));
        }
        Ok(left)
    }

    fn parse_cond_term(&mut self) -> ParseResult<Node> {
        self.cond_skip_whitespace();
        if self.cond_at_end() {
            return Err(ParseError::syntax(
                "Unexpected end of conditional expression",
                self.pos,
            ));
        }

        // `!x` is a word, `! x` a negation
        if self.peek() == Some('!')
            && self.char_at(self.pos + 1).map_or(true, is_whitespace_no_newline)
        {
            self.pos += 1;
            let operand = self.parse_cond_term()?;
            return Ok(Node::CondNot(Box::new(operand)));
        }

        if self.peek() == Some('(') {
            self.pos += 1;
            let inner = self.parse_cond_or()?;
            self.cond_skip_whitespace();
            if self.peek() != Some(')') {
                return Err(ParseError::syntax(
                    "Expected ) in conditional expression",
                    self.pos,
                ));
            }
            self.pos += 1;
            return Ok(Node::CondParen(Box::new(inner)));
        }

        let Some(word1) = self.parse_cond_word()? else {
            return Err(ParseError::syntax(
                "Expected word in conditional expression",
                self.pos,
            ));
        };
        self.cond_skip_whitespace();

        if COND_UNARY_OPS.contains(word1.value.as_str()) {
            let Some(operand) = self.parse_cond_word()? else {
                return Err(ParseError::syntax(
                    format!("Expected operand after {}", word1.value),
                    self.pos,
                ));
            };
            return Ok(Node::UnaryTest(UnaryTest {
                op: word1.value,
                operand,
            }));
        }

        if let Some(c) = self.peek().filter(|_| !self.cond_at_end()) {
            if !matches!(c, '&' | '|' | ')') {
                if is_redirect_char(c) && self.char_at(self.pos + 1) != Some('(') {
                    self.pos += 1;
                    let op = c.to_string();
                    self.cond_skip_whitespace();
                    return self.finish_binary_test(op, word1, false);
                }
                let saved = self.pos;
                match self.parse_cond_word()? {
                    Some(op) if COND_BINARY_OPS.contains(op.value.as_str()) => {
                        self.cond_skip_whitespace();
                        let regex = op.value == "=~";
                        return self.finish_binary_test(op.value, word1, regex);
                    }
                    _ => self.pos = saved,
                }
            }
        }

        Ok(Node::UnaryTest(UnaryTest {
            op: "-n".to_string(),
            operand: word1,
        }))
    }

    fn finish_binary_test(&mut self, op: String, left: Word, regex: bool) -> ParseResult<Node> {
        let right = if regex {
            self.parse_cond_regex_word()?
        } else {
            self.parse_cond_word()?
        };
        match right {
            Some(right) => Ok(Node::BinaryTest(BinaryTest { op, left, right })),
            None => Err(ParseError::syntax(
                format!("Expected operand after {}", op),
                self.pos,
            )),
        }
    }

    // =========================================================================
    // WORDS
    // =========================================================================

    fn parse_cond_word(&mut self) -> ParseResult<Option<Word>> {
        self.cond_skip_whitespace();
        if self.cond_at_end() {
            return Ok(None);
        }
        if matches!(self.peek(), Some('(' | ')')) || self.lookahead_is("&&") || self.lookahead_is("||")
        {
            return Ok(None);
        }
        self.parse_word_internal(WordContext::Cond, false, false)
    }

    fn parse_cond_regex_word(&mut self) -> ParseResult<Option<Word>> {
        self.cond_skip_whitespace();
        if self.cond_at_end() {
            return Ok(None);
        }
        self.set_state(PST_REGEXP);
        let word = self.parse_word_internal(WordContext::Regex, false, false);
        self.clear_state(PST_REGEXP);
        self.mode.context = WordContext::Cond;
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::ErrorKind;

    fn cond(src: &str) -> Node {
        let mut p = Parser::new(src, false, false);
        match p.parse_conditional_expr().unwrap() {
            Some(Node::ConditionalExpr(c)) => *c.body,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn cond_err(src: &str) -> ParseError {
        let mut p = Parser::new(src, false, false);
        p.parse_conditional_expr().unwrap_err()
    }

    #[test]
    fn test_bare_word_is_nonempty_test() {
        match cond("[[ foo ]]") {
            Node::UnaryTest(t) => {
                assert_eq!(t.op, "-n");
                assert_eq!(t.operand.value, "foo");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unary_and_binary_operators() {
        match cond("[[ -f /etc/passwd ]]") {
            Node::UnaryTest(t) => assert_eq!((t.op.as_str(), t.operand.value.as_str()), ("-f", "/etc/passwd")),
            other => panic!("unexpected {:?}", other),
        }
        match cond("[[ $a -eq 3 ]]") {
            Node::BinaryTest(t) => {
                assert_eq!(t.op, "-eq");
                assert_eq!(t.left.value, "$a");
                assert_eq!(t.right.value, "3");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_comparison_with_angle_brackets() {
        match cond("[[ a < b ]]") {
            Node::BinaryTest(t) => assert_eq!(t.op, "<"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_regex_operand_keeps_parens() {
        match cond("[[ $x =~ ^(a|b)+$ ]]") {
            Node::BinaryTest(t) => {
                assert_eq!(t.op, "=~");
                assert_eq!(t.right.value, "^(a|b)+$");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_logical_operators_nest_to_the_right() {
        match cond("[[ a && b || c ]]") {
            Node::CondOr(or) => {
                assert!(matches!(*or.left, Node::CondAnd(_)));
                assert!(matches!(*or.right, Node::UnaryTest(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_negation_and_grouping() {
        match cond("[[ ! ( a || b ) ]]") {
            Node::CondNot(inner) => assert!(matches!(*inner, Node::CondParen(_))),
            other => panic!("unexpected {:?}", other),
        }
        // glued `!` is an ordinary word
        assert!(matches!(cond("[[ !x ]]"), Node::UnaryTest(_)));
    }

    #[test]
    fn test_newlines_inside_brackets() {
        assert!(matches!(cond("[[ a &&\n b ]]"), Node::CondAnd(_)));
    }

    #[test]
    fn test_not_a_conditional() {
        let mut p = Parser::new("[[x ]]", false, false);
        assert!(p.parse_conditional_expr().unwrap().is_none());
        assert_eq!(p.pos, 0);
    }

    #[test]
    fn test_context_is_restored() {
        let mut p = Parser::new("[[ a ]] > out", false, false);
        match p.parse_conditional_expr().unwrap() {
            Some(Node::ConditionalExpr(c)) => assert_eq!(c.redirects.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(p.mode.context, WordContext::Normal);
        assert!(!p.in_state(PST_CONDEXPR));
    }

    #[test]
    fn test_errors() {
        let err = cond_err("[[ ]]");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "Unexpected end of conditional expression");
        assert_eq!(cond_err("[[ -f ]]").message, "Expected operand after -f");
        assert_eq!(cond_err("[[ a == ]]").message, "Expected operand after ==");
        assert_eq!(
            cond_err("[[ ( a ]]").message,
            "Expected ) in conditional expression"
        );
        assert_eq!(
            cond_err("[[ a b").message,
            "Expected ]] to close conditional expression"
        );

        let err = cond_err("[[ -n x");
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 0);
    }
}
