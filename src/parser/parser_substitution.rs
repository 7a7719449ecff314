//! Command and Process Substitution Parsing
//!
//! `$(...)`, `${ cmd; }` funsubs, legacy backticks, `<(...)`/`>(...)` and
//! compound array assignments `(a b c)`. The parenthesised forms re-enter
//! the list grammar on the shared cursor; backticks are unescaped first and
//! handed to a fresh sub-parser.

use crate::ast::types::{Array, CommandSubstitution, Node, ProcessSubstitution};
use crate::parser::parser::Parser;
use crate::parser::scan::{
    find_heredoc_content_end, is_escape_char_in_backtick, is_metachar, is_quote, is_redirect_char,
    is_whitespace, is_whitespace_no_newline, strip_line_continuations_comment_aware,
};
use crate::parser::types::{
    ParseError, ParseResult, PST_CMDSUBST, PST_COMPASSIGN, PST_EOFTOKEN,
};

/// Unescaped command text and raw source text of a backtick substitution
#[derive(Default)]
struct BacktickText {
    content: String,
    text: String,
}

impl BacktickText {
    fn push(&mut self, c: char) {
        self.content.push(c);
        self.text.push(c);
    }

    fn push_str(&mut self, s: &str) {
        self.content.push_str(s);
        self.text.push_str(s);
    }
}

impl Parser {
    // =========================================================================
    // $(...) AND ${ ...; }
    // =========================================================================

    pub(crate) fn parse_command_substitution(&mut self) -> ParseResult<Option<(Node, String)>> {
        if self.peek() != Some('$') || self.char_at(self.pos + 1) != Some('(') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 2;
        let saved = self.enter_nested_list(PST_CMDSUBST | PST_EOFTOKEN, ')');
        let cmd = self.parse_list(true)?.unwrap_or(Node::Empty);
        self.skip_whitespace_and_newlines();
        if self.at_end() {
            self.restore_state(saved);
            return Err(ParseError::unterminated(
                "unexpected EOF looking for matching `)'",
                start,
            ));
        }
        if self.peek() != Some(')') {
            self.restore_state(saved);
            self.pos = start;
            return Ok(None);
        }
        self.pos += 1;
        let text = self.text(start, self.pos);
        self.restore_state(saved);
        Ok(Some((
            Node::CommandSubstitution(CommandSubstitution {
                command: Box::new(cmd),
                brace: false,
            }),
            text,
        )))
    }

    /// `${ cmd; }` or `${| cmd; }`; the cursor is just past `${`.
    pub(crate) fn parse_funsub(&mut self, start: usize) -> ParseResult<(Node, String)> {
        if self.peek() == Some('|') {
            self.pos += 1;
        }
        let saved = self.enter_nested_list(PST_CMDSUBST | PST_EOFTOKEN, '}');
        let cmd = self.parse_list(true)?.unwrap_or(Node::Empty);
        self.skip_whitespace_and_newlines();
        if self.peek() != Some('}') {
            self.restore_state(saved);
            return Err(ParseError::unterminated("unexpected EOF looking for `}'", start));
        }
        self.pos += 1;
        let text = self.text(start, self.pos);
        self.restore_state(saved);
        self.sync_lexer();
        Ok((
            Node::CommandSubstitution(CommandSubstitution {
                command: Box::new(cmd),
                brace: true,
            }),
            text,
        ))
    }

    // =========================================================================
    // BACKTICKS
    // =========================================================================

    pub(crate) fn parse_backtick_substitution(&mut self) -> ParseResult<Option<(Node, String)>> {
        if self.peek() != Some('`') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 1;

        let mut buf = BacktickText::default();
        buf.text.push('`');
        let mut pending: Vec<(String, bool)> = Vec::new();
        let mut current: Option<(String, bool)> = None;

        while let Some(c) = self.peek() {
            if let Some((delim, strip_tabs)) = current.clone() {
                if self.read_backtick_heredoc_line(&mut buf, &delim, strip_tabs) {
                    current = if pending.is_empty() {
                        None
                    } else {
                        Some(pending.remove(0))
                    };
                }
                continue;
            }
            if c == '`' {
                break;
            }
            let next = self.char_at(self.pos + 1);

            if c == '\\' && next.is_some() {
                match next {
                    Some('\n') => self.pos += 2,
                    Some(n) if is_escape_char_in_backtick(n) => {
                        self.pos += 2;
                        buf.content.push(n);
                        buf.text.push('\\');
                        buf.text.push(n);
                    }
                    _ => {
                        self.pos += 1;
                        buf.push(c);
                    }
                }
                continue;
            }

            if c == '<' && next == Some('<') {
                if self.char_at(self.pos + 2) == Some('<') {
                    self.copy_backtick_herestring(&mut buf);
                    continue;
                }
                self.pos += 2;
                buf.push_str("<<");
                let mut strip_tabs = false;
                if self.peek() == Some('-') {
                    strip_tabs = true;
                    self.pos += 1;
                    buf.push('-');
                }
                while let Some(ch) = self.peek().filter(|&ch| is_whitespace_no_newline(ch)) {
                    self.pos += 1;
                    buf.push(ch);
                }
                let delimiter = self.read_backtick_heredoc_delimiter(&mut buf);
                if !delimiter.is_empty() {
                    pending.push((delimiter, strip_tabs));
                }
                continue;
            }

            self.pos += 1;
            buf.push(c);
            if c == '\n' && !pending.is_empty() {
                current = Some(pending.remove(0));
            }
        }

        if self.at_end() {
            return Err(ParseError::unterminated("Unterminated backtick", start));
        }
        self.pos += 1;
        buf.text.push('`');
        let BacktickText { mut content, text } = buf;

        if !pending.is_empty() {
            // bodies of heredocs opened on the last line follow the closing backtick
            let (body_start, body_end) = find_heredoc_content_end(&self.src, self.pos, &pending);
            if body_end > body_start {
                content.push_str(&self.text(body_start, body_end));
                self.cmdsub_heredoc_end = Some(match self.cmdsub_heredoc_end {
                    Some(end) => end.max(body_end),
                    None => body_end,
                });
            }
        }

        let mut sub = Parser::new(&content, false, self.extglob);
        let cmd = sub.parse_detached_list()?.unwrap_or(Node::Empty);
        Ok(Some((
            Node::CommandSubstitution(CommandSubstitution {
                command: Box::new(cmd),
                brace: false,
            }),
            text,
        )))
    }

    /// Copy one heredoc body line; returns true when it closed the heredoc.
    fn read_backtick_heredoc_line(
        &mut self,
        buf: &mut BacktickText,
        delim: &str,
        strip_tabs: bool,
    ) -> bool {
        let line_start = self.pos;
        let mut line_end = line_start;
        while self.char_at(line_end).is_some_and(|c| c != '\n') {
            line_end += 1;
        }
        let line: Vec<char> = self.src[line_start..line_end].to_vec();
        let tabs = if strip_tabs {
            line.iter().take_while(|&&c| c == '\t').count()
        } else {
            0
        };
        let check: String = line[tabs..].iter().collect();
        let delim_len = delim.chars().count();

        if check == delim {
            buf.push_str(&line.iter().collect::<String>());
            self.pos = line_end;
            if self.peek() == Some('\n') {
                buf.push('\n');
                self.pos += 1;
            }
            return true;
        }
        if check.starts_with(delim) && check.chars().count() > delim_len {
            let end = tabs + delim_len;
            buf.push_str(&line[..end].iter().collect::<String>());
            self.pos = line_start + end;
            return true;
        }
        buf.push_str(&line.iter().collect::<String>());
        self.pos = line_end;
        if self.peek() == Some('\n') {
            buf.push('\n');
            self.pos += 1;
        }
        false
    }

    /// `<<<word` inside backticks, copied verbatim
    fn copy_backtick_herestring(&mut self, buf: &mut BacktickText) {
        self.pos += 3;
        buf.push_str("<<<");
        while let Some(ch) = self.peek().filter(|&ch| is_whitespace_no_newline(ch)) {
            self.pos += 1;
            buf.push(ch);
        }
        while let Some(ch) = self.peek() {
            if is_whitespace(ch) || ch == '(' || ch == ')' {
                break;
            }
            if ch == '\\' && self.char_at(self.pos + 1).is_some() {
                buf.push(ch);
                buf.push(self.src[self.pos + 1]);
                self.pos += 2;
            } else if is_quote(ch) {
                self.pos += 1;
                buf.push(ch);
                while let Some(q) = self.peek() {
                    if q == ch {
                        break;
                    }
                    if ch == '"' && q == '\\' {
                        self.pos += 1;
                        buf.push(q);
                    }
                    if let Some(inner) = self.advance() {
                        buf.push(inner);
                    }
                }
                if let Some(close) = self.advance() {
                    buf.push(close);
                }
            } else {
                self.pos += 1;
                buf.push(ch);
            }
        }
    }

    fn read_backtick_heredoc_delimiter(&mut self, buf: &mut BacktickText) -> String {
        let mut delimiter = String::new();
        let Some(first) = self.peek() else {
            return delimiter;
        };
        if is_quote(first) {
            self.pos += 1;
            buf.push(first);
            self.copy_quoted_delimiter(buf, &mut delimiter, first);
        } else if first == '\\' {
            self.pos += 1;
            buf.push(first);
            if let Some(d) = self.advance() {
                buf.push(d);
                delimiter.push(d);
            }
            while let Some(d) = self.peek().filter(|&d| !is_metachar(d)) {
                self.pos += 1;
                buf.push(d);
                delimiter.push(d);
            }
        } else {
            while let Some(ch) = self.peek() {
                if is_metachar(ch) || ch == '`' {
                    break;
                }
                self.pos += 1;
                buf.push(ch);
                if is_quote(ch) {
                    self.copy_quoted_delimiter(buf, &mut delimiter, ch);
                } else if ch == '\\' {
                    if let Some(d) = self.advance() {
                        buf.push(d);
                        delimiter.push(d);
                    }
                } else {
                    delimiter.push(ch);
                }
            }
        }
        delimiter
    }

    /// Copy a quoted delimiter section up to and including its closing quote.
    fn copy_quoted_delimiter(&mut self, buf: &mut BacktickText, delimiter: &mut String, quote: char) {
        while let Some(d) = self.peek() {
            if d == quote {
                break;
            }
            self.pos += 1;
            buf.push(d);
            delimiter.push(d);
        }
        if let Some(close) = self.advance() {
            buf.push(close);
        }
    }

    // =========================================================================
    // PROCESS SUBSTITUTION
    // =========================================================================

    /// `<(...)` or `>(...)`. When the body does not parse as a list, a
    /// balanced scan recovers the text and no node is returned.
    pub(crate) fn parse_process_substitution(&mut self) -> ParseResult<(Option<Node>, String)> {
        let Some(direction) = self.peek().filter(|&c| is_redirect_char(c)) else {
            return Ok((None, String::new()));
        };
        if self.char_at(self.pos + 1) != Some('(') {
            return Ok((None, String::new()));
        }
        let start = self.pos;
        self.pos += 2;

        let saved = self.save_state();
        let old_in_process_sub = self.in_process_sub;
        self.in_process_sub = true;
        self.set_state(PST_EOFTOKEN);
        self.eof_token = Some(')');
        self.ctx.push();

        let attempt = self.parse_process_substitution_body(start, direction);

        self.restore_state(saved);
        self.in_process_sub = old_in_process_sub;

        if let Ok(Some(found)) = attempt {
            return Ok((Some(found.0), found.1));
        }

        if matches!(self.char_at(start + 2), Some(' ' | '\t' | '\n')) {
            return Err(ParseError::syntax("Invalid process substitution", start));
        }
        self.pos = start + 2;
        self.parse_matched_pair('(', ')', 0, false)?;
        let text = strip_line_continuations_comment_aware(&self.text(start, self.pos));
        Ok((None, text))
    }

    fn parse_process_substitution_body(
        &mut self,
        start: usize,
        direction: char,
    ) -> ParseResult<Option<(Node, String)>> {
        let cmd = self.parse_list(true)?.unwrap_or(Node::Empty);
        self.skip_whitespace_and_newlines();
        if self.peek() != Some(')') {
            return Ok(None);
        }
        self.pos += 1;
        let text = strip_line_continuations_comment_aware(&self.text(start, self.pos));
        let node = Node::ProcessSubstitution(ProcessSubstitution {
            direction: direction.to_string(),
            command: Box::new(cmd),
        });
        Ok(Some((node, text)))
    }

    // =========================================================================
    // ARRAY LITERALS
    // =========================================================================

    /// `(elem ...)` on the right of `name=`
    pub(crate) fn parse_array_literal(&mut self) -> ParseResult<Option<(Node, String)>> {
        if self.peek() != Some('(') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 1;
        self.set_state(PST_COMPASSIGN);
        let result = self.parse_array_elements(start);
        self.clear_state(PST_COMPASSIGN);
        let elements = result?;
        let text = self.text(start, self.pos);
        Ok(Some((Node::Array(Array { elements }), text)))
    }

    fn parse_array_elements(&mut self, start: usize) -> ParseResult<Vec<crate::ast::types::Word>> {
        let mut elements = Vec::new();
        loop {
            self.skip_whitespace_and_newlines();
            match self.peek() {
                None => return Err(ParseError::unterminated("Unterminated array literal", start)),
                Some(')') => break,
                Some(_) => {}
            }
            match self.parse_word(false, true, false)? {
                Some(word) => elements.push(word),
                None if self.peek() == Some(')') => break,
                None => {
                    return Err(ParseError::syntax("Expected word in array literal", self.pos))
                }
            }
        }
        if self.peek() != Some(')') {
            return Err(ParseError::syntax("Expected ) to close array literal", self.pos));
        }
        self.pos += 1;
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::ErrorKind;

    fn cmdsub_kind(node: &Node) -> &'static str {
        match node {
            Node::CommandSubstitution(cs) => cs.command.kind(),
            other => other.kind(),
        }
    }

    #[test]
    fn test_command_substitution_text() {
        let mut p = Parser::new("$(echo hi; ls) tail", false, false);
        let (node, text) = p.parse_command_substitution().unwrap().unwrap();
        assert_eq!(text, "$(echo hi; ls)");
        assert_eq!(cmdsub_kind(&node), "list");
        assert_eq!(p.peek(), Some(' '));
    }

    #[test]
    fn test_empty_command_substitution() {
        let mut p = Parser::new("$( )", false, false);
        let (node, _) = p.parse_command_substitution().unwrap().unwrap();
        assert_eq!(cmdsub_kind(&node), "empty");
    }

    #[test]
    fn test_unclosed_command_substitution_is_unterminated() {
        let mut p = Parser::new("$(echo", false, false);
        let err = p.parse_command_substitution().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 0);
        assert_eq!(p.state, 0);

        let err = crate::parser::parse("echo $(ls", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 5);
    }

    #[test]
    fn test_funsub() {
        let mut p = Parser::new("${ echo x; }", false, false);
        p.pos = 2;
        let (node, text) = p.parse_funsub(0).unwrap();
        assert_eq!(text, "${ echo x; }");
        assert!(matches!(node, Node::CommandSubstitution(CommandSubstitution { brace: true, .. })));
    }

    #[test]
    fn test_backtick_unescapes_content() {
        let mut p = Parser::new("`echo \\`date\\``", false, false);
        let (node, text) = p.parse_backtick_substitution().unwrap().unwrap();
        assert_eq!(text, "`echo \\`date\\``");
        assert_eq!(cmdsub_kind(&node), "command");
    }

    #[test]
    fn test_unterminated_backtick() {
        let mut p = Parser::new("`echo", false, false);
        let err = p.parse_backtick_substitution().unwrap_err();
        assert_eq!(err.message, "Unterminated backtick");
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 0);

        let err = crate::parser::parse("echo `x", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 5);
    }

    #[test]
    fn test_process_substitution() {
        let mut p = Parser::new("<(sort a)", false, false);
        let (node, text) = p.parse_process_substitution().unwrap();
        assert_eq!(text, "<(sort a)");
        assert_eq!(node.map(|n| n.kind()), Some("procsub"));
        assert!(!p.in_process_sub);
    }

    #[test]
    fn test_array_literal() {
        let mut p = Parser::new("(a 'b c'\n d)", false, false);
        let (node, text) = p.parse_array_literal().unwrap().unwrap();
        assert_eq!(text, "(a 'b c'\n d)");
        match node {
            Node::Array(arr) => assert_eq!(arr.elements.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(p.state & PST_COMPASSIGN, 0);
    }

    #[test]
    fn test_unterminated_array_literal() {
        let mut p = Parser::new("(a b", false, false);
        let err = p.parse_array_literal().unwrap_err();
        assert_eq!(err.message, "Unterminated array literal");
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(p.state & PST_COMPASSIGN, 0);

        let err = crate::parser::parse("a=(1 2", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 2);
    }
}
