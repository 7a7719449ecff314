//! Expansion Parser
//!
//! Handles parsing of parameter expansions (`$x`, `${...}` and all operator
//! forms), ANSI-C `$'...'` and locale `$"..."` strings, and the deprecated
//! `$[...]` arithmetic form.

use crate::ast::types::{Node, ParamExpansion, ParamLength, QuotedText};
use crate::parser::parser::Parser;
use crate::parser::scan::{
    count_consecutive_dollars_before, is_digit, is_escape_char_in_backtick, is_expansion_start,
    is_funsub_char, is_name_char, is_name_start, is_simple_param_op, is_special_param,
    is_special_param_unbraced, is_whitespace_no_newline,
};
use crate::parser::types::{
    DolbraceState, ParseError, ParseResult, MP_ARITH, MP_ARRAYSUB, MP_DOLBRACE, MP_DQUOTE,
};
use crate::sexp::format::format_cmdsub_node;

/// Characters that can start a `${param OP ...}` operator
const PARAM_OP_START: &str = "#%^,~:-=?+/";

impl Parser {
    // =========================================================================
    // QUOTED STRINGS
    // =========================================================================

    /// `$'...'`, content kept raw (escapes are decoded when rendering)
    pub(crate) fn read_ansi_c_quote(&mut self) -> ParseResult<Option<(Node, String)>> {
        if self.peek() != Some('$') || self.char_at(self.pos + 1) != Some('\'') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 2;
        let mut content = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(ParseError::unterminated(
                        "unexpected EOF while looking for matching `''",
                        start,
                    ))
                }
                Some('\'') => break,
                Some('\\') => {
                    content.push('\\');
                    if let Some(c) = self.advance() {
                        content.push(c);
                    }
                }
                Some(c) => content.push(c),
            }
        }
        let text = self.text(start, self.pos);
        Ok(Some((Node::AnsiCQuote(QuotedText { content }), text)))
    }

    /// `$"..."`: returns the node, its text and the expansions found inside.
    pub(crate) fn read_locale_string(&mut self) -> ParseResult<Option<(Node, String, Vec<Node>)>> {
        if self.peek() != Some('$') || self.char_at(self.pos + 1) != Some('"') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 2;
        let mut content = String::new();
        let mut inner = Vec::new();
        let mut found_close = false;
        while let Some(ch) = self.peek() {
            let next = self.char_at(self.pos + 1);
            if ch == '"' {
                self.pos += 1;
                found_close = true;
                break;
            }
            let expansion = if ch == '\\' && next.is_some() {
                if next == Some('\n') {
                    self.pos += 2;
                } else {
                    content.push(ch);
                    content.extend(next);
                    self.pos += 2;
                }
                continue;
            } else if ch == '$' && next == Some('(') && self.char_at(self.pos + 2) == Some('(') {
                match self.parse_arithmetic_expansion()? {
                    Some(r) => Some(r),
                    None => self.parse_command_substitution()?,
                }
            } else if is_expansion_start(&self.src, self.pos, "$(") {
                self.parse_command_substitution()?
            } else if ch == '$' {
                self.parse_param_expansion(false)?
            } else if ch == '`' {
                self.parse_backtick_substitution()?
            } else {
                content.push(ch);
                self.pos += 1;
                continue;
            };
            match expansion {
                Some((node, text)) => {
                    inner.push(node);
                    content.push_str(&text);
                }
                None => {
                    content.push(ch);
                    self.pos += 1;
                }
            }
        }
        if !found_close {
            self.pos = start;
            return Ok(None);
        }
        let text = format!("$\"{}\"", content);
        Ok(Some((Node::LocaleString(QuotedText { content }), text, inner)))
    }

    // =========================================================================
    // PARAMETER EXPANSION
    // =========================================================================

    pub(crate) fn parse_param_expansion(
        &mut self,
        in_dquote: bool,
    ) -> ParseResult<Option<(Node, String)>> {
        self.sync_lexer();
        self.read_param_expansion(in_dquote)
    }

    fn read_param_expansion(&mut self, in_dquote: bool) -> ParseResult<Option<(Node, String)>> {
        if self.peek() != Some('$') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 1;
        let Some(ch) = self.peek() else {
            self.pos = start;
            return Ok(None);
        };
        if ch == '{' {
            self.pos += 1;
            if self.peek().is_some_and(is_funsub_char) {
                return self.parse_funsub(start).map(Some);
            }
            let saved = self.dolbrace;
            self.dolbrace = DolbraceState::Param;
            let result = self.read_braced_param(start, in_dquote);
            self.dolbrace = saved;
            return result.map(Some);
        }
        if is_special_param_unbraced(ch) || is_digit(ch) || ch == '#' {
            self.pos += 1;
            let text = self.text(start, self.pos);
            return Ok(Some((Node::ParamExpansion(ParamExpansion::simple(ch)), text)));
        }
        if is_name_start(ch) {
            let name_start = self.pos;
            while self.peek().is_some_and(is_name_char) {
                self.pos += 1;
            }
            let name = self.text(name_start, self.pos);
            let text = self.text(start, self.pos);
            return Ok(Some((Node::ParamExpansion(ParamExpansion::simple(name)), text)));
        }
        self.pos = start;
        Ok(None)
    }

    /// Body of `${...}` after the opening brace. The caller restores the
    /// brace state on every exit.
    fn read_braced_param(&mut self, start: usize, in_dquote: bool) -> ParseResult<(Node, String)> {
        let Some(ch) = self.peek() else {
            return Err(unclosed_brace(start));
        };
        if ch == '#' {
            self.pos += 1;
            let param = self.consume_param_name()?;
            if !param.is_empty() && self.peek() == Some('}') {
                self.pos += 1;
                let text = self.text(start, self.pos);
                return Ok((Node::ParamLength(ParamLength { param }), text));
            }
            // `${#}` or `${#op...}`: `#` is the parameter itself
            self.pos = start + 2;
        }

        if ch == '!' {
            if let Some(found) = self.read_indirect_param(start)? {
                return Ok(found);
            }
            self.pos = start + 2;
        }

        let mut param = self.consume_param_name()?;
        if param.is_empty() {
            let op_follows = match self.peek() {
                Some(c) if "-=+?".contains(c) => true,
                Some(':') => self.char_at(self.pos + 1).is_some_and(is_simple_param_op),
                _ => false,
            };
            if op_follows {
                param = String::new();
            } else {
                let content = self.parse_matched_pair('{', '}', MP_DOLBRACE, false)?;
                let text = format!("${{{}}}", content);
                return Ok((Node::ParamExpansion(ParamExpansion::simple(content)), text));
            }
        }

        match self.peek() {
            None => return Err(unclosed_brace(start)),
            Some('}') => {
                self.pos += 1;
                let text = self.text(start, self.pos);
                return Ok((Node::ParamExpansion(ParamExpansion::simple(param)), text));
            }
            Some(_) => {}
        }

        let mut op = self.consume_param_operator();
        if op.is_empty() {
            op = self.read_irregular_param_operator()?;
        }
        self.update_dolbrace_for_op(&op, !param.is_empty());

        let flags = if in_dquote { MP_DQUOTE } else { 0 };
        let mut arg =
            self.parse_matched_pair('{', '}', flags | MP_DOLBRACE, param.ends_with('$'))?;

        if (op == "<" || op == ">") && arg.starts_with('(') && arg.ends_with(')') && arg.len() >= 2
        {
            // `${x<(cmd)}`: normalise the embedded command like a procsub body
            let inner = &arg[1..arg.len() - 1];
            let mut sub = Parser::new(inner, true, self.extglob);
            if let Ok(Some(parsed)) = sub.parse_detached_list() {
                if sub.at_end() {
                    arg = format!("({})", format_cmdsub_node(&parsed, 0, true, false, true));
                }
            }
        }

        let text = format!("${{{}{}{}}}", param, op, arg);
        Ok((Node::ParamExpansion(ParamExpansion::new(param, op, arg)), text))
    }

    /// `${!name...}`; `None` means fall back to reading `!` as the parameter.
    fn read_indirect_param(&mut self, start: usize) -> ParseResult<Option<(Node, String)>> {
        self.pos += 1;
        self.skip_blank_chars();
        let param = self.consume_param_name()?;
        if param.is_empty() {
            return Ok(None);
        }
        self.skip_blank_chars();
        match self.peek() {
            Some('}') => {
                self.pos += 1;
                let text = self.text(start, self.pos);
                return Ok(Some((Node::ParamIndirect(ParamExpansion::simple(param)), text)));
            }
            Some(c @ ('@' | '*')) => {
                self.pos += 1;
                let trailing = self.parse_matched_pair('{', '}', MP_DOLBRACE, false)?;
                let text = self.text(start, self.pos);
                let name = format!("{}{}{}", param, c, trailing);
                return Ok(Some((Node::ParamIndirect(ParamExpansion::simple(name)), text)));
            }
            _ => {}
        }
        let mut op = self.consume_param_operator();
        if op.is_empty() {
            if let Some(c) = self.peek() {
                if !"}\"'`".contains(c) {
                    self.pos += 1;
                    op.push(c);
                }
            }
        }
        if !op.is_empty() && !matches!(op.as_str(), "\"" | "'" | "`") {
            let arg = self.parse_matched_pair('{', '}', MP_DOLBRACE, false)?;
            let text = self.text(start, self.pos);
            return Ok(Some((Node::ParamIndirect(ParamExpansion::new(param, op, arg)), text)));
        }
        if self.at_end() {
            return Err(unclosed_brace(start));
        }
        Ok(None)
    }

    fn skip_blank_chars(&mut self) {
        while self.peek().is_some_and(is_whitespace_no_newline) {
            self.pos += 1;
        }
    }

    /// Operator for `${name...}` forms that `consume_param_operator` does not
    /// recognise, e.g. a quoted or backticked pattern right after the name.
    fn read_irregular_param_operator(&mut self) -> ParseResult<String> {
        let Some(ch) = self.peek() else {
            return Ok(String::new());
        };
        let next = self.char_at(self.pos + 1);
        if ch == '$' && matches!(next, Some('"' | '\'')) {
            let dollars = 1 + count_consecutive_dollars_before(&self.src, self.pos);
            if dollars % 2 == 1 {
                return Ok(String::new());
            }
            self.pos += 1;
            return Ok("$".to_string());
        }
        if ch == '`' {
            let backtick_pos = self.pos;
            self.pos += 1;
            while let Some(bc) = self.peek() {
                if bc == '`' {
                    break;
                }
                if bc == '\\' && self.char_at(self.pos + 1).is_some_and(is_escape_char_in_backtick)
                {
                    self.pos += 1;
                }
                self.pos += 1;
            }
            if self.at_end() {
                return Err(ParseError::unterminated("Unterminated backtick", backtick_pos));
            }
            self.pos += 1;
            return Ok("`".to_string());
        }
        if (ch == '$' && next == Some('{')) || ch == '\'' || ch == '"' {
            return Ok(String::new());
        }
        self.pos += 1;
        let mut op = ch.to_string();
        if ch == '\\' {
            if let Some(c) = self.advance() {
                op.push(c);
            }
        }
        Ok(op)
    }

    pub(crate) fn consume_param_operator(&mut self) -> String {
        let Some(ch) = self.peek() else {
            return String::new();
        };
        let next = self.char_at(self.pos + 1);
        let op: &str = match ch {
            ':' => match next {
                Some(n) if is_simple_param_op(n) => {
                    self.pos += 2;
                    return format!(":{}", n);
                }
                _ => ":",
            },
            c if is_simple_param_op(c) => {
                self.pos += 1;
                return c.to_string();
            }
            '#' | '%' | '^' | ',' => {
                if next == Some(ch) {
                    self.pos += 2;
                    return format!("{}{}", ch, ch);
                }
                self.pos += 1;
                return ch.to_string();
            }
            '/' => match next {
                Some(n @ ('/' | '#' | '%')) => {
                    self.pos += 2;
                    return format!("/{}", n);
                }
                _ => "/",
            },
            '@' => "@",
            _ => return String::new(),
        };
        self.pos += 1;
        op.to_string()
    }

    /// Whether the `[` at `start` has a matching `]` before the closing brace.
    fn param_subscript_has_close(&self, start: usize) -> bool {
        let mut depth = 1;
        let mut i = start + 1;
        let mut single = false;
        let mut double = false;
        while let Some(c) = self.char_at(i) {
            if single {
                if c == '\'' {
                    single = false;
                }
                i += 1;
                continue;
            }
            if double {
                if c == '\\' && self.char_at(i + 1).is_some() {
                    i += 2;
                    continue;
                }
                if c == '"' {
                    double = false;
                }
                i += 1;
                continue;
            }
            match c {
                '\'' => single = true,
                '"' => double = true,
                '\\' => {
                    i += 2;
                    continue;
                }
                '}' => return false,
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return true;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn consume_param_name(&mut self) -> ParseResult<String> {
        let Some(ch) = self.peek() else {
            return Ok(String::new());
        };
        if is_special_param(ch) {
            if ch == '$' && self.char_at(self.pos + 1).is_some_and(|n| "{'\"".contains(n)) {
                return Ok(String::new());
            }
            self.pos += 1;
            return Ok(ch.to_string());
        }
        if ch.is_numeric() {
            let start = self.pos;
            while self.peek().is_some_and(char::is_numeric) {
                self.pos += 1;
            }
            return Ok(self.text(start, self.pos));
        }
        if !is_name_start(ch) {
            return Ok(String::new());
        }
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                name.push(c);
                self.pos += 1;
            } else if c == '[' {
                if !self.param_subscript_has_close(self.pos) {
                    break;
                }
                self.pos += 1;
                let subscript = self.parse_matched_pair('[', ']', MP_ARRAYSUB, false)?;
                name.push('[');
                name.push_str(&subscript);
                name.push(']');
                break;
            } else {
                break;
            }
        }
        Ok(name)
    }

    /// Track where inside `${...}` scanning is, so quotes in the pattern
    /// part of `${x#pat}` or `${x/pat/rep}` are handled like bash does.
    fn update_dolbrace_for_op(&mut self, op: &str, has_param: bool) {
        let Some(first) = op.chars().next() else {
            return;
        };
        if self.dolbrace != DolbraceState::Param {
            return;
        }
        if has_param {
            if "%#^,".contains(first) {
                self.dolbrace = DolbraceState::Quote;
                return;
            }
            if first == '/' {
                self.dolbrace = DolbraceState::Quote2;
                return;
            }
        }
        if PARAM_OP_START.contains(first) {
            self.dolbrace = DolbraceState::Op;
        }
    }

    // =========================================================================
    // DEPRECATED ARITHMETIC
    // =========================================================================

    /// `$[expr]`, kept as raw text
    pub(crate) fn parse_deprecated_arithmetic(&mut self) -> ParseResult<Option<(Node, String)>> {
        if self.peek() != Some('$') || self.char_at(self.pos + 1) != Some('[') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 2;
        let content = self.parse_matched_pair('[', ']', MP_ARITH, false)?;
        let text = self.text(start, self.pos);
        Ok(Some((Node::ArithDeprecated(content), text)))
    }
}

fn unclosed_brace(start: usize) -> ParseError {
    ParseError::unterminated("unexpected EOF looking for `}'", start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(src: &str) -> (Node, String) {
        let mut p = Parser::new(src, false, false);
        p.parse_param_expansion(false).unwrap().unwrap()
    }

    fn expansion(src: &str) -> ParamExpansion {
        match param(src).0 {
            Node::ParamExpansion(pe) | Node::ParamIndirect(pe) => pe,
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_simple_and_special_params() {
        assert_eq!(expansion("$foo-bar").param, "foo");
        assert_eq!(expansion("$1x").param, "1");
        assert_eq!(expansion("$@").param, "@");
        assert_eq!(param("$#").1, "$#");
    }

    #[test]
    fn test_braced_operators() {
        let pe = expansion("${x:-default}");
        assert_eq!((pe.param.as_str(), pe.op.as_str(), pe.arg.as_str()), ("x", ":-", "default"));
        let pe = expansion("${path//\\//_}");
        assert_eq!(pe.op, "//");
        let pe = expansion("${name^^}");
        assert_eq!(pe.op, "^^");
        let pe = expansion("${a[1]#pre}");
        assert_eq!((pe.param.as_str(), pe.op.as_str()), ("a[1]", "#"));
    }

    #[test]
    fn test_length_and_indirect() {
        let (node, text) = param("${#arr[@]}");
        assert_eq!(node, Node::ParamLength(ParamLength { param: "arr[@]".to_string() }));
        assert_eq!(text, "${#arr[@]}");

        let (node, _) = param("${!ref}");
        assert_eq!(node.kind(), "param-indirect");
        let (node, _) = param("${!prefix*}");
        assert_eq!(node, Node::ParamIndirect(ParamExpansion::simple("prefix*")));
    }

    #[test]
    fn test_hash_alone_is_a_parameter() {
        let pe = expansion("${#}");
        assert_eq!(pe.param, "#");
    }

    #[test]
    fn test_unclosed_brace() {
        let mut p = Parser::new("${x", false, false);
        let err = p.parse_param_expansion(false).unwrap_err();
        assert!(err.is_unterminated());
        assert_eq!(err.pos, 0);
        assert_eq!(p.dolbrace, DolbraceState::None);
    }

    #[test]
    fn test_ansi_c_and_locale() {
        let mut p = Parser::new("$'a\\'b'", false, false);
        let (node, text) = p.read_ansi_c_quote().unwrap().unwrap();
        assert_eq!(node, Node::AnsiCQuote(QuotedText { content: "a\\'b".to_string() }));
        assert_eq!(text, "$'a\\'b'");

        let mut p = Parser::new("$\"hi $USER\"", false, false);
        let (_, text, inner) = p.read_locale_string().unwrap().unwrap();
        assert_eq!(text, "$\"hi $USER\"");
        assert_eq!(inner.len(), 1);

        let mut p = Parser::new("$\"open", false, false);
        assert!(p.read_locale_string().unwrap().is_none());
        assert_eq!(p.pos, 0);
    }

    #[test]
    fn test_deprecated_arithmetic() {
        let mut p = Parser::new("$[1 + [2]]", false, false);
        let (node, text) = p.parse_deprecated_arithmetic().unwrap().unwrap();
        assert_eq!(node, Node::ArithDeprecated("1 + [2]".to_string()));
        assert_eq!(text, "$[1 + [2]]");
    }
}
