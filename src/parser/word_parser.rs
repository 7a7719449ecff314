//! Word Scanning
//!
//! Reads one shell word at the cursor, recording the expansions found in it.
//! The scanning rules depend on the word context: plain command words,
//! operands inside `[[ ... ]]`, and the right-hand side of `=~`.
//!
//! A word is accumulated as a list of chunks rather than a flat string; a
//! few decisions (array subscripts, `$?(...)` extglob) look at the most
//! recent chunk.

use crate::ast::types::{Node, Word};
use crate::parser::lexer::{Token, TokenType};
use crate::parser::parser::Parser;
use crate::parser::scan::{
    is_array_assignment_prefix, is_extglob_prefix, is_metachar, is_redirect_char, is_whitespace,
    is_whitespace_no_newline,
};
use crate::parser::types::{ParseError, ParseResult, WordContext, MP_EXTGLOB, PST_EOFTOKEN};

fn joined_chars(chunks: &[String]) -> Vec<char> {
    chunks.iter().flat_map(|c| c.chars()).collect()
}

fn last_chunk_first_char(chunks: &[String]) -> Option<char> {
    chunks.last().and_then(|c| c.chars().next())
}

impl Parser {
    // =========================================================================
    // TOKEN-LEVEL ENTRY
    // =========================================================================

    pub(crate) fn read_word(&mut self) -> ParseResult<Option<Token>> {
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let is_procsub = (c == '<' || c == '>') && self.char_at(self.pos + 1) == Some('(');
        let is_regex_paren =
            self.lex_mode.context == WordContext::Regex && (c == '(' || c == ')');
        if is_metachar(c) && !is_procsub && !is_regex_paren {
            return Ok(None);
        }
        let mode = self.lex_mode;
        let word = self.read_word_internal(
            mode.context,
            mode.at_command_start,
            mode.in_array_literal,
            mode.in_assign_builtin,
        )?;
        Ok(word.map(|w| Token::word(w, start)))
    }

    pub(crate) fn is_word_terminator(
        &self,
        ctx: WordContext,
        ch: char,
        bracket_depth: usize,
        paren_depth: usize,
    ) -> bool {
        let next = self.char_at(self.pos + 1);
        match ctx {
            WordContext::Regex => {
                (ch == ']' && next == Some(']'))
                    || (ch == '&' && next == Some('&'))
                    || (ch == ')' && paren_depth == 0)
                    || (is_whitespace(ch) && paren_depth == 0)
            }
            WordContext::Cond => {
                (ch == ']' && next == Some(']'))
                    || matches!(ch, ')' | '&' | '|' | ';')
                    || (is_redirect_char(ch) && next != Some('('))
                    || is_whitespace(ch)
            }
            WordContext::Normal => {
                if self.lex_state & PST_EOFTOKEN != 0
                    && self.lex_eof_token == Some(ch)
                    && bracket_depth == 0
                {
                    return true;
                }
                if is_redirect_char(ch) && next == Some('(') {
                    return false;
                }
                is_metachar(ch) && bracket_depth == 0
            }
        }
    }

    fn at_lexer_eof_char(&self, ch: char) -> bool {
        self.lex_state & PST_EOFTOKEN != 0 && self.lex_eof_token == Some(ch)
    }

    // =========================================================================
    // WORD BODY
    // =========================================================================

    pub(crate) fn read_word_internal(
        &mut self,
        ctx: WordContext,
        at_command_start: bool,
        in_array_literal: bool,
        in_assign_builtin: bool,
    ) -> ParseResult<Option<Word>> {
        let start = self.pos;
        let mut chunks: Vec<String> = Vec::new();
        let mut parts: Vec<Node> = Vec::new();
        let mut bracket_depth = 0usize;
        let mut bracket_start: Option<usize> = None;
        let mut seen_equals = false;
        let mut paren_depth = 0usize;

        while let Some(ch) = self.peek() {
            let next = self.char_at(self.pos + 1);
            let normal = ctx == WordContext::Normal;
            let regex = ctx == WordContext::Regex;

            if regex && ch == '\\' && next == Some('\n') {
                self.pos += 2;
                continue;
            }
            if !normal && self.is_word_terminator(ctx, ch, bracket_depth, paren_depth) {
                break;
            }
            if normal && ch == '[' {
                if bracket_depth > 0 {
                    bracket_depth += 1;
                    self.push_advance(&mut chunks);
                    continue;
                }
                let subscript_follows_name = !chunks.is_empty()
                    && at_command_start
                    && !seen_equals
                    && is_array_assignment_prefix(&joined_chars(&chunks))
                    && last_chunk_first_char(&chunks)
                        .is_some_and(|c| c.is_alphanumeric() || c == '_');
                let element_subscript = chunks.is_empty() && !seen_equals && in_array_literal;
                if subscript_follows_name || element_subscript {
                    bracket_start = Some(self.pos);
                    bracket_depth += 1;
                    self.push_advance(&mut chunks);
                    continue;
                }
            }
            if normal && ch == ']' && bracket_depth > 0 {
                bracket_depth -= 1;
                self.push_advance(&mut chunks);
                continue;
            }
            if normal && ch == '=' && bracket_depth == 0 {
                seen_equals = true;
            }
            if regex && ch == '(' {
                paren_depth += 1;
                self.push_advance(&mut chunks);
                continue;
            }
            if regex && ch == ')' {
                if paren_depth > 0 {
                    paren_depth -= 1;
                    self.push_advance(&mut chunks);
                    continue;
                }
                break;
            }
            if !normal && ch == '[' {
                if !self.read_bracket_expression(&mut chunks, &mut parts, regex, paren_depth)? {
                    self.push_advance(&mut chunks);
                }
                continue;
            }
            if ctx == WordContext::Cond && ch == '(' {
                if self.extglob && last_chunk_first_char(&chunks).is_some_and(is_extglob_prefix)
                    && chunks.last().is_some_and(|c| c.chars().count() == 1)
                {
                    self.push_advance(&mut chunks);
                    self.push_extglob_body(&mut chunks)?;
                    continue;
                }
                break;
            }
            if regex && is_whitespace(ch) && paren_depth > 0 {
                self.push_advance(&mut chunks);
                continue;
            }
            if ch == '\'' {
                let quote_pos = self.pos;
                self.pos += 1;
                let (quoted, saw_newline) = self.read_single_quote(quote_pos)?;
                chunks.push(quoted);
                if normal && saw_newline {
                    self.saw_newline_in_single_quote = true;
                }
                continue;
            }
            if ch == '"' {
                let quote_pos = self.pos;
                self.pos += 1;
                if normal {
                    self.read_word_double_quote(&mut chunks, &mut parts, quote_pos)?;
                } else {
                    let handle_continuation = ctx == WordContext::Cond;
                    self.scan_double_quote(&mut chunks, &mut parts, quote_pos, handle_continuation)?;
                }
                continue;
            }
            if ch == '\\' {
                if let Some(n) = next {
                    if !regex && n == '\n' {
                        self.pos += 2;
                    } else {
                        chunks.push(ch.to_string());
                        chunks.push(n.to_string());
                        self.pos += 2;
                    }
                    continue;
                }
            }
            if !regex && ch == '$' && next == Some('\'') {
                match self.read_ansi_c_quote()? {
                    Some((node, text)) => {
                        parts.push(node);
                        chunks.push(text);
                    }
                    None => self.push_advance(&mut chunks),
                }
                continue;
            }
            if !regex && ch == '$' && next == Some('"') {
                match self.read_locale_string()? {
                    Some((node, text, inner)) => {
                        parts.push(node);
                        parts.extend(inner);
                        chunks.push(text);
                    }
                    None => self.push_advance(&mut chunks),
                }
                continue;
            }
            if ch == '$' {
                if !self.parse_dollar_expansion(&mut chunks, &mut parts, false)? {
                    self.push_advance(&mut chunks);
                } else if self.extglob
                    && normal
                    && self.peek() == Some('(')
                    && chunks.last().is_some_and(|c| {
                        let mut it = c.chars();
                        it.next() == Some('$')
                            && it.next().is_some_and(|s| "?*@".contains(s))
                            && it.next().is_none()
                    })
                {
                    // `$?(...)` style: the special parameter doubles as an extglob prefix
                    self.push_advance(&mut chunks);
                    self.push_extglob_body(&mut chunks)?;
                }
                continue;
            }
            if !regex && ch == '`' {
                match self.parse_backtick_substitution()? {
                    Some((node, text)) => {
                        parts.push(node);
                        chunks.push(text);
                    }
                    None => self.push_advance(&mut chunks),
                }
                continue;
            }
            if !regex && is_redirect_char(ch) && next == Some('(') {
                let (node, text) = self.parse_process_substitution()?;
                if let Some(node) = node {
                    parts.push(node);
                    chunks.push(text);
                } else if !text.is_empty() {
                    chunks.push(text);
                } else {
                    self.push_advance(&mut chunks);
                    if normal {
                        self.push_advance(&mut chunks);
                    }
                }
                continue;
            }
            if normal && ch == '(' && !chunks.is_empty() && bracket_depth == 0 {
                let n = chunks.len();
                let is_array_assign = if n >= 3 && chunks[n - 2] == "+" && chunks[n - 1] == "=" {
                    is_array_assignment_prefix(&joined_chars(&chunks[..n - 2]))
                } else if chunks[n - 1] == "=" && n >= 2 {
                    is_array_assignment_prefix(&joined_chars(&chunks[..n - 1]))
                } else {
                    false
                };
                if is_array_assign && (at_command_start || in_assign_builtin) {
                    match self.parse_array_literal()? {
                        Some((node, text)) => {
                            parts.push(node);
                            chunks.push(text);
                        }
                        None => break,
                    }
                    continue;
                }
            }
            if self.extglob && normal && is_extglob_prefix(ch) && next == Some('(') {
                self.push_advance(&mut chunks);
                self.push_advance(&mut chunks);
                self.push_extglob_body(&mut chunks)?;
                continue;
            }
            if normal && self.at_lexer_eof_char(ch) && bracket_depth == 0 {
                if chunks.is_empty() {
                    self.push_advance(&mut chunks);
                }
                break;
            }
            if normal && is_metachar(ch) && bracket_depth == 0 {
                break;
            }
            self.push_advance(&mut chunks);
        }

        if bracket_depth > 0 && self.at_end() {
            if let Some(pos) = bracket_start {
                return Err(ParseError::unterminated("unexpected EOF looking for `]'", pos));
            }
        }
        if chunks.is_empty() {
            return Ok(None);
        }
        Ok(Some(Word::new(chunks.concat(), parts)))
    }

    fn push_advance(&mut self, chunks: &mut Vec<String>) {
        if let Some(c) = self.advance() {
            chunks.push(c.to_string());
        }
    }

    /// After an extglob `(` has been pushed: the body and the closing `)`.
    fn push_extglob_body(&mut self, chunks: &mut Vec<String>) -> ParseResult<()> {
        let body = self.parse_matched_pair('(', ')', MP_EXTGLOB, false)?;
        chunks.push(body);
        chunks.push(")".to_string());
        Ok(())
    }

    /// Double-quoted section of a plain word; the opening quote is consumed.
    fn read_word_double_quote(
        &mut self,
        chunks: &mut Vec<String>,
        parts: &mut Vec<Node>,
        start: usize,
    ) -> ParseResult<()> {
        chunks.push("\"".to_string());
        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            match c {
                '\\' if self.char_at(self.pos + 1).is_some() => {
                    if self.char_at(self.pos + 1) == Some('\n') {
                        self.pos += 2;
                    } else {
                        self.push_advance(chunks);
                        self.push_advance(chunks);
                    }
                }
                '$' => {
                    if !self.parse_dollar_expansion(chunks, parts, true)? {
                        self.push_advance(chunks);
                    }
                }
                '`' => match self.parse_backtick_substitution()? {
                    Some((node, text)) => {
                        parts.push(node);
                        chunks.push(text);
                    }
                    None => self.push_advance(chunks),
                },
                _ => self.push_advance(chunks),
            }
        }
        if self.at_end() {
            return Err(ParseError::unterminated("Unterminated double quote", start));
        }
        self.push_advance(chunks);
        Ok(())
    }

    /// Double-quoted section inside `[[ ]]` or a regex; the opening quote is
    /// consumed. Backticks are kept literally here.
    pub(crate) fn scan_double_quote(
        &mut self,
        chunks: &mut Vec<String>,
        parts: &mut Vec<Node>,
        start: usize,
        handle_line_continuation: bool,
    ) -> ParseResult<()> {
        chunks.push("\"".to_string());
        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            if c == '\\' && self.char_at(self.pos + 1).is_some() {
                if handle_line_continuation && self.char_at(self.pos + 1) == Some('\n') {
                    self.pos += 2;
                } else {
                    self.push_advance(chunks);
                    self.push_advance(chunks);
                }
            } else if c == '$' {
                if !self.parse_dollar_expansion(chunks, parts, true)? {
                    self.push_advance(chunks);
                }
            } else {
                self.push_advance(chunks);
            }
        }
        if self.at_end() {
            return Err(ParseError::unterminated("Unterminated double quote", start));
        }
        self.push_advance(chunks);
        Ok(())
    }

    /// Single-quoted text after the opening quote, returned with both quotes.
    pub(crate) fn read_single_quote(&mut self, start: usize) -> ParseResult<(String, bool)> {
        let mut out = String::from("'");
        let mut saw_newline = false;
        while let Some(c) = self.advance() {
            if c == '\n' {
                saw_newline = true;
            }
            out.push(c);
            if c == '\'' {
                return Ok((out, saw_newline));
            }
        }
        Err(ParseError::unterminated("Unterminated single quote", start))
    }

    /// `[...]` inside `[[ ]]` or a regex operand, copied through verbatim so
    /// that blanks and `)` inside the class do not end the word.
    fn read_bracket_expression(
        &mut self,
        chunks: &mut Vec<String>,
        parts: &mut Vec<Node>,
        for_regex: bool,
        paren_depth: usize,
    ) -> ParseResult<bool> {
        if for_regex {
            let src = &self.src;
            let at = |i: usize| src.get(i).copied();
            let mut scan = self.pos + 1;
            if at(scan) == Some('^') {
                scan += 1;
            }
            if at(scan) == Some(']') {
                scan += 1;
            }
            let mut will_close = false;
            while let Some(sc) = at(scan) {
                if sc == ']' && at(scan + 1) == Some(']') {
                    break;
                }
                if sc == ')' && paren_depth > 0 {
                    break;
                }
                if sc == '&' && at(scan + 1) == Some('&') {
                    break;
                }
                if sc == ']' {
                    will_close = true;
                    break;
                }
                if sc == '[' && at(scan + 1) == Some(':') {
                    scan += 2;
                    while at(scan).is_some() && !(at(scan) == Some(':') && at(scan + 1) == Some(']'))
                    {
                        scan += 1;
                    }
                    if scan < src.len() {
                        scan += 2;
                    }
                    continue;
                }
                scan += 1;
            }
            if !will_close {
                return Ok(false);
            }
        } else {
            match self.char_at(self.pos + 1) {
                None => return Ok(false),
                Some(n) if is_whitespace_no_newline(n) || n == '&' || n == '|' => {
                    return Ok(false)
                }
                _ => {}
            }
        }

        self.push_advance(chunks);
        if self.peek() == Some('^') {
            self.push_advance(chunks);
        }
        if self.peek() == Some(']') {
            self.push_advance(chunks);
        }
        while let Some(c) = self.peek() {
            if c == ']' {
                self.push_advance(chunks);
                break;
            }
            let next = self.char_at(self.pos + 1);
            let class_close = match (c, next) {
                ('[', Some(':')) => Some(':'),
                ('[', Some('=')) if !for_regex => Some('='),
                ('[', Some('.')) if !for_regex => Some('.'),
                _ => None,
            };
            if let Some(close) = class_close {
                self.push_advance(chunks);
                self.push_advance(chunks);
                while self.peek().is_some()
                    && !(self.peek() == Some(close) && self.char_at(self.pos + 1) == Some(']'))
                {
                    self.push_advance(chunks);
                }
                if !self.at_end() {
                    self.push_advance(chunks);
                    self.push_advance(chunks);
                }
            } else if for_regex && c == '$' {
                if !self.parse_dollar_expansion(chunks, parts, false)? {
                    self.push_advance(chunks);
                }
            } else {
                self.push_advance(chunks);
            }
        }
        Ok(true)
    }

    // =========================================================================
    // GRAMMAR-FACING
    // =========================================================================

    /// Read the next word token with the given scanning flags, or `None` if
    /// the next token is not a word.
    pub(crate) fn parse_word(
        &mut self,
        at_command_start: bool,
        in_array_literal: bool,
        in_assign_builtin: bool,
    ) -> ParseResult<Option<Word>> {
        self.skip_whitespace();
        if self.at_end() {
            return Ok(None);
        }
        self.mode.at_command_start = at_command_start;
        self.mode.in_array_literal = in_array_literal;
        self.mode.in_assign_builtin = in_assign_builtin;
        let is_word = self.lex_peek_token()?.token_type == TokenType::Word;
        let tok = if is_word { Some(self.lex_next_token()?) } else { None };
        self.mode.at_command_start = false;
        self.mode.in_array_literal = false;
        self.mode.in_assign_builtin = false;
        Ok(tok.and_then(|t| match std::rc::Rc::try_unwrap(t) {
            Ok(t) => t.word,
            Err(shared) => shared.word.clone(),
        }))
    }

    /// `parse_word` under a specific word context. The context is left set.
    pub(crate) fn parse_word_internal(
        &mut self,
        ctx: WordContext,
        at_command_start: bool,
        in_array_literal: bool,
    ) -> ParseResult<Option<Word>> {
        self.mode.context = ctx;
        self.parse_word(at_command_start, in_array_literal, false)
    }

    /// One `$` expansion at the cursor: `$((`, `$[`, `$(` or a parameter.
    /// On success the node and its source text are appended.
    pub(crate) fn parse_dollar_expansion(
        &mut self,
        chunks: &mut Vec<String>,
        parts: &mut Vec<Node>,
        in_dquote: bool,
    ) -> ParseResult<bool> {
        let next = self.char_at(self.pos + 1);
        let found = if next == Some('(') && self.char_at(self.pos + 2) == Some('(') {
            match self.parse_arithmetic_expansion()? {
                Some(r) => Some(r),
                None => self.parse_command_substitution()?,
            }
        } else if next == Some('[') {
            self.parse_deprecated_arithmetic()?
        } else if next == Some('(') {
            self.parse_command_substitution()?
        } else {
            self.parse_param_expansion(in_dquote)?
        };
        match found {
            Some((node, text)) => {
                parts.push(node);
                chunks.push(text);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::ErrorKind;

    fn word(src: &str) -> Word {
        let mut p = Parser::new(src, false, false);
        p.parse_word(false, false, false).unwrap().unwrap()
    }

    #[test]
    fn test_plain_word_stops_at_metachar() {
        let mut p = Parser::new("hello;world", false, false);
        let w = p.parse_word(false, false, false).unwrap().unwrap();
        assert_eq!(w.value, "hello");
        assert_eq!(p.pos, 5);
    }

    #[test]
    fn test_quotes_keep_blanks() {
        assert_eq!(word("'a b'c\"d e\"").value, "'a b'c\"d e\"");
    }

    #[test]
    fn test_line_continuation_removed() {
        assert_eq!(word("ab\\\ncd").value, "abcd");
    }

    #[test]
    fn test_expansion_parts_recorded() {
        let w = word("x${y}$(z)$((1+2))");
        let kinds: Vec<_> = w.parts.iter().map(|n| n.kind()).collect();
        assert_eq!(kinds, vec!["param", "cmdsub", "arith"]);
    }

    #[test]
    fn test_array_subscript_at_command_start() {
        let mut p = Parser::new("a[x y]=1", false, false);
        let w = p.parse_word(true, false, false).unwrap().unwrap();
        assert_eq!(w.value, "a[x y]=1");
    }

    #[test]
    fn test_unterminated_subscript() {
        let mut p = Parser::new("a[x", false, false);
        let err = p.parse_word(true, false, false).unwrap_err();
        assert_eq!(err.message, "unexpected EOF looking for `]'");
        assert_eq!(err.pos, 1);
    }

    #[test]
    fn test_unterminated_quotes() {
        let mut p = Parser::new("ab'cd", false, false);
        let err = p.parse_word(false, false, false).unwrap_err();
        assert_eq!(err.message, "Unterminated single quote");
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 2);

        let mut p = Parser::new("x\"cd", false, false);
        let err = p.parse_word(false, false, false).unwrap_err();
        assert_eq!(err.message, "Unterminated double quote");
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 1);

        let err = crate::parser::parse("echo x\"cd", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unterminated);
        assert_eq!(err.pos, 6);
    }

    #[test]
    fn test_extglob_in_word() {
        let mut p = Parser::new("@(a|b c)", false, true);
        let w = p.parse_word(false, false, false).unwrap().unwrap();
        assert_eq!(w.value, "@(a|b c)");
    }

    #[test]
    fn test_single_quote_newline_is_noted() {
        let mut p = Parser::new("'a\nb'", false, false);
        p.parse_word(false, false, false).unwrap();
        assert!(p.saw_newline_in_single_quote);
    }
}
