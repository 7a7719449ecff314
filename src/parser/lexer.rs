//! Lexer for Bash Scripts
//!
//! Tokens are produced on demand from the parser's own cursor. The lexer
//! handles:
//! - Operators and delimiters (longest match)
//! - Blanks and comments
//! - Balanced "matched pair" scanning for quotes, `${...}`, subscripts and
//!   extglob bodies, handing `$(`, `${`, `$[` and process substitutions back
//!   to the grammar mid-scan
//!
//! Word scanning lives in `word_parser.rs`; both operate on `Parser`.

use crate::ast::types::Word;
use crate::parser::parser::Parser;
use crate::parser::scan::is_funsub_char;
use crate::parser::types::{
    DolbraceState, ParseError, ParseResult, WordContext, MP_ALLOWESC, MP_ARITH, MP_DOLBRACE,
    MP_DQUOTE, MP_EXTGLOB, PST_CASEPAT, PST_EOFTOKEN,
};

/// Token types for bash lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Eof,
    Word,
    Newline,

    // Separators
    Semi,
    Pipe,
    Amp,
    LParen,
    RParen,
    Less,
    Greater,

    // Multi-character operators
    AndAnd,
    OrOr,
    SemiSemi,
    SemiAmp,
    SemiSemiAmp,
    LessLess,
    GreaterGreater,
    LessAmp,
    GreaterAmp,
    LessGreater,
    GreaterPipe,
    LessLessMinus,
    LessLessLess,
    AmpGreater,
    AmpGreaterGreater,
    PipeAmp,
}

impl TokenType {
    /// Everything except words, newlines and end of input
    pub fn is_operator(self) -> bool {
        !matches!(self, Self::Eof | Self::Word | Self::Newline)
    }
}

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    /// Offset of the first character, after leading blanks
    pub pos: usize,
    /// For WORD tokens: the fully scanned word
    pub word: Option<Word>,
}

impl Token {
    pub fn new(token_type: TokenType, value: impl Into<String>, pos: usize) -> Self {
        Self {
            token_type,
            value: value.into(),
            pos,
            word: None,
        }
    }

    pub fn word(word: Word, pos: usize) -> Self {
        Self {
            token_type: TokenType::Word,
            value: word.value.clone(),
            pos,
            word: Some(word),
        }
    }
}

/// Flags that change how a word is scanned. Part of the token cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LexMode {
    pub context: WordContext,
    pub at_command_start: bool,
    pub in_array_literal: bool,
    pub in_assign_builtin: bool,
}

/// Three-character operators
const THREE_CHAR_OPS: &[(&str, TokenType)] = &[
    (";;&", TokenType::SemiSemiAmp),
    ("<<-", TokenType::LessLessMinus),
    ("<<<", TokenType::LessLessLess),
    ("&>>", TokenType::AmpGreaterGreater),
];

/// Two-character operators
const TWO_CHAR_OPS: &[(&str, TokenType)] = &[
    ("&&", TokenType::AndAnd),
    ("||", TokenType::OrOr),
    (";;", TokenType::SemiSemi),
    (";&", TokenType::SemiAmp),
    ("<<", TokenType::LessLess),
    (">>", TokenType::GreaterGreater),
    ("<&", TokenType::LessAmp),
    (">&", TokenType::GreaterAmp),
    ("<>", TokenType::LessGreater),
    (">|", TokenType::GreaterPipe),
    ("&>", TokenType::AmpGreater),
    ("|&", TokenType::PipeAmp),
];

impl Parser {
    // =========================================================================
    // TOKENS
    // =========================================================================

    /// Read one token at the cursor, ignoring the cache.
    pub(crate) fn next_token_raw(&mut self) -> ParseResult<Token> {
        self.skip_blanks();
        if self.at_end() {
            return Ok(Token::new(TokenType::Eof, "", self.pos));
        }
        if self.at_lexer_eof_token() {
            return Ok(Token::new(TokenType::Eof, "", self.pos));
        }
        while self.skip_comment() {
            self.skip_blanks();
            if self.at_end() || self.at_lexer_eof_token() {
                return Ok(Token::new(TokenType::Eof, "", self.pos));
            }
        }
        if let Some(tok) = self.read_operator() {
            return Ok(tok);
        }
        if let Some(tok) = self.read_word()? {
            return Ok(tok);
        }
        Ok(Token::new(TokenType::Eof, "", self.pos))
    }

    /// The terminating character of an enclosing construct ends the token stream
    /// unless a case pattern or an explicit eof-token list is being read.
    fn at_lexer_eof_token(&self) -> bool {
        match self.lex_eof_token {
            Some(eof) => {
                self.peek() == Some(eof)
                    && self.lex_state & PST_CASEPAT == 0
                    && self.lex_state & PST_EOFTOKEN == 0
            }
            None => false,
        }
    }

    fn read_operator(&mut self) -> Option<Token> {
        let start = self.pos;
        let c = self.peek()?;
        for &(op, tt) in THREE_CHAR_OPS.iter().chain(TWO_CHAR_OPS) {
            if self.lookahead_is(op) {
                self.pos += op.chars().count();
                return Some(Token::new(tt, op, start));
            }
        }
        let tt = match c {
            ';' => TokenType::Semi,
            '|' => TokenType::Pipe,
            '&' => TokenType::Amp,
            '(' | ')' if self.lex_mode.context == WordContext::Regex => return None,
            '(' => TokenType::LParen,
            ')' => TokenType::RParen,
            '<' | '>' if self.char_at(self.pos + 1) == Some('(') => return None,
            '<' => TokenType::Less,
            '>' => TokenType::Greater,
            '\n' => TokenType::Newline,
            _ => return None,
        };
        self.pos += 1;
        Some(Token::new(tt, c.to_string(), start))
    }

    pub(crate) fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    /// Skip a `#` comment up to (not including) the newline.
    pub(crate) fn skip_comment(&mut self) -> bool {
        if self.peek() != Some('#') || self.ctx.current().in_quotes() {
            return false;
        }
        if self.pos > 0 {
            let prev = self.src[self.pos - 1];
            if !" \t\n;|&(){}".contains(prev) {
                return false;
            }
        }
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
        true
    }

    // =========================================================================
    // MATCHED PAIRS
    // =========================================================================

    /// Scan up to the `close` matching an already-consumed `open`, returning the
    /// text in between. The closing character is consumed but not returned.
    pub(crate) fn parse_matched_pair(
        &mut self,
        open: char,
        close: char,
        flags: u32,
        initial_was_dollar: bool,
    ) -> ParseResult<String> {
        let quote = self.ctx.current_mut();
        quote.push();
        match open {
            '\'' => quote.single = true,
            '"' => quote.double = true,
            _ => {}
        }
        let result = self.scan_matched_pair(open, close, flags, initial_was_dollar);
        self.ctx.current_mut().pop();
        result
    }

    fn scan_matched_pair(
        &mut self,
        open: char,
        close: char,
        flags: u32,
        initial_was_dollar: bool,
    ) -> ParseResult<String> {
        let start = self.pos;
        let mut count = 1;
        let mut out = String::new();
        let mut pass_next = false;
        let mut was_dollar = initial_was_dollar;

        while count > 0 {
            let Some(ch) = self.advance() else {
                return Err(ParseError::unterminated(
                    format!("unexpected EOF while looking for matching `{}'", close),
                    start,
                ));
            };
            if flags & MP_DOLBRACE != 0
                && self.dolbrace == DolbraceState::Op
                && !"#%^,~:-=?+/".contains(ch)
            {
                self.dolbrace = DolbraceState::Word;
            }
            if pass_next {
                pass_next = false;
                out.push(ch);
                was_dollar = ch == '$';
                continue;
            }
            if open == '\'' {
                if ch == close {
                    count -= 1;
                    if count == 0 {
                        break;
                    }
                }
                if ch == '\\' && flags & MP_ALLOWESC != 0 {
                    pass_next = true;
                }
                out.push(ch);
                was_dollar = false;
                continue;
            }
            if ch == '\\' {
                if self.peek() == Some('\n') {
                    self.advance();
                } else {
                    pass_next = true;
                    out.push(ch);
                }
                was_dollar = false;
                continue;
            }
            if ch == close {
                count -= 1;
                if count == 0 {
                    break;
                }
                out.push(ch);
                was_dollar = false;
                continue;
            }
            if ch == open && open != close {
                if !(flags & MP_DOLBRACE != 0 && open == '{') {
                    count += 1;
                }
                out.push(ch);
                was_dollar = false;
                continue;
            }
            if open != close && matches!(ch, '\'' | '"' | '`') {
                let nested = match ch {
                    '\'' => {
                        let quote_flags = if was_dollar { flags | MP_ALLOWESC } else { flags };
                        self.parse_matched_pair('\'', '\'', quote_flags, false)?
                    }
                    '"' => self.parse_matched_pair('"', '"', flags | MP_DQUOTE, false)?,
                    _ => self.parse_matched_pair('`', '`', flags, false)?,
                };
                out.push(ch);
                out.push_str(&nested);
                out.push(ch);
                was_dollar = false;
                continue;
            }
            if ch == '$' && flags & MP_EXTGLOB == 0 {
                if let Some(next) = self.peek() {
                    if was_dollar {
                        out.push(ch);
                        was_dollar = false;
                        continue;
                    }
                    if next == '{' {
                        if flags & MP_ARITH != 0
                            && !self.char_at(self.pos + 1).is_some_and(is_funsub_char)
                        {
                            out.push(ch);
                            was_dollar = true;
                            continue;
                        }
                        self.pos -= 1;
                        match self.parse_param_expansion(flags & MP_DQUOTE != 0)? {
                            Some((_, text)) => {
                                out.push_str(&text);
                                was_dollar = false;
                            }
                            None => {
                                self.advance();
                                out.push('$');
                                was_dollar = true;
                            }
                        }
                        continue;
                    }
                    if next == '(' {
                        self.pos -= 1;
                        let mut text = None;
                        if self.char_at(self.pos + 2) == Some('(') {
                            text = self.parse_arithmetic_expansion()?.map(|(_, t)| t);
                        }
                        if text.is_none() {
                            text = self.parse_command_substitution()?.map(|(_, t)| t);
                        }
                        match text {
                            Some(t) => out.push_str(&t),
                            None => {
                                out.push('$');
                                out.push('(');
                                self.pos += 2;
                            }
                        }
                        was_dollar = false;
                        continue;
                    }
                    if next == '[' {
                        self.pos -= 1;
                        match self.parse_deprecated_arithmetic()? {
                            Some((_, text)) => {
                                out.push_str(&text);
                                was_dollar = false;
                            }
                            None => {
                                self.advance();
                                out.push('$');
                                was_dollar = true;
                            }
                        }
                        continue;
                    }
                }
            }
            out.push(ch);
            was_dollar = ch == '$';
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<(TokenType, String)> {
        let mut p = Parser::new(src, false, false);
        let mut out = Vec::new();
        loop {
            let tok = p.lex_next_token().unwrap();
            if tok.token_type == TokenType::Eof {
                break;
            }
            out.push((tok.token_type, tok.value.clone()));
        }
        out
    }

    #[test]
    fn test_longest_operator_match() {
        let toks = tokens("a;;&b&>>c<<-d");
        let types: Vec<TokenType> = toks.iter().map(|t| t.0).collect();
        assert_eq!(
            types,
            vec![
                TokenType::Word,
                TokenType::SemiSemiAmp,
                TokenType::Word,
                TokenType::AmpGreaterGreater,
                TokenType::Word,
                TokenType::LessLessMinus,
                TokenType::Word,
            ]
        );
    }

    #[test]
    fn test_process_substitution_is_not_an_operator() {
        let toks = tokens("cat <(ls)");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1], (TokenType::Word, "<(ls)".to_string()));
    }

    #[test]
    fn test_comment_only_after_boundary() {
        let toks = tokens("echo a#b # trailing");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].1, "a#b");
    }

    #[test]
    fn test_peek_is_idempotent() {
        let mut p = Parser::new("echo hi", false, false);
        let a = p.lex_peek_token().unwrap();
        let b = p.lex_peek_token().unwrap();
        assert_eq!(a, b);
        assert_eq!(p.pos, 0);
        let c = p.lex_next_token().unwrap();
        assert_eq!(c.value, "echo");
        assert_eq!(p.pos, 4);
    }

    #[test]
    fn test_matched_pair_nested_quotes() {
        let mut p = Parser::new("a \"b)\" c) rest", false, false);
        let s = p.parse_matched_pair('(', ')', 0, false).unwrap();
        assert_eq!(s, "a \"b)\" c");
        assert_eq!(p.peek(), Some(' '));
        assert_eq!(p.ctx.current().depth(), 0);
    }

    #[test]
    fn test_matched_pair_unterminated() {
        let mut p = Parser::new("abc", false, false);
        let err = p.parse_matched_pair('{', '}', 0, false).unwrap_err();
        assert!(err.is_unterminated());
        assert_eq!(err.message, "unexpected EOF while looking for matching `}'");
        assert_eq!(p.ctx.current().depth(), 0);
    }
}
