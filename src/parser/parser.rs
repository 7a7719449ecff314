//! Recursive Descent Parser for Bash Scripts
//!
//! The parser owns a single cursor over the source characters. Tokens are
//! read on demand by the lexer methods (see `lexer.rs`, `word_parser.rs`),
//! which share the cursor; a one-token cache keyed by position and scanning
//! mode avoids re-reading words that were only peeked.
//!
//! Grammar (simplified):
//!   script       ::= list (newline list)*
//!   list         ::= pipeline ((&&|'||'|;|&|newline) pipeline)*
//!   pipeline     ::= [time [-p]] [!] command ((|||&) command)*
//!   command      ::= simple_command | compound_command | function_def
//!   simple_cmd   ::= (assignment | word | redirection)+
//!   compound_cmd ::= if | for | while | until | case | select | coproc
//!                  | subshell | group | (( | [[

use std::rc::Rc;

use crate::ast::types::{Command, List, Negation, Node, Operator, Pipeline, Time, Word};
use crate::parser::context::ContextStack;
use crate::parser::lexer::{LexMode, Token, TokenType};
use crate::parser::scan::{
    is_metachar, is_negation_boundary, is_quote, is_whitespace, is_word_end_context, starts_with,
};
use crate::parser::types::{
    is_reserved_like, DolbraceState, ParseError, ParseResult, PST_EOFTOKEN,
};

/// Inputs larger than this are rejected before scanning
pub const MAX_INPUT_SIZE: usize = 10_000_000;

/// Heredoc whose body has not been read yet
#[derive(Debug, Clone)]
pub(crate) struct PendingHeredoc {
    pub delimiter: String,
    pub strip_tabs: bool,
    pub quoted: bool,
    /// Index into `heredoc_bodies`
    pub slot: usize,
    /// Position of the delimiter word, used to recognise re-parses
    pub start_pos: usize,
}

/// Snapshot taken around nested constructs
#[derive(Debug, Clone)]
pub(crate) struct SavedState {
    state: u32,
    eof_token: Option<char>,
    ctx: ContextStack,
}

pub struct Parser {
    pub(crate) src: Vec<char>,
    pub(crate) pos: usize,
    pub(crate) extglob: bool,
    pub(crate) in_process_sub: bool,

    pub(crate) state: u32,
    pub(crate) eof_token: Option<char>,
    pub(crate) dolbrace: DolbraceState,
    pub(crate) ctx: ContextStack,

    /// Scanning mode requested by the grammar
    pub(crate) mode: LexMode,
    // What the lexer last synchronised from the grammar. Nested parses can
    // leave these ahead of the grammar state until the next sync.
    pub(crate) lex_mode: LexMode,
    pub(crate) lex_state: u32,
    pub(crate) lex_eof_token: Option<char>,

    pub(crate) token_cache: Option<Rc<Token>>,
    pub(crate) cached_mode: LexMode,
    pub(crate) post_read_pos: usize,

    pub(crate) pending_heredocs: Vec<PendingHeredoc>,
    pub(crate) heredoc_bodies: Vec<String>,
    pub(crate) cmdsub_heredoc_end: Option<usize>,
    pub(crate) saw_newline_in_single_quote: bool,

    pub(crate) arith_src: Vec<char>,
    pub(crate) arith_pos: usize,
}

impl Parser {
    pub fn new(source: &str, in_process_sub: bool, extglob: bool) -> Self {
        Self {
            src: source.chars().collect(),
            pos: 0,
            extglob,
            in_process_sub,
            state: 0,
            eof_token: None,
            dolbrace: DolbraceState::None,
            ctx: ContextStack::new(),
            mode: LexMode::default(),
            lex_mode: LexMode::default(),
            lex_state: 0,
            lex_eof_token: None,
            token_cache: None,
            cached_mode: LexMode::default(),
            post_read_pos: 0,
            pending_heredocs: Vec::new(),
            heredoc_bodies: Vec::new(),
            cmdsub_heredoc_end: None,
            saw_newline_in_single_quote: false,
            arith_src: Vec::new(),
            arith_pos: 0,
        }
    }

    // =========================================================================
    // CURSOR
    // =========================================================================

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    pub(crate) fn char_at(&self, i: usize) -> Option<char> {
        self.src.get(i).copied()
    }

    pub(crate) fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    pub(crate) fn lookahead_is(&self, s: &str) -> bool {
        starts_with(&self.src, self.pos, s)
    }

    pub(crate) fn text(&self, start: usize, end: usize) -> String {
        crate::parser::scan::slice(&self.src, start, end)
    }

    // =========================================================================
    // STATE
    // =========================================================================

    pub(crate) fn set_state(&mut self, flag: u32) {
        self.state |= flag;
    }

    pub(crate) fn clear_state(&mut self, flag: u32) {
        self.state &= !flag;
    }

    pub(crate) fn in_state(&self, flag: u32) -> bool {
        self.state & flag != 0
    }

    pub(crate) fn save_state(&self) -> SavedState {
        SavedState {
            state: self.state,
            eof_token: self.eof_token,
            ctx: self.ctx.clone(),
        }
    }

    pub(crate) fn restore_state(&mut self, saved: SavedState) {
        self.state = saved.state;
        self.eof_token = saved.eof_token;
        self.ctx = saved.ctx;
    }

    /// Enter a nested list ended by `eof` (`)` or `}`).
    pub(crate) fn enter_nested_list(&mut self, flags: u32, eof: char) -> SavedState {
        let saved = self.save_state();
        self.set_state(flags);
        self.eof_token = Some(eof);
        self.ctx.push();
        saved
    }

    // =========================================================================
    // LEXER BRIDGE
    // =========================================================================

    /// Publish the grammar's state to the lexer, dropping a stale cached token.
    ///
    /// The `lex_*` copies only change here. A substitution parsed in the
    /// middle of a word syncs its own inner state, and the rest of that word
    /// is still scanned with it after the grammar state is restored. In
    /// `x ${ echo $(a)}; }` the live end token is `}`, but the word after
    /// `echo` is scanned under the `$(...)` end token `)`, so it reads as
    /// `$(a)}` the way bash reads it. With the live state it would stop
    /// before the `}` and close the funsub early.
    pub(crate) fn sync_lexer(&mut self) {
        if let Some(tok) = &self.token_cache {
            if tok.pos != self.pos || self.cached_mode != self.mode {
                self.token_cache = None;
            }
        }
        self.lex_state = self.state;
        self.lex_eof_token = self.eof_token;
        self.lex_mode = self.mode;
    }

    fn cached_token(&self) -> Option<Rc<Token>> {
        match &self.token_cache {
            Some(tok) if tok.pos == self.pos && self.cached_mode == self.mode => {
                Some(Rc::clone(tok))
            }
            _ => None,
        }
    }

    pub(crate) fn lex_peek_token(&mut self) -> ParseResult<Rc<Token>> {
        if let Some(tok) = self.cached_token() {
            return Ok(tok);
        }
        let saved_pos = self.pos;
        self.sync_lexer();
        let tok = match &self.token_cache {
            Some(tok) => Rc::clone(tok),
            None => {
                let tok = Rc::new(self.next_token_raw()?);
                self.token_cache = Some(Rc::clone(&tok));
                tok
            }
        };
        self.cached_mode = self.mode;
        self.post_read_pos = self.pos;
        self.pos = saved_pos;
        Ok(tok)
    }

    pub(crate) fn lex_next_token(&mut self) -> ParseResult<Rc<Token>> {
        if self.cached_token().is_some() {
            if let Some(tok) = self.token_cache.take() {
                self.pos = self.post_read_pos;
                return Ok(tok);
            }
        }
        self.sync_lexer();
        let tok = match self.token_cache.take() {
            Some(tok) => tok,
            None => Rc::new(self.next_token_raw()?),
        };
        self.cached_mode = self.mode;
        Ok(tok)
    }

    pub(crate) fn lex_skip_blanks(&mut self) {
        self.sync_lexer();
        self.skip_blanks();
    }

    pub(crate) fn lex_skip_comment(&mut self) -> bool {
        self.sync_lexer();
        self.skip_comment()
    }

    pub(crate) fn lex_is_command_terminator(&mut self) -> ParseResult<bool> {
        let tok = self.lex_peek_token()?;
        Ok(matches!(
            tok.token_type,
            TokenType::Eof
                | TokenType::Newline
                | TokenType::Pipe
                | TokenType::Semi
                | TokenType::LParen
                | TokenType::RParen
                | TokenType::Amp
        ))
    }

    pub(crate) fn lex_peek_operator(&mut self) -> ParseResult<Option<TokenType>> {
        let tok = self.lex_peek_token()?;
        Ok(tok.token_type.is_operator().then_some(tok.token_type))
    }

    /// Word text with a trailing line continuation removed
    fn keyword_text(tok: &Token) -> Option<&str> {
        if tok.token_type != TokenType::Word {
            return None;
        }
        Some(tok.value.strip_suffix("\\\n").unwrap_or(&tok.value))
    }

    pub(crate) fn lex_peek_reserved_word(&mut self) -> ParseResult<Option<String>> {
        let tok = self.lex_peek_token()?;
        Ok(Self::keyword_text(&tok)
            .filter(|w| is_reserved_like(w))
            .map(str::to_string))
    }

    pub(crate) fn lex_is_at_reserved_word(&mut self, word: &str) -> ParseResult<bool> {
        Ok(self.lex_peek_reserved_word()?.as_deref() == Some(word))
    }

    pub(crate) fn lex_consume_word(&mut self, expected: &str) -> ParseResult<bool> {
        let tok = self.lex_peek_token()?;
        if Self::keyword_text(&tok) == Some(expected) {
            self.lex_next_token()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn lex_peek_case_terminator(&mut self) -> ParseResult<Option<&'static str>> {
        let tok = self.lex_peek_token()?;
        Ok(match tok.token_type {
            TokenType::SemiSemi => Some(";;"),
            TokenType::SemiAmp => Some(";&"),
            TokenType::SemiSemiAmp => Some(";;&"),
            _ => None,
        })
    }

    /// Position of the next token, for error reporting
    pub(crate) fn peek_pos(&mut self) -> ParseResult<usize> {
        Ok(self.lex_peek_token()?.pos)
    }

    // =========================================================================
    // WHITESPACE
    // =========================================================================

    pub(crate) fn skip_whitespace(&mut self) {
        while !self.at_end() {
            self.lex_skip_blanks();
            match self.peek() {
                Some('#') => {
                    if !self.lex_skip_comment() {
                        break;
                    }
                }
                Some('\\') if self.char_at(self.pos + 1) == Some('\n') => self.pos += 2,
                _ => break,
            }
        }
    }

    pub(crate) fn skip_whitespace_and_newlines(&mut self) {
        while let Some(ch) = self.peek() {
            if is_whitespace(ch) {
                self.pos += 1;
                if ch == '\n' {
                    self.after_newline();
                }
            } else if ch == '#' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
            } else if ch == '\\' && self.char_at(self.pos + 1) == Some('\n') {
                self.pos += 2;
            } else {
                break;
            }
        }
    }

    /// Read pending heredoc bodies after a consumed newline, then skip past
    /// any heredoc already consumed inside a command substitution.
    pub(crate) fn after_newline(&mut self) {
        self.gather_heredoc_bodies();
        if let Some(end) = self.cmdsub_heredoc_end.take() {
            if end > self.pos {
                self.pos = end;
            }
        }
    }

    pub(crate) fn is_bang_followed_by_procsub(&self) -> bool {
        matches!(self.char_at(self.pos + 1), Some('>' | '<'))
            && self.char_at(self.pos + 2) == Some('(')
    }

    pub(crate) fn at_list_terminating_bracket(&self) -> bool {
        let Some(ch) = self.peek() else {
            return false;
        };
        if self.eof_token == Some(ch) || ch == ')' {
            return true;
        }
        if ch == '}' {
            return self.char_at(self.pos + 1).map_or(true, is_word_end_context);
        }
        false
    }

    pub(crate) fn at_eof_token(&mut self) -> ParseResult<bool> {
        let Some(eof) = self.eof_token else {
            return Ok(false);
        };
        let tok = self.lex_peek_token()?;
        Ok(match eof {
            ')' => tok.token_type == TokenType::RParen,
            '}' => tok.token_type == TokenType::Word && tok.value == "}",
            _ => false,
        })
    }

    pub(crate) fn collect_redirects(&mut self) -> ParseResult<Vec<Node>> {
        let mut redirects = Vec::new();
        loop {
            self.skip_whitespace();
            match self.parse_redirect()? {
                Some(r) => redirects.push(r),
                None => break,
            }
        }
        Ok(redirects)
    }

    // =========================================================================
    // RAW WORD LOOKAHEAD
    // =========================================================================

    /// The plain word at the cursor, without consuming it
    pub(crate) fn peek_word(&mut self) -> String {
        let saved = self.pos;
        self.skip_whitespace();
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if is_metachar(ch) || is_quote(ch) {
                break;
            }
            if ch == '\\' {
                match self.char_at(self.pos + 1) {
                    Some('\n') => break,
                    Some(next) => {
                        word.push(ch);
                        word.push(next);
                        self.pos += 2;
                        continue;
                    }
                    None => {}
                }
            }
            word.push(ch);
            self.pos += 1;
        }
        self.pos = saved;
        word
    }

    /// Consume `expected` if it is the next plain word. Inside a process
    /// substitution a glued `}` prefix (as in `}fi`) is accepted too.
    pub(crate) fn consume_word(&mut self, expected: &str) -> bool {
        let saved = self.pos;
        self.skip_whitespace();
        let word = self.peek_word();
        let (keyword, has_brace) = if self.in_process_sub
            && word.chars().count() > 1
            && word.starts_with('}')
        {
            (&word[1..], true)
        } else {
            (word.as_str(), false)
        };
        if keyword != expected {
            self.pos = saved;
            return false;
        }
        self.skip_whitespace();
        if has_brace {
            self.pos += 1;
        }
        self.pos += expected.chars().count();
        while self.peek() == Some('\\') && self.char_at(self.pos + 1) == Some('\n') {
            self.pos += 2;
        }
        true
    }

    // =========================================================================
    // PIPELINES AND LISTS
    // =========================================================================

    /// Skip a `-p` flag after `time`.
    fn consume_time_posix_flag(&mut self) -> bool {
        if self.peek() != Some('-') {
            return false;
        }
        let saved = self.pos;
        self.pos += 1;
        if self.peek() == Some('p') {
            self.pos += 1;
            if self.peek().map_or(true, is_metachar) {
                return true;
            }
        }
        self.pos = saved;
        false
    }

    fn at_negation_bang(&self) -> bool {
        self.peek() == Some('!')
            && self.char_at(self.pos + 1).map_or(true, is_negation_boundary)
            && !self.is_bang_followed_by_procsub()
    }

    pub(crate) fn parse_pipeline(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        let mut timed = false;
        let mut time_negated = false;
        let mut posix = false;

        if self.lex_is_at_reserved_word("time")? {
            self.lex_consume_word("time")?;
            timed = true;
            self.skip_whitespace();
            posix |= self.consume_time_posix_flag();
            self.skip_whitespace();
            if self.lookahead_is("--") && self.char_at(self.pos + 2).map_or(true, is_whitespace) {
                self.pos += 2;
                posix = true;
                self.skip_whitespace();
            }
            while self.lex_is_at_reserved_word("time")? {
                self.lex_consume_word("time")?;
                self.skip_whitespace();
                posix |= self.consume_time_posix_flag();
            }
            self.skip_whitespace();
            if self.at_negation_bang() {
                self.pos += 1;
                time_negated = true;
                self.skip_whitespace();
            }
        } else if self.at_negation_bang() {
            self.pos += 1;
            self.skip_whitespace();
            let inner = self.parse_pipeline()?;
            // `! ! cmd` cancels out
            if let Some(Node::Negation(n)) = inner {
                return Ok(Some(match n.pipeline {
                    Some(p) => *p,
                    None => Node::Command(Command::default()),
                }));
            }
            return Ok(Some(Node::Negation(Negation {
                pipeline: inner.map(Box::new),
            })));
        }

        let result = self.parse_simple_pipeline()?;
        if timed {
            let time = Node::Time(Time {
                pipeline: result.map(Box::new),
                posix,
            });
            if time_negated {
                return Ok(Some(Node::Negation(Negation {
                    pipeline: Some(Box::new(time)),
                })));
            }
            return Ok(Some(time));
        }
        Ok(result)
    }

    fn parse_simple_pipeline(&mut self) -> ParseResult<Option<Node>> {
        let Some(first) = self.parse_compound_command()? else {
            return Ok(None);
        };
        let mut commands = vec![first];
        loop {
            self.skip_whitespace();
            let op = self.lex_peek_operator()?;
            if !matches!(op, Some(TokenType::Pipe | TokenType::PipeAmp)) {
                break;
            }
            self.lex_next_token()?;
            self.skip_whitespace_and_newlines();
            if op == Some(TokenType::PipeAmp) {
                commands.push(Node::PipeBoth);
            }
            match self.parse_compound_command()? {
                Some(cmd) => commands.push(cmd),
                None => return Err(ParseError::syntax("Expected command after |", self.pos)),
            }
        }
        if commands.len() == 1 {
            return Ok(commands.pop());
        }
        Ok(Some(Node::Pipeline(Pipeline { commands })))
    }

    pub(crate) fn parse_list_operator(&mut self) -> ParseResult<Option<&'static str>> {
        self.skip_whitespace();
        let op = match self.lex_peek_operator()? {
            Some(TokenType::AndAnd) => "&&",
            Some(TokenType::OrOr) => "||",
            Some(TokenType::Semi) => ";",
            Some(TokenType::Amp) => "&",
            _ => return Ok(None),
        };
        self.lex_next_token()?;
        Ok(Some(op))
    }

    pub(crate) fn peek_list_operator(&mut self) -> ParseResult<Option<&'static str>> {
        let saved = self.pos;
        let op = self.parse_list_operator();
        self.pos = saved;
        op
    }

    /// After `;` or `&`: whether the list ends here.
    fn list_ends_after_separator(&mut self, newline_sep: bool) -> bool {
        self.skip_whitespace();
        if self.at_end() || self.at_list_terminating_bracket() {
            return true;
        }
        if self.peek() == Some('\n') {
            if !newline_sep {
                return true;
            }
            self.skip_whitespace_and_newlines();
            if self.at_end() || self.at_list_terminating_bracket() {
                return true;
            }
        }
        false
    }

    pub(crate) fn parse_list(&mut self, newline_sep: bool) -> ParseResult<Option<Node>> {
        if newline_sep {
            self.skip_whitespace_and_newlines();
        } else {
            self.skip_whitespace();
        }
        let Some(first) = self.parse_pipeline()? else {
            return Ok(None);
        };
        let mut parts = vec![first];
        if self.in_state(PST_EOFTOKEN) && self.at_eof_token()? {
            return Ok(parts.pop());
        }

        loop {
            self.skip_whitespace();
            let op = match self.parse_list_operator()? {
                Some(op) => op,
                None => {
                    if self.peek() != Some('\n') || !newline_sep {
                        break;
                    }
                    self.pos += 1;
                    self.after_newline();
                    self.skip_whitespace_and_newlines();
                    if self.at_end() || self.at_list_terminating_bracket() {
                        break;
                    }
                    if matches!(self.peek_list_operator()?, Some("&" | ";")) {
                        break;
                    }
                    "\n"
                }
            };
            parts.push(Node::Operator(Operator { op: op.to_string() }));
            match op {
                "&&" | "||" => self.skip_whitespace_and_newlines(),
                "&" | ";" => {
                    if self.list_ends_after_separator(newline_sep) {
                        break;
                    }
                }
                _ => {}
            }
            match self.parse_pipeline()? {
                Some(p) => parts.push(p),
                None => {
                    return Err(ParseError::syntax(
                        format!("Expected command after {}", op),
                        self.pos,
                    ))
                }
            }
            if self.in_state(PST_EOFTOKEN) && self.at_eof_token()? {
                break;
            }
        }
        if parts.len() == 1 {
            return Ok(parts.pop());
        }
        Ok(Some(Node::List(List { parts })))
    }

    /// Parse a list in a throwaway parser and resolve its heredocs, so the
    /// result no longer refers to this parser's heredoc table.
    pub(crate) fn parse_detached_list(&mut self) -> ParseResult<Option<Node>> {
        let mut node = self.parse_list(true)?;
        if let Some(n) = &mut node {
            self.resolve_heredocs(n);
        }
        Ok(node)
    }

    fn parse_comment(&mut self) -> Option<Node> {
        if self.peek() != Some('#') {
            return None;
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
        Some(Node::Comment(crate::ast::types::Comment {
            text: self.text(start, self.pos),
        }))
    }

    // =========================================================================
    // ENTRY POINT
    // =========================================================================

    /// Parse the whole source into top-level nodes.
    pub fn parse(&mut self) -> ParseResult<Vec<Node>> {
        let mut results = self.parse_top_level().map_err(|e| e.with_line_from(&self.src))?;
        for node in &mut results {
            self.resolve_heredocs(node);
        }
        Ok(results)
    }

    fn parse_top_level(&mut self) -> ParseResult<Vec<Node>> {
        if self.src.iter().all(|c| c.is_whitespace()) {
            return Ok(vec![Node::Empty]);
        }

        // leading comments are dropped
        loop {
            self.skip_whitespace();
            while self.peek() == Some('\n') {
                self.pos += 1;
            }
            if self.at_end() || self.parse_comment().is_none() {
                break;
            }
        }

        let mut results = Vec::new();
        while !self.at_end() {
            if let Some(list) = self.parse_list(false)? {
                results.push(list);
            }
            self.skip_whitespace();
            let mut found_newline = false;
            while self.peek() == Some('\n') {
                found_newline = true;
                self.pos += 1;
                self.after_newline();
                self.skip_whitespace();
            }
            if !found_newline && !self.at_end() {
                return Err(ParseError::syntax("Syntax error", self.pos));
            }
        }
        if results.is_empty() {
            return Ok(vec![Node::Empty]);
        }

        if self.needs_trailing_backslash_fix() && results.len() < 2 {
            if let Some(last) = results.last_mut() {
                strip_trailing_backslash(last);
            }
        }
        Ok(results)
    }

    /// A lone trailing `\` after a multi-line single-quoted string is not a
    /// line continuation and must not end up in the last word.
    fn needs_trailing_backslash_fix(&self) -> bool {
        let n = self.src.len();
        self.saw_newline_in_single_quote
            && self.src.last() == Some(&'\\')
            && !(n >= 3 && self.src[n - 3] == '\\' && self.src[n - 2] == '\n')
    }

    /// Fill heredoc bodies from this parser's table.
    pub(crate) fn resolve_heredocs(&self, node: &mut Node) {
        let bodies = &self.heredoc_bodies;
        node.for_each_heredoc_mut(&mut |h| {
            if let Some(slot) = h.slot.take() {
                h.content = bodies.get(slot).cloned().unwrap_or_default();
            }
        });
    }
}

fn strip_trailing_backslash(node: &mut Node) {
    let emptied = match find_last_word(node) {
        Some(word) if word.value.ends_with('\\') => {
            word.value.pop();
            word.value.is_empty()
        }
        _ => return,
    };
    if emptied {
        if let Node::Command(cmd) = node {
            cmd.words.pop();
        }
    }
}

fn find_last_word(node: &mut Node) -> Option<&mut Word> {
    match node {
        Node::Word(w) => Some(w),
        Node::Command(cmd) => {
            if cmd.words.last().is_some_and(|w| w.value.ends_with('\\')) {
                return cmd.words.last_mut();
            }
            if let Some(Node::Redirect(r)) = cmd.redirects.last_mut() {
                return Some(&mut r.target);
            }
            cmd.words.last_mut()
        }
        Node::Pipeline(p) => p.commands.last_mut().and_then(find_last_word),
        Node::List(l) => l.parts.last_mut().and_then(find_last_word),
        _ => None,
    }
}

/// Parse bash source into top-level nodes.
///
/// With `extglob`, the `?(...)`, `*(...)`, `+(...)`, `@(...)` and `!(...)`
/// pattern forms are recognised inside words.
pub fn parse(source: &str, extglob: bool) -> ParseResult<Vec<Node>> {
    if source.len() > MAX_INPUT_SIZE {
        return Err(ParseError::syntax(
            format!(
                "Input too large: {} bytes exceeds limit of {} bytes",
                source.len(),
                MAX_INPUT_SIZE
            ),
            0,
        ));
    }
    let mut parser = Parser::new(source, false, extglob);
    let result = parser.parse();
    match &result {
        Ok(nodes) => tracing::debug!(nodes = nodes.len(), extglob, "parsed source"),
        Err(e) => tracing::debug!(error = %e, "parse failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<&'static str> {
        parse(src, false).unwrap().iter().map(|n| n.kind()).collect()
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert_eq!(parse("", false).unwrap(), vec![Node::Empty]);
        assert_eq!(parse("   \n\t", false).unwrap(), vec![Node::Empty]);
        assert_eq!(parse("# just a comment\n", false).unwrap(), vec![Node::Empty]);
    }

    #[test]
    fn test_top_level_newlines_split_results() {
        assert_eq!(kinds("echo a\necho b"), vec!["command", "command"]);
        assert_eq!(kinds("a && b; c"), vec!["list"]);
    }

    #[test]
    fn test_pipeline_and_pipe_both() {
        let nodes = parse("a | b |& c", false).unwrap();
        let Node::Pipeline(p) = &nodes[0] else {
            panic!("expected pipeline");
        };
        let kinds: Vec<_> = p.commands.iter().map(|n| n.kind()).collect();
        assert_eq!(kinds, vec!["command", "command", "pipe-both", "command"]);
    }

    #[test]
    fn test_double_negation_cancels() {
        let nodes = parse("! ! true", false).unwrap();
        assert_eq!(nodes[0].kind(), "command");
        let nodes = parse("! true", false).unwrap();
        assert_eq!(nodes[0].kind(), "negation");
    }

    #[test]
    fn test_time_posix_and_negation() {
        let nodes = parse("time -p ls", false).unwrap();
        let Node::Time(t) = &nodes[0] else {
            panic!("expected time");
        };
        assert!(t.posix);
        let nodes = parse("time ! ls", false).unwrap();
        assert_eq!(nodes[0].kind(), "negation");
    }

    #[test]
    fn test_list_operators_recorded() {
        let nodes = parse("a && b || c &", false).unwrap();
        let Node::List(l) = &nodes[0] else {
            panic!("expected list");
        };
        let ops: Vec<_> = l.parts.iter().filter_map(|n| n.operator()).collect();
        assert_eq!(ops, vec!["&&", "||", "&"]);
    }

    #[test]
    fn test_missing_command_after_operator() {
        let err = parse("a &&", false).unwrap_err();
        assert_eq!(err.message, "Expected command after &&");
        let err = parse("a | ", false).unwrap_err();
        assert_eq!(err.message, "Expected command after |");
    }

    #[test]
    fn test_stray_close_paren_is_syntax_error() {
        let err = parse("echo a )", false).unwrap_err();
        assert_eq!(err.message, "Syntax error");
        assert_eq!(err.pos, 7);
    }

    #[test]
    fn test_word_after_nested_substitution_keeps_inner_end_token() {
        let nodes = parse("x ${ echo $(a)}; }", false).unwrap();
        let Node::Command(cmd) = &nodes[0] else {
            panic!("expected command");
        };
        assert_eq!(cmd.words.len(), 2);
        assert_eq!(cmd.words[1].value, "${ echo $(a)}; }");
    }

    #[test]
    fn test_heredoc_bodies_are_resolved() {
        let nodes = parse("cat <<EOF\nhello\nEOF\n", false).unwrap();
        let Node::Command(cmd) = &nodes[0] else {
            panic!("expected command");
        };
        let Node::HereDoc(h) = &cmd.redirects[0] else {
            panic!("expected heredoc");
        };
        assert_eq!(h.content, "hello\n");
        assert_eq!(h.slot, None);
    }

    #[test]
    fn test_input_size_limit() {
        let big = "a".repeat(MAX_INPUT_SIZE + 1);
        assert!(parse(&big, false).is_err());
    }
}
