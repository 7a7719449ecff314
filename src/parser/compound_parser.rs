//! Compound Command Parser
//!
//! Handles parsing of compound commands: subshells, brace groups, `((`,
//! if, for, while, until, select, case, coproc and function definitions,
//! plus the keyword-terminated lists that form their bodies.

use crate::ast::types::{
    ArithmeticCommand, BraceGroup, Case, CasePattern, Coproc, For, ForArith, Function, If, List,
    Node, Operator, Select, Subshell, Until, While, Word,
};
use crate::parser::parser::Parser;
use crate::parser::scan::{
    is_expansion_start, is_extglob_prefix, is_metachar, is_quote, is_valid_identifier,
    is_whitespace, is_word_end_context, looks_like_assignment,
};
use crate::parser::types::{
    is_reserved_like, ParseError, ParseResult, COMPOUND_KEYWORDS, PST_CASEPAT, PST_CASESTMT,
    PST_SUBSHELL, RESERVED_WORDS,
};

impl Parser {
    /// Syntax error reported at the start of the next token
    pub(crate) fn error_at_next(&mut self, message: impl Into<String>) -> ParseError {
        match self.peek_pos() {
            Ok(pos) => ParseError::syntax(message, pos),
            Err(e) => e,
        }
    }

    fn skip_plain_word(&mut self) {
        while self.peek().is_some_and(|c| !is_metachar(c) && !is_quote(c)) {
            self.pos += 1;
        }
    }

    // =========================================================================
    // GROUPING
    // =========================================================================

    pub(crate) fn parse_subshell(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if self.peek() != Some('(') {
            return Ok(None);
        }
        self.pos += 1;
        self.set_state(PST_SUBSHELL);
        let body = self.parse_list(true).and_then(|body| {
            let Some(body) = body else {
                return Err(ParseError::syntax("Expected command in subshell", self.pos));
            };
            self.skip_whitespace();
            if self.peek() != Some(')') {
                return Err(ParseError::syntax("Expected ) to close subshell", self.pos));
            }
            self.pos += 1;
            Ok(body)
        });
        self.clear_state(PST_SUBSHELL);
        Ok(Some(Node::Subshell(Subshell {
            body: Box::new(body?),
            redirects: self.collect_redirects()?,
        })))
    }

    /// Parse `(( expr ))`. Returns `None` with the cursor restored when the
    /// parentheses turn out to be nested subshells, as in `((a) )`.
    pub(crate) fn parse_arithmetic_command(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if !self.lookahead_is("((") {
            return Ok(None);
        }
        let saved = self.pos;
        self.pos += 2;
        let content_start = self.pos;
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                '\'' => {
                    self.pos += 1;
                    while self.peek().is_some_and(|c| c != '\'') {
                        self.pos += 1;
                    }
                    if !self.at_end() {
                        self.pos += 1;
                    }
                }
                '"' => {
                    self.pos += 1;
                    while let Some(c) = self.peek() {
                        if c == '\\' && self.char_at(self.pos + 1).is_some() {
                            self.pos += 2;
                        } else {
                            self.pos += 1;
                            if c == '"' {
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
                    if depth == 1 && self.char_at(self.pos + 1) == Some(')') {
                        break;
                    }
                    depth -= 1;
                    if depth == 0 {
                        self.pos = saved;
                        return Ok(None);
                    }
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }
        if self.at_end() {
            return Err(ParseError::unterminated(
                "unexpected EOF looking for `))'",
                saved,
            ));
        }
        let content = self.text(content_start, self.pos).replace("\\\n", "");
        self.pos += 2;
        let expression = self.parse_arith_expr(&content)?;
        Ok(Some(Node::ArithmeticCommand(ArithmeticCommand {
            expression: expression.map(Box::new),
            redirects: self.collect_redirects()?,
            raw_content: content,
        })))
    }

    pub(crate) fn parse_brace_group(&mut self) -> ParseResult<Option<BraceGroup>> {
        self.skip_whitespace();
        if !self.lex_consume_word("{")? {
            return Ok(None);
        }
        self.skip_whitespace_and_newlines();
        let Some(body) = self.parse_list(true)? else {
            return Err(self.error_at_next("Expected command in brace group"));
        };
        self.skip_whitespace();
        if !self.lex_consume_word("}")? {
            return Err(self.error_at_next("Expected } to close brace group"));
        }
        Ok(Some(BraceGroup {
            body: Box::new(body),
            redirects: self.collect_redirects()?,
        }))
    }

    // =========================================================================
    // IF / WHILE / UNTIL
    // =========================================================================

    /// A required keyword-terminated list
    fn expect_list_until(&mut self, stop: &[&str], message: &str) -> ParseResult<Node> {
        match self.parse_list_until(stop)? {
            Some(list) => Ok(list),
            None => Err(self.error_at_next(message)),
        }
    }

    fn expect_keyword(&mut self, word: &str, message: &str) -> ParseResult<()> {
        if self.lex_consume_word(word)? {
            Ok(())
        } else {
            Err(self.error_at_next(message))
        }
    }

    pub(crate) fn parse_if(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if !self.lex_consume_word("if")? {
            return Ok(None);
        }
        let (condition, then_body, else_body) = self.parse_if_branches("if")?;
        self.skip_whitespace_and_newlines();
        self.expect_keyword("fi", "Expected 'fi' to close if statement")?;
        Ok(Some(Node::If(If {
            condition: Box::new(condition),
            then_body: Box::new(then_body),
            else_body: else_body.map(Box::new),
            redirects: self.collect_redirects()?,
        })))
    }

    /// Condition, `then` list and optional `elif`/`else` tail, after the
    /// `if` or `elif` keyword has been consumed.
    fn parse_if_branches(&mut self, keyword: &str) -> ParseResult<(Node, Node, Option<Node>)> {
        let condition =
            self.expect_list_until(&["then"], &format!("Expected condition after '{}'", keyword))?;
        self.skip_whitespace_and_newlines();
        self.expect_keyword("then", &format!("Expected 'then' after {} condition", keyword))?;
        let then_body =
            self.expect_list_until(&["elif", "else", "fi"], "Expected commands after 'then'")?;
        self.skip_whitespace_and_newlines();

        let else_body = if self.lex_is_at_reserved_word("elif")? {
            self.lex_consume_word("elif")?;
            let (condition, then_body, else_body) = self.parse_if_branches("elif")?;
            Some(Node::If(If {
                condition: Box::new(condition),
                then_body: Box::new(then_body),
                else_body: else_body.map(Box::new),
                redirects: Vec::new(),
            }))
        } else if self.lex_is_at_reserved_word("else")? {
            self.lex_consume_word("else")?;
            Some(self.expect_list_until(&["fi"], "Expected commands after 'else'")?)
        } else {
            None
        };
        Ok((condition, then_body, else_body))
    }

    /// `while`/`until` share everything but the keyword
    fn parse_condition_loop(&mut self, keyword: &str) -> ParseResult<Option<(Node, Node)>> {
        self.skip_whitespace();
        if !self.lex_consume_word(keyword)? {
            return Ok(None);
        }
        let condition =
            self.expect_list_until(&["do"], &format!("Expected condition after '{}'", keyword))?;
        self.skip_whitespace_and_newlines();
        self.expect_keyword("do", &format!("Expected 'do' after {} condition", keyword))?;
        let body = self.expect_list_until(&["done"], "Expected commands after 'do'")?;
        self.skip_whitespace_and_newlines();
        self.expect_keyword("done", &format!("Expected 'done' to close {} loop", keyword))?;
        Ok(Some((condition, body)))
    }

    pub(crate) fn parse_while(&mut self) -> ParseResult<Option<Node>> {
        let Some((condition, body)) = self.parse_condition_loop("while")? else {
            return Ok(None);
        };
        Ok(Some(Node::While(While {
            condition: Box::new(condition),
            body: Box::new(body),
            redirects: self.collect_redirects()?,
        })))
    }

    pub(crate) fn parse_until(&mut self) -> ParseResult<Option<Node>> {
        let Some((condition, body)) = self.parse_condition_loop("until")? else {
            return Ok(None);
        };
        Ok(Some(Node::Until(Until {
            condition: Box::new(condition),
            body: Box::new(body),
            redirects: self.collect_redirects()?,
        })))
    }

    // =========================================================================
    // FOR / SELECT
    // =========================================================================

    /// `do ... done` or a brace group
    fn parse_loop_body(&mut self, context: &str) -> ParseResult<Node> {
        if self.peek() == Some('{') {
            return match self.parse_brace_group()? {
                Some(group) => Ok(*group.body),
                None => Err(self.error_at_next(format!("Expected brace group body in {}", context))),
            };
        }
        if self.lex_consume_word("do")? {
            let body = self.expect_list_until(&["done"], "Expected commands after 'do'")?;
            self.skip_whitespace_and_newlines();
            self.expect_keyword("done", &format!("Expected 'done' to close {}", context))?;
            return Ok(body);
        }
        Err(self.error_at_next(format!("Expected 'do' or '{{' in {}", context)))
    }

    pub(crate) fn parse_for(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if !self.lex_consume_word("for")? {
            return Ok(None);
        }
        self.skip_whitespace();
        if self.lookahead_is("((") {
            return self.parse_for_arith().map(Some);
        }

        let var = if self.peek() == Some('$') {
            match self.parse_word(false, false, false)? {
                Some(word) => word.value,
                None => return Err(self.error_at_next("Expected variable name after 'for'")),
            }
        } else {
            let name = self.peek_word();
            if name.is_empty() {
                return Err(self.error_at_next("Expected variable name after 'for'"));
            }
            self.consume_word(&name);
            name
        };
        self.skip_whitespace();
        if self.peek() == Some(';') {
            self.pos += 1;
        }
        self.skip_whitespace_and_newlines();

        let mut words = None;
        if self.lex_is_at_reserved_word("in")? {
            self.lex_consume_word("in")?;
            self.skip_whitespace();
            let saw_delimiter = matches!(self.peek(), Some(';' | '\n'));
            if self.peek() == Some(';') {
                self.pos += 1;
            }
            self.skip_whitespace_and_newlines();
            let mut list = Vec::new();
            loop {
                self.skip_whitespace();
                let Some(c) = self.peek() else {
                    break;
                };
                if c == ';' || c == '\n' {
                    if c == ';' {
                        self.pos += 1;
                    }
                    break;
                }
                if self.lex_is_at_reserved_word("do")? {
                    if saw_delimiter {
                        break;
                    }
                    return Err(self.error_at_next("Expected ';' or newline before 'do'"));
                }
                match self.parse_word(false, false, false)? {
                    Some(word) => list.push(word),
                    None => break,
                }
            }
            words = Some(list);
        }
        self.skip_whitespace_and_newlines();

        if self.peek() == Some('{') {
            let Some(group) = self.parse_brace_group()? else {
                return Err(self.error_at_next("Expected brace group in for loop"));
            };
            return Ok(Some(Node::For(For {
                var,
                words,
                body: group.body,
                redirects: self.collect_redirects()?,
            })));
        }
        self.expect_keyword("do", "Expected 'do' in for loop")?;
        let body = self.expect_list_until(&["done"], "Expected commands after 'do'")?;
        self.skip_whitespace_and_newlines();
        self.expect_keyword("done", "Expected 'done' to close for loop")?;
        Ok(Some(Node::For(For {
            var,
            words,
            body: Box::new(body),
            redirects: self.collect_redirects()?,
        })))
    }

    /// `for (( init; cond; incr ))`, cursor at the opening `((`
    fn parse_for_arith(&mut self) -> ParseResult<Node> {
        self.pos += 2;
        let mut parts: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '(' => depth += 1,
                ')' if depth > 0 => depth -= 1,
                ')' if self.char_at(self.pos + 1) == Some(')') => {
                    parts.push(current.trim_start_matches([' ', '\t']).to_string());
                    self.pos += 2;
                    break;
                }
                ';' if depth == 0 => {
                    parts.push(current.trim_start_matches([' ', '\t']).to_string());
                    current.clear();
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            current.push(c);
            self.pos += 1;
        }
        let [init, cond, incr]: [String; 3] = parts.try_into().map_err(|_| {
            ParseError::syntax("Expected three expressions in for ((;;))", self.pos)
        })?;
        self.skip_whitespace();
        if self.peek() == Some(';') {
            self.pos += 1;
        }
        self.skip_whitespace_and_newlines();
        let body = self.parse_loop_body("for loop")?;
        Ok(Node::ForArith(ForArith {
            init,
            cond,
            incr,
            body: Box::new(body),
            redirects: self.collect_redirects()?,
        }))
    }

    pub(crate) fn parse_select(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if !self.lex_consume_word("select")? {
            return Ok(None);
        }
        self.skip_whitespace();
        let var = self.peek_word();
        if var.is_empty() {
            return Err(self.error_at_next("Expected variable name after 'select'"));
        }
        self.consume_word(&var);
        self.skip_whitespace();
        if self.peek() == Some(';') {
            self.pos += 1;
        }
        self.skip_whitespace_and_newlines();

        let mut words = None;
        if self.lex_is_at_reserved_word("in")? {
            self.lex_consume_word("in")?;
            self.skip_whitespace_and_newlines();
            let mut list: Vec<Word> = Vec::new();
            loop {
                self.skip_whitespace();
                let Some(c) = self.peek() else {
                    break;
                };
                if matches!(c, ';' | '\n' | '{') {
                    if c == ';' {
                        self.pos += 1;
                    }
                    break;
                }
                if self.lex_is_at_reserved_word("do")? {
                    break;
                }
                match self.parse_word(false, false, false)? {
                    Some(word) => list.push(word),
                    None => break,
                }
            }
            words = Some(list);
        }
        self.skip_whitespace_and_newlines();
        let body = self.parse_loop_body("select")?;
        Ok(Some(Node::Select(Select {
            var,
            words,
            body: Box::new(body),
            redirects: self.collect_redirects()?,
        })))
    }

    // =========================================================================
    // CASE
    // =========================================================================

    fn consume_case_terminator(&mut self) -> ParseResult<&'static str> {
        match self.lex_peek_case_terminator()? {
            Some(term) => {
                self.lex_next_token()?;
                Ok(term)
            }
            None => Ok(";;"),
        }
    }

    pub(crate) fn parse_case(&mut self) -> ParseResult<Option<Node>> {
        if !self.consume_word("case") {
            return Ok(None);
        }
        self.set_state(PST_CASESTMT);
        let result = self.parse_case_body();
        self.clear_state(PST_CASEPAT | PST_CASESTMT);
        let (word, patterns) = result?;
        Ok(Some(Node::Case(Case {
            word,
            patterns,
            redirects: self.collect_redirects()?,
        })))
    }

    fn parse_case_body(&mut self) -> ParseResult<(Word, Vec<CasePattern>)> {
        self.skip_whitespace();
        let Some(word) = self.parse_word(false, false, false)? else {
            return Err(self.error_at_next("Expected word after 'case'"));
        };
        self.skip_whitespace_and_newlines();
        self.expect_keyword("in", "Expected 'in' after case word")?;
        self.skip_whitespace_and_newlines();

        let mut patterns = Vec::new();
        self.set_state(PST_CASEPAT);
        loop {
            self.skip_whitespace_and_newlines();
            if self.at_end() {
                break;
            }
            if self.lex_is_at_reserved_word("esac")? && !self.esac_is_pattern() {
                break;
            }
            self.skip_whitespace_and_newlines();
            if self.peek() == Some('(') {
                self.pos += 1;
                self.skip_whitespace_and_newlines();
            }
            let pattern = self.read_case_pattern();
            if pattern.is_empty() {
                return Err(self.error_at_next("Expected pattern in case statement"));
            }
            self.skip_whitespace();

            let mut body = None;
            if self.lex_peek_case_terminator()?.is_none() {
                self.skip_whitespace_and_newlines();
                if !self.at_end()
                    && !self.lex_is_at_reserved_word("esac")?
                    && self.lex_peek_case_terminator()?.is_none()
                {
                    body = self.parse_list_until(&["esac"])?;
                    self.skip_whitespace();
                }
            }
            let terminator = self.consume_case_terminator()?;
            self.skip_whitespace_and_newlines();
            patterns.push(CasePattern {
                pattern,
                body: body.map(Box::new),
                terminator: terminator.to_string(),
            });
        }
        self.clear_state(PST_CASEPAT);
        self.skip_whitespace_and_newlines();
        self.expect_keyword("esac", "Expected 'esac' to close case statement")?;
        Ok((word, patterns))
    }

    /// Whether an `esac` at the cursor is really a pattern, as in `esac) ;;`
    fn esac_is_pattern(&mut self) -> bool {
        let saved = self.pos;
        self.skip_whitespace();
        self.skip_plain_word();
        self.skip_whitespace();
        let mut is_pattern = false;
        if self.peek() == Some(')') && self.eof_token != Some(')') {
            self.pos += 1;
            self.skip_whitespace();
            is_pattern = self.peek().is_some_and(|c| c == ';' || (c != '\n' && c != ')'));
        }
        self.pos = saved;
        is_pattern
    }

    /// Read a pattern list up to and including its closing `)`. Blanks are
    /// dropped except inside extglob groups.
    fn read_case_pattern(&mut self) -> String {
        let mut pattern = String::new();
        let mut extglob_depth = 0usize;
        while let Some(ch) = self.peek() {
            let next = self.char_at(self.pos + 1);
            if ch == ')' {
                self.pos += 1;
                if extglob_depth == 0 {
                    break;
                }
                pattern.push(ch);
                extglob_depth -= 1;
            } else if ch == '\\' {
                if next == Some('\n') {
                    self.pos += 2;
                } else {
                    self.push_raw(&mut pattern, 2);
                }
            } else if is_expansion_start(&self.src, self.pos, "$(") {
                self.push_raw(&mut pattern, 2);
                if self.peek() == Some('(') {
                    // $(( ... ))
                    self.push_raw(&mut pattern, 1);
                    let mut depth = 2usize;
                    while let Some(c) = self.peek() {
                        if depth == 0 {
                            break;
                        }
                        match c {
                            '(' => depth += 1,
                            ')' => depth -= 1,
                            _ => {}
                        }
                        self.push_raw(&mut pattern, 1);
                    }
                } else {
                    extglob_depth += 1;
                }
            } else if ch == '(' && extglob_depth > 0 {
                self.push_raw(&mut pattern, 1);
                extglob_depth += 1;
            } else if self.extglob && is_extglob_prefix(ch) && next == Some('(') {
                self.push_raw(&mut pattern, 2);
                extglob_depth += 1;
            } else if ch == '[' {
                self.read_case_bracket(&mut pattern);
            } else if ch == '\'' {
                self.push_raw(&mut pattern, 1);
                while self.peek().is_some_and(|c| c != '\'') {
                    self.push_raw(&mut pattern, 1);
                }
                self.push_raw(&mut pattern, 1);
            } else if ch == '"' {
                self.push_raw(&mut pattern, 1);
                while let Some(c) = self.peek() {
                    if c == '"' {
                        break;
                    }
                    if c == '\\' && self.char_at(self.pos + 1).is_some() {
                        self.push_raw(&mut pattern, 1);
                    }
                    self.push_raw(&mut pattern, 1);
                }
                self.push_raw(&mut pattern, 1);
            } else if is_whitespace(ch) {
                if extglob_depth > 0 {
                    pattern.push(ch);
                }
                self.pos += 1;
            } else {
                self.push_raw(&mut pattern, 1);
            }
        }
        pattern
    }

    /// Copy up to `n` characters from the cursor
    fn push_raw(&mut self, out: &mut String, n: usize) {
        for _ in 0..n {
            match self.advance() {
                Some(c) => out.push(c),
                None => break,
            }
        }
    }

    /// `[...]` inside a case pattern: copied whole when it closes before the
    /// pattern ends, otherwise a literal `[`.
    fn read_case_bracket(&mut self, pattern: &mut String) {
        let negation = |c: Option<char>| matches!(c, Some('^' | '!'));
        let mut scan = self.pos + 1;
        if negation(self.char_at(scan)) {
            scan += 1;
        }
        let leading_bracket = self.char_at(scan) == Some(']');
        if leading_bracket {
            scan += 1;
        }
        let mut depth = 0usize;
        let mut is_class = false;
        while let Some(c) = self.char_at(scan) {
            match c {
                ']' if depth == 0 => {
                    is_class = true;
                    break;
                }
                '[' => depth += 1,
                ')' | '|' if depth == 0 => break,
                _ => {}
            }
            scan += 1;
        }
        self.push_raw(pattern, 1);
        if !is_class {
            return;
        }
        if negation(self.peek()) {
            self.push_raw(pattern, 1);
        }
        if leading_bracket && self.peek() == Some(']') {
            self.push_raw(pattern, 1);
        }
        while self.peek().is_some_and(|c| c != ']') {
            self.push_raw(pattern, 1);
        }
        self.push_raw(pattern, 1);
    }

    // =========================================================================
    // COPROC / FUNCTION
    // =========================================================================

    /// Subshell or `((` command at a `(`
    fn parse_paren_compound(&mut self) -> ParseResult<Option<Node>> {
        if self.char_at(self.pos + 1) == Some('(') {
            if let Some(cmd) = self.parse_arithmetic_command()? {
                return Ok(Some(cmd));
            }
        }
        self.parse_subshell()
    }

    pub(crate) fn parse_coproc(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if !self.lex_consume_word("coproc")? {
            return Ok(None);
        }
        self.skip_whitespace();
        if let Some(command) = self.parse_coproc_command()? {
            return Ok(Some(Node::Coproc(Coproc {
                command: Box::new(command),
                name: String::new(),
            })));
        }

        let word_start = self.pos;
        let potential_name = self.peek_word();
        if !potential_name.is_empty() {
            self.skip_plain_word();
            self.skip_whitespace();
            if is_valid_identifier(&potential_name) {
                if let Some(command) = self.parse_coproc_command()? {
                    return Ok(Some(Node::Coproc(Coproc {
                        command: Box::new(command),
                        name: potential_name,
                    })));
                }
            }
            self.pos = word_start;
        }
        match self.parse_command()? {
            Some(command) => Ok(Some(Node::Coproc(Coproc {
                command: Box::new(command),
                name: String::new(),
            }))),
            None => Err(ParseError::syntax("Expected command after coproc", self.pos)),
        }
    }

    /// The compound commands that may follow `coproc [NAME]`
    fn parse_coproc_command(&mut self) -> ParseResult<Option<Node>> {
        match self.peek() {
            Some('{') => {
                if let Some(group) = self.parse_brace_group()? {
                    return Ok(Some(Node::BraceGroup(group)));
                }
            }
            Some('(') => {
                if let Some(cmd) = self.parse_paren_compound()? {
                    return Ok(Some(cmd));
                }
            }
            _ => {}
        }
        match self.lex_peek_reserved_word()? {
            Some(w) if COMPOUND_KEYWORDS.contains(w.as_str()) => self.parse_compound_command(),
            _ => Ok(None),
        }
    }

    pub(crate) fn parse_function(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if self.at_end() {
            return Ok(None);
        }
        let saved = self.pos;

        if self.lex_is_at_reserved_word("function")? {
            self.lex_consume_word("function")?;
            self.skip_whitespace();
            let name = self.peek_word();
            if name.is_empty() {
                self.pos = saved;
                return Ok(None);
            }
            self.consume_word(&name);
            self.skip_whitespace();
            if self.lookahead_is("()") {
                self.pos += 2;
            }
            self.skip_whitespace_and_newlines();
            return self.finish_function(name).map(Some);
        }

        let name = self.peek_word();
        if name.is_empty() || RESERVED_WORDS.contains(name.as_str()) || looks_like_assignment(&name)
        {
            return Ok(None);
        }
        self.skip_whitespace();
        let name_start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !is_metachar(c) && !is_quote(c) && c != '(' && c != ')')
        {
            self.pos += 1;
        }
        let name_chars: Vec<char> = self.src[name_start..self.pos].to_vec();
        if name_chars.is_empty() || has_open_brace_expansion(&name_chars) {
            self.pos = saved;
            return Ok(None);
        }
        let after_name = self.pos;
        self.skip_whitespace();
        let glued = self.pos == after_name;
        // `@(...)`, `$(...)` and friends are words, not definitions
        if glued && matches!(name_chars.last(), Some('*' | '?' | '@' | '+' | '!' | '$')) {
            self.pos = saved;
            return Ok(None);
        }
        if self.peek() != Some('(') {
            self.pos = saved;
            return Ok(None);
        }
        self.pos += 1;
        self.skip_whitespace();
        if self.peek() != Some(')') {
            self.pos = saved;
            return Ok(None);
        }
        self.pos += 1;
        self.skip_whitespace_and_newlines();
        let name: String = name_chars.into_iter().collect();
        self.finish_function(name).map(Some)
    }

    fn finish_function(&mut self, name: String) -> ParseResult<Node> {
        match self.parse_function_body()? {
            Some(body) => Ok(Node::Function(Function {
                name,
                body: Box::new(body),
            })),
            None => Err(ParseError::syntax("Expected function body", self.pos)),
        }
    }

    fn parse_function_body(&mut self) -> ParseResult<Option<Node>> {
        if let Some(group) = self.parse_brace_group()? {
            return Ok(Some(Node::BraceGroup(group)));
        }
        if self.lookahead_is("((") {
            if let Some(cmd) = self.parse_arithmetic_command()? {
                return Ok(Some(cmd));
            }
        }
        let parsers: [fn(&mut Parser) -> ParseResult<Option<Node>>; 8] = [
            Parser::parse_subshell,
            Parser::parse_conditional_expr,
            Parser::parse_if,
            Parser::parse_while,
            Parser::parse_until,
            Parser::parse_for,
            Parser::parse_case,
            Parser::parse_select,
        ];
        for parse in parsers {
            if let Some(node) = parse(self)? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // LISTS AND DISPATCH
    // =========================================================================

    fn at_list_until_terminator(&mut self, stop: &[&str]) -> ParseResult<bool> {
        match self.peek() {
            None | Some(')') => return Ok(true),
            Some('}') if self.char_at(self.pos + 1).map_or(true, is_word_end_context) => {
                return Ok(true)
            }
            _ => {}
        }
        if let Some(word) = self.lex_peek_reserved_word()? {
            if stop.contains(&word.as_str()) {
                return Ok(true);
            }
        }
        Ok(self.lex_peek_case_terminator()?.is_some())
    }

    /// A list ending before one of the `stop` keywords
    pub(crate) fn parse_list_until(&mut self, stop: &[&str]) -> ParseResult<Option<Node>> {
        self.skip_whitespace_and_newlines();
        if let Some(word) = self.lex_peek_reserved_word()? {
            if stop.contains(&word.as_str()) {
                return Ok(None);
            }
        }
        let Some(first) = self.parse_pipeline()? else {
            return Ok(None);
        };
        let mut parts = vec![first];

        loop {
            self.skip_whitespace();
            let op = match self.parse_list_operator()? {
                Some(op) => op,
                None => {
                    if self.peek() != Some('\n') {
                        break;
                    }
                    self.pos += 1;
                    self.after_newline();
                    self.skip_whitespace_and_newlines();
                    if self.at_list_until_terminator(stop)? {
                        break;
                    }
                    if matches!(self.peek_list_operator()?, Some("&" | ";")) {
                        break;
                    }
                    "\n"
                }
            };
            let push = |parts: &mut Vec<Node>| {
                parts.push(Node::Operator(Operator { op: op.to_string() }))
            };
            match op {
                ";" => {
                    self.skip_whitespace_and_newlines();
                    if self.at_list_until_terminator(stop)? {
                        break;
                    }
                    push(&mut parts);
                }
                "&" => {
                    push(&mut parts);
                    self.skip_whitespace_and_newlines();
                    if self.at_list_until_terminator(stop)? {
                        break;
                    }
                }
                "&&" | "||" => {
                    push(&mut parts);
                    self.skip_whitespace_and_newlines();
                }
                _ => push(&mut parts),
            }
            if self.at_list_until_terminator(stop)? {
                break;
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
        }
        if parts.len() == 1 {
            return Ok(parts.pop());
        }
        Ok(Some(Node::List(List { parts })))
    }

    /// One command of a pipeline: any compound command, a function
    /// definition or a simple command.
    pub(crate) fn parse_compound_command(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        let Some(ch) = self.peek() else {
            return Ok(None);
        };
        if ch == '(' {
            return self.parse_paren_compound();
        }
        if ch == '{' {
            if let Some(group) = self.parse_brace_group()? {
                return Ok(Some(Node::BraceGroup(group)));
            }
        }
        if ch == '[' && self.char_at(self.pos + 1) == Some('[') {
            if let Some(cond) = self.parse_conditional_expr()? {
                return Ok(Some(cond));
            }
        }

        let mut reserved = self.lex_peek_reserved_word()?;
        if reserved.is_none() && self.in_process_sub {
            // `}fi` glued together inside <( ... )
            let word = self.peek_word();
            if let Some(rest) = word.strip_prefix('}') {
                if !rest.is_empty() && is_reserved_like(rest) {
                    reserved = Some(rest.to_string());
                }
            }
        }
        match reserved.as_deref() {
            Some(w @ ("fi" | "then" | "elif" | "else" | "done" | "esac" | "do" | "in")) => {
                Err(self.error_at_next(format!("Unexpected reserved word '{}'", w)))
            }
            Some("if") => self.parse_if(),
            Some("while") => self.parse_while(),
            Some("until") => self.parse_until(),
            Some("for") => self.parse_for(),
            Some("select") => self.parse_select(),
            Some("case") => self.parse_case(),
            Some("function") => self.parse_function(),
            Some("coproc") => self.parse_coproc(),
            _ => match self.parse_function()? {
                Some(f) => Ok(Some(f)),
                None => self.parse_command(),
            },
        }
    }
}

/// Whether `${` opens more braces than the name closes
fn has_open_brace_expansion(name: &[char]) -> bool {
    let mut depth = 0i32;
    let mut i = 0;
    while i < name.len() {
        if is_expansion_start(name, i, "${") {
            depth += 1;
            i += 2;
            continue;
        }
        if name[i] == '}' {
            depth -= 1;
        }
        i += 1;
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::parse;
    use crate::parser::types::ErrorKind;

    fn one(src: &str) -> Node {
        let mut nodes = parse(src, false).unwrap();
        assert_eq!(nodes.len(), 1, "{:?}", nodes);
        nodes.remove(0)
    }

    fn err(src: &str) -> ParseError {
        parse(src, false).unwrap_err()
    }

    #[test]
    fn test_subshell_and_brace_group() {
        match one("(a; b) > out") {
            Node::Subshell(s) => {
                assert!(matches!(*s.body, Node::List(_)));
                assert_eq!(s.redirects.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(one("{ a; }"), Node::BraceGroup(_)));
        assert_eq!(err("{ a; ").message, "Expected } to close brace group");
        assert_eq!(err("( a").message, "Expected ) to close subshell");
    }

    #[test]
    fn test_arithmetic_command() {
        match one("(( x = 1 + 2 ))") {
            Node::ArithmeticCommand(a) => {
                assert_eq!(a.raw_content, " x = 1 + 2 ");
                assert!(matches!(a.expression.as_deref(), Some(Node::ArithAssign(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
        // nested subshells, not arithmetic
        assert!(matches!(one("((a) )"), Node::Subshell(_)));
        let e = err("(( 1 + 2");
        assert_eq!(e.kind, ErrorKind::Unterminated);
        assert_eq!(e.pos, 0);
    }

    #[test]
    fn test_if_elif_else() {
        match one("if a; then b; elif c; then d; else e; fi") {
            Node::If(i) => match i.else_body.as_deref() {
                Some(Node::If(elif)) => {
                    assert!(elif.redirects.is_empty());
                    assert!(elif.else_body.is_some());
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err("if a; then b;").message, "Expected 'fi' to close if statement");
        assert_eq!(err("if a; b; fi").message, "Unexpected reserved word 'fi'");
        assert_eq!(err("if a\nb").message, "Expected 'then' after if condition");
        assert_eq!(err("if then").message, "Expected condition after 'if'");
    }

    #[test]
    fn test_while_and_until() {
        assert!(matches!(one("while true; do x; done"), Node::While(_)));
        assert!(matches!(one("until false\ndo\n  x\ndone"), Node::Until(_)));
        assert_eq!(err("until a; do b").message, "Expected 'done' to close until loop");
    }

    #[test]
    fn test_for_loops() {
        match one("for x in a b c; do echo $x; done") {
            Node::For(f) => {
                assert_eq!(f.var, "x");
                let words: Vec<_> = f.words.unwrap().into_iter().map(|w| w.value).collect();
                assert_eq!(words, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match one("for x; do :; done") {
            Node::For(f) => assert!(f.words.is_none()),
            other => panic!("unexpected {:?}", other),
        }
        match one("for x in; do :; done") {
            Node::For(f) => assert_eq!(f.words, Some(vec![])),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(one("for x; { b; }"), Node::For(_)));
    }

    #[test]
    fn test_for_arith() {
        match one("for ((i=0; i<3; i++)); do echo; done") {
            Node::ForArith(f) => {
                assert_eq!((f.init.as_str(), f.cond.as_str(), f.incr.as_str()), ("i=0", "i<3", "i++"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            err("for ((i=0; i<3)); do :; done").message,
            "Expected three expressions in for ((;;))"
        );
    }

    #[test]
    fn test_select() {
        match one("select x in a b; do :; done") {
            Node::Select(s) => assert_eq!(s.words.map(|w| w.len()), Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_case_patterns() {
        match one("case $x in\n a|b) one ;;\n (c) two ;&\n *) ;;&\nesac") {
            Node::Case(c) => {
                let pats: Vec<_> = c
                    .patterns
                    .iter()
                    .map(|p| (p.pattern.as_str(), p.terminator.as_str(), p.body.is_some()))
                    .collect();
                assert_eq!(
                    pats,
                    vec![("a|b", ";;", true), ("c", ";&", true), ("*", ";;&", false)]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_case_char_class_and_esac_pattern() {
        match one("case x in []a]) a;; esac) b;; esac") {
            Node::Case(c) => {
                assert_eq!(c.patterns[0].pattern, "[]a]");
                assert_eq!(c.patterns[1].pattern, "esac");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err("case x in a) b;;").message, "Expected 'esac' to close case statement");
    }

    #[test]
    fn test_unclosed_case_names_esac() {
        for src in ["case x in a) b;;", "case x in a) b", "case x in", "case x in\n a) ;;\n"] {
            assert_eq!(err(src).message, "Expected 'esac' to close case statement", "{:?}", src);
        }
    }

    #[test]
    fn test_case_extglob_keeps_blanks() {
        let nodes = parse("case x in @(a | b)) ;; esac", true).unwrap();
        match &nodes[0] {
            Node::Case(c) => assert_eq!(c.patterns[0].pattern, "@(a | b)"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_coproc_forms() {
        match one("coproc NAME { a; }") {
            Node::Coproc(c) => {
                assert_eq!(c.name, "NAME");
                assert!(matches!(*c.command, Node::BraceGroup(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        match one("coproc cat file") {
            Node::Coproc(c) => {
                assert_eq!(c.name, "");
                assert!(matches!(*c.command, Node::Command(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        match one("coproc while :; do :; done") {
            Node::Coproc(c) => assert!(matches!(*c.command, Node::While(_))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_function_definitions() {
        for src in ["f() { a; }", "function f { a; }", "function f() ( a )"] {
            match one(src) {
                Node::Function(f) => assert_eq!(f.name, "f"),
                other => panic!("unexpected {:?} for {}", other, src),
            }
        }
        assert_eq!(err("f() echo").message, "Expected function body");
    }

    #[test]
    fn test_unexpected_reserved_word() {
        let e = err("then");
        assert_eq!(e.message, "Unexpected reserved word 'then'");
        assert_eq!(e.pos, 0);
    }

    #[test]
    fn test_list_until_keeps_newline_operators() {
        match one("while a\nb\ndo c; done") {
            Node::While(w) => match *w.condition {
                Node::List(l) => assert_eq!(l.parts.len(), 3),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
