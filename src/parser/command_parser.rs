//! Command Parser
//!
//! Handles parsing of simple commands, redirections, and heredocs.
//!
//! A heredoc redirect is returned as soon as its delimiter is read; the body
//! is collected later, when the parser consumes the newline that ends the
//! line (see `gather_heredoc_bodies`). Bodies are stored in the parser's
//! heredoc table and copied into the nodes once parsing finishes.

use crate::ast::types::{Command, HereDoc, Node, Redirect, Word};
use crate::parser::parser::{Parser, PendingHeredoc};
use crate::parser::scan::{
    ansi_escape, count_trailing_backslashes, is_digit, is_expansion_start, is_metachar,
    is_name_char, is_name_start, is_redirect_char, looks_like_assignment,
    normalize_heredoc_delimiter,
};
use crate::parser::types::{ParseError, ParseResult, ASSIGNMENT_BUILTINS, PST_HEREDOC};

/// Numeric fd prefix such as the `2` in `2>`
fn parse_fd(digits: &str) -> Option<u32> {
    digits.parse().ok()
}

/// `name` or `name[subscript]` as accepted inside `{...}` before a redirect
fn is_valid_varfd(varname: &str) -> bool {
    let Some(first) = varname.chars().next() else {
        return false;
    };
    if !is_name_start(first) {
        return false;
    }
    if !varname.contains('[') && !varname.contains(']') {
        return varname.chars().skip(1).all(is_name_char);
    }
    let chars: Vec<char> = varname.chars().collect();
    let (Some(left), Some(right)) = (
        chars.iter().position(|&c| c == '['),
        chars.iter().rposition(|&c| c == ']'),
    ) else {
        return false;
    };
    if right != chars.len() - 1 || right <= left + 1 {
        return false;
    }
    let base = &chars[..left];
    !base.is_empty() && is_name_start(base[0]) && base[1..].iter().all(|&c| is_name_char(c))
}

fn is_assignment_word(word: &Word) -> bool {
    looks_like_assignment(&word.value)
}

impl Parser {
    // =========================================================================
    // REDIRECTIONS
    // =========================================================================

    /// `{name}` before a redirect operator; restores the cursor when absent.
    fn read_varfd(&mut self) -> Option<String> {
        if self.peek() != Some('{') {
            return None;
        }
        let saved = self.pos;
        self.pos += 1;
        let mut varname = String::new();
        let mut in_bracket = false;
        while let Some(ch) = self.peek() {
            if is_redirect_char(ch) || (ch == '}' && !in_bracket) {
                break;
            }
            let accept = match ch {
                '[' => {
                    in_bracket = true;
                    true
                }
                ']' => {
                    in_bracket = false;
                    true
                }
                c if c.is_alphanumeric() || c == '_' => true,
                c => in_bracket && !is_metachar(c),
            };
            if !accept {
                break;
            }
            varname.push(ch);
            self.pos += 1;
        }
        if self.peek() == Some('}') && is_valid_varfd(&varname) {
            self.pos += 1;
            return Some(varname);
        }
        self.pos = saved;
        None
    }

    pub(crate) fn parse_redirect(&mut self) -> ParseResult<Option<Node>> {
        self.skip_whitespace();
        if self.at_end() {
            return Ok(None);
        }
        let start = self.pos;
        let varfd = self.read_varfd();
        let mut fd: Option<u32> = None;
        let mut fd_text = String::new();
        if varfd.is_none() {
            while let Some(c) = self.peek().filter(|c| c.is_numeric()) {
                fd_text.push(c);
                self.pos += 1;
            }
            fd = parse_fd(&fd_text);
        }
        let has_prefix = varfd.is_some() || !fd_text.is_empty();

        if self.peek() == Some('&') && self.char_at(self.pos + 1) == Some('>') {
            if has_prefix {
                self.pos = start;
                return Ok(None);
            }
            self.pos += 2;
            let op = if self.peek() == Some('>') {
                self.pos += 1;
                "&>>"
            } else {
                "&>"
            };
            self.skip_whitespace();
            let Some(target) = self.parse_word(false, false, false)? else {
                return Err(missing_target(op, self.pos));
            };
            return Ok(Some(redirect(op, target)));
        }

        let Some(first) = self.peek().filter(|&c| is_redirect_char(c)) else {
            self.pos = start;
            return Ok(None);
        };
        if fd_text.is_empty() && self.char_at(self.pos + 1) == Some('(') {
            // process substitution, not a redirect
            self.pos = start;
            return Ok(None);
        }
        self.pos += 1;

        let mut strip_tabs = false;
        let after = self.char_at(self.pos + 1);
        let digit_or_dash = after.is_some_and(|c| is_digit(c) || c == '-');
        let op: &str = match (first, self.peek()) {
            ('>', Some('>')) => {
                self.pos += 1;
                ">>"
            }
            ('<', Some('<')) => {
                self.pos += 1;
                if self.peek() == Some('<') {
                    self.pos += 1;
                    "<<<"
                } else {
                    if self.peek() == Some('-') {
                        self.pos += 1;
                        strip_tabs = true;
                    }
                    "<<"
                }
            }
            ('<', Some('>')) => {
                self.pos += 1;
                "<>"
            }
            ('>', Some('|')) => {
                self.pos += 1;
                ">|"
            }
            (_, Some('&')) if !has_prefix && !digit_or_dash => {
                self.pos += 1;
                if first == '>' {
                    ">&"
                } else {
                    "<&"
                }
            }
            ('>', _) => ">",
            _ => "<",
        };

        if op == "<<" {
            let fd = if fd_text.is_empty() { None } else { fd };
            return self.parse_heredoc(fd, strip_tabs).map(Some);
        }

        let full_op = match (&varfd, fd) {
            (Some(name), _) => format!("{{{}}}{}", name, op),
            (None, Some(n)) => format!("{}{}", n, op),
            (None, None) => format!("{}{}", fd_text, op),
        };

        let target = if self.peek() == Some('&') {
            self.pos += 1;
            self.skip_whitespace();
            self.parse_dup_target(&full_op)?
        } else {
            self.skip_whitespace();
            if (op == ">&" || op == "<&") && self.peek() == Some('-') && self.closes_fd() {
                self.pos += 1;
                Some(Word::new("&-", Vec::new()))
            } else {
                self.parse_word(false, false, false)?
            }
        };
        match target {
            Some(target) => Ok(Some(redirect(&full_op, target))),
            None => Err(missing_target(&full_op, self.pos)),
        }
    }

    /// `-` glued to a following word character, as in `>&-x`
    fn closes_fd(&self) -> bool {
        self.char_at(self.pos + 1).is_some_and(|c| !is_metachar(c))
    }

    /// Target after `N>&` / `N<&`: an fd number, `-`, or a word.
    fn parse_dup_target(&mut self, op: &str) -> ParseResult<Option<Word>> {
        if self.peek() == Some('-') && self.closes_fd() {
            self.pos += 1;
            return Ok(Some(Word::new("&-", Vec::new())));
        }
        if self.peek().is_some_and(|c| c.is_numeric() || c == '-') {
            let word_start = self.pos;
            let mut fd_target = String::new();
            while let Some(c) = self.peek().filter(|c| c.is_numeric()) {
                fd_target.push(c);
                self.pos += 1;
            }
            if self.peek() == Some('-') {
                fd_target.push('-');
                self.pos += 1;
            }
            if fd_target == "-" || self.peek().map_or(true, is_metachar) {
                return Ok(Some(Word::new(format!("&{}", fd_target), Vec::new())));
            }
            self.pos = word_start;
        }
        match self.parse_word(false, false, false)? {
            Some(inner) => Ok(Some(Word::new(format!("&{}", inner.value), inner.parts))),
            None => Err(missing_target(op, self.pos)),
        }
    }

    // =========================================================================
    // HEREDOCS
    // =========================================================================

    fn parse_heredoc(&mut self, fd: Option<u32>, strip_tabs: bool) -> ParseResult<Node> {
        let start_pos = self.pos;
        self.set_state(PST_HEREDOC);
        let (delimiter, quoted) = self.parse_heredoc_delimiter();
        self.clear_state(PST_HEREDOC);

        // re-parsing the same text (after a backtracked attempt) reuses the entry
        if let Some(existing) = self
            .pending_heredocs
            .iter()
            .find(|h| h.start_pos == start_pos && h.delimiter == delimiter)
        {
            return Ok(Node::HereDoc(HereDoc {
                delimiter: existing.delimiter.clone(),
                content: String::new(),
                strip_tabs: existing.strip_tabs,
                quoted: existing.quoted,
                fd,
                complete: false,
                slot: Some(existing.slot),
            }));
        }

        let slot = self.heredoc_bodies.len();
        self.heredoc_bodies.push(String::new());
        self.pending_heredocs.push(PendingHeredoc {
            delimiter: delimiter.clone(),
            strip_tabs,
            quoted,
            slot,
            start_pos,
        });
        Ok(Node::HereDoc(HereDoc {
            delimiter,
            content: String::new(),
            strip_tabs,
            quoted,
            fd,
            complete: false,
            slot: Some(slot),
        }))
    }

    /// Read the delimiter word after `<<`, returning it with quotes removed
    /// and whether any part of it was quoted.
    fn parse_heredoc_delimiter(&mut self) -> (String, bool) {
        self.skip_whitespace();
        let mut quoted = false;
        let mut delim = String::new();
        loop {
            while let Some(ch) = self.peek().filter(|&c| !is_metachar(c)) {
                let next = self.char_at(self.pos + 1);
                match ch {
                    '"' | '\'' => {
                        quoted = true;
                        self.pos += 1;
                        while let Some(c) = self.peek().filter(|&c| c != ch) {
                            if c == '\n' && ch == '\'' {
                                self.saw_newline_in_single_quote = true;
                            }
                            delim.push(c);
                            self.pos += 1;
                        }
                        if !self.at_end() {
                            self.pos += 1;
                        }
                    }
                    '\\' => {
                        self.pos += 1;
                        match self.peek() {
                            Some('\n') => self.pos += 1,
                            Some(c) => {
                                quoted = true;
                                delim.push(c);
                                self.pos += 1;
                            }
                            None => {}
                        }
                    }
                    '$' if next == Some('\'') => {
                        quoted = true;
                        self.pos += 2;
                        self.read_ansi_delimiter(&mut delim);
                    }
                    '$' if is_expansion_start(&self.src, self.pos, "$(") => {
                        self.copy_balanced(&mut delim, 2, '(', ')');
                    }
                    '$' if next == Some('{') || next == Some('[') => {
                        if self.dollar_is_escaped() {
                            delim.push(ch);
                            self.pos += 1;
                        } else if next == Some('{') {
                            self.copy_braced_delimiter(&mut delim);
                        } else {
                            self.copy_balanced(&mut delim, 2, '[', ']');
                        }
                    }
                    '`' => self.copy_backtick_delimiter(&mut delim),
                    _ => {
                        delim.push(ch);
                        self.pos += 1;
                    }
                }
            }
            // `<(...)` glued to the delimiter is part of it
            if self.peek().is_some_and(|c| c == '<' || c == '>')
                && self.char_at(self.pos + 1) == Some('(')
            {
                self.copy_balanced(&mut delim, 2, '(', ')');
                continue;
            }
            break;
        }
        (delim, quoted)
    }

    /// Odd run of `$` before the cursor (minus one escaped by a backslash)
    fn dollar_is_escaped(&self) -> bool {
        let mut count: i64 = 0;
        let mut j = self.pos;
        while j > 0 && self.src[j - 1] == '$' {
            count += 1;
            j -= 1;
        }
        if j > 0 && self.src[j - 1] == '\\' {
            count -= 1;
        }
        count % 2 == 1
    }

    /// Body of `$'...'` in a delimiter, with escapes decoded
    fn read_ansi_delimiter(&mut self, delim: &mut String) {
        while let Some(c) = self.peek().filter(|&c| c != '\'') {
            if c == '\\' && self.char_at(self.pos + 1).is_some() {
                self.pos += 1;
                let esc = self.src[self.pos];
                match ansi_escape(esc) {
                    Some(b) => delim.push(char::from(b)),
                    None => delim.push(esc),
                }
            } else {
                delim.push(c);
            }
            self.pos += 1;
        }
        if !self.at_end() {
            self.pos += 1;
        }
    }

    /// Copy `skip` opening chars then everything up to the balancing `close`.
    fn copy_balanced(&mut self, delim: &mut String, skip: usize, open: char, close: char) {
        for _ in 0..skip {
            if let Some(c) = self.advance() {
                delim.push(c);
            }
        }
        let mut depth = 1;
        while depth > 0 {
            let Some(c) = self.advance() else {
                break;
            };
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
            }
            delim.push(c);
        }
    }

    fn copy_braced_delimiter(&mut self, delim: &mut String) {
        delim.push_str("${");
        self.pos += 2;
        let mut depth = 0;
        while let Some(c) = self.advance() {
            delim.push(c);
            if c == '{' {
                depth += 1;
            } else if c == '}' {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 && self.peek().is_some_and(is_metachar) {
                    break;
                }
            }
        }
    }

    fn copy_backtick_delimiter(&mut self, delim: &mut String) {
        delim.push('`');
        self.pos += 1;
        while let Some(c) = self.peek().filter(|&c| c != '`') {
            match c {
                '\'' | '"' => {
                    delim.push(c);
                    self.pos += 1;
                    while let Some(q) = self.peek().filter(|&q| q != c && q != '`') {
                        if c == '"' && q == '\\' && self.char_at(self.pos + 1).is_some() {
                            delim.push(q);
                            self.pos += 1;
                        }
                        delim.extend(self.advance());
                    }
                    if self.peek() == Some(c) {
                        delim.push(c);
                        self.pos += 1;
                    }
                }
                '\\' if self.char_at(self.pos + 1).is_some() => {
                    delim.push(c);
                    delim.push(self.src[self.pos + 1]);
                    self.pos += 2;
                }
                _ => {
                    delim.push(c);
                    self.pos += 1;
                }
            }
        }
        delim.extend(self.advance());
    }

    /// One body line starting at the cursor. In unquoted heredocs a line
    /// ending in an odd number of backslashes continues onto the next line.
    fn read_heredoc_line(&self, quoted: bool) -> (String, usize) {
        let len = self.src.len();
        let line_end_from = |mut i: usize| {
            while i < len && self.src[i] != '\n' {
                i += 1;
            }
            i
        };
        let mut line_end = line_end_from(self.pos);
        let mut line = self.text(self.pos, line_end);
        if !quoted {
            while line_end < len && count_trailing_backslashes(&line) % 2 == 1 {
                line.pop();
                let next_start = line_end + 1;
                line_end = line_end_from(next_start);
                line.push_str(&self.text(next_start, line_end));
            }
        }
        (line, line_end)
    }

    /// Returns whether `line` ends the heredoc, and the line with leading
    /// tabs removed when `<<-` is in effect.
    fn line_matches_delimiter(line: &str, delimiter: &str, strip_tabs: bool) -> (bool, String) {
        let check = if strip_tabs {
            line.trim_start_matches('\t')
        } else {
            line
        };
        let matches = normalize_heredoc_delimiter(check) == normalize_heredoc_delimiter(delimiter);
        (matches, check.to_string())
    }

    /// Read the bodies of all heredocs whose delimiter line just ended.
    pub(crate) fn gather_heredoc_bodies(&mut self) {
        let pending = std::mem::take(&mut self.pending_heredocs);
        let len = self.src.len();
        for heredoc in pending {
            let mut content = String::new();
            let normalized_delim = normalize_heredoc_delimiter(&heredoc.delimiter);
            while self.pos < len {
                let line_start = self.pos;
                let (line, line_end) = self.read_heredoc_line(heredoc.quoted);
                let (matches, check) =
                    Self::line_matches_delimiter(&line, &heredoc.delimiter, heredoc.strip_tabs);
                if matches {
                    self.pos = if line_end < len { line_end + 1 } else { line_end };
                    break;
                }

                // `$(cat <<EOF\nbody\nEOF)`: the delimiter may be glued to the closer
                let glued = normalize_heredoc_delimiter(&check).starts_with(&normalized_delim);
                if glued && (self.eof_token == Some(')') || (line_end >= len && self.in_process_sub))
                {
                    let tabs = line.chars().count() - check.chars().count();
                    self.pos = line_start + tabs + heredoc.delimiter.chars().count();
                    break;
                }

                content.push_str(&check);
                if line_end < len {
                    content.push('\n');
                    self.pos = line_end + 1;
                } else {
                    // a trailing escaped newline at EOF is dropped
                    if heredoc.quoted || count_trailing_backslashes(&line) % 2 == 0 {
                        content.push('\n');
                    }
                    self.pos = len;
                }
            }
            if let Some(body) = self.heredoc_bodies.get_mut(heredoc.slot) {
                *body = content;
            }
        }
    }

    // =========================================================================
    // SIMPLE COMMANDS
    // =========================================================================

    /// Words and redirects up to a command terminator; `None` when empty.
    pub(crate) fn parse_command(&mut self) -> ParseResult<Option<Node>> {
        let mut cmd = Command::default();
        loop {
            self.skip_whitespace();
            if self.lex_is_command_terminator()? {
                break;
            }
            if cmd.words.is_empty() {
                let reserved = self.lex_peek_reserved_word()?;
                if matches!(reserved.as_deref(), Some("}" | "]]")) {
                    break;
                }
            }
            if let Some(r) = self.parse_redirect()? {
                cmd.redirects.push(r);
                continue;
            }
            let all_assignments = cmd.words.iter().all(is_assignment_word);
            let in_assign_builtin = cmd
                .words
                .first()
                .is_some_and(|w| ASSIGNMENT_BUILTINS.contains(w.value.as_str()));
            let at_command_start =
                cmd.words.is_empty() || (all_assignments && cmd.redirects.is_empty());
            match self.parse_word(at_command_start, false, in_assign_builtin)? {
                Some(word) => cmd.words.push(word),
                None => break,
            }
        }
        if cmd.words.is_empty() && cmd.redirects.is_empty() {
            return Ok(None);
        }
        Ok(Some(Node::Command(cmd)))
    }
}

fn redirect(op: &str, target: Word) -> Node {
    Node::Redirect(Redirect {
        op: op.to_string(),
        target,
    })
}

fn missing_target(op: &str, pos: usize) -> ParseError {
    ParseError::syntax(format!("Expected target for redirect {}", op), pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(src: &str) -> Command {
        let mut p = Parser::new(src, false, false);
        match p.parse_command().unwrap() {
            Some(Node::Command(c)) => c,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn redirect_ops(src: &str) -> Vec<(String, String)> {
        command(src)
            .redirects
            .into_iter()
            .map(|r| match r {
                Node::Redirect(r) => (r.op, r.target.value),
                Node::HereDoc(h) => ("<<".to_string(), h.delimiter),
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    fn pair(op: &str, target: &str) -> (String, String) {
        (op.to_string(), target.to_string())
    }

    #[test]
    fn test_basic_redirects() {
        assert_eq!(
            redirect_ops("cmd >out 2>>err <in"),
            vec![pair(">", "out"), pair("2>>", "err"), pair("<", "in")]
        );
        assert_eq!(redirect_ops("cmd &>all"), vec![pair("&>", "all")]);
        assert_eq!(redirect_ops("cmd <>rw >|force"), vec![pair("<>", "rw"), pair(">|", "force")]);
    }

    #[test]
    fn test_fd_duplication() {
        assert_eq!(redirect_ops("cmd 2>&1"), vec![pair("2>", "&1")]);
        assert_eq!(redirect_ops("cmd >&2"), vec![pair(">", "&2")]);
        assert_eq!(redirect_ops("cmd 3>&-"), vec![pair("3>", "&-")]);
        assert_eq!(redirect_ops("cmd >& file"), vec![pair(">&", "file")]);
    }

    #[test]
    fn test_fd_prefix_is_normalised() {
        assert_eq!(redirect_ops("cmd 01>x"), vec![pair("1>", "x")]);
    }

    #[test]
    fn test_varfd() {
        assert_eq!(redirect_ops("exec {fd}>log"), vec![pair("{fd}>", "log")]);
        // not a valid name: `{1x}` stays a word
        let cmd = command("echo {1x}>log");
        assert_eq!(cmd.words.len(), 2);
    }

    #[test]
    fn test_missing_target() {
        let mut p = Parser::new("cmd >", false, false);
        let err = p.parse_command().unwrap_err();
        assert_eq!(err.message, "Expected target for redirect >");
    }

    #[test]
    fn test_heredoc_delimiter_forms() {
        let mut p = Parser::new("'EOF' x", false, false);
        assert_eq!(p.parse_heredoc_delimiter(), ("EOF".to_string(), true));
        let mut p = Parser::new("E\\OF", false, false);
        assert_eq!(p.parse_heredoc_delimiter(), ("EOF".to_string(), true));
        let mut p = Parser::new("END;", false, false);
        assert_eq!(p.parse_heredoc_delimiter(), ("END".to_string(), false));
    }

    #[test]
    fn test_heredoc_body_gathered_after_newline() {
        let mut p = Parser::new("cat <<-EOF\n\thello\n\tEOF\n", false, false);
        let node = p.parse_command().unwrap();
        assert!(node.is_some());
        assert_eq!(p.pending_heredocs.len(), 1);
        p.pos += 1;
        p.gather_heredoc_bodies();
        assert_eq!(p.heredoc_bodies, vec!["hello\n".to_string()]);
        assert!(p.pending_heredocs.is_empty());
        assert!(p.at_end());
    }

    #[test]
    fn test_heredoc_line_continuation() {
        let mut p = Parser::new("a\\\nb\nEOF\n", false, false);
        assert_eq!(p.read_heredoc_line(false), ("ab".to_string(), 4));
        p.pos = 0;
        assert_eq!(p.read_heredoc_line(true), ("a\\".to_string(), 2));
    }

    #[test]
    fn test_assignment_prefix_words() {
        let cmd = command("A=1 B=2 env");
        assert_eq!(cmd.words.len(), 3);
        assert_eq!(cmd.words[2].value, "env");

        let cmd = command("a=1 echo $a");
        assert_eq!(cmd.words.len(), 3);
        assert!(crate::parser::scan::looks_like_assignment(&cmd.words[0].value));
        assert!(!crate::parser::scan::looks_like_assignment(&cmd.words[1].value));
        assert!(cmd.words[1].parts.is_empty());
        assert_eq!(cmd.words[2].value, "$a");
        match cmd.words[2].parts.as_slice() {
            [Node::ParamExpansion(p)] => assert_eq!(p.param, "a"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
