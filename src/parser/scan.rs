//! Character Scanning Utilities
//!
//! Pure functions over `&[char]` buffers, shared by the parser and the
//! s-expression renderer. Every position is a char index, never a byte
//! offset.

// =============================================================================
// CHARACTER CLASSES
// =============================================================================

pub(crate) fn is_hex_digit(c: char) -> bool {
    c.is_ascii_hexdigit()
}

pub(crate) fn is_octal_digit(c: char) -> bool {
    ('0'..='7').contains(&c)
}

pub(crate) fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

pub(crate) fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\n'
}

pub(crate) fn is_whitespace_no_newline(c: char) -> bool {
    c == ' ' || c == '\t'
}

pub(crate) fn is_metachar(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '|' | '&' | ';' | '(' | ')' | '<' | '>')
}

pub(crate) fn is_funsub_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '|')
}

pub(crate) fn is_extglob_prefix(c: char) -> bool {
    matches!(c, '@' | '?' | '*' | '+' | '!')
}

pub(crate) fn is_redirect_char(c: char) -> bool {
    c == '<' || c == '>'
}

pub(crate) fn is_special_param(c: char) -> bool {
    matches!(c, '?' | '$' | '!' | '#' | '@' | '*' | '-' | '&')
}

pub(crate) fn is_special_param_unbraced(c: char) -> bool {
    matches!(c, '?' | '$' | '!' | '#' | '@' | '*' | '-')
}

pub(crate) fn is_word_end_context(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '|' | '&' | '<' | '>' | '(' | ')')
}

pub(crate) fn is_simple_param_op(c: char) -> bool {
    matches!(c, '-' | '=' | '?' | '+')
}

pub(crate) fn is_escape_char_in_backtick(c: char) -> bool {
    matches!(c, '$' | '`' | '\\')
}

pub(crate) fn is_negation_boundary(c: char) -> bool {
    is_whitespace(c) || matches!(c, ';' | '|' | ')' | '&' | '>' | '<')
}

pub(crate) fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

/// Letter in the Unicode sense, as accepted at the start of a shell name
pub(crate) fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub(crate) fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte value of a single-character ANSI-C escape such as `\n`
pub(crate) fn ansi_escape(c: char) -> Option<u8> {
    match c {
        'a' => Some(0x07),
        'b' => Some(0x08),
        'e' | 'E' => Some(0x1b),
        'f' => Some(0x0c),
        'n' => Some(0x0a),
        'r' => Some(0x0d),
        't' => Some(0x09),
        'v' => Some(0x0b),
        '\\' => Some(0x5c),
        '"' => Some(0x22),
        '?' => Some(0x3f),
        _ => None,
    }
}

// =============================================================================
// SLICING
// =============================================================================

pub(crate) fn starts_with(s: &[char], pos: usize, prefix: &str) -> bool {
    let mut i = pos;
    for p in prefix.chars() {
        if s.get(i) != Some(&p) {
            return false;
        }
        i += 1;
    }
    true
}

/// Clamped substring by char indices
pub(crate) fn slice(s: &[char], start: usize, end: usize) -> String {
    let end = end.min(s.len());
    if start >= end {
        return String::new();
    }
    s[start..end].iter().collect()
}

pub(crate) fn chars_of(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn char_at(s: &[char], i: usize) -> Option<char> {
    s.get(i).copied()
}

// =============================================================================
// ESCAPE & EXPANSION DETECTION
// =============================================================================

/// Count unescaped `$` characters immediately before `pos`.
pub(crate) fn count_consecutive_dollars_before(s: &[char], pos: usize) -> usize {
    let mut count = 0;
    let mut k = pos.min(s.len());
    while k > 0 && s[k - 1] == '$' {
        let mut backslashes = 0;
        let mut j = k - 1;
        while j > 0 && s[j - 1] == '\\' {
            backslashes += 1;
            j -= 1;
        }
        if backslashes % 2 == 1 {
            break;
        }
        count += 1;
        k -= 1;
    }
    count
}

/// True when `delimiter` starts at `pos` and is not itself preceded by a `$`
/// that would pair with it (`$$(` is the pid followed by a paren).
pub(crate) fn is_expansion_start(s: &[char], pos: usize, delimiter: &str) -> bool {
    if !starts_with(s, pos, delimiter) {
        return false;
    }
    count_consecutive_dollars_before(s, pos) % 2 == 0
}

pub(crate) fn is_backslash_escaped(s: &[char], idx: usize) -> bool {
    let mut count = 0;
    let mut j = idx.min(s.len());
    while j > 0 && s[j - 1] == '\\' {
        count += 1;
        j -= 1;
    }
    count % 2 == 1
}

pub(crate) fn is_dollar_dollar_paren(s: &[char], idx: usize) -> bool {
    let mut count = 0;
    let mut j = idx.min(s.len());
    while j > 0 && s[j - 1] == '$' {
        count += 1;
        j -= 1;
    }
    count % 2 == 1
}

pub(crate) fn count_trailing_backslashes(s: &str) -> usize {
    s.chars().rev().take_while(|&c| c == '\\').count()
}

/// Remove backslash-newline pairs outside comments; inside a comment the
/// newline survives so the comment still terminates.
pub(crate) fn strip_line_continuations_comment_aware(text: &str) -> String {
    let s = chars_of(text);
    let mut result = String::new();
    let mut in_comment = false;
    let mut single = false;
    let mut double = false;
    let mut i = 0;
    while i < s.len() {
        let c = s[i];
        if c == '\\' && char_at(&s, i + 1) == Some('\n') && !is_backslash_escaped(&s, i) {
            if in_comment {
                result.push('\n');
            }
            i += 2;
            in_comment = false;
            continue;
        }
        if c == '\n' {
            in_comment = false;
            result.push(c);
            i += 1;
            continue;
        }
        if c == '\'' && !double && !in_comment {
            single = !single;
        } else if c == '"' && !single && !in_comment {
            double = !double;
        } else if c == '#' && !single && !in_comment {
            in_comment = true;
        }
        result.push(c);
        i += 1;
    }
    result
}

// =============================================================================
// QUOTE & BRACKET CONSUMERS
// =============================================================================

pub(crate) fn consume_single_quote(s: &[char], start: usize) -> (usize, String) {
    let mut out = String::from("'");
    let mut i = start + 1;
    while i < s.len() && s[i] != '\'' {
        out.push(s[i]);
        i += 1;
    }
    if i < s.len() {
        out.push(s[i]);
        i += 1;
    }
    (i, out)
}

pub(crate) fn consume_double_quote(s: &[char], start: usize) -> (usize, String) {
    let mut out = String::from("\"");
    let mut i = start + 1;
    while i < s.len() && s[i] != '"' {
        if s[i] == '\\' && i + 1 < s.len() {
            out.push(s[i]);
            i += 1;
        }
        out.push(s[i]);
        i += 1;
    }
    if i < s.len() {
        out.push(s[i]);
        i += 1;
    }
    (i, out)
}

fn has_bracket_close(s: &[char], start: usize, depth: usize) -> bool {
    let mut i = start;
    while i < s.len() {
        if s[i] == ']' {
            return true;
        }
        if (s[i] == '|' || s[i] == ')') && depth == 0 {
            return false;
        }
        i += 1;
    }
    false
}

/// Consume a `[...]` glob class starting at `start`. When no closing `]`
/// belongs to it, only the `[` is consumed and the flag is false.
pub(crate) fn consume_bracket_class(s: &[char], start: usize, depth: usize) -> (usize, String, bool) {
    let mut scan = start + 1;
    if matches!(char_at(s, scan), Some('!' | '^')) {
        scan += 1;
    }
    if char_at(s, scan) == Some(']') && has_bracket_close(s, scan + 1, depth) {
        scan += 1;
    }
    let mut is_bracket = false;
    while scan < s.len() {
        match s[scan] {
            ']' => {
                is_bracket = true;
                break;
            }
            ')' | '|' if depth == 0 => break,
            _ => scan += 1,
        }
    }
    if !is_bracket {
        return (start + 1, "[".to_string(), false);
    }
    let mut out = String::from("[");
    let mut i = start + 1;
    if matches!(char_at(s, i), Some('!' | '^')) {
        out.push(s[i]);
        i += 1;
    }
    if char_at(s, i) == Some(']') && has_bracket_close(s, i + 1, depth) {
        out.push(s[i]);
        i += 1;
    }
    while i < s.len() && s[i] != ']' {
        out.push(s[i]);
        i += 1;
    }
    if i < s.len() {
        out.push(s[i]);
        i += 1;
    }
    (i, out, true)
}

pub(crate) fn skip_backtick(s: &[char], start: usize) -> usize {
    let mut i = start + 1;
    while i < s.len() && s[i] != '`' {
        if s[i] == '\\' && i + 1 < s.len() {
            i += 2;
        } else {
            i += 1;
        }
    }
    if i < s.len() {
        i += 1;
    }
    i
}

pub(crate) fn skip_single_quoted(s: &[char], start: usize) -> usize {
    let mut i = start;
    while i < s.len() && s[i] != '\'' {
        i += 1;
    }
    if i < s.len() {
        i + 1
    } else {
        i
    }
}

pub(crate) fn skip_double_quoted(s: &[char], start: usize) -> usize {
    let n = s.len();
    let mut i = start;
    let mut pass_next = false;
    let mut backq = false;
    while i < n {
        let c = s[i];
        if pass_next {
            pass_next = false;
            i += 1;
            continue;
        }
        if c == '\\' {
            pass_next = true;
            i += 1;
            continue;
        }
        if backq {
            if c == '`' {
                backq = false;
            }
            i += 1;
            continue;
        }
        if c == '`' {
            backq = true;
            i += 1;
            continue;
        }
        if c == '$' && i + 1 < n {
            if s[i + 1] == '(' {
                i = find_cmdsub_end(s, i + 2);
                continue;
            }
            if s[i + 1] == '{' {
                i = find_braced_param_end(s, i + 2);
                continue;
            }
        }
        if c == '"' {
            return i + 1;
        }
        i += 1;
    }
    i
}

// =============================================================================
// SUBSTITUTION EXTENT FINDERS
// =============================================================================

/// Decide whether the `$((` at `start` closes with `))` rather than being a
/// command substitution that opens with a subshell.
pub(crate) fn is_valid_arithmetic_start(s: &[char], start: usize) -> bool {
    let mut paren = 0;
    let mut i = start + 3;
    while i < s.len() {
        if is_expansion_start(s, i, "$(") {
            i = find_cmdsub_end(s, i + 2);
            continue;
        }
        match s[i] {
            '(' => paren += 1,
            ')' => {
                if paren > 0 {
                    paren -= 1;
                } else {
                    return char_at(s, i + 1) == Some(')');
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// End (exclusive) of a `${ ...; }` function substitution body.
pub(crate) fn find_funsub_end(s: &[char], start: usize) -> usize {
    let mut depth = 1;
    let mut i = start;
    let mut single = false;
    let mut double = false;
    while i < s.len() && depth > 0 {
        let c = s[i];
        if c == '\\' && i + 1 < s.len() && !single {
            i += 2;
            continue;
        }
        if c == '\'' && !double {
            single = !single;
            i += 1;
            continue;
        }
        if c == '"' && !single {
            double = !double;
            i += 1;
            continue;
        }
        if single || double {
            i += 1;
            continue;
        }
        if c == '{' {
            depth += 1;
        } else if c == '}' {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    s.len()
}

fn lookahead_for_esac(s: &[char], start: usize, case_depth: usize) -> bool {
    let mut i = start;
    let mut depth = case_depth;
    let mut single = false;
    let mut double = false;
    while i < s.len() {
        let c = s[i];
        if c == '\\' && i + 1 < s.len() && double {
            i += 2;
            continue;
        }
        if c == '\'' && !double {
            single = !single;
            i += 1;
            continue;
        }
        if c == '"' && !single {
            double = !double;
            i += 1;
            continue;
        }
        if single || double {
            i += 1;
            continue;
        }
        if starts_with(s, i, "case") && is_word_boundary(s, i, 4) {
            depth += 1;
            i += 4;
        } else if starts_with(s, i, "esac") && is_word_boundary(s, i, 4) {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return true;
            }
            i += 4;
        } else if c == ')' && depth == 0 {
            break;
        } else {
            i += 1;
        }
    }
    false
}

/// End (exclusive) of a `$(...)` body whose contents start at `start`.
/// Tracks quotes, comments, heredocs, nested arithmetic and `case` patterns
/// whose `)` must not close the substitution.
pub(crate) fn find_cmdsub_end(s: &[char], start: usize) -> usize {
    let mut depth = 1;
    let mut i = start;
    let mut case_depth = 0usize;
    let mut in_case_patterns = false;
    let mut arith_depth = 0usize;
    let mut arith_paren_depth = 0usize;
    while i < s.len() && depth > 0 {
        let c = s[i];
        if c == '\\' && i + 1 < s.len() {
            i += 2;
            continue;
        }
        if c == '\'' {
            i = skip_single_quoted(s, i + 1);
            continue;
        }
        if c == '"' {
            i = skip_double_quoted(s, i + 1);
            continue;
        }
        if c == '#'
            && arith_depth == 0
            && (i == start || matches!(s[i - 1], ' ' | '\t' | '\n' | ';' | '|' | '&' | '(' | ')'))
        {
            while i < s.len() && s[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if starts_with(s, i, "<<<") {
            i += 3;
            while i < s.len() && is_whitespace_no_newline(s[i]) {
                i += 1;
            }
            if char_at(s, i) == Some('"') {
                i += 1;
                while i < s.len() && s[i] != '"' {
                    if s[i] == '\\' && i + 1 < s.len() {
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                if i < s.len() {
                    i += 1;
                }
            } else if char_at(s, i) == Some('\'') {
                i += 1;
                while i < s.len() && s[i] != '\'' {
                    i += 1;
                }
                if i < s.len() {
                    i += 1;
                }
            } else {
                while i < s.len() && !" \t\n;|&<>()".contains(s[i]) {
                    i += 1;
                }
            }
            continue;
        }
        if is_expansion_start(s, i, "$((") {
            if is_valid_arithmetic_start(s, i) {
                arith_depth += 1;
                i += 3;
                continue;
            }
            i = find_cmdsub_end(s, i + 2);
            continue;
        }
        if arith_depth > 0 && arith_paren_depth == 0 && starts_with(s, i, "))") {
            arith_depth -= 1;
            i += 2;
            continue;
        }
        if c == '`' {
            i = skip_backtick(s, i);
            continue;
        }
        if arith_depth == 0 && starts_with(s, i, "<<") {
            i = skip_heredoc(s, i);
            continue;
        }
        if starts_with(s, i, "case") && is_word_boundary(s, i, 4) {
            case_depth += 1;
            in_case_patterns = false;
            i += 4;
            continue;
        }
        if case_depth > 0 && starts_with(s, i, "in") && is_word_boundary(s, i, 2) {
            in_case_patterns = true;
            i += 2;
            continue;
        }
        if starts_with(s, i, "esac") && is_word_boundary(s, i, 4) {
            if case_depth > 0 {
                case_depth -= 1;
                in_case_patterns = false;
            }
            i += 4;
            continue;
        }
        if starts_with(s, i, ";;") {
            i += 2;
            continue;
        }
        if c == '(' {
            if !(in_case_patterns && case_depth > 0) {
                if arith_depth > 0 {
                    arith_paren_depth += 1;
                } else {
                    depth += 1;
                }
            }
        } else if c == ')' {
            if in_case_patterns && case_depth > 0 {
                if !lookahead_for_esac(s, i + 1, case_depth) {
                    depth -= 1;
                }
            } else if arith_depth > 0 {
                arith_paren_depth = arith_paren_depth.saturating_sub(1);
            } else {
                depth -= 1;
            }
        }
        i += 1;
    }
    i
}

/// End (exclusive) of a `${...}` body whose contents start at `start`.
pub(crate) fn find_braced_param_end(s: &[char], start: usize) -> usize {
    #[derive(PartialEq)]
    enum Phase {
        Param,
        Quote,
        Word,
    }
    let mut depth = 1;
    let mut i = start;
    let mut in_double = false;
    let mut phase = Phase::Param;
    while i < s.len() && depth > 0 {
        let c = s[i];
        if c == '\\' && i + 1 < s.len() {
            i += 2;
            continue;
        }
        if c == '\'' && phase == Phase::Quote && !in_double {
            i = skip_single_quoted(s, i + 1);
            continue;
        }
        if c == '"' {
            in_double = !in_double;
            i += 1;
            continue;
        }
        if in_double {
            i += 1;
            continue;
        }
        if phase == Phase::Param && "%#^,".contains(c) {
            phase = Phase::Quote;
        } else if phase == Phase::Param && ":-=?+/".contains(c) {
            phase = Phase::Word;
        }
        if c == '[' && phase == Phase::Param {
            if let Some(end) = skip_subscript(s, i, 0) {
                i = end;
                continue;
            }
        }
        if (c == '<' || c == '>') && char_at(s, i + 1) == Some('(') {
            i = find_cmdsub_end(s, i + 2);
            continue;
        }
        if c == '{' {
            depth += 1;
        } else if c == '}' {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        if is_expansion_start(s, i, "$(") {
            i = find_cmdsub_end(s, i + 2);
            continue;
        }
        if is_expansion_start(s, i, "${") {
            i = find_braced_param_end(s, i + 2);
            continue;
        }
        i += 1;
    }
    i
}

/// Join a heredoc body line with its backslash-continued successors.
/// Returns the logical line and the index of its terminating newline.
fn join_continued_line(s: &[char], line_start: usize) -> (String, usize) {
    let mut line_end = line_start;
    while line_end < s.len() && s[line_end] != '\n' {
        line_end += 1;
    }
    let mut line: Vec<char> = s[line_start..line_end].to_vec();
    while line_end < s.len() {
        let trailing = line.iter().rev().take_while(|&&c| c == '\\').count();
        if trailing % 2 == 0 {
            break;
        }
        line.pop();
        line_end += 1;
        let next_start = line_end;
        while line_end < s.len() && s[line_end] != '\n' {
            line_end += 1;
        }
        line.extend_from_slice(&s[next_start..line_end]);
    }
    (line.into_iter().collect(), line_end)
}

/// Skip a heredoc operator, its delimiter, the rest of its line and the body.
pub(crate) fn skip_heredoc(s: &[char], start: usize) -> usize {
    let strip_tabs = char_at(s, start + 2) == Some('-');
    let mut i = start + 2;
    if strip_tabs {
        i += 1;
    }
    while i < s.len() && is_whitespace_no_newline(s[i]) {
        i += 1;
    }
    let delimiter;
    if i < s.len() && (s[i] == '"' || s[i] == '\'') {
        let quote = s[i];
        i += 1;
        let delim_start = i;
        while i < s.len() && s[i] != quote {
            i += 1;
        }
        delimiter = slice(s, delim_start, i);
        if i < s.len() {
            i += 1;
        }
    } else if char_at(s, i) == Some('\\') {
        i += 1;
        let delim_start = i;
        if i < s.len() {
            i += 1;
        }
        while i < s.len() && !is_metachar(s[i]) {
            i += 1;
        }
        delimiter = slice(s, delim_start, i);
    } else {
        let delim_start = i;
        while i < s.len() && !is_metachar(s[i]) {
            i += 1;
        }
        delimiter = slice(s, delim_start, i);
    }

    let mut paren_depth = 0;
    let mut single = false;
    let mut double = false;
    let mut in_backtick = false;
    while i < s.len() && s[i] != '\n' {
        let c = s[i];
        if c == '\\' && i + 1 < s.len() && (double || in_backtick) {
            i += 2;
            continue;
        }
        if c == '\'' && !double && !in_backtick {
            single = !single;
            i += 1;
            continue;
        }
        if c == '"' && !single && !in_backtick {
            double = !double;
            i += 1;
            continue;
        }
        if c == '`' && !single {
            in_backtick = !in_backtick;
            i += 1;
            continue;
        }
        if single || double || in_backtick {
            i += 1;
            continue;
        }
        if c == '(' {
            paren_depth += 1;
        } else if c == ')' {
            if paren_depth == 0 {
                break;
            }
            paren_depth -= 1;
        }
        i += 1;
    }
    if char_at(s, i) == Some(')') {
        return i;
    }
    if char_at(s, i) == Some('\n') {
        i += 1;
    }

    let delim_len = delimiter.chars().count();
    while i < s.len() {
        let line_start = i;
        let (line, line_end) = join_continued_line(s, line_start);
        let stripped = if strip_tabs {
            line.trim_start_matches('\t')
        } else {
            line.as_str()
        };
        if stripped == delimiter {
            return if line_end < s.len() { line_end + 1 } else { line_end };
        }
        if stripped.starts_with(delimiter.as_str()) && stripped.chars().count() > delim_len {
            let tabs = line.chars().count() - stripped.chars().count();
            return line_start + tabs + delim_len;
        }
        i = if line_end < s.len() { line_end + 1 } else { line_end };
    }
    i
}

/// Locate heredoc bodies that follow the line containing `start`.
/// Returns `(content_start, content_end)`; content_start is the newline that
/// ends the command line.
pub(crate) fn find_heredoc_content_end(
    s: &[char],
    start: usize,
    delimiters: &[(String, bool)],
) -> (usize, usize) {
    if delimiters.is_empty() {
        return (start, start);
    }
    let mut pos = start;
    while pos < s.len() && s[pos] != '\n' {
        pos += 1;
    }
    if pos >= s.len() {
        return (start, start);
    }
    let content_start = pos;
    pos += 1;
    for (delimiter, strip_tabs) in delimiters {
        let delim_len = delimiter.chars().count();
        while pos < s.len() {
            let line_start = pos;
            let (line, line_end) = join_continued_line(s, line_start);
            let stripped = if *strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line.as_str()
            };
            if stripped == delimiter {
                pos = if line_end < s.len() { line_end + 1 } else { line_end };
                break;
            }
            if stripped.starts_with(delimiter.as_str()) && stripped.chars().count() > delim_len {
                let tabs = line.chars().count() - stripped.chars().count();
                pos = line_start + tabs + delim_len;
                break;
            }
            pos = if line_end < s.len() { line_end + 1 } else { line_end };
        }
    }
    (content_start, pos)
}

/// True when the keyword of `word_len` chars at `pos` stands alone.
pub(crate) fn is_word_boundary(s: &[char], pos: usize, word_len: usize) -> bool {
    if pos > 0 {
        let prev = s[pos - 1];
        if is_name_char(prev) || "{}!".contains(prev) {
            return false;
        }
    }
    match char_at(s, pos + word_len) {
        Some(c) => !is_name_char(c),
        None => true,
    }
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::new();
    let mut prev_ws = false;
    for c in s.chars() {
        if c == ' ' || c == '\t' {
            if !prev_ws {
                result.push(' ');
            }
            prev_ws = true;
        } else {
            result.push(c);
            prev_ws = false;
        }
    }
    result.trim().to_string()
}

/// Canonical form of a heredoc delimiter for end-line comparison: whitespace
/// inside `$(...)`, `${...}` and `<(...)` runs is collapsed.
pub(crate) fn normalize_heredoc_delimiter(delimiter: &str) -> String {
    let d = chars_of(delimiter);
    let mut result = String::new();
    let mut i = 0;
    while i < d.len() {
        let group = if starts_with(&d, i, "$(") {
            Some(('(', ')'))
        } else if starts_with(&d, i, "${") {
            Some(('{', '}'))
        } else if i + 1 < d.len() && (d[i] == '<' || d[i] == '>') && d[i + 1] == '(' {
            Some(('(', ')'))
        } else {
            None
        };
        let Some((open, close)) = group else {
            result.push(d[i]);
            i += 1;
            continue;
        };
        result.push(d[i]);
        result.push(open);
        i += 2;
        let mut depth = 1;
        let mut inner = String::new();
        while i < d.len() && depth > 0 {
            let c = d[i];
            if c == open {
                depth += 1;
                inner.push(c);
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    result.push_str(&collapse_whitespace(&inner));
                    result.push(close);
                } else {
                    inner.push(c);
                }
            } else {
                inner.push(c);
            }
            i += 1;
        }
    }
    result
}

// =============================================================================
// ASSIGNMENTS & NAMES
// =============================================================================

pub(crate) const SMP_LITERAL: u32 = 1;
pub(crate) const SMP_PAST_OPEN: u32 = 2;

/// Skip a balanced `open ... close` group. Returns the index after the
/// closing char, or None when unbalanced.
pub(crate) fn skip_matched_pair(s: &[char], start: usize, open: char, close: char, flags: u32) -> Option<usize> {
    let n = s.len();
    let literal = flags & SMP_LITERAL != 0;
    let mut i = if flags & SMP_PAST_OPEN != 0 {
        start
    } else {
        if start >= n || s[start] != open {
            return None;
        }
        start + 1
    };
    let mut depth = 1;
    let mut pass_next = false;
    let mut backq = false;
    while i < n && depth > 0 {
        let c = s[i];
        if pass_next {
            pass_next = false;
            i += 1;
            continue;
        }
        if !literal && c == '\\' {
            pass_next = true;
            i += 1;
            continue;
        }
        if backq {
            if c == '`' {
                backq = false;
            }
            i += 1;
            continue;
        }
        if !literal && c == '`' {
            backq = true;
            i += 1;
            continue;
        }
        if !literal && c == '\'' {
            i = skip_single_quoted(s, i + 1);
            continue;
        }
        if !literal && c == '"' {
            i = skip_double_quoted(s, i + 1);
            continue;
        }
        if !literal && is_expansion_start(s, i, "$(") {
            i = find_cmdsub_end(s, i + 2);
            continue;
        }
        if !literal && is_expansion_start(s, i, "${") {
            i = find_braced_param_end(s, i + 2);
            continue;
        }
        if !literal && c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
        }
        i += 1;
    }
    if depth == 0 {
        Some(i)
    } else {
        None
    }
}

pub(crate) fn skip_subscript(s: &[char], start: usize, flags: u32) -> Option<usize> {
    skip_matched_pair(s, start, '[', ']', flags)
}

/// Index of the `=` in a `name[sub]+=value` assignment word.
pub(crate) fn assignment(s: &str, flags: u32) -> Option<usize> {
    let s = chars_of(s);
    if !s.first().copied().is_some_and(is_name_start) {
        return None;
    }
    let mut i = 1;
    while i < s.len() {
        let c = s[i];
        if c == '=' {
            return Some(i);
        }
        if c == '[' {
            let sub_flags = if flags & 2 != 0 { SMP_LITERAL } else { 0 };
            let end = skip_subscript(&s, i, sub_flags)?;
            i = end;
            if char_at(&s, i) == Some('+') {
                i += 1;
            }
            return if char_at(&s, i) == Some('=') { Some(i) } else { None };
        }
        if c == '+' {
            return if char_at(&s, i + 1) == Some('=') { Some(i + 1) } else { None };
        }
        if !is_name_char(c) {
            return None;
        }
        i += 1;
    }
    None
}

pub(crate) fn looks_like_assignment(s: &str) -> bool {
    assignment(s, 0).is_some()
}

/// `name` optionally followed by `[subscript]` groups, nothing else.
pub(crate) fn is_array_assignment_prefix(chars: &[char]) -> bool {
    if !chars.first().copied().is_some_and(is_name_start) {
        return false;
    }
    let mut i = 1;
    while i < chars.len() && is_name_char(chars[i]) {
        i += 1;
    }
    while i < chars.len() {
        if chars[i] != '[' {
            return false;
        }
        match skip_subscript(chars, i, SMP_LITERAL) {
            Some(end) => i = end,
            None => return false,
        }
    }
    true
}

pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_name_start(c) => chars.all(is_name_char),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_dollar_counting() {
        assert_eq!(count_consecutive_dollars_before(&cs("$$("), 2), 2);
        assert!(!is_expansion_start(&cs("$$("), 1, "$("));
        assert!(is_expansion_start(&cs("a$("), 1, "$("));
        assert!(is_backslash_escaped(&cs("\\$"), 1));
        assert!(!is_backslash_escaped(&cs("\\\\$"), 2));
    }

    #[test]
    fn test_find_cmdsub_end_with_case_patterns() {
        let s = cs("case x in a) echo hi;; esac) rest");
        let end = find_cmdsub_end(&s, 0);
        assert_eq!(slice(&s, end, s.len()), " rest");
    }

    #[test]
    fn test_find_cmdsub_end_skips_quotes_and_comments() {
        let s = cs("echo ')' \"(\" # )\n)x");
        let end = find_cmdsub_end(&s, 0);
        assert_eq!(slice(&s, end, s.len()), "x");
    }

    #[test]
    fn test_arithmetic_start_detection() {
        assert!(is_valid_arithmetic_start(&cs("$((1+2))"), 0));
        assert!(!is_valid_arithmetic_start(&cs("$((a) | b)"), 0));
    }

    #[test]
    fn test_skip_heredoc_stops_after_body() {
        let s = cs("<<EOF\nline\nEOF\nnext");
        let end = skip_heredoc(&s, 0);
        assert_eq!(slice(&s, end, s.len()), "next");
    }

    #[test]
    fn test_heredoc_content_end() {
        let s = cs("cat <<A <<-B\none\nA\n\ttwo\n\tB\nrest");
        let (start, end) = find_heredoc_content_end(
            &s,
            0,
            &[("A".to_string(), false), ("B".to_string(), true)],
        );
        assert_eq!(s[start], '\n');
        assert_eq!(slice(&s, end, s.len()), "rest");
    }

    #[test]
    fn test_bracket_class() {
        let s = cs("[]a]|b");
        let (end, text, ok) = consume_bracket_class(&s, 0, 0);
        assert!(ok);
        assert_eq!(text, "[]a]");
        assert_eq!(end, 4);

        let (end, text, ok) = consume_bracket_class(&cs("[a|b"), 0, 0);
        assert!(!ok);
        assert_eq!((end, text.as_str()), (1, "["));
    }

    #[test]
    fn test_assignment_detection() {
        assert_eq!(assignment("a=1", 0), Some(1));
        assert_eq!(assignment("arr[i+1]+=x", 0), Some(9));
        assert_eq!(assignment("a+=1", 0), Some(2));
        assert_eq!(assignment("1a=1", 0), None);
        assert_eq!(assignment("a-b=1", 0), None);
        assert!(is_array_assignment_prefix(&cs("arr[0]")));
        assert!(!is_array_assignment_prefix(&cs("arr[0]x")));
    }

    #[test]
    fn test_normalize_heredoc_delimiter() {
        assert_eq!(normalize_heredoc_delimiter("$(echo   a)"), "$(echo a)");
        assert_eq!(normalize_heredoc_delimiter("${ x }"), "${x}");
        assert_eq!(normalize_heredoc_delimiter("EOF"), "EOF");
    }

    #[test]
    fn test_line_continuations_keep_comment_newline() {
        assert_eq!(strip_line_continuations_comment_aware("a\\\nb"), "ab");
        assert_eq!(strip_line_continuations_comment_aware("# c\\\nx"), "# c\nx");
    }
}
