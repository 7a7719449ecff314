//! Word Canonicalization
//!
//! A [`Word`] keeps the raw source text it was scanned from. Rendering runs
//! that text through a fixed series of rewrites, each expecting the shape the
//! previous one left behind:
//!
//!   ANSI-C expansion → locale `$` stripping → array whitespace →
//!   substitution re-rendering → `${` newline folding → arithmetic line
//!   continuations → CTLESC doubling → string escaping

use crate::ast::types::{CommandSubstitution, Node, ProcessSubstitution, Word};
use crate::parser::context::QuoteState;
use crate::parser::parser::Parser;
use crate::parser::scan::{
    chars_of, count_consecutive_dollars_before, find_cmdsub_end, find_funsub_end,
    is_backslash_escaped, is_dollar_dollar_paren, is_expansion_start, is_extglob_prefix,
    is_funsub_char, is_whitespace, slice, starts_with,
};

use super::ansi::expand_ansi_c_escapes;
use super::format::{format_cmdsub_node, starts_with_subshell};

/// Internal escape marker bash puts in front of control bytes
const CTLESC: char = '\x01';
const CTLNUL: char = '\x7f';

impl Word {
    /// Render as `(word "...")`.
    pub fn to_sexp(&self) -> String {
        let mut value = expand_all_ansi_c_quotes(&self.value);
        value = strip_locale_string_dollars(&value);
        value = normalize_array_whitespace(&value);
        value = format_command_substitutions(&value, &self.parts, false);
        value = normalize_param_expansion_newlines(&value);
        value = strip_arith_line_continuations(&value);
        value = double_ctlesc_smart(&value);
        value = value.replace(CTLNUL, "\x01\x7f");
        value = value.replace('\\', "\\\\");
        if value.ends_with("\\\\") && !value.ends_with("\\\\\\\\") {
            value.push_str("\\\\");
        }
        let escaped = value
            .replace('"', "\\\"")
            .replace('\n', "\\n")
            .replace('\t', "\\t");
        format!("(word \"{}\")", escaped)
    }

    /// Text used for `[[ ]]` operands, both in S-expressions and when a
    /// conditional is re-rendered inside a substitution.
    pub(crate) fn cond_formatted_value(&self) -> String {
        let mut value = expand_all_ansi_c_quotes(&self.value);
        value = strip_locale_string_dollars(&value);
        value = format_command_substitutions(&value, &self.parts, false);
        value = normalize_extglob_whitespace(&value);
        value = value.replace(CTLESC, "\x01\x01");
        value.trim_end_matches('\n').to_string()
    }
}

/// Shared rendering for `for ((...))` clauses.
pub(crate) fn format_arith_val(s: &str) -> String {
    let mut value = expand_all_ansi_c_quotes(s);
    value = strip_locale_string_dollars(&value);
    value = format_command_substitutions(&value, &[], false);
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
}

// =============================================================================
// ANSI-C & LOCALE QUOTES
// =============================================================================

/// Replace every `$'...'` outside single quotes with its single-quoted
/// expansion.
pub(crate) fn expand_all_ansi_c_quotes(value: &str) -> String {
    let s = chars_of(value);
    let n = s.len();
    let mut out = String::with_capacity(value.len());
    let mut quote = QuoteState::new();
    let mut in_backtick = false;
    let mut brace_depth = 0usize;
    let mut i = 0;

    while i < n {
        let ch = s[i];
        if ch == '`' && !quote.single {
            in_backtick = !in_backtick;
            out.push(ch);
            i += 1;
            continue;
        }
        if in_backtick {
            out.push(ch);
            if ch == '\\' && i + 1 < n {
                out.push(s[i + 1]);
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if !quote.single {
            if is_expansion_start(&s, i, "${") {
                brace_depth += 1;
                quote.push();
                out.push_str("${");
                i += 2;
                continue;
            }
            if ch == '}' && brace_depth > 0 && !quote.double {
                brace_depth -= 1;
                out.push(ch);
                quote.pop();
                i += 1;
                continue;
            }
        }

        if ch == '\'' && !quote.double {
            let opens_ansi_c = !quote.single
                && i > 0
                && s[i - 1] == '$'
                && count_consecutive_dollars_before(&s, i - 1) % 2 == 0;
            if !opens_ansi_c {
                quote.single = !quote.single;
            }
            out.push(ch);
            i += 1;
        } else if ch == '"' && !quote.single {
            quote.double = !quote.double;
            out.push(ch);
            i += 1;
        } else if ch == '\\' && i + 1 < n && !quote.single {
            out.push(ch);
            out.push(s[i + 1]);
            i += 2;
        } else if starts_with(&s, i, "$'")
            && !quote.single
            && !quote.double
            && count_consecutive_dollars_before(&s, i) % 2 == 0
        {
            let mut j = i + 2;
            while j < n {
                if s[j] == '\\' && j + 1 < n {
                    j += 2;
                } else if s[j] == '\'' {
                    j += 1;
                    break;
                } else {
                    j += 1;
                }
            }
            let mut expanded = expand_ansi_c_escapes(&slice(&s, i + 1, j));
            // Inside "${...}" the quotes are dropped unless the literal is a
            // pattern operand
            if brace_depth > 0
                && quote.outer_double()
                && expanded.len() >= 2
                && expanded.starts_with('\'')
                && expanded.ends_with('\'')
            {
                let inner = &expanded[1..expanded.len() - 1];
                if !inner.contains(CTLESC) && !in_pattern_operand(&out) {
                    expanded = inner.to_string();
                }
            }
            out.push_str(&expanded);
            i = j;
        } else {
            out.push(ch);
            i += 1;
        }
    }
    out
}

/// Whether the text after the innermost `${` puts us in a pattern operand
/// (`${v//pat/...}`, `${v#pat}`, `${v^pat}` ...).
fn in_pattern_operand(rendered: &str) -> bool {
    const PATTERN_OPS: [char; 5] = ['/', '%', '#', '^', ','];

    let Some(idx) = rendered.rfind("${") else {
        return false;
    };
    let after: Vec<char> = rendered[idx + 2..].chars().collect();
    let Some(&first) = after.first() else {
        return false;
    };

    let name_len = if "@*#?-$!0123456789_".contains(first) {
        1
    } else if first.is_alphabetic() {
        after
            .iter()
            .take_while(|c| c.is_alphanumeric() || **c == '_')
            .count()
    } else {
        0
    };

    if name_len > 0 && name_len < after.len() && !"#?-".contains(first) {
        let mut op: String = after[name_len..].iter().collect();
        if op.starts_with('@') && op.chars().count() > 1 {
            op.remove(0);
        }
        if op.starts_with(&PATTERN_OPS[..]) {
            return true;
        }
        return op
            .chars()
            .next()
            .is_some_and(|c| !"%#/^,~:+-=?".contains(c))
            && op.contains(&PATTERN_OPS[..]);
    }
    if name_len == 0 && after.len() > 1 && !"%#/^,".contains(first) {
        let rest: String = after[1..].iter().collect();
        return rest.contains(&PATTERN_OPS[..]);
    }
    false
}

/// `$"..."` renders as a plain double-quoted string; an even run of `$`
/// before the quote leaves it alone.
pub(crate) fn strip_locale_string_dollars(value: &str) -> String {
    let s = chars_of(value);
    let n = s.len();
    let mut out = String::with_capacity(value.len());
    let mut quote = QuoteState::new();
    let mut brace_quote = QuoteState::new();
    let mut brace_depth = 0usize;
    let mut bracket_depth = 0usize;
    let mut bracket_in_double = false;
    let mut i = 0;

    while i < n {
        let ch = s[i];
        if ch == '\\' && i + 1 < n && !quote.single && !brace_quote.single {
            out.push(ch);
            out.push(s[i + 1]);
            i += 2;
        } else if starts_with(&s, i, "${")
            && !quote.single
            && !brace_quote.single
            && (i == 0 || s[i - 1] != '$')
        {
            brace_depth += 1;
            brace_quote.double = false;
            brace_quote.single = false;
            out.push_str("${");
            i += 2;
        } else if ch == '}'
            && brace_depth > 0
            && !quote.single
            && !brace_quote.double
            && !brace_quote.single
        {
            brace_depth -= 1;
            out.push(ch);
            i += 1;
        } else if ch == '[' && brace_depth > 0 && !quote.single && !brace_quote.double {
            bracket_depth += 1;
            bracket_in_double = false;
            out.push(ch);
            i += 1;
        } else if ch == ']' && bracket_depth > 0 && !quote.single && !bracket_in_double {
            bracket_depth -= 1;
            out.push(ch);
            i += 1;
        } else if ch == '\'' && !quote.double && brace_depth == 0 {
            quote.single = !quote.single;
            out.push(ch);
            i += 1;
        } else if ch == '"' && !quote.single && brace_depth == 0 {
            quote.double = !quote.double;
            out.push(ch);
            i += 1;
        } else if ch == '"' && !quote.single && bracket_depth > 0 {
            bracket_in_double = !bracket_in_double;
            out.push(ch);
            i += 1;
        } else if ch == '"' && !quote.single && !brace_quote.single && brace_depth > 0 {
            brace_quote.double = !brace_quote.double;
            out.push(ch);
            i += 1;
        } else if ch == '\'' && !quote.double && !brace_quote.double && brace_depth > 0 {
            brace_quote.single = !brace_quote.single;
            out.push(ch);
            i += 1;
        } else if starts_with(&s, i, "$\"")
            && !quote.single
            && !brace_quote.single
            && (brace_depth > 0 || bracket_depth > 0 || !quote.double)
            && !brace_quote.double
            && !bracket_in_double
        {
            let dollars = 1 + count_consecutive_dollars_before(&s, i);
            if dollars % 2 == 1 {
                out.push('"');
                if bracket_depth > 0 {
                    bracket_in_double = true;
                } else if brace_depth > 0 {
                    brace_quote.double = true;
                } else {
                    quote.double = true;
                }
                i += 2;
            } else {
                out.push(ch);
                i += 1;
            }
        } else {
            out.push(ch);
            i += 1;
        }
    }
    out
}

// =============================================================================
// ARRAY LITERALS
// =============================================================================

/// Collapse whitespace in the body of a `name=( ... )` assignment.
pub(crate) fn normalize_array_whitespace(value: &str) -> String {
    let s = chars_of(value);
    let n = s.len();
    let mut i = 0;
    if !s.first().is_some_and(|&c| c.is_alphabetic() || c == '_') {
        return value.to_string();
    }
    i += 1;
    while i < n && (s[i].is_alphanumeric() || s[i] == '_') {
        i += 1;
    }
    while i < n && s[i] == '[' {
        let mut depth = 1;
        i += 1;
        while i < n && depth > 0 {
            match s[i] {
                '[' => depth += 1,
                ']' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        if depth != 0 {
            return value.to_string();
        }
    }
    if i < n && s[i] == '+' {
        i += 1;
    }
    if !(i + 1 < n && s[i] == '=' && s[i + 1] == '(') {
        return value.to_string();
    }

    let prefix = slice(&s, 0, i + 1);
    let open = i + 1;
    let close = if value.ends_with(')') {
        n - 1
    } else {
        match find_matching_paren(&s, open) {
            Some(close) => close,
            None => return value.to_string(),
        }
    };
    let inner = slice(&s, open + 1, close);
    let suffix = slice(&s, close + 1, n);
    format!("{}({}){}", prefix, normalize_array_inner(&inner), suffix)
}

fn find_matching_paren(s: &[char], open: usize) -> Option<usize> {
    if s.get(open) != Some(&'(') {
        return None;
    }
    let n = s.len();
    let mut i = open + 1;
    let mut depth = 1;
    let mut quote = QuoteState::new();
    while i < n && depth > 0 {
        let ch = s[i];
        if ch == '\\' && i + 1 < n && !quote.single {
            i += 2;
            continue;
        }
        if ch == '\'' && !quote.double {
            quote.single = !quote.single;
            i += 1;
            continue;
        }
        if ch == '"' && !quote.single {
            quote.double = !quote.double;
            i += 1;
            continue;
        }
        if quote.in_quotes() {
            i += 1;
            continue;
        }
        if ch == '#' {
            while i < n && s[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if ch == '(' {
            depth += 1;
        } else if ch == ')' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Skip a `'...'` or `"..."` run inside a paren scan; `j` is on the quote.
fn skip_quoted_in_parens(s: &[char], mut j: usize) -> usize {
    let n = s.len();
    if s[j] == '\'' {
        j += 1;
        while j < n && s[j] != '\'' {
            j += 1;
        }
    } else {
        j += 1;
        while j < n {
            if s[j] == '\\' && j + 1 < n {
                j += 2;
                continue;
            }
            if s[j] == '"' {
                break;
            }
            j += 1;
        }
    }
    j
}

fn normalize_array_inner(inner: &str) -> String {
    let s = chars_of(inner);
    let n = s.len();
    let mut out = String::with_capacity(inner.len());
    let mut in_whitespace = true;
    let mut brace_depth = 0usize;
    let mut bracket_depth = 0usize;
    let mut i = 0;

    while i < n {
        let ch = s[i];
        if is_whitespace(ch) {
            if !in_whitespace && !out.is_empty() && brace_depth == 0 && bracket_depth == 0 {
                out.push(' ');
                in_whitespace = true;
            }
            if brace_depth > 0 || bracket_depth > 0 {
                out.push(ch);
            }
            i += 1;
        } else if ch == '\'' {
            in_whitespace = false;
            let mut j = i + 1;
            while j < n && s[j] != '\'' {
                j += 1;
            }
            out.push_str(&slice(&s, i, j + 1));
            i = j + 1;
        } else if ch == '"' {
            in_whitespace = false;
            let mut j = i + 1;
            let mut dq_brace_depth = 0usize;
            out.push('"');
            while j < n {
                if s[j] == '\\' && j + 1 < n {
                    if s[j + 1] != '\n' {
                        out.push(s[j]);
                        out.push(s[j + 1]);
                    }
                    j += 2;
                } else if is_expansion_start(&s, j, "${") {
                    out.push_str("${");
                    dq_brace_depth += 1;
                    j += 2;
                } else if s[j] == '}' && dq_brace_depth > 0 {
                    out.push('}');
                    dq_brace_depth -= 1;
                    j += 1;
                } else if s[j] == '"' && dq_brace_depth == 0 {
                    out.push('"');
                    j += 1;
                    break;
                } else {
                    out.push(s[j]);
                    j += 1;
                }
            }
            i = j;
        } else if ch == '\\' && i + 1 < n {
            if s[i + 1] != '\n' {
                in_whitespace = false;
                out.push(ch);
                out.push(s[i + 1]);
            }
            i += 2;
        } else if is_expansion_start(&s, i, "$((") {
            in_whitespace = false;
            let mut j = i + 3;
            let mut depth = 1;
            while j < n && depth > 0 {
                if j + 1 < n && s[j] == '(' && s[j + 1] == '(' {
                    depth += 1;
                    j += 2;
                } else if j + 1 < n && s[j] == ')' && s[j + 1] == ')' {
                    depth -= 1;
                    j += 2;
                } else {
                    j += 1;
                }
            }
            out.push_str(&slice(&s, i, j));
            i = j;
        } else if is_expansion_start(&s, i, "$(")
            || ((ch == '<' || ch == '>') && s.get(i + 1) == Some(&'('))
        {
            in_whitespace = false;
            let is_cmdsub = ch == '$';
            let mut j = i + 2;
            let mut depth = 1;
            while j < n && depth > 0 {
                match s[j] {
                    '(' if !is_cmdsub || s[j - 1] == '$' => depth += 1,
                    ')' => depth -= 1,
                    '\'' | '"' => j = skip_quoted_in_parens(&s, j),
                    _ => {}
                }
                j += 1;
            }
            out.push_str(&slice(&s, i, j));
            i = j;
        } else if is_expansion_start(&s, i, "${") {
            in_whitespace = false;
            out.push_str("${");
            brace_depth += 1;
            i += 2;
        } else if ch == '{' && brace_depth > 0 {
            out.push(ch);
            brace_depth += 1;
            i += 1;
        } else if ch == '}' && brace_depth > 0 {
            out.push(ch);
            brace_depth -= 1;
            i += 1;
        } else if ch == '#' && brace_depth == 0 && in_whitespace {
            while i < n && s[i] != '\n' {
                i += 1;
            }
        } else if ch == '[' {
            if in_whitespace || bracket_depth > 0 {
                bracket_depth += 1;
            }
            in_whitespace = false;
            out.push(ch);
            i += 1;
        } else if ch == ']' && bracket_depth > 0 {
            out.push(ch);
            bracket_depth -= 1;
            i += 1;
        } else {
            in_whitespace = false;
            out.push(ch);
            i += 1;
        }
    }
    out.trim_end_matches(&[' ', '\t', '\n', '\r', '\x0b', '\x0c'][..])
        .to_string()
}

// =============================================================================
// SMALL REWRITES
// =============================================================================

/// Double CTLESC bytes, except inside double quotes where an odd run of
/// backslashes already escapes them.
pub(crate) fn double_ctlesc_smart(value: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(value.len());
    let mut quote = QuoteState::new();
    for c in value.chars() {
        if c == '\'' && !quote.double {
            quote.single = !quote.single;
        } else if c == '"' && !quote.single {
            quote.double = !quote.double;
        }
        out.push(c);
        if c != CTLESC {
            continue;
        }
        if quote.double {
            let backslashes = out[..out.len() - 1]
                .iter()
                .rev()
                .take_while(|&&b| b == '\\')
                .count();
            if backslashes % 2 == 0 {
                out.push(CTLESC);
            }
        } else {
            out.push(CTLESC);
        }
    }
    out.into_iter().collect()
}

/// `${` followed by a newline renders with a space on both ends; line
/// continuations inside the braces disappear.
pub(crate) fn normalize_param_expansion_newlines(value: &str) -> String {
    let s = chars_of(value);
    let n = s.len();
    let mut out = String::with_capacity(value.len());
    let mut quote = QuoteState::new();
    let mut i = 0;

    while i < n {
        let c = s[i];
        if c == '\'' && !quote.double {
            quote.single = !quote.single;
            out.push(c);
            i += 1;
        } else if c == '"' && !quote.single {
            quote.double = !quote.double;
            out.push(c);
            i += 1;
        } else if is_expansion_start(&s, i, "${") && !quote.single {
            out.push_str("${");
            i += 2;
            let leading_newline = s.get(i) == Some(&'\n');
            if leading_newline {
                out.push(' ');
                i += 1;
            }
            let mut depth = 1;
            while i < n && depth > 0 {
                let ch = s[i];
                if ch == '\\' && i + 1 < n && !quote.single {
                    if s[i + 1] != '\n' {
                        out.push(ch);
                        out.push(s[i + 1]);
                    }
                    i += 2;
                    continue;
                }
                if ch == '\'' && !quote.double {
                    quote.single = !quote.single;
                } else if ch == '"' && !quote.single {
                    quote.double = !quote.double;
                } else if !quote.in_quotes() {
                    if ch == '{' {
                        depth += 1;
                    } else if ch == '}' {
                        depth -= 1;
                        if depth == 0 {
                            if leading_newline {
                                out.push(' ');
                            }
                            out.push(ch);
                            i += 1;
                            break;
                        }
                    }
                }
                out.push(ch);
                i += 1;
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

/// Drop backslash-newline pairs inside `$(( ))` unless the backslash is
/// itself escaped.
pub(crate) fn strip_arith_line_continuations(value: &str) -> String {
    let s = chars_of(value);
    let n = s.len();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;

    while i < n {
        if !is_expansion_start(&s, i, "$((") {
            out.push(s[i]);
            i += 1;
            continue;
        }
        let start = i;
        i += 3;
        let mut depth = 2;
        let mut content: Vec<char> = Vec::new();
        let mut first_close: Option<usize> = None;
        while i < n && depth > 0 {
            match s[i] {
                '(' => {
                    content.push('(');
                    depth += 1;
                    i += 1;
                    first_close = None;
                }
                ')' => {
                    if depth == 2 {
                        first_close = Some(content.len());
                    }
                    depth -= 1;
                    if depth > 0 {
                        content.push(')');
                    }
                    i += 1;
                }
                '\\' if s.get(i + 1) == Some(&'\n') => {
                    let backslashes = content
                        .iter()
                        .rev()
                        .skip_while(|&&c| c == '\n')
                        .take_while(|&&c| c == '\\')
                        .count();
                    if backslashes % 2 == 1 {
                        content.push('\\');
                        content.push('\n');
                    }
                    i += 2;
                    if depth == 1 {
                        first_close = None;
                    }
                }
                c => {
                    content.push(c);
                    i += 1;
                    if depth == 1 {
                        first_close = None;
                    }
                }
            }
        }
        if depth == 0 || (depth == 1 && first_close.is_some()) {
            match first_close {
                Some(idx) => {
                    let body: String = content[..idx].iter().collect();
                    let closing = if depth == 0 { "))" } else { ")" };
                    out.push_str(&format!("$(({}{}", body, closing));
                }
                None => {
                    let body: String = content.iter().collect();
                    out.push_str(&format!("$(({})", body));
                }
            }
        } else {
            out.push_str(&slice(&s, start, i));
        }
    }
    out
}

/// Normalize spacing around `|` inside `<(...)`/`>(...)` groups of a
/// parameter expansion body.
pub(crate) fn normalize_extglob_whitespace(value: &str) -> String {
    let s = chars_of(value);
    let n = s.len();
    let mut out = String::with_capacity(value.len());
    let mut in_double = false;
    let mut deprecated_arith_depth = 0usize;
    let mut i = 0;

    while i < n {
        let c = s[i];
        if c == '"' {
            in_double = !in_double;
            out.push(c);
            i += 1;
            continue;
        }
        if starts_with(&s, i, "$[") && !is_backslash_escaped(&s, i) {
            deprecated_arith_depth += 1;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ']' && deprecated_arith_depth > 0 {
            deprecated_arith_depth -= 1;
            out.push(c);
            i += 1;
            continue;
        }
        if s.get(i + 1) == Some(&'(')
            && (c == '<' || c == '>')
            && !in_double
            && deprecated_arith_depth == 0
        {
            out.push(c);
            out.push('(');
            i += 2;
            let mut depth = 1;
            let mut alternatives: Vec<String> = Vec::new();
            let mut current = String::new();
            let mut has_pipe = false;
            while i < n && depth > 0 {
                match s[i] {
                    '\\' if i + 1 < n => {
                        current.push(s[i]);
                        current.push(s[i + 1]);
                        i += 2;
                    }
                    '(' => {
                        depth += 1;
                        current.push('(');
                        i += 1;
                    }
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            let keep = current.contains("<<") || !has_pipe;
                            alternatives.push(if keep {
                                current.clone()
                            } else {
                                current.trim().to_string()
                            });
                            break;
                        }
                        current.push(')');
                        i += 1;
                    }
                    '|' if depth == 1 => {
                        if s.get(i + 1) == Some(&'|') {
                            current.push_str("||");
                            i += 2;
                        } else {
                            has_pipe = true;
                            alternatives.push(if current.contains("<<") {
                                current.clone()
                            } else {
                                current.trim().to_string()
                            });
                            current.clear();
                            i += 1;
                        }
                    }
                    ch => {
                        current.push(ch);
                        i += 1;
                    }
                }
            }
            out.push_str(&alternatives.join(" | "));
            if depth == 0 {
                out.push(')');
                i += 1;
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

// =============================================================================
// SUBSTITUTION RE-RENDERING
// =============================================================================

/// Try to parse `text` as a standalone command list, returning the tree and
/// how far the parser got. `None` means the text did not parse; callers fall
/// back to the raw text.
fn try_reparse(text: &str) -> Option<(Option<Node>, usize)> {
    let mut parser = Parser::new(text, false, false);
    match parser.parse_detached_list() {
        Ok(node) => Some((node, parser.pos)),
        Err(e) => {
            tracing::trace!(error = %e, "substitution left unformatted");
            None
        }
    }
}

fn prev_is_word_char(s: &[char], i: usize) -> bool {
    i > 0 && (s[i - 1].is_alphanumeric() || s[i - 1] == '"' || s[i - 1] == '\'')
}

/// Re-render every `$(...)`, `${ ...; }` and `<(...)`/`>(...)` in `value`
/// from its parsed command, so nested spacing is canonical.
pub(crate) fn format_command_substitutions(value: &str, parts: &[Node], in_arith: bool) -> String {
    let mut cmdsubs: Vec<&CommandSubstitution> = Vec::new();
    let mut procsubs: Vec<&ProcessSubstitution> = Vec::new();
    let mut has_arith = false;
    for part in parts {
        match part {
            Node::CommandSubstitution(c) => cmdsubs.push(c),
            Node::ProcessSubstitution(p) => procsubs.push(p),
            Node::ArithmeticExpansion(_) => has_arith = true,
            _ => {}
        }
    }

    let s = chars_of(value);
    let n = s.len();

    let has_brace_cmdsub = ["${ ", "${\t", "${\n", "${|"]
        .iter()
        .any(|p| value.contains(p));
    let has_param_with_procsub =
        value.contains("${") && (value.contains("<(") || value.contains(">("));
    if cmdsubs.is_empty()
        && procsubs.is_empty()
        && !has_brace_cmdsub
        && !has_param_with_procsub
        && !has_untracked_substitution(&s)
    {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut cmdsub_idx = 0;
    let mut procsub_idx = 0;
    let mut in_double = false;
    let mut extglob_depth = 0usize;
    let mut deprecated_arith_depth = 0usize;
    let mut arith_depth = 0usize;
    let mut arith_paren_depth = 0usize;
    let mut i = 0;

    while i < n {
        let c = s[i];
        if i > 0 && is_extglob_prefix(s[i - 1]) && c == '(' && !is_backslash_escaped(&s, i - 1) {
            extglob_depth += 1;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ')' && extglob_depth > 0 {
            extglob_depth -= 1;
            out.push(c);
            i += 1;
            continue;
        }
        if starts_with(&s, i, "$[") && !is_backslash_escaped(&s, i) {
            deprecated_arith_depth += 1;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ']' && deprecated_arith_depth > 0 {
            deprecated_arith_depth -= 1;
            out.push(c);
            i += 1;
            continue;
        }
        if has_arith && is_expansion_start(&s, i, "$((") && !is_backslash_escaped(&s, i) {
            arith_depth += 1;
            arith_paren_depth += 2;
            out.push_str("$((");
            i += 3;
            continue;
        }
        if arith_depth > 0 && arith_paren_depth == 2 && starts_with(&s, i, "))") {
            arith_depth -= 1;
            arith_paren_depth -= 2;
            out.push_str("))");
            i += 2;
            continue;
        }
        if arith_depth > 0 && (c == '(' || c == ')') {
            if c == '(' {
                arith_paren_depth += 1;
            } else {
                arith_paren_depth = arith_paren_depth.saturating_sub(1);
            }
            out.push(c);
            i += 1;
            continue;
        }
        if !has_arith && is_expansion_start(&s, i, "$((") {
            let j = find_cmdsub_end(&s, i + 2);
            out.push_str(&slice(&s, i, j));
            if cmdsub_idx < cmdsubs.len() {
                cmdsub_idx += 1;
            }
            i = j;
            continue;
        }

        if starts_with(&s, i, "$(")
            && !starts_with(&s, i, "$((")
            && !is_backslash_escaped(&s, i)
            && !is_dollar_dollar_paren(&s, i)
        {
            let j = find_cmdsub_end(&s, i + 2);
            if extglob_depth > 0 {
                out.push_str(&slice(&s, i, j));
                if cmdsub_idx < cmdsubs.len() {
                    cmdsub_idx += 1;
                }
                i = j;
                continue;
            }
            let inner = slice(&s, i + 2, j.saturating_sub(1));
            let formatted = match cmdsubs.get(cmdsub_idx) {
                Some(node) => {
                    cmdsub_idx += 1;
                    format_cmdsub_node(&node.command, 0, false, false, false)
                }
                None => match try_reparse(&inner) {
                    Some((Some(parsed), _)) => format_cmdsub_node(&parsed, 0, false, false, false),
                    Some((None, _)) => String::new(),
                    None => inner,
                },
            };
            // `$((` would read as arithmetic
            if formatted.starts_with('(') {
                out.push_str(&format!("$( {})", formatted));
            } else {
                out.push_str(&format!("$({})", formatted));
            }
            i = j;
        } else if c == '`' && cmdsub_idx < cmdsubs.len() {
            let mut j = i + 1;
            while j < n {
                if s[j] == '\\' && j + 1 < n {
                    j += 2;
                    continue;
                }
                j += 1;
                if s[j - 1] == '`' {
                    break;
                }
            }
            out.push_str(&slice(&s, i, j));
            cmdsub_idx += 1;
            i = j;
        } else if is_expansion_start(&s, i, "${")
            && i + 2 < n
            && is_funsub_char(s[i + 2])
            && !is_backslash_escaped(&s, i)
        {
            let j = find_funsub_end(&s, i + 2);
            match cmdsubs.get(cmdsub_idx).filter(|c| c.brace) {
                Some(node) => {
                    out.push_str(&format_funsub(node, &s, i, j));
                    cmdsub_idx += 1;
                }
                None => out.push_str(&slice(&s, i, j)),
            }
            i = j;
        } else if (starts_with(&s, i, ">(") || starts_with(&s, i, "<("))
            && !in_double
            && deprecated_arith_depth == 0
            && arith_depth == 0
        {
            let is_procsub = i == 0 || !prev_is_word_char(&s, i);
            if extglob_depth > 0 {
                let j = find_cmdsub_end(&s, i + 2);
                out.push_str(&slice(&s, i, j));
                if procsub_idx < procsubs.len() {
                    procsub_idx += 1;
                }
                i = j;
                continue;
            }
            if let Some(node) = procsubs.get(procsub_idx) {
                let j = find_cmdsub_end(&s, i + 2);
                out.push_str(&format_tracked_procsub(node, &s, i, j));
                procsub_idx += 1;
                i = j;
                continue;
            }
            if !is_procsub {
                out.push(c);
                i += 1;
                continue;
            }
            let j = find_cmdsub_end(&s, i + 2);
            if j > n || (j > 0 && s[j - 1] != ')') {
                out.push(c);
                i += 1;
                continue;
            }
            let inner = slice(&s, i + 2, j - 1);
            let formatted = if !parts.is_empty() {
                match try_reparse(&inner) {
                    Some((Some(parsed), pos))
                        if pos == inner.chars().count() && !inner.contains('\n') =>
                    {
                        let compact = starts_with_subshell(&parsed);
                        format_cmdsub_node(&parsed, 0, true, compact, true)
                    }
                    _ => inner,
                }
            } else if in_arith || inner.trim().is_empty() {
                inner
            } else {
                inner.trim_start_matches(&[' ', '\t'][..]).to_string()
            };
            out.push(c);
            out.push('(');
            out.push_str(&formatted);
            out.push(')');
            i = j;
        } else if is_expansion_start(&s, i, "${") && !is_backslash_escaped(&s, i) {
            let (j, closed) = braced_param_extent(&s, i + 2);
            let inner = slice(&s, i + 2, if closed { j - 1 } else { j });
            let formatted = format_command_substitutions(&inner, parts, false);
            out.push_str("${");
            out.push_str(&normalize_extglob_whitespace(&formatted));
            if closed {
                out.push('}');
            }
            i = j;
        } else if c == '"' {
            in_double = !in_double;
            out.push(c);
            i += 1;
        } else if c == '\'' && !in_double {
            let mut j = i + 1;
            while j < n && s[j] != '\'' {
                j += 1;
            }
            if j < n {
                j += 1;
            }
            out.push_str(&slice(&s, i, j));
            i = j;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

/// Whether `s` holds a `$(` or process substitution the parser did not
/// record as a part.
fn has_untracked_substitution(s: &[char]) -> bool {
    let n = s.len();
    let mut in_double = false;
    let mut i = 0;
    while i < n {
        if s[i] == '"' {
            in_double = !in_double;
            i += 1;
        } else if s[i] == '\'' && !in_double {
            i += 1;
            while i < n && s[i] != '\'' {
                i += 1;
            }
            if i < n {
                i += 1;
            }
        } else if starts_with(s, i, "$(")
            && !starts_with(s, i, "$((")
            && !is_backslash_escaped(s, i)
            && !is_dollar_dollar_paren(s, i)
        {
            return true;
        } else if (starts_with(s, i, "<(") || starts_with(s, i, ">(")) && !in_double {
            if i == 0 || !prev_is_word_char(s, i) {
                return true;
            }
            i += 1;
        } else {
            i += 1;
        }
    }
    false
}

/// Extent of a `${...}` body starting at `start`: the index after the
/// closing brace (or end of input) and whether the brace was found.
fn braced_param_extent(s: &[char], start: usize) -> (usize, bool) {
    let n = s.len();
    let mut j = start;
    let mut depth = 1;
    let mut quote = QuoteState::new();
    while j < n && depth > 0 {
        let c = s[j];
        if c == '\\' && j + 1 < n && !quote.single {
            j += 2;
            continue;
        }
        if c == '\'' && !quote.double {
            quote.single = !quote.single;
        } else if c == '"' && !quote.single {
            quote.double = !quote.double;
        } else if !quote.in_quotes() {
            if is_expansion_start(s, j, "$(") && !starts_with(s, j, "$((") {
                j = find_cmdsub_end(s, j + 2);
                continue;
            }
            if c == '{' {
                depth += 1;
            } else if c == '}' {
                depth -= 1;
            }
        }
        j += 1;
    }
    (j, depth == 0)
}

/// `${ cmd; }` / `${| cmd; }` rendered from its parsed body.
fn format_funsub(node: &CommandSubstitution, s: &[char], i: usize, j: usize) -> String {
    let formatted = format_cmdsub_node(&node.command, 0, false, false, false);
    let prefix = if s[i + 2] == '|' { "${|" } else { "${ " };
    let original = slice(s, i + 2, j.saturating_sub(1));
    let suffix = if formatted.trim().is_empty() {
        "}"
    } else if formatted.ends_with('&') {
        " }"
    } else if formatted.ends_with("& ") {
        "}"
    } else if original.ends_with('\n') {
        "\n }"
    } else {
        "; }"
    };
    format!("{}{}{}", prefix, formatted, suffix)
}

/// A process substitution the parser recorded, re-rendered from its node.
fn format_tracked_procsub(node: &ProcessSubstitution, s: &[char], i: usize, j: usize) -> String {
    let direction = s[i];
    let raw = slice(s, i + 2, j.saturating_sub(1));

    if matches!(node.command.as_ref(), Node::Subshell(_)) {
        let ws_end = raw
            .chars()
            .take_while(|c| matches!(c, ' ' | '\t' | '\n'))
            .count();
        let (leading_ws, rest): (String, String) =
            (raw.chars().take(ws_end).collect(), raw.chars().skip(ws_end).collect());
        if rest.starts_with('(') {
            if leading_ws.is_empty() {
                return format!("{}({})", direction, raw.replace("\\\n", ""));
            }
            let spaced = format_cmdsub_node(&node.command, 0, false, false, false);
            let ws = leading_ws.replace(&['\n', '\t'][..], " ");
            return format!("{}({}{})", direction, ws, spaced);
        }
    }

    let compact = starts_with_subshell(&node.command);
    let formatted = format_cmdsub_node(&node.command, 0, true, compact, true);
    let raw_stripped = raw.replace("\\\n", "");
    if compact && formatted != raw_stripped {
        format!("{}({})", direction, raw_stripped)
    } else {
        format!("{}({})", direction, formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_word(src: &str, index: usize) -> Word {
        let nodes = crate::parser::parse(src, false).unwrap();
        match &nodes[0] {
            Node::Command(c) => c.words[index].clone(),
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_word_escaping() {
        assert_eq!(Word::new("a\"b", vec![]).to_sexp(), r#"(word "a\"b")"#);
        assert_eq!(Word::new("a\tb\nc", vec![]).to_sexp(), r#"(word "a\tb\nc")"#);
        assert_eq!(Word::new(r"a\b", vec![]).to_sexp(), r#"(word "a\\b")"#);
    }

    #[test]
    fn test_trailing_backslash_is_doubled_again() {
        assert_eq!(Word::new("a\\", vec![]).to_sexp(), r#"(word "a\\\\")"#);
        assert_eq!(Word::new("a\\\\", vec![]).to_sexp(), r#"(word "a\\\\")"#);
    }

    #[test]
    fn test_ctl_bytes_are_escaped() {
        assert_eq!(double_ctlesc_smart("a\x01b"), "a\x01\x01b");
        assert_eq!(double_ctlesc_smart("\"\\\x01\""), "\"\\\x01\"");
        assert_eq!(Word::new("\x7f", vec![]).to_sexp(), "(word \"\x01\x7f\")");
    }

    #[test]
    fn test_ansi_c_quotes_become_single_quoted() {
        assert_eq!(expand_all_ansi_c_quotes(r"$'a\tb'"), "'a\tb'");
        assert_eq!(expand_all_ansi_c_quotes(r"x$'\x41'y"), "x'A'y");
        // quoted or escaped dollars are left alone
        assert_eq!(expand_all_ansi_c_quotes(r#""$'a'""#), r#""$'a'""#);
        assert_eq!(expand_all_ansi_c_quotes(r"$$'a'"), r"$$'a'");
    }

    #[test]
    fn test_ansi_c_inside_quoted_param_drops_quotes() {
        assert_eq!(expand_all_ansi_c_quotes(r#""${x:-$'a'}""#), r#""${x:-a}""#);
        // pattern operands keep them
        assert_eq!(expand_all_ansi_c_quotes(r#""${x#$'a'}""#), r#""${x#'a'}""#);
    }

    #[test]
    fn test_locale_strings() {
        assert_eq!(strip_locale_string_dollars(r#"$"hello""#), r#""hello""#);
        assert_eq!(strip_locale_string_dollars(r#"$$"x""#), r#"$$"x""#);
        assert_eq!(strip_locale_string_dollars(r#"'$"x"'"#), r#"'$"x"'"#);
    }

    #[test]
    fn test_array_whitespace() {
        assert_eq!(normalize_array_whitespace("a=(  1   2\n 3 )"), "a=(1 2 3)");
        assert_eq!(normalize_array_whitespace("a+=( x )"), "a+=(x)");
        assert_eq!(normalize_array_whitespace("a[1]=(x  y)"), "a[1]=(x y)");
        assert_eq!(normalize_array_whitespace("a=(1 # note\n 2)"), "a=(1 2)");
        assert_eq!(normalize_array_whitespace("echo"), "echo");
        assert_eq!(normalize_array_whitespace("a=b"), "a=b");
    }

    #[test]
    fn test_param_newlines() {
        assert_eq!(normalize_param_expansion_newlines("${\nx}"), "${ x }");
        assert_eq!(normalize_param_expansion_newlines("${x\\\ny}"), "${xy}");
    }

    #[test]
    fn test_arith_line_continuations() {
        assert_eq!(strip_arith_line_continuations("$((1+\\\n2))"), "$((1+2))");
        assert_eq!(strip_arith_line_continuations("x$((a))y"), "x$((a))y");
    }

    #[test]
    fn test_extglob_group_spacing() {
        assert_eq!(normalize_extglob_whitespace("<( a | b )"), "<(a | b)");
        assert_eq!(normalize_extglob_whitespace("\"<( a )\""), "\"<( a )\"");
    }

    #[test]
    fn test_command_substitution_is_reformatted() {
        let w = first_word("echo $(ls   -la|grep  x)", 1);
        assert_eq!(w.to_sexp(), r#"(word "$(ls -la | grep x)")"#);
    }

    #[test]
    fn test_subshell_in_cmdsub_gets_a_space() {
        let w = first_word("echo $( (a) )", 1);
        assert_eq!(w.to_sexp(), r#"(word "$( ( a ))")"#);
    }

    #[test]
    fn test_untracked_cmdsub_is_reparsed() {
        let out = format_command_substitutions("$(a  ;b)", &[], false);
        assert_eq!(out, "$(a; b)");
        // unparseable text is kept
        let out = format_command_substitutions("$(if)", &[], false);
        assert_eq!(out, "$(if)");
    }

    #[test]
    fn test_process_substitution() {
        let w = first_word("diff <(ls  a) <(ls b)", 1);
        assert_eq!(w.to_sexp(), r#"(word "<(ls a)")"#);
    }

    #[test]
    fn test_single_quotes_are_opaque() {
        assert_eq!(
            format_command_substitutions("'$(a  b)'", &[], false),
            "'$(a  b)'"
        );
    }

    #[test]
    fn test_cond_value() {
        let w = Word::new("a\x01b\n\n", vec![]);
        assert_eq!(w.cond_formatted_value(), "a\x01\x01b");
    }

    #[test]
    fn test_format_arith_val_escapes() {
        assert_eq!(format_arith_val("i<\"n\""), "i<\\\"n\\\"");
    }
}
