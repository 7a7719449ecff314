//! S-expression Rendering
//!
//! Every node renders to the parenthesized form bash's own parse dump uses,
//! e.g. `(command (word "echo") (word "hi"))`. Word text goes through the
//! canonicalization pipeline in [`word`]; command bodies embedded in word
//! text are re-rendered as shell source by [`format`].

mod ansi;
pub(crate) mod format;
pub(crate) mod word;

use crate::ast::types::{CasePattern, Command, Node, ParamExpansion, Redirect, Word};
use crate::parser::scan::{
    chars_of, consume_bracket_class, consume_double_quote, consume_single_quote,
    is_expansion_start, is_extglob_prefix,
};

use word::{format_arith_val, format_command_substitutions};

/// Escape `\` and `"` for a quoted S-expression string.
fn quote_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// [`quote_escape`] plus newlines.
fn quote_escape_nl(s: &str) -> String {
    quote_escape(s).replace('\n', "\\n")
}

fn join_sexps<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> String {
    nodes
        .into_iter()
        .map(Node::to_sexp)
        .collect::<Vec<_>>()
        .join(" ")
}

fn with_redirects(base: String, redirects: &[Node]) -> String {
    if redirects.is_empty() {
        base
    } else {
        format!("{} {}", base, join_sexps(redirects))
    }
}

fn is_separator(node: &Node) -> bool {
    matches!(node.operator(), Some(";" | "\n"))
}

impl Node {
    /// Render this node as an S-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Node::Word(w) => w.to_sexp(),
            Node::Command(c) => command_sexp(c, false),
            Node::Pipeline(p) => pipeline_sexp(&p.commands),
            Node::List(l) => list_sexp(&l.parts),
            Node::Operator(o) => {
                let name = match o.op.as_str() {
                    "&&" => "and",
                    "||" => "or",
                    ";" => "semi",
                    "&" => "bg",
                    "|" => "pipe",
                    other => other,
                };
                format!("({})", name)
            }
            Node::PipeBoth => "(pipe-both)".to_string(),
            Node::Empty | Node::Comment(_) => String::new(),
            Node::Redirect(r) => redirect_sexp(r),
            Node::HereDoc(h) => {
                let op = if h.strip_tabs { "<<-" } else { "<<" };
                let mut content = h.content.clone();
                if content.ends_with('\\') && !content.ends_with("\\\\") {
                    content.push('\\');
                }
                format!("(redirect \"{}\" \"{}\")", op, content)
            }

            Node::Subshell(s) => {
                with_redirects(format!("(subshell {})", s.body.to_sexp()), &s.redirects)
            }
            Node::BraceGroup(b) => {
                with_redirects(format!("(brace-group {})", b.body.to_sexp()), &b.redirects)
            }
            Node::If(i) => {
                let mut result = format!("(if {} {}", i.condition.to_sexp(), i.then_body.to_sexp());
                if let Some(else_body) = &i.else_body {
                    result.push(' ');
                    result.push_str(&else_body.to_sexp());
                }
                result.push(')');
                with_redirects(result, &i.redirects)
            }
            Node::While(w) => with_redirects(
                format!("(while {} {})", w.condition.to_sexp(), w.body.to_sexp()),
                &w.redirects,
            ),
            Node::Until(u) => with_redirects(
                format!("(until {} {})", u.condition.to_sexp(), u.body.to_sexp()),
                &u.redirects,
            ),
            Node::For(f) => {
                let var = quote_escape(&format_command_substitutions(&f.var, &[], false));
                let base = format!(
                    "(for (word \"{}\") {} {})",
                    var,
                    in_clause(f.words.as_deref()),
                    f.body.to_sexp()
                );
                with_redirects(base, &f.redirects)
            }
            Node::ForArith(f) => {
                let part = |s: &str| format_arith_val(if s.is_empty() { "1" } else { s });
                let base = format!(
                    "(arith-for (init (word \"{}\")) (test (word \"{}\")) (step (word \"{}\")) {})",
                    part(&f.init),
                    part(&f.cond),
                    part(&f.incr),
                    f.body.to_sexp()
                );
                with_redirects(base, &f.redirects)
            }
            Node::Select(s) => {
                let base = format!(
                    "(select (word \"{}\") {} {})",
                    quote_escape(&s.var),
                    in_clause(s.words.as_deref()),
                    s.body.to_sexp()
                );
                with_redirects(base, &s.redirects)
            }
            Node::Case(c) => {
                let mut parts = vec![format!("(case {}", c.word.to_sexp())];
                parts.extend(c.patterns.iter().map(CasePattern::to_sexp));
                with_redirects(format!("{})", parts.join(" ")), &c.redirects)
            }
            Node::Function(f) => format!("(function \"{}\" {})", f.name, f.body.to_sexp()),
            Node::Coproc(c) => {
                let name = if c.name.is_empty() { "COPROC" } else { c.name.as_str() };
                format!("(coproc \"{}\" {})", name, c.command.to_sexp())
            }
            Node::Negation(n) => match &n.pipeline {
                Some(p) => format!("(negation {})", p.to_sexp()),
                None => "(negation (command))".to_string(),
            },
            Node::Time(t) => {
                let flag = if t.posix { "-p " } else { "" };
                match &t.pipeline {
                    Some(p) => format!("(time {}{})", flag, p.to_sexp()),
                    None => format!("(time {}(command))", flag),
                }
            }
            Node::ArithmeticCommand(a) => {
                let formatted = format_command_substitutions(&a.raw_content, &[], true);
                let escaped = quote_escape_nl(&formatted).replace('\t', "\\t");
                with_redirects(format!("(arith (word \"{}\"))", escaped), &a.redirects)
            }
            Node::ConditionalExpr(c) => {
                with_redirects(format!("(cond {})", c.body.to_sexp()), &c.redirects)
            }

            Node::UnaryTest(t) => format!(
                "(cond-unary \"{}\" (cond-term \"{}\"))",
                t.op,
                t.operand.cond_formatted_value()
            ),
            Node::BinaryTest(t) => format!(
                "(cond-binary \"{}\" (cond-term \"{}\") (cond-term \"{}\"))",
                t.op,
                t.left.cond_formatted_value(),
                t.right.cond_formatted_value()
            ),
            Node::CondAnd(c) => format!("(cond-and {} {})", c.left.to_sexp(), c.right.to_sexp()),
            Node::CondOr(c) => format!("(cond-or {} {})", c.left.to_sexp(), c.right.to_sexp()),
            // bash's dump drops the negation
            Node::CondNot(inner) => inner.to_sexp(),
            Node::CondParen(inner) => format!("(cond-expr {})", inner.to_sexp()),

            Node::ParamExpansion(p) => param_sexp("param", p),
            Node::ParamIndirect(p) => param_sexp("param-indirect", p),
            Node::ParamLength(p) => format!("(param-len \"{}\")", quote_escape(&p.param)),
            Node::CommandSubstitution(c) => {
                let tag = if c.brace { "funsub" } else { "cmdsub" };
                format!("({} {})", tag, c.command.to_sexp())
            }
            Node::ArithmeticExpansion(a) => match &a.expression {
                Some(e) => format!("(arith {})", e.to_sexp()),
                None => "(arith)".to_string(),
            },
            Node::ProcessSubstitution(p) => {
                format!("(procsub \"{}\" {})", p.direction, p.command.to_sexp())
            }
            Node::Array(a) => {
                if a.elements.is_empty() {
                    "(array)".to_string()
                } else {
                    let elements: Vec<String> = a.elements.iter().map(Word::to_sexp).collect();
                    format!("(array {})", elements.join(" "))
                }
            }
            Node::AnsiCQuote(q) => format!("(ansi-c \"{}\")", quote_escape_nl(&q.content)),
            Node::LocaleString(q) => format!("(locale \"{}\")", quote_escape_nl(&q.content)),

            Node::ArithNumber(v) => format!("(number \"{}\")", v),
            Node::ArithEmpty => "(empty)".to_string(),
            Node::ArithVar(name) => format!("(var \"{}\")", name),
            Node::ArithBinaryOp(b) => format!(
                "(binary-op \"{}\" {} {})",
                b.op,
                b.left.to_sexp(),
                b.right.to_sexp()
            ),
            Node::ArithUnaryOp(u) => format!("(unary-op \"{}\" {})", u.op, u.operand.to_sexp()),
            Node::ArithPreIncr(n) => format!("(pre-incr {})", n.to_sexp()),
            Node::ArithPostIncr(n) => format!("(post-incr {})", n.to_sexp()),
            Node::ArithPreDecr(n) => format!("(pre-decr {})", n.to_sexp()),
            Node::ArithPostDecr(n) => format!("(post-decr {})", n.to_sexp()),
            Node::ArithAssign(a) => format!(
                "(assign \"{}\" {} {})",
                a.op,
                a.target.to_sexp(),
                a.value.to_sexp()
            ),
            Node::ArithTernary(t) => {
                let branch = |n: &Option<Box<Node>>| {
                    n.as_ref().map_or_else(|| "(empty)".to_string(), |n| n.to_sexp())
                };
                format!(
                    "(ternary {} {} {})",
                    t.condition.to_sexp(),
                    branch(&t.if_true),
                    branch(&t.if_false)
                )
            }
            Node::ArithComma(c) => format!("(comma {} {})", c.left.to_sexp(), c.right.to_sexp()),
            Node::ArithSubscript(s) => {
                format!("(subscript \"{}\" {})", s.array, s.index.to_sexp())
            }
            Node::ArithEscape(c) => format!("(escape \"{}\")", c),
            Node::ArithDeprecated(e) => format!("(arith-deprecated \"{}\")", quote_escape_nl(e)),
            Node::ArithConcat(parts) => format!("(arith-concat {})", join_sexps(parts)),
        }
    }
}

// =============================================================================
// COMMANDS, PIPELINES, LISTS
// =============================================================================

/// `(command ...)`; a `|&` source gets the implied `2>&1` appended.
fn command_sexp(c: &Command, pipe_both: bool) -> String {
    let mut parts: Vec<String> = c.words.iter().map(Word::to_sexp).collect();
    parts.extend(c.redirects.iter().map(Node::to_sexp));
    if pipe_both {
        parts.push("(redirect \">&\" 1)".to_string());
    }
    let inner = parts.join(" ");
    if inner.is_empty() {
        "(command)".to_string()
    } else {
        format!("(command {})", inner)
    }
}

fn pipe_member_sexp(cmd: &Node, pipe_both: bool) -> String {
    match cmd {
        Node::Command(c) if pipe_both => command_sexp(c, true),
        other => other.to_sexp(),
    }
}

fn pipeline_sexp(commands: &[Node]) -> String {
    if let [only] = commands {
        return only.to_sexp();
    }
    let cmds: Vec<(&Node, bool)> = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| !matches!(c, Node::PipeBoth))
        .map(|(i, c)| (c, matches!(commands.get(i + 1), Some(Node::PipeBoth))))
        .collect();

    let Some((&(last, last_needs), rest)) = cmds.split_last() else {
        return String::new();
    };
    let mut result = pipe_member_sexp(last, last_needs);
    for &(cmd, needs) in rest.iter().rev() {
        result = if needs && !matches!(cmd, Node::Command(_)) {
            format!("(pipe {} (redirect \">&\" 1) {})", cmd.to_sexp(), result)
        } else {
            format!("(pipe {} {})", pipe_member_sexp(cmd, needs), result)
        };
    }
    result
}

fn list_op_name(op: &str) -> &str {
    match op {
        "&&" => "and",
        "||" => "or",
        ";" | "\n" => "semi",
        "&" => "background",
        other => other,
    }
}

fn list_sexp(parts: &[Node]) -> String {
    let mut parts = parts;
    while parts.len() > 1 && parts.last().is_some_and(is_separator) {
        parts = &parts[..parts.len() - 1];
    }
    if let [only] = parts {
        return only.to_sexp();
    }

    if parts.last().and_then(Node::operator) == Some("&") {
        let len = parts.len();
        // `a; b &` backgrounds only the part after the last separator
        for i in (1..len.saturating_sub(2)).rev().step_by(2) {
            if is_separator(&parts[i]) {
                return format!(
                    "(semi {} (background {}))",
                    list_sexp(&parts[..i]),
                    list_sexp(&parts[i + 1..len - 1])
                );
            }
        }
        return format!("(background {})", list_sexp(&parts[..len - 1]));
    }

    let segments: Vec<&[Node]> = parts
        .split(is_separator)
        .filter(|seg| seg.first().is_some_and(|n| n.operator().is_none()))
        .collect();
    if parts.iter().any(is_separator) {
        let Some((first, rest)) = segments.split_first() else {
            return "()".to_string();
        };
        return rest.iter().fold(amp_sexp(first), |acc, seg| {
            format!("(semi {} {})", acc, amp_sexp(seg))
        });
    }
    amp_sexp(parts)
}

/// `&` binds tighter than `;` but looser than `&&`/`||`.
fn amp_sexp(parts: &[Node]) -> String {
    if let [only] = parts {
        return only.to_sexp();
    }
    let amp_positions: Vec<usize> = (1..parts.len().saturating_sub(1))
        .step_by(2)
        .filter(|&i| parts[i].operator() == Some("&"))
        .collect();
    if amp_positions.is_empty() {
        return and_or_sexp(parts);
    }
    let mut segments = Vec::with_capacity(amp_positions.len() + 1);
    let mut start = 0;
    for pos in amp_positions {
        segments.push(&parts[start..pos]);
        start = pos + 1;
    }
    segments.push(&parts[start..]);
    let mut result = and_or_sexp(segments[0]);
    for seg in &segments[1..] {
        result = format!("(background {} {})", result, and_or_sexp(seg));
    }
    result
}

fn and_or_sexp(parts: &[Node]) -> String {
    let Some(first) = parts.first() else {
        return String::new();
    };
    let mut result = first.to_sexp();
    for pair in parts[1..].chunks_exact(2) {
        let op = pair[0].operator().unwrap_or_default();
        result = format!("({} {} {})", list_op_name(op), result, pair[1].to_sexp());
    }
    result
}

// =============================================================================
// REDIRECTS
// =============================================================================

/// Strip a `{name}` / `{name[sub]}` fd-variable prefix from an operator.
fn strip_varfd_prefix(op: &str) -> &str {
    let s = chars_of(op);
    if s.first() != Some(&'{') || !s.get(1).is_some_and(|&c| c.is_alphabetic() || c == '_') {
        return op;
    }
    let mut j = 2;
    while j < s.len() && (s[j].is_alphanumeric() || s[j] == '_') {
        j += 1;
    }
    if s.get(j) == Some(&'[') {
        j += 1;
        while j < s.len() && s[j] != ']' {
            j += 1;
        }
        if j < s.len() {
            j += 1;
        }
    }
    if s.get(j) != Some(&'}') {
        return op;
    }
    let byte_offset: usize = s[..=j].iter().map(|c| c.len_utf8()).sum();
    &op[byte_offset..]
}

/// An fd number the dump prints bare: all ASCII digits and at most i32::MAX.
/// Digit runs too long for i64 read as zero.
fn fd_number(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = s.parse::<i64>().unwrap_or(0);
    (n <= i64::from(i32::MAX)).then_some(n)
}

fn redirect_sexp(r: &Redirect) -> String {
    let mut op = strip_varfd_prefix(r.op.trim_start_matches(|c: char| c.is_ascii_digit()))
        .to_string();

    let mut target = word::expand_all_ansi_c_quotes(&r.target.value);
    target = word::strip_locale_string_dollars(&target);
    target = format_command_substitutions(&target, &r.target.parts, false);
    target = word::strip_arith_line_continuations(&target);
    if target.ends_with('\\') && !target.ends_with("\\\\") {
        target.push('\\');
    }

    if let Some(raw) = target.strip_prefix('&') {
        if op == ">" {
            op = ">&".to_string();
        } else if op == "<" {
            op = "<&".to_string();
        }
        if let Some(n) = fd_number(raw) {
            return format!("(redirect \"{}\" {})", op, n);
        }
        if let Some(n) = raw.strip_suffix('-').and_then(fd_number) {
            return format!("(redirect \"{}\" {})", op, n);
        }
        if target == "&-" {
            return "(redirect \">&-\" 0)".to_string();
        }
        let fd = raw.strip_suffix('-').unwrap_or(raw);
        return format!("(redirect \"{}\" \"{}\")", op, fd);
    }

    if op == ">&" || op == "<&" {
        if let Some(n) = fd_number(&target) {
            return format!("(redirect \"{}\" {})", op, n);
        }
        if target == "-" {
            return "(redirect \">&-\" 0)".to_string();
        }
        if let Some(n) = target.strip_suffix('-').and_then(fd_number) {
            return format!("(redirect \"{}\" {})", op, n);
        }
        let out = target.strip_suffix('-').unwrap_or(&target);
        return format!("(redirect \"{}\" \"{}\")", op, out);
    }
    format!("(redirect \"{}\" \"{}\")", op, target)
}

// =============================================================================
// LOOPS, CASE, PARAMETERS
// =============================================================================

fn in_clause(words: Option<&[Word]>) -> String {
    match words {
        None => "(in (word \"\\\"$@\\\"\"))".to_string(),
        Some([]) => "(in)".to_string(),
        Some(words) => {
            let words: Vec<String> = words.iter().map(Word::to_sexp).collect();
            format!("(in {})", words.join(" "))
        }
    }
}

/// Split a case pattern into its `|` alternatives, ignoring bars inside
/// groups, bracket classes, and quotes.
fn split_pattern_alternatives(pattern: &str) -> Vec<String> {
    let s = chars_of(pattern);
    let n = s.len();
    let mut alternatives = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < n {
        let ch = s[i];
        if ch == '\\' && i + 1 < n {
            current.push(ch);
            current.push(s[i + 1]);
            i += 2;
        } else if (is_extglob_prefix(ch) && s.get(i + 1) == Some(&'('))
            || is_expansion_start(&s, i, "$(")
        {
            current.push(ch);
            current.push('(');
            depth += 1;
            i += 2;
        } else if ch == '(' && depth > 0 {
            current.push(ch);
            depth += 1;
            i += 1;
        } else if ch == ')' && depth > 0 {
            current.push(ch);
            depth -= 1;
            i += 1;
        } else if ch == '[' {
            let (next, text, _) = consume_bracket_class(&s, i, depth);
            current.push_str(&text);
            i = next;
        } else if ch == '\'' && depth == 0 {
            let (next, text) = consume_single_quote(&s, i);
            current.push_str(&text);
            i = next;
        } else if ch == '"' && depth == 0 {
            let (next, text) = consume_double_quote(&s, i);
            current.push_str(&text);
            i = next;
        } else if ch == '|' && depth == 0 {
            alternatives.push(std::mem::take(&mut current));
            i += 1;
        } else {
            current.push(ch);
            i += 1;
        }
    }
    alternatives.push(current);
    alternatives
}

impl CasePattern {
    /// `(pattern (ALTERNATIVES) BODY)`; a clause without commands renders `()`.
    pub fn to_sexp(&self) -> String {
        let words: Vec<String> = split_pattern_alternatives(&self.pattern)
            .into_iter()
            .map(|alt| Word::new(alt, Vec::new()).to_sexp())
            .collect();
        let body = self
            .body
            .as_ref()
            .map_or_else(|| "()".to_string(), |b| b.to_sexp());
        format!("(pattern ({}) {})", words.join(" "), body)
    }
}

fn param_sexp(tag: &str, p: &ParamExpansion) -> String {
    if p.op.is_empty() {
        format!("({} \"{}\")", tag, quote_escape(&p.param))
    } else {
        format!(
            "({} \"{}\" \"{}\" \"{}\")",
            tag,
            quote_escape(&p.param),
            quote_escape(&p.op),
            quote_escape(&p.arg)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn sexp(src: &str) -> String {
        parse(src, false)
            .unwrap()
            .iter()
            .map(Node::to_sexp)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_simple_command() {
        assert_eq!(sexp("echo hello"), r#"(command (word "echo") (word "hello"))"#);
    }

    #[test]
    fn test_if_statement() {
        assert_eq!(
            sexp("if true; then echo yes; fi"),
            r#"(if (command (word "true")) (command (word "echo") (word "yes")))"#
        );
    }

    #[test]
    fn test_pipelines() {
        assert_eq!(
            sexp("a | b | c"),
            r#"(pipe (command (word "a")) (pipe (command (word "b")) (command (word "c"))))"#
        );
        assert_eq!(
            sexp("a |& b"),
            r#"(pipe (command (word "a") (redirect ">&" 1)) (command (word "b")))"#
        );
    }

    #[test]
    fn test_list_precedence() {
        assert_eq!(
            sexp("a && b || c"),
            r#"(or (and (command (word "a")) (command (word "b"))) (command (word "c")))"#
        );
        assert_eq!(
            sexp("a; b &"),
            r#"(semi (command (word "a")) (background (command (word "b"))))"#
        );
        assert_eq!(
            sexp("a & b"),
            r#"(background (command (word "a")) (command (word "b")))"#
        );
        assert_eq!(sexp("a &"), r#"(background (command (word "a")))"#);
    }

    #[test]
    fn test_redirects() {
        assert_eq!(
            sexp("cmd >out 2>&1 <&- 3>&-"),
            concat!(
                r#"(command (word "cmd") (redirect ">" "out") (redirect ">&" 1) "#,
                r#"(redirect ">&-" 0) (redirect ">&-" 0))"#
            )
        );
        assert_eq!(
            sexp("cmd {fd}>file"),
            r#"(command (word "cmd") (redirect ">" "file"))"#
        );
    }

    #[test]
    fn test_heredoc() {
        assert_eq!(
            sexp("cat <<EOF\nhi\nEOF"),
            r#"(command (word "cat") (redirect "<<" "hi
"))"#
        );
    }

    #[test]
    fn test_loops() {
        assert_eq!(
            sexp("for x; do a; done"),
            r#"(for (word "x") (in (word "\"$@\"")) (command (word "a")))"#
        );
        assert_eq!(
            sexp("for x in; do a; done"),
            r#"(for (word "x") (in) (command (word "a")))"#
        );
        assert_eq!(
            sexp("for ((;;)); do a; done"),
            r#"(arith-for (init (word "1")) (test (word "1")) (step (word "1")) (command (word "a")))"#
        );
        assert_eq!(
            sexp("while a; do b; done >log"),
            r#"(while (command (word "a")) (command (word "b"))) (redirect ">" "log")"#
        );
    }

    #[test]
    fn test_case_patterns() {
        assert_eq!(
            sexp("case x in a|b) c;; *) ;; esac"),
            concat!(
                r#"(case (word "x") (pattern ((word "a") (word "b")) (command (word "c"))) "#,
                r#"(pattern ((word "*")) ()))"#
            )
        );
    }

    #[test]
    fn test_conditional() {
        assert_eq!(
            sexp("[[ -f x && ! ( a == b ) ]]"),
            concat!(
                r#"(cond (cond-and (cond-unary "-f" (cond-term "x")) "#,
                r#"(cond-expr (cond-binary "==" (cond-term "a") (cond-term "b")))))"#
            )
        );
    }

    #[test]
    fn test_negation_time_and_coproc() {
        assert_eq!(sexp("! a"), r#"(negation (command (word "a")))"#);
        assert_eq!(sexp("time -p a"), r#"(time -p (command (word "a")))"#);
        assert_eq!(sexp("coproc a"), r#"(coproc "COPROC" (command (word "a")))"#);
    }

    #[test]
    fn test_function_and_groups() {
        assert_eq!(
            sexp("f() { a; }"),
            r#"(function "f" (brace-group (command (word "a"))))"#
        );
        assert_eq!(sexp("(a) >x"), r#"(subshell (command (word "a"))) (redirect ">" "x")"#);
    }

    #[test]
    fn test_arith_command() {
        assert_eq!(sexp("((x = 1 + 2))"), r#"(arith (word "x = 1 + 2"))"#);
    }

    #[test]
    fn test_expansion_nodes() {
        let p = Node::ParamExpansion(ParamExpansion::new("x", ":-", "d\"q"));
        assert_eq!(p.to_sexp(), r#"(param "x" ":-" "d\"q")"#);
        let p = Node::ParamIndirect(ParamExpansion::simple("x"));
        assert_eq!(p.to_sexp(), r#"(param-indirect "x")"#);
        let a = Node::ArithmeticExpansion(crate::ast::types::ArithmeticExpansion { expression: None });
        assert_eq!(a.to_sexp(), "(arith)");
    }

    #[test]
    fn test_comment_only_input() {
        assert_eq!(sexp("# just a comment\n"), "");
    }

    #[test]
    fn test_pattern_alternatives_respect_groups() {
        assert_eq!(split_pattern_alternatives("a|b"), vec!["a", "b"]);
        assert_eq!(split_pattern_alternatives("@(x|y)|z"), vec!["@(x|y)", "z"]);
        assert_eq!(split_pattern_alternatives("'|'|\"|\""), vec!["'|'", "\"|\""]);
        assert_eq!(split_pattern_alternatives("[ab]|c"), vec!["[ab]", "c"]);
        assert_eq!(split_pattern_alternatives(r"a\|b"), vec![r"a\|b"]);
    }

    fn substitution_body(word: &Word) -> &Node {
        match word.parts.as_slice() {
            [Node::CommandSubstitution(c)] => c.command.as_ref(),
            [Node::ProcessSubstitution(p)] => p.command.as_ref(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_substitution_bodies_reparse_to_same_form() {
        for src in [
            "echo $(ls   -la|grep  x)",
            "echo $(a &&  b;c)",
            "cat <(sort   f)",
        ] {
            let nodes = parse(src, false).unwrap();
            let Node::Command(cmd) = &nodes[0] else {
                panic!("expected command for {:?}", src);
            };
            let body = substitution_body(&cmd.words[1]);
            let text = format::format_cmdsub_node(body, 0, false, false, false);
            let reparsed = parse(&text, false).unwrap();
            assert_eq!(reparsed.len(), 1, "{:?}", text);
            assert_eq!(reparsed[0].to_sexp(), body.to_sexp(), "{:?}", src);

            // rendering the word from its canonical text changes nothing
            let rendered = cmd.words[1].to_sexp();
            let again = sexp(&format!("echo {}", &rendered[7..rendered.len() - 2]));
            assert!(again.ends_with(&format!("{})", rendered)), "{:?}", src);
        }
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let src = "for x in $(seq 3); do case $x in 1|2) echo \"${x:-d}\" >&2;; esac; done | cat &";
        let first = sexp(src);
        for _ in 0..3 {
            assert_eq!(sexp(src), first);
        }
    }

    #[test]
    fn test_varfd_prefix() {
        assert_eq!(strip_varfd_prefix("{fd}>"), ">");
        assert_eq!(strip_varfd_prefix("{a[1]}<&"), "<&");
        assert_eq!(strip_varfd_prefix("{1}>"), "{1}>");
        assert_eq!(strip_varfd_prefix(">"), ">");
    }

    #[test]
    fn test_fd_numbers() {
        assert_eq!(fd_number("12"), Some(12));
        assert_eq!(fd_number("2147483648"), None);
        assert_eq!(fd_number("x1"), None);
        assert_eq!(fd_number(""), None);
    }
}
