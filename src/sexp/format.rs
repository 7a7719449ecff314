//! Command Re-rendering
//!
//! Turns a parsed command back into shell text, the way bash prints the body
//! of a `$(...)` or `<(...)` in its own parse dump. Only the constructs that
//! can appear inside a substitution are handled; anything else renders empty.

use crate::ast::types::{Command, HereDoc, Node};

use super::word::{
    expand_all_ansi_c_quotes, format_command_substitutions, normalize_array_whitespace,
    strip_locale_string_dollars,
};

fn spaces(n: usize) -> String {
    " ".repeat(n)
}

fn has_heredoc(cmd: &Command) -> bool {
    cmd.redirects.iter().any(|r| matches!(r, Node::HereDoc(_)))
}

/// Insert `text` before the first newline of `s`, or append it when there is
/// none.
fn insert_before_newline(s: &str, text: &str) -> String {
    match s.find('\n') {
        Some(nl) => format!("{}{}{}", &s[..nl], text, &s[nl..]),
        None => format!("{}{}", s, text),
    }
}

/// Whether the first command of `node` is a subshell.
pub(crate) fn starts_with_subshell(node: &Node) -> bool {
    match node {
        Node::Subshell(_) => true,
        Node::List(list) => list
            .parts
            .iter()
            .find(|p| !matches!(p, Node::Operator(_)))
            .is_some_and(starts_with_subshell),
        Node::Pipeline(p) => p.commands.first().is_some_and(starts_with_subshell),
        _ => false,
    }
}

/// Render `node` as shell source.
///
/// `in_procsub` and `procsub_first` select the tighter spacing used inside
/// process substitutions; `compact_redirects` glues redirects to the
/// preceding word.
pub(crate) fn format_cmdsub_node(
    node: &Node,
    indent: usize,
    in_procsub: bool,
    compact_redirects: bool,
    procsub_first: bool,
) -> String {
    let sp = spaces(indent);
    let inner_sp = spaces(indent + 4);

    match node {
        Node::Command(cmd) => format_command(cmd, compact_redirects),
        Node::Pipeline(p) => {
            let mut cmds: Vec<(&Node, bool)> = Vec::new();
            for (i, c) in p.commands.iter().enumerate() {
                if matches!(c, Node::PipeBoth) {
                    continue;
                }
                let needs_redirect = matches!(p.commands.get(i + 1), Some(Node::PipeBoth));
                cmds.push((c, needs_redirect));
            }

            let mut rendered: Vec<String> = Vec::with_capacity(cmds.len());
            for (idx, &(cmd, needs_redirect)) in cmds.iter().enumerate() {
                let mut formatted =
                    format_cmdsub_node(cmd, indent, in_procsub, false, procsub_first && idx == 0);
                let heredoc = matches!(cmd, Node::Command(c) if has_heredoc(c));
                if needs_redirect {
                    formatted = if heredoc {
                        insert_before_newline(&formatted, " 2>&1")
                    } else {
                        formatted + " 2>&1"
                    };
                }
                if idx + 1 < cmds.len() && heredoc {
                    if let Some(nl) = formatted.find('\n') {
                        formatted = format!("{} |{}", &formatted[..nl], &formatted[nl..]);
                    }
                }
                rendered.push(formatted);
            }

            let compact_pipe =
                in_procsub && matches!(cmds.first(), Some((Node::Subshell(_), _)));
            let mut result = String::new();
            for (idx, part) in rendered.iter().enumerate() {
                if idx == 0 {
                    result.push_str(part);
                } else if result.ends_with('\n') {
                    result.push_str("  ");
                    result.push_str(part);
                } else if compact_pipe {
                    result.push('|');
                    result.push_str(part);
                } else {
                    result.push_str(" | ");
                    result.push_str(part);
                }
            }
            result
        }
        Node::List(list) => format_list(&list.parts, indent, in_procsub, compact_redirects, procsub_first),
        Node::If(n) => {
            let cond = format_cmdsub_node(&n.condition, indent, false, false, false);
            let then_body = format_cmdsub_node(&n.then_body, indent + 4, false, false, false);
            let mut result = format!("if {}; then\n{}{};", cond, inner_sp, then_body);
            if let Some(else_body) = &n.else_body {
                let else_body = format_cmdsub_node(else_body, indent + 4, false, false, false);
                result.push_str(&format!("\n{}else\n{}{};", sp, inner_sp, else_body));
            }
            result.push_str(&format!("\n{}fi", sp));
            result
        }
        Node::While(n) => {
            let cond = format_cmdsub_node(&n.condition, indent, false, false, false);
            let body = format_cmdsub_node(&n.body, indent + 4, false, false, false);
            let result = format!("while {}; do\n{}{};\n{}done", cond, inner_sp, body, sp);
            append_redirects(result, &n.redirects)
        }
        Node::Until(n) => {
            let cond = format_cmdsub_node(&n.condition, indent, false, false, false);
            let body = format_cmdsub_node(&n.body, indent + 4, false, false, false);
            let result = format!("until {}; do\n{}{};\n{}done", cond, inner_sp, body, sp);
            append_redirects(result, &n.redirects)
        }
        Node::For(n) => {
            let body = format_cmdsub_node(&n.body, indent + 4, false, false, false);
            let words = match &n.words {
                Some(words) => words
                    .iter()
                    .map(|w| w.value.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
                None => "\"$@\"".to_string(),
            };
            let result = if words.is_empty() {
                format!("for {} in ;\n{}do\n{}{};\n{}done", n.var, sp, inner_sp, body, sp)
            } else {
                format!(
                    "for {} in {};\n{}do\n{}{};\n{}done",
                    n.var, words, sp, inner_sp, body, sp
                )
            };
            append_redirects(result, &n.redirects)
        }
        Node::ForArith(n) => {
            let body = format_cmdsub_node(&n.body, indent + 4, false, false, false);
            let result = format!(
                "for (({}; {}; {}))\ndo\n{}{};\n{}done",
                n.init, n.cond, n.incr, inner_sp, body, sp
            );
            append_redirects(result, &n.redirects)
        }
        Node::Case(n) => {
            let pat_indent = spaces(indent + 8);
            let term_indent = spaces(indent + 4);
            let patterns: Vec<String> = n
                .patterns
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let pat = p.pattern.replace('|', " | ");
                    let body = p
                        .body
                        .as_ref()
                        .map(|b| format_cmdsub_node(b, indent + 8, false, false, false))
                        .unwrap_or_default();
                    let body_part = if body.is_empty() {
                        "\n".to_string()
                    } else {
                        format!("{}{}\n", pat_indent, body)
                    };
                    let lead = if i == 0 { " " } else { "" };
                    format!("{}{})\n{}{}{}", lead, pat, body_part, term_indent, p.terminator)
                })
                .collect();
            let joined = patterns.join(&format!("\n{}", term_indent));
            let result = format!("case {} in{}\n{}esac", n.word.value, joined, sp);
            append_redirects(result, &n.redirects)
        }
        Node::Function(f) => {
            let inner = match f.body.as_ref() {
                Node::BraceGroup(bg) => bg.body.as_ref(),
                other => other,
            };
            let body = format_cmdsub_node(inner, indent + 4, false, false, false);
            let body = body.strip_suffix(';').unwrap_or(&body);
            format!("function {} () \n{{ \n{}{}\n}}", f.name, inner_sp, body)
        }
        Node::Subshell(s) => {
            let body = format_cmdsub_node(&s.body, indent, in_procsub, compact_redirects, false);
            let redirects = join_redirects(&s.redirects);
            match (procsub_first, redirects.is_empty()) {
                (true, true) => format!("({})", body),
                (true, false) => format!("({}) {}", body, redirects),
                (false, true) => format!("( {} )", body),
                (false, false) => format!("( {} ) {}", body, redirects),
            }
        }
        Node::BraceGroup(bg) => {
            let body = format_cmdsub_node(&bg.body, indent, false, false, false);
            let body = body.strip_suffix(';').unwrap_or(&body);
            let terminator = if body.ends_with(" &") { " }" } else { "; }" };
            let redirects = join_redirects(&bg.redirects);
            if redirects.is_empty() {
                format!("{{ {}{}", body, terminator)
            } else {
                format!("{{ {}{} {}", body, terminator, redirects)
            }
        }
        Node::ArithmeticCommand(a) => format!("(({}))", a.raw_content),
        Node::ConditionalExpr(c) => format!("[[ {} ]]", format_cond_body(&c.body)),
        Node::Negation(n) => match &n.pipeline {
            Some(p) => format!("! {}", format_cmdsub_node(p, indent, false, false, false)),
            None => "! ".to_string(),
        },
        Node::Time(t) => {
            let prefix = if t.posix { "time -p " } else { "time " };
            match &t.pipeline {
                Some(p) => format!("{}{}", prefix, format_cmdsub_node(p, indent, false, false, false)),
                None => prefix.to_string(),
            }
        }
        _ => String::new(),
    }
}

fn format_command(cmd: &Command, compact_redirects: bool) -> String {
    let mut parts: Vec<String> = cmd
        .words
        .iter()
        .map(|w| {
            let val = expand_all_ansi_c_quotes(&w.value);
            let val = strip_locale_string_dollars(&val);
            let val = normalize_array_whitespace(&val);
            format_command_substitutions(&val, &w.parts, false)
        })
        .collect();
    parts.extend(
        cmd.redirects
            .iter()
            .map(|r| format_redirect(r, compact_redirects, true)),
    );

    let mut result = if compact_redirects && !cmd.words.is_empty() && !cmd.redirects.is_empty() {
        let (words, redirects) = parts.split_at(cmd.words.len());
        format!("{}{}", words.join(" "), redirects.concat())
    } else {
        parts.join(" ")
    };
    for r in &cmd.redirects {
        if let Node::HereDoc(h) = r {
            result.push_str(&format_heredoc_body(h));
        }
    }
    result
}

fn list_has_heredoc(parts: &[Node]) -> bool {
    parts.iter().any(|p| match p {
        Node::Command(c) => has_heredoc(c),
        Node::Pipeline(pl) => pl
            .commands
            .iter()
            .any(|c| matches!(c, Node::Command(cmd) if has_heredoc(cmd))),
        _ => false,
    })
}

fn format_list(
    parts: &[Node],
    indent: usize,
    in_procsub: bool,
    compact_redirects: bool,
    procsub_first: bool,
) -> String {
    let heredoc = list_has_heredoc(parts);
    let mut out: Vec<String> = Vec::new();
    let mut skipped_semi = false;
    let mut cmd_count = 0;

    for part in parts {
        let Some(op) = part.operator() else {
            if out.last().is_some_and(|l| !l.ends_with(' ') && !l.ends_with('\n')) {
                out.push(" ".to_string());
            }
            let mut formatted = format_cmdsub_node(
                part,
                indent,
                in_procsub,
                compact_redirects,
                procsub_first && cmd_count == 0,
            );
            if out
                .last()
                .is_some_and(|l| l.contains(" || \n") || l.contains(" && \n"))
            {
                formatted.insert(0, ' ');
            }
            if skipped_semi {
                formatted.insert(0, ' ');
                skipped_semi = false;
            }
            out.push(formatted);
            cmd_count += 1;
            continue;
        };

        let last_is_heredoc = out
            .last()
            .is_some_and(|l| l.contains("<<") && l.contains('\n'));
        match op {
            ";" => {
                let after_newline = out.last().is_some_and(|l| l.ends_with('\n'))
                    || (out.len() >= 3
                        && out[out.len() - 2] == "\n"
                        && out[out.len() - 3].ends_with('\n'));
                if after_newline {
                    skipped_semi = true;
                    continue;
                }
                out.push(";".to_string());
                skipped_semi = false;
            }
            "\n" => {
                if out.last().is_some_and(|l| l == ";") {
                    skipped_semi = false;
                    continue;
                }
                if out.last().is_some_and(|l| l.ends_with('\n')) {
                    out.push(if skipped_semi { " " } else { "\n" }.to_string());
                    skipped_semi = false;
                    continue;
                }
                out.push("\n".to_string());
                skipped_semi = false;
            }
            "&" => {
                if let (true, Some(last)) = (last_is_heredoc, out.last_mut()) {
                    if last.contains(" |") || last.starts_with('|') {
                        last.push_str(" &");
                    } else {
                        *last = insert_before_newline(last, " &");
                    }
                } else {
                    out.push(" &".to_string());
                }
            }
            _ => {
                if let (true, Some(last)) = (last_is_heredoc, out.last_mut()) {
                    *last = insert_before_newline(last, &format!(" {} ", op));
                } else {
                    out.push(format!(" {}", op));
                }
            }
        }
    }

    let mut s = out.concat();
    if s.contains(" &\n") && s.ends_with('\n') {
        s.push(' ');
        return s;
    }
    while s.ends_with(';') {
        s.pop();
    }
    if !heredoc {
        while s.ends_with('\n') {
            s.pop();
        }
    }
    s
}

fn join_redirects(redirects: &[Node]) -> String {
    redirects
        .iter()
        .map(|r| format_redirect(r, false, false))
        .collect::<Vec<_>>()
        .join(" ")
}

fn append_redirects(mut result: String, redirects: &[Node]) -> String {
    for r in redirects {
        result.push(' ');
        result.push_str(&format_redirect(r, false, false));
    }
    result
}

/// Body text of a `[[ ]]` expression.
pub(crate) fn format_cond_body(node: &Node) -> String {
    match node {
        Node::UnaryTest(t) => format!("{} {}", t.op, t.operand.cond_formatted_value()),
        Node::BinaryTest(t) => format!(
            "{} {} {}",
            t.left.cond_formatted_value(),
            t.op,
            t.right.cond_formatted_value()
        ),
        Node::CondAnd(c) => format!("{} && {}", format_cond_body(&c.left), format_cond_body(&c.right)),
        Node::CondOr(c) => format!("{} || {}", format_cond_body(&c.left), format_cond_body(&c.right)),
        Node::CondNot(inner) => format!("! {}", format_cond_body(inner)),
        Node::CondParen(inner) => format!("( {} )", format_cond_body(inner)),
        _ => String::new(),
    }
}

/// One redirect as shell text. With `heredoc_op_only` a heredoc renders as
/// just its operator and delimiter; the body is appended by the caller.
pub(crate) fn format_redirect(r: &Node, compact: bool, heredoc_op_only: bool) -> String {
    match r {
        Node::HereDoc(h) => {
            let mut op = if h.strip_tabs { "<<-" } else { "<<" }.to_string();
            if let Some(fd) = h.fd.filter(|&fd| fd > 0) {
                op = format!("{}{}", fd, op);
            }
            let delim = if h.quoted {
                format!("'{}'", h.delimiter)
            } else {
                h.delimiter.clone()
            };
            if heredoc_op_only {
                format!("{}{}", op, delim)
            } else {
                format!("{}{}\n{}{}\n", op, delim, h.content, h.delimiter)
            }
        }
        Node::Redirect(rd) => {
            let mut op = match rd.op.as_str() {
                "1>" => ">".to_string(),
                "0<" => "<".to_string(),
                other => other.to_string(),
            };
            let target = expand_all_ansi_c_quotes(&rd.target.value);
            let target = strip_locale_string_dollars(&target);
            let target = format_command_substitutions(&target, &rd.target.parts, false);

            if let Some(after_amp) = target.strip_prefix('&') {
                let input_close = target == "&-" && op.ends_with('<');
                if input_close {
                    op.pop();
                    op.push('>');
                }
                let literal_fd =
                    after_amp == "-" || after_amp.starts_with(|c: char| c.is_ascii_digit());
                if literal_fd {
                    if op == ">" || op == ">&" {
                        op = if input_close { "0>" } else { "1>" }.to_string();
                    } else if op == "<" || op == "<&" {
                        op = "0<".to_string();
                    }
                } else if op == "1>" {
                    op = ">".to_string();
                } else if op == "0<" {
                    op = "<".to_string();
                }
                return format!("{}{}", op, target);
            }
            if op.ends_with('&') || compact {
                format!("{}{}", op, target)
            } else {
                format!("{} {}", op, target)
            }
        }
        _ => String::new(),
    }
}

pub(crate) fn format_heredoc_body(h: &HereDoc) -> String {
    format!("\n{}{}\n", h.content, h.delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::Parser;

    fn reformat(src: &str) -> String {
        let mut p = Parser::new(src, false, false);
        let node = p.parse_detached_list().unwrap().unwrap();
        format_cmdsub_node(&node, 0, false, false, false)
    }

    #[test]
    fn test_simple_commands_and_lists() {
        assert_eq!(reformat("echo   a  b"), "echo a b");
        assert_eq!(reformat("a;b"), "a; b");
        assert_eq!(reformat("a&&b||c"), "a && b || c");
        assert_eq!(reformat("a &"), "a &");
        assert_eq!(reformat("a;"), "a");
    }

    #[test]
    fn test_pipelines() {
        assert_eq!(reformat("a|b"), "a | b");
        assert_eq!(reformat("a |& b"), "a 2>&1 | b");
    }

    #[test]
    fn test_redirects() {
        assert_eq!(reformat("cat >out 2>&1 <in"), "cat > out 2>&1 < in");
        assert_eq!(reformat("cat 1>x"), "cat > x");
        assert_eq!(reformat("cat >&-"), "cat 1>&-");
        assert_eq!(reformat("cat <&-"), "cat 0>&-");
    }

    #[test]
    fn test_compound_commands() {
        assert_eq!(reformat("if a; then b; fi"), "if a; then\n    b;\nfi");
        assert_eq!(reformat("if a; then b; else c; fi"), "if a; then\n    b;\nelse\n    c;\nfi");
        assert_eq!(reformat("while a; do b; done"), "while a; do\n    b;\ndone");
        assert_eq!(reformat("for x in 1 2; do b; done"), "for x in 1 2;\ndo\n    b;\ndone");
        assert_eq!(reformat("for x; do b; done"), "for x in \"$@\";\ndo\n    b;\ndone");
        assert_eq!(reformat("{ a; }"), "{ a; }");
        assert_eq!(reformat("(a)"), "( a )");
        assert_eq!(reformat("! a"), "! a");
        assert_eq!(reformat("time -p a"), "time -p a");
        assert_eq!(reformat("((x+1))"), "((x+1))");
    }

    #[test]
    fn test_case_and_function() {
        assert_eq!(
            reformat("case x in a|b) c;; esac"),
            "case x in a | b)\n        c\n    ;;\nesac"
        );
        assert_eq!(reformat("f() { a; }"), "function f () \n{ \n    a\n}");
    }

    #[test]
    fn test_conditional() {
        assert_eq!(reformat("[[ -f x && ! $a == b ]]"), "[[ -f x && ! $a == b ]]");
    }

    #[test]
    fn test_heredoc_body_follows_line() {
        assert_eq!(reformat("cat <<EOF\nhi\nEOF"), "cat <<EOF\nhi\nEOF\n");
        assert_eq!(reformat("cat <<'E'\nx\nE"), "cat <<'E'\nx\nE\n");
    }

    #[test]
    fn test_subshell_detection() {
        let mut p = Parser::new("(a) | b", false, false);
        let node = p.parse_detached_list().unwrap().unwrap();
        assert!(starts_with_subshell(&node));
        let mut p = Parser::new("a; (b)", false, false);
        let node = p.parse_detached_list().unwrap().unwrap();
        assert!(!starts_with_subshell(&node));
    }
}
