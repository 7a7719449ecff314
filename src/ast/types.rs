//! Abstract Syntax Tree (AST) Types for Bash
//!
//! This module defines the closed set of node variants produced by the parser.
//! Every node owns its children exclusively; the only post-construction
//! mutation is heredoc body resolution and trailing-backslash cleanup, both
//! performed by the parser before a tree is handed out.

// =============================================================================
// NODE
// =============================================================================

/// Union of every node the parser can produce
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Word(Word),
    Command(Command),
    Pipeline(Pipeline),
    List(List),
    Operator(Operator),
    PipeBoth,
    Empty,
    Comment(Comment),
    Redirect(Redirect),
    HereDoc(HereDoc),

    // Compound commands
    Subshell(Subshell),
    BraceGroup(BraceGroup),
    If(If),
    While(While),
    Until(Until),
    For(For),
    ForArith(ForArith),
    Select(Select),
    Case(Case),
    Function(Function),
    Coproc(Coproc),
    Negation(Negation),
    Time(Time),
    ArithmeticCommand(ArithmeticCommand),
    ConditionalExpr(ConditionalExpr),

    // Conditional expression terms
    UnaryTest(UnaryTest),
    BinaryTest(BinaryTest),
    CondAnd(CondBinary),
    CondOr(CondBinary),
    CondNot(Box<Node>),
    CondParen(Box<Node>),

    // Expansions
    ParamExpansion(ParamExpansion),
    ParamLength(ParamLength),
    ParamIndirect(ParamExpansion),
    CommandSubstitution(CommandSubstitution),
    ArithmeticExpansion(ArithmeticExpansion),
    ProcessSubstitution(ProcessSubstitution),
    Array(Array),
    AnsiCQuote(QuotedText),
    LocaleString(QuotedText),

    // Arithmetic expressions
    ArithNumber(String),
    ArithEmpty,
    ArithVar(String),
    ArithBinaryOp(ArithBinaryOp),
    ArithUnaryOp(ArithUnaryOp),
    ArithPreIncr(Box<Node>),
    ArithPostIncr(Box<Node>),
    ArithPreDecr(Box<Node>),
    ArithPostDecr(Box<Node>),
    ArithAssign(ArithAssign),
    ArithTernary(ArithTernary),
    ArithComma(ArithComma),
    ArithSubscript(ArithSubscript),
    ArithEscape(String),
    ArithDeprecated(String),
    ArithConcat(Vec<Node>),
}

impl Node {
    /// Fixed tag naming the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Word(_) => "word",
            Node::Command(_) => "command",
            Node::Pipeline(_) => "pipeline",
            Node::List(_) => "list",
            Node::Operator(_) => "operator",
            Node::PipeBoth => "pipe-both",
            Node::Empty => "empty",
            Node::Comment(_) => "comment",
            Node::Redirect(_) => "redirect",
            Node::HereDoc(_) => "heredoc",
            Node::Subshell(_) => "subshell",
            Node::BraceGroup(_) => "brace-group",
            Node::If(_) => "if",
            Node::While(_) => "while",
            Node::Until(_) => "until",
            Node::For(_) => "for",
            Node::ForArith(_) => "for-arith",
            Node::Select(_) => "select",
            Node::Case(_) => "case",
            Node::Function(_) => "function",
            Node::Coproc(_) => "coproc",
            Node::Negation(_) => "negation",
            Node::Time(_) => "time",
            Node::ArithmeticCommand(_) => "arith-cmd",
            Node::ConditionalExpr(_) => "cond-expr",
            Node::UnaryTest(_) => "unary-test",
            Node::BinaryTest(_) => "binary-test",
            Node::CondAnd(_) => "cond-and",
            Node::CondOr(_) => "cond-or",
            Node::CondNot(_) => "cond-not",
            Node::CondParen(_) => "cond-paren",
            Node::ParamExpansion(_) => "param",
            Node::ParamLength(_) => "param-len",
            Node::ParamIndirect(_) => "param-indirect",
            Node::CommandSubstitution(_) => "cmdsub",
            Node::ArithmeticExpansion(_) => "arith",
            Node::ProcessSubstitution(_) => "procsub",
            Node::Array(_) => "array",
            Node::AnsiCQuote(_) => "ansi-c",
            Node::LocaleString(_) => "locale",
            Node::ArithNumber(_) => "number",
            Node::ArithEmpty => "empty",
            Node::ArithVar(_) => "var",
            Node::ArithBinaryOp(_) => "binary-op",
            Node::ArithUnaryOp(_) => "unary-op",
            Node::ArithPreIncr(_) => "pre-incr",
            Node::ArithPostIncr(_) => "post-incr",
            Node::ArithPreDecr(_) => "pre-decr",
            Node::ArithPostDecr(_) => "post-decr",
            Node::ArithAssign(_) => "assign",
            Node::ArithTernary(_) => "ternary",
            Node::ArithComma(_) => "comma",
            Node::ArithSubscript(_) => "subscript",
            Node::ArithEscape(_) => "escape",
            Node::ArithDeprecated(_) => "arith-deprecated",
            Node::ArithConcat(_) => "arith-concat",
        }
    }

    pub fn as_word(&self) -> Option<&Word> {
        match self {
            Node::Word(w) => Some(w),
            _ => None,
        }
    }

    /// Operator text if this node is a list operator
    pub fn operator(&self) -> Option<&str> {
        match self {
            Node::Operator(o) => Some(o.op.as_str()),
            _ => None,
        }
    }

    /// Visit every heredoc in the tree, including those nested inside word parts.
    pub(crate) fn for_each_heredoc_mut(&mut self, f: &mut dyn FnMut(&mut HereDoc)) {
        match self {
            Node::HereDoc(h) => f(h),
            Node::Word(w) => w.for_each_heredoc_mut(f),
            Node::Command(c) => {
                for w in &mut c.words {
                    w.for_each_heredoc_mut(f);
                }
                visit_all(&mut c.redirects, f);
            }
            Node::Pipeline(p) => visit_all(&mut p.commands, f),
            Node::List(l) => visit_all(&mut l.parts, f),
            Node::Redirect(r) => r.target.for_each_heredoc_mut(f),
            Node::Subshell(s) => {
                s.body.for_each_heredoc_mut(f);
                visit_all(&mut s.redirects, f);
            }
            Node::BraceGroup(b) => {
                b.body.for_each_heredoc_mut(f);
                visit_all(&mut b.redirects, f);
            }
            Node::If(i) => {
                i.condition.for_each_heredoc_mut(f);
                i.then_body.for_each_heredoc_mut(f);
                if let Some(e) = &mut i.else_body {
                    e.for_each_heredoc_mut(f);
                }
                visit_all(&mut i.redirects, f);
            }
            Node::While(w) => {
                w.condition.for_each_heredoc_mut(f);
                w.body.for_each_heredoc_mut(f);
                visit_all(&mut w.redirects, f);
            }
            Node::Until(u) => {
                u.condition.for_each_heredoc_mut(f);
                u.body.for_each_heredoc_mut(f);
                visit_all(&mut u.redirects, f);
            }
            Node::For(fr) => {
                if let Some(words) = &mut fr.words {
                    for w in words {
                        w.for_each_heredoc_mut(f);
                    }
                }
                fr.body.for_each_heredoc_mut(f);
                visit_all(&mut fr.redirects, f);
            }
            Node::ForArith(fa) => {
                fa.body.for_each_heredoc_mut(f);
                visit_all(&mut fa.redirects, f);
            }
            Node::Select(s) => {
                if let Some(words) = &mut s.words {
                    for w in words {
                        w.for_each_heredoc_mut(f);
                    }
                }
                s.body.for_each_heredoc_mut(f);
                visit_all(&mut s.redirects, f);
            }
            Node::Case(c) => {
                c.word.for_each_heredoc_mut(f);
                for p in &mut c.patterns {
                    if let Some(body) = &mut p.body {
                        body.for_each_heredoc_mut(f);
                    }
                }
                visit_all(&mut c.redirects, f);
            }
            Node::Function(func) => func.body.for_each_heredoc_mut(f),
            Node::Coproc(c) => c.command.for_each_heredoc_mut(f),
            Node::Negation(n) => {
                if let Some(p) = &mut n.pipeline {
                    p.for_each_heredoc_mut(f);
                }
            }
            Node::Time(t) => {
                if let Some(p) = &mut t.pipeline {
                    p.for_each_heredoc_mut(f);
                }
            }
            Node::ArithmeticCommand(a) => {
                if let Some(e) = &mut a.expression {
                    e.for_each_heredoc_mut(f);
                }
                visit_all(&mut a.redirects, f);
            }
            Node::ConditionalExpr(c) => {
                c.body.for_each_heredoc_mut(f);
                visit_all(&mut c.redirects, f);
            }
            Node::UnaryTest(u) => u.operand.for_each_heredoc_mut(f),
            Node::BinaryTest(b) => {
                b.left.for_each_heredoc_mut(f);
                b.right.for_each_heredoc_mut(f);
            }
            Node::CondAnd(c) | Node::CondOr(c) => {
                c.left.for_each_heredoc_mut(f);
                c.right.for_each_heredoc_mut(f);
            }
            Node::CondNot(n) | Node::CondParen(n) => n.for_each_heredoc_mut(f),
            Node::CommandSubstitution(c) => c.command.for_each_heredoc_mut(f),
            Node::ProcessSubstitution(p) => p.command.for_each_heredoc_mut(f),
            Node::ArithmeticExpansion(a) => {
                if let Some(e) = &mut a.expression {
                    e.for_each_heredoc_mut(f);
                }
            }
            Node::Array(a) => {
                for w in &mut a.elements {
                    w.for_each_heredoc_mut(f);
                }
            }
            Node::ArithBinaryOp(b) => {
                b.left.for_each_heredoc_mut(f);
                b.right.for_each_heredoc_mut(f);
            }
            Node::ArithUnaryOp(u) => u.operand.for_each_heredoc_mut(f),
            Node::ArithPreIncr(n)
            | Node::ArithPostIncr(n)
            | Node::ArithPreDecr(n)
            | Node::ArithPostDecr(n) => n.for_each_heredoc_mut(f),
            Node::ArithAssign(a) => {
                a.target.for_each_heredoc_mut(f);
                a.value.for_each_heredoc_mut(f);
            }
            Node::ArithTernary(t) => {
                t.condition.for_each_heredoc_mut(f);
                if let Some(n) = &mut t.if_true {
                    n.for_each_heredoc_mut(f);
                }
                if let Some(n) = &mut t.if_false {
                    n.for_each_heredoc_mut(f);
                }
            }
            Node::ArithComma(c) => {
                c.left.for_each_heredoc_mut(f);
                c.right.for_each_heredoc_mut(f);
            }
            Node::ArithSubscript(s) => s.index.for_each_heredoc_mut(f),
            Node::ArithConcat(parts) => visit_all(parts, f),
            Node::Operator(_)
            | Node::PipeBoth
            | Node::Empty
            | Node::Comment(_)
            | Node::ParamExpansion(_)
            | Node::ParamLength(_)
            | Node::ParamIndirect(_)
            | Node::AnsiCQuote(_)
            | Node::LocaleString(_)
            | Node::ArithNumber(_)
            | Node::ArithEmpty
            | Node::ArithVar(_)
            | Node::ArithEscape(_)
            | Node::ArithDeprecated(_) => {}
        }
    }
}

fn visit_all(nodes: &mut [Node], f: &mut dyn FnMut(&mut HereDoc)) {
    for n in nodes {
        n.for_each_heredoc_mut(f);
    }
}

// =============================================================================
// WORDS & SIMPLE COMMANDS
// =============================================================================

/// A word: raw captured text plus the expansions found inside it, in order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub value: String,
    pub parts: Vec<Node>,
}

impl Word {
    pub fn new(value: impl Into<String>, parts: Vec<Node>) -> Self {
        Self {
            value: value.into(),
            parts,
        }
    }

    fn for_each_heredoc_mut(&mut self, f: &mut dyn FnMut(&mut HereDoc)) {
        visit_all(&mut self.parts, f);
    }
}

/// Simple command: words with optional redirections
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub words: Vec<Word>,
    /// `Node::Redirect` or `Node::HereDoc`
    pub redirects: Vec<Node>,
}

/// A pipeline: cmd1 | cmd2 |& cmd3
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Commands, with `Node::PipeBoth` markers before each `|&` target
    pub commands: Vec<Node>,
}

/// Pipelines interleaved with `Node::Operator` separators
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub parts: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    /// One of `&&`, `||`, `;`, `&`, or a newline
    pub op: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
}

// =============================================================================
// REDIRECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    /// Operator including any fd or `{var}` prefix, e.g. `2>`, `{fd}>&`
    pub op: String,
    pub target: Word,
}

/// Heredoc redirect; the body is filled in once the line's newline is read
#[derive(Debug, Clone, PartialEq)]
pub struct HereDoc {
    pub delimiter: String,
    pub content: String,
    pub strip_tabs: bool,
    pub quoted: bool,
    pub fd: Option<u32>,
    pub complete: bool,
    /// Slot in the owning parser's heredoc table, cleared once resolved
    pub(crate) slot: Option<usize>,
}

// =============================================================================
// COMPOUND COMMANDS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Subshell {
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BraceGroup {
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct If {
    pub condition: Box<Node>,
    pub then_body: Box<Node>,
    /// Either a nested `If` for `elif`, or the `else` list
    pub else_body: Option<Box<Node>>,
    pub redirects: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct While {
    pub condition: Box<Node>,
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Until {
    pub condition: Box<Node>,
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

/// for VAR [in WORDS]; do ...; done
#[derive(Debug, Clone, PartialEq)]
pub struct For {
    pub var: String,
    /// `None` when there is no `in` clause at all
    pub words: Option<Vec<Word>>,
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

/// for ((init; cond; incr)); do ...; done
#[derive(Debug, Clone, PartialEq)]
pub struct ForArith {
    pub init: String,
    pub cond: String,
    pub incr: String,
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub var: String,
    pub words: Option<Vec<Word>>,
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub word: Word,
    pub patterns: Vec<CasePattern>,
    pub redirects: Vec<Node>,
}

/// One `pattern) body ;;` clause
#[derive(Debug, Clone, PartialEq)]
pub struct CasePattern {
    /// Raw pattern text, alternatives still joined by `|`
    pub pattern: String,
    pub body: Option<Box<Node>>,
    /// `;;`, `;&` or `;;&`
    pub terminator: String,
}

impl CasePattern {
    /// Clauses live inside `Case.patterns` rather than as free nodes.
    pub fn kind(&self) -> &'static str {
        "pattern"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub body: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coproc {
    pub command: Box<Node>,
    /// Empty when unnamed
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Negation {
    pub pipeline: Option<Box<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Time {
    pub pipeline: Option<Box<Node>>,
    pub posix: bool,
}

/// (( expr ))
#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticCommand {
    pub expression: Option<Box<Node>>,
    pub redirects: Vec<Node>,
    pub raw_content: String,
}

/// [[ expr ]]
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpr {
    pub body: Box<Node>,
    pub redirects: Vec<Node>,
}

// =============================================================================
// CONDITIONAL TERMS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryTest {
    pub op: String,
    pub operand: Word,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTest {
    pub op: String,
    pub left: Word,
    pub right: Word,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CondBinary {
    pub left: Box<Node>,
    pub right: Box<Node>,
}

// =============================================================================
// EXPANSIONS
// =============================================================================

/// ${param}, ${param op arg}; also used for ${!param...}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamExpansion {
    pub param: String,
    pub op: String,
    pub arg: String,
}

impl ParamExpansion {
    pub fn new(param: impl Into<String>, op: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            op: op.into(),
            arg: arg.into(),
        }
    }

    pub fn simple(param: impl Into<String>) -> Self {
        Self::new(param, "", "")
    }
}

/// ${#param}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLength {
    pub param: String,
}

/// $(...), `...` or the ${ ...; } / ${| ...; } function substitution
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSubstitution {
    pub command: Box<Node>,
    pub brace: bool,
}

/// $(( expr ))
#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticExpansion {
    pub expression: Option<Box<Node>>,
}

/// <(...) or >(...)
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSubstitution {
    pub direction: String,
    pub command: Box<Node>,
}

/// name=( ... ) compound assignment body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Array {
    pub elements: Vec<Word>,
}

/// Body of `$'...'` or `$"..."`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedText {
    pub content: String,
}

// =============================================================================
// ARITHMETIC
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ArithBinaryOp {
    pub op: String,
    pub left: Box<Node>,
    pub right: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithUnaryOp {
    pub op: String,
    pub operand: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithAssign {
    pub op: String,
    pub target: Box<Node>,
    pub value: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithTernary {
    pub condition: Box<Node>,
    pub if_true: Option<Box<Node>>,
    pub if_false: Option<Box<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithComma {
    pub left: Box<Node>,
    pub right: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithSubscript {
    pub array: String,
    pub index: Box<Node>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(Node::Word(Word::new("a", vec![])).kind(), "word");
        assert_eq!(Node::PipeBoth.kind(), "pipe-both");
        assert_eq!(Node::ArithEmpty.kind(), "empty");
        assert_eq!(
            Node::ParamIndirect(ParamExpansion::simple("x")).kind(),
            "param-indirect"
        );
        assert_eq!(
            Node::ArithmeticCommand(ArithmeticCommand {
                expression: None,
                redirects: vec![],
                raw_content: String::new(),
            })
            .kind(),
            "arith-cmd"
        );
        let clause = CasePattern {
            pattern: "a|b".to_string(),
            body: None,
            terminator: ";;".to_string(),
        };
        assert_eq!(clause.kind(), "pattern");
    }

    #[test]
    fn test_heredoc_visitor_reaches_nested_substitutions() {
        let heredoc = HereDoc {
            delimiter: "EOF".to_string(),
            content: String::new(),
            strip_tabs: false,
            quoted: false,
            fd: None,
            complete: false,
            slot: Some(0),
        };
        let inner = Node::Command(Command {
            words: vec![Word::new("cat", vec![])],
            redirects: vec![Node::HereDoc(heredoc)],
        });
        let word = Word::new(
            "$(cat <<EOF)",
            vec![Node::CommandSubstitution(CommandSubstitution {
                command: Box::new(inner),
                brace: false,
            })],
        );
        let mut root = Node::Command(Command {
            words: vec![Word::new("echo", vec![]), word],
            redirects: vec![],
        });

        let mut seen = 0;
        root.for_each_heredoc_mut(&mut |h| {
            seen += 1;
            h.content = "body\n".to_string();
        });
        assert_eq!(seen, 1);
        let Node::Command(cmd) = &root else { panic!("expected command") };
        let Node::CommandSubstitution(cs) = &cmd.words[1].parts[0] else {
            panic!("expected cmdsub")
        };
        let Node::Command(inner) = cs.command.as_ref() else { panic!("expected command") };
        let Node::HereDoc(h) = &inner.redirects[0] else { panic!("expected heredoc") };
        assert_eq!(h.content, "body\n");
    }
}
