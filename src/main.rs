use clap::Parser;
use parable::{parse, Node, ParseError};
use serde::Serialize;
use std::io::Read;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parable")]
#[command(about = "Parse bash source and dump it as S-expressions")]
#[command(version)]
struct Cli {
    /// Parse the source given on the command line
    #[arg(short = 'c')]
    source: Option<String>,

    /// Recognize ?(...), *(...), +(...), @(...) and !(...) patterns
    #[arg(long = "extglob")]
    extglob: bool,

    /// Output results as JSON (nodes, error)
    #[arg(long = "json")]
    json: bool,

    /// Script file to parse
    #[arg()]
    script_file: Option<String>,
}

#[derive(Serialize)]
struct DumpError {
    kind: String,
    message: String,
    pos: usize,
    line: usize,
}

impl From<&ParseError> for DumpError {
    fn from(e: &ParseError) -> Self {
        Self {
            kind: format!("{:?}", e.kind).to_lowercase(),
            message: e.message.clone(),
            pos: e.pos,
            line: e.line,
        }
    }
}

#[derive(Serialize)]
struct Dump {
    nodes: Vec<String>,
    error: Option<DumpError>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine source: -c, file, or stdin
    let source = if let Some(s) = cli.source {
        s
    } else if let Some(ref file) = cli.script_file {
        match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error: Cannot read script file: {}: {}", file, e);
                std::process::exit(1);
            }
        }
    } else {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            eprintln!("Error: No source provided. Use -c 'source', provide a file, or pipe via stdin.");
            std::process::exit(1);
        }
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("Error: Cannot read stdin: {}", e);
            std::process::exit(1);
        }
        buf
    };

    let result = parse(&source, cli.extglob);

    if cli.json {
        let dump = match &result {
            Ok(nodes) => Dump {
                nodes: rendered(nodes),
                error: None,
            },
            Err(e) => Dump {
                nodes: Vec::new(),
                error: Some(e.into()),
            },
        };
        match serde_json::to_string(&dump) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match &result {
            Ok(nodes) => {
                for line in rendered(nodes) {
                    println!("{}", line);
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    if result.is_err() {
        std::process::exit(1);
    }
}

fn rendered(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .map(Node::to_sexp)
        .filter(|s| !s.is_empty())
        .collect()
}
