//! CLI argument parsing and help text

use anyhow::{anyhow, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Index { paths: Vec<PathBuf> },
    Search { query: String, limit: Option<usize> },
    Context { query: String, limit: Option<usize> },
    Debug { function_name: String },
    Stats,
}

/// Only the position before the subcommand is checked; later words belong
/// to the subcommand (a query may contain "help").
pub fn wants_help(args: &[String]) -> bool {
    match args.get(1) {
        None => true,
        Some(a) => a == "-h" || a == "--help" || a == "help",
    }
}

pub fn wants_version(args: &[String]) -> bool {
    args.get(1)
        .is_some_and(|a| a == "-V" || a == "--version" || a == "version")
}

/// Parse `args` (program name first) into a command.
pub fn parse_command(args: &[String]) -> Result<Command> {
    let Some(name) = args.get(1) else {
        return Err(anyhow!("Missing command; see --help"));
    };
    let rest = &args[2..];

    match name.as_str() {
        "index" => {
            if rest.is_empty() {
                return Err(anyhow!("index needs at least one file or directory"));
            }
            Ok(Command::Index {
                paths: rest.iter().map(PathBuf::from).collect(),
            })
        }
        "search" => {
            let (query, limit) = parse_query_args(rest)?;
            Ok(Command::Search { query, limit })
        }
        "context" => {
            let (query, limit) = parse_query_args(rest)?;
            Ok(Command::Context { query, limit })
        }
        "debug" => match rest {
            [function_name] => Ok(Command::Debug {
                function_name: function_name.clone(),
            }),
            _ => Err(anyhow!("debug takes exactly one function name")),
        },
        "stats" => Ok(Command::Stats),
        other => Err(anyhow!("Unknown command: {other}")),
    }
}

/// Query words joined by spaces, plus an optional `--limit N`.
fn parse_query_args(args: &[String]) -> Result<(String, Option<usize>)> {
    let mut words = Vec::new();
    let mut limit = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--limit" || arg == "-n" {
            let raw = iter
                .next()
                .ok_or_else(|| anyhow!("{arg} needs a value"))?;
            let value = raw
                .parse::<usize>()
                .map_err(|err| anyhow!("Invalid limit '{raw}': {err}"))?;
            limit = Some(value);
        } else {
            words.push(arg.as_str());
        }
    }
    if words.is_empty() {
        return Err(anyhow!("Missing query text"));
    }
    Ok((words.join(" "), limit))
}

pub fn print_help() {
    println!("fn-context-index");
    println!();
    println!("Index C functions with embeddings and retrieve similar ones as context.");
    println!();
    println!("Usage:");
    println!("  fn-context-index index <file|dir>...");
    println!("  fn-context-index search <query> [--limit N]");
    println!("  fn-context-index context <query> [--limit N]");
    println!("  fn-context-index debug <function-name>");
    println!("  fn-context-index stats");
    println!("  fn-context-index --help");
    println!("  fn-context-index --version");
    println!();
    println!("Common env (defaults shown, a .env file is read if present):");
    println!("  BASE_DIR=.                                  (relative paths resolve under it)");
    println!("  CACHE_PATH=./.fnctx/embedding-cache.json");
    println!("  STORE_PATH=./.fnctx/functions.json");
    println!("  EMBEDDINGS_BACKEND=openai|hash              (default: openai if OPENAI_API_KEY is set)");
    println!("  OPENAI_API_KEY=sk-...");
    println!("  EMBEDDINGS_MODEL=text-embedding-3-small");
    println!("  EMBEDDINGS_DIM=1536                         (hash backend: HASH_EMBEDDING_DIM=64)");
    println!("  EMBEDDING_BATCH_SIZE=10");
    println!("  BATCH_WINDOW_MS=100  BATCH_BACKOFF_MS=1000  PROVIDER_MAX_RETRIES=3");
    println!("  CACHE_TTL_SECS=604800  CACHE_FLUSH_EVERY=50");
    println!("  SEARCH_LIMIT=5  MAX_CONTEXT_BYTES=200000");
    println!("  RUST_LOG=info                               (logs go to stderr)");
}

pub fn print_version() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}
