use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fn_context_index::cli::{parse_command, print_help, print_version, wants_help, wants_version, Command};
use fn_context_index::config::Config;
use fn_context_index::handlers::{
    handle_context, handle_debug, handle_index, handle_search, handle_stats, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = std::env::args().collect::<Vec<_>>();
    if wants_help(&args) {
        print_help();
        return Ok(());
    }
    if wants_version(&args) {
        print_version();
        return Ok(());
    }

    let command = parse_command(&args)?;

    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fn-context-index");

    if let Err(err) = run(command).await {
        error!(error = %format!("{err:#}"), "Command failed");
        return Err(err);
    }
    Ok(())
}

async fn run(command: Command) -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        backend = ?config.embeddings_backend,
        model = %config.embeddings_model,
        dim = config.embedding_dim,
        store = %config.store_path.display(),
        "Loaded configuration"
    );

    let state = AppState::open(config)?;
    let outcome = dispatch(&state, command).await;

    // The cache flush runs even when the command failed.
    let shutdown = state.shutdown().await;
    outcome?;
    shutdown
}

async fn dispatch(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Index { paths } => print_json(&handle_index(state, &paths).await?),
        Command::Search { query, limit } => {
            print_json(&handle_search(state, &query, limit).await?)
        }
        Command::Context { query, limit } => {
            let value = handle_context(state, &query, limit).await?;
            match value.get("context").and_then(Value::as_str) {
                Some(text) => {
                    println!("{text}");
                    Ok(())
                }
                None => print_json(&value),
            }
        }
        Command::Debug { function_name } => {
            print!("{}", handle_debug(state, &function_name).await?);
            Ok(())
        }
        Command::Stats => print_json(&handle_stats(state).await?),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render output")?
    );
    Ok(())
}
