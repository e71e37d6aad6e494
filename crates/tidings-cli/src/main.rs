//! Tidings CLI
//!
//! Command-line client for a push-notification server. Follows the live
//! stream (reconnecting on its own), lists history and deletes messages.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tidings_core::{FeedConfig, Result, Session, SessionProvider, StreamTarget};
use tracing_subscriber::EnvFilter;

mod manage;
mod watch;

/// Tidings - push notifications in your terminal
#[derive(Parser, Debug)]
#[command(name = "tidings")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server base address
    #[arg(
        short,
        long,
        env = "TIDINGS_SERVER",
        default_value = "http://localhost:8080",
        global = true
    )]
    server: String,

    /// Client token
    #[arg(short, long, env = "TIDINGS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Follow a single topic instead of every message
    #[arg(long, global = true)]
    topic: Option<String>,

    /// Config file (defaults to <config dir>/tidings/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Print history, then every new message as it arrives
    Watch {
        /// History page size
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Print live messages only
    Tail,
    /// Print one page of history
    List {
        /// Page size (1-500)
        #[arg(short, long)]
        limit: Option<u32>,
        /// Only messages with a greater id
        #[arg(long)]
        since: Option<i64>,
    },
    /// Delete one message
    Delete {
        /// Message id
        id: i64,
    },
    /// Delete every message
    DeleteAll,
}

#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl Args {
    fn target(&self) -> StreamTarget {
        match &self.topic {
            Some(name) => StreamTarget::Topic(name.clone()),
            None => StreamTarget::User,
        }
    }

    fn json_output(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

/// Load the config file and apply a page size given on the command line
fn load_config(path: Option<&Path>, limit: Option<u32>) -> Result<FeedConfig> {
    let mut config = FeedConfig::load_or_default(path)?;
    if let Some(limit) = limit {
        config.history.page_limit = limit;
        config.validate()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries messages only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let limit = match &args.command {
        Command::Watch { limit } | Command::List { limit, .. } => *limit,
        _ => None,
    };
    let config = match load_config(args.config.as_deref(), limit) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let provider = SessionProvider::new(Session::new(args.server.clone(), args.token.clone()));
    let target = args.target();
    let json_output = args.json_output();

    let result = match args.command {
        Command::Watch { .. } => watch::run_watch(&config, &provider, target, json_output).await,
        Command::Tail => watch::run_tail(&config, &provider, target, json_output).await,
        Command::List { since, .. } => {
            manage::list(&config, &provider, target, since, json_output).await
        }
        Command::Delete { id } => manage::delete(&provider, target, id).await,
        Command::DeleteAll => manage::delete_all(&provider, target).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
