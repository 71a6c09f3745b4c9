//! quiesce CLI - stream debounced workspace change events

use anyhow::Result;
use clap::{Parser, Subcommand};
use quiesce_core::KeyPolicyKind;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod cmd;
mod system_config;

/// quiesce - Debounced workspace change events as JSON lines
#[derive(Parser)]
#[command(name = "quiesce")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and print coalesced events to stdout
    Watch {
        /// Directory to watch (default: current directory)
        root: Option<PathBuf>,

        /// Quiet period before an event is emitted, in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Longest a busy path is held back, in milliseconds
        #[arg(long)]
        max_wait_ms: Option<u64>,

        /// Which changes collapse together: subject | subject-and-kind
        #[arg(long)]
        key_policy: Option<KeyPolicyKind>,
    },
    /// View and edit configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all configuration values
    List,

    /// Print one value
    Get {
        /// Key, e.g. coalescer.debounce_ms
        key: String,
    },

    /// Set and save one value
    Set {
        /// Key, e.g. coalescer.debounce_ms
        key: String,
        /// New value (lists are comma separated)
        value: String,
    },

    /// Show the config file location
    Path {
        /// Write a default config file if none exists
        #[arg(long)]
        create: bool,
    },

    /// Print an annotated example configuration
    Example,
}

/// Log to stderr; stdout carries the event stream
fn init_tracing(default_filter: &str) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            root,
            debounce_ms,
            max_wait_ms,
            key_policy,
        } => {
            let config = system_config::load()?;
            let _guard = init_tracing(&config.log.filter);
            let options = cmd::watch::WatchOptions {
                root,
                debounce_ms,
                max_wait_ms,
                key_policy,
            };
            cmd::watch::run(config, options).await
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::List => cmd::config::run_list().await,
            ConfigCommands::Get { key } => cmd::config::run_get(&key).await,
            ConfigCommands::Set { key, value } => cmd::config::run_set(&key, &value).await,
            ConfigCommands::Path { create } => cmd::config::run_path(create).await,
            ConfigCommands::Example => cmd::config::run_example().await,
        },
    }
}
