//! Keel CLI - inspect and manage sessions, checkpoints and configuration.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config_bridge;
mod theme;

use commands::{checkpoints, config, sessions};

/// Keel - orchestration core for a coding agent
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Workspace root (defaults to the current directory)
    #[arg(short, long, global = true, env = "KEEL_WORKSPACE")]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and move session records
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// List and restore checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List stored sessions, newest first
    List,
    /// Print a session's entries
    Show {
        /// Session ID
        id: String,
        /// Print raw JSON entries instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Write the consolidated JSON document for a session
    Export {
        /// Session ID
        id: String,
    },
    /// Import a consolidated JSON document as a new session
    Import {
        /// Path to the document
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List a session's checkpoints
    List {
        /// Session ID
        session: String,
    },
    /// Roll the workspace back to a checkpoint
    Restore {
        /// Session ID
        session: String,
        /// Checkpoint ID
        checkpoint: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show resolved configuration with source annotations
    Show {
        /// Output format (toml or json)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

/// Everything a command needs about where it runs.
pub(crate) struct CliContext {
    pub(crate) workspace: PathBuf,
    pub(crate) home: keel_core::dirs::KeelHome,
    pub(crate) resolved: keel_config::ResolvedConfig,
}

fn load_context(workspace: Option<PathBuf>) -> Result<CliContext> {
    let workspace = match workspace {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let home = keel_core::dirs::KeelHome::resolve().context("cannot resolve keel home")?;
    let resolved = keel_config::Config::load_with_home(Some(&workspace), &home)
        .context("failed to load configuration")?;
    Ok(CliContext {
        workspace,
        home,
        resolved,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = load_context(cli.workspace)?;

    let mut log_config = config_bridge::to_log_config(&ctx.resolved.config);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = keel_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match cli.command {
        Commands::Session { command } => match command {
            SessionCommands::List => sessions::list_sessions(&ctx).await,
            SessionCommands::Show { id, json } => sessions::show_session(&ctx, &id, json).await,
            SessionCommands::Export { id } => sessions::export_session(&ctx, &id).await,
            SessionCommands::Import { path } => sessions::import_session(&ctx, &path).await,
        },
        Commands::Checkpoint { command } => match command {
            CheckpointCommands::List { session } => {
                checkpoints::list_checkpoints(&ctx, &session).await
            },
            CheckpointCommands::Restore {
                session,
                checkpoint,
            } => checkpoints::restore_checkpoint(&ctx, &session, &checkpoint).await,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { format } => config::show_config(&ctx, &format),
        },
    }
}
