//! Relaychat CLI: entry point.
//!
//! # Commands
//!
//! - `relaychat chat [--name NAME] [--url URL]`: interactive chat
//! - `relaychat send --name NAME [--url URL] MESSAGE`: submit one message
//! - `relaychat status`: show configuration
//! - `relaychat onboard`: write a default config file

mod chat;
mod helpers;
mod onboard;
mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use relaychat_client::{SessionManager, WsTransport};
use relaychat_core::config::{load_config, Config};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Relaychat: real-time chat over a shared broadcast channel
#[derive(Parser)]
#[command(name = "relaychat", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.relaychat/config.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the chat interactively
    Chat {
        /// Display name (default: the last one used)
        #[arg(short, long)]
        name: Option<String>,

        /// Endpoint URL, overrides the config file
        #[arg(long)]
        url: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Submit a single message and exit
    Send {
        /// Display name to send as
        #[arg(short, long)]
        name: String,

        /// Endpoint URL, overrides the config file
        #[arg(long)]
        url: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,

        /// Message body
        message: String,
    },

    /// Show configuration
    Status,

    /// Write a default config file
    Onboard,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(helpers::expand_tilde);
    let config_path = config_path.as_deref();

    match cli.command {
        Commands::Chat { name, url, logs } => {
            init_logging(logs);
            chat::run(config_path, name, url).await
        }
        Commands::Send {
            name,
            url,
            logs,
            message,
        } => {
            init_logging(logs);
            run_send(config_path, &name, url, &message).await
        }
        Commands::Status => status::run(config_path),
        Commands::Onboard => onboard::run(config_path),
    }
}

// ─────────────────────────────────────────────
// Send command
// ─────────────────────────────────────────────

async fn run_send(
    config_path: Option<&Path>,
    name: &str,
    url: Option<String>,
    message: &str,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("display name must not be empty");
    }
    if message.trim().is_empty() {
        bail!("message must not be empty");
    }

    let config = effective_config(config_path, url);
    let manager = build_session_manager(&config);

    manager
        .start()
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint.url))?;
    info!(session_id = ?manager.current_session_id(), "connected, submitting");

    // Always release the channel, even when the submission failed.
    let submitted = manager.submit(name, message).await;
    let stopped = manager.stop().await;

    submitted.context("message was not accepted")?;
    stopped.context("failed to close the channel")?;

    helpers::print_info(&format!("sent as {name}"));
    Ok(())
}

/// Config from disk + env, with the `--url` flag applied last.
pub fn effective_config(config_path: Option<&Path>, url: Option<String>) -> Config {
    let mut config = load_config(config_path);
    if let Some(url) = url {
        config.endpoint.url = url;
    }
    config
}

/// A session manager on top of the WebSocket transport.
pub fn build_session_manager(config: &Config) -> SessionManager {
    SessionManager::new(Arc::new(WsTransport::from_config(config)))
}

/// Initialize tracing/logging. Logs go to stderr, the chat to stdout.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("relaychat=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Resolved path of the config file in use.
pub fn config_file(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(PathBuf::from)
        .unwrap_or_else(relaychat_core::config::get_config_path)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
