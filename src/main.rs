//! Graphhub CLI.
//!
//! This is the main binary entry point. See the `graphhub` library for the
//! core functionality.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graphhub::client::ClientRole;
use graphhub::hub::daemon;
use graphhub::session::LengthPolicy;
use graphhub::socket::client::HubConnection;
use graphhub::{Config, Hub};
use mimalloc::MiMalloc;

/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "graphhub")]
#[command(version)]
#[command(about = "Session-state hub for multi-window graph visualization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub in the foreground
    Start {
        /// Socket path (overrides config and GRAPHHUB_SOCKET)
        #[arg(long)]
        socket: Option<PathBuf>,
        /// Directory holding the manifest and components
        #[arg(long)]
        asset_root: Option<PathBuf>,
        /// How to treat positional updates of the wrong length
        #[arg(long)]
        length_policy: Option<LengthPolicy>,
        /// Command used to start windows and workers
        #[arg(long)]
        launch_command: Option<String>,
        /// Launch the primary window at startup
        #[arg(long)]
        launch_primary: bool,
    },
    /// Send one request to a running hub
    Request {
        /// Request type, e.g. get-data
        kind: String,
        /// JSON payload
        payload: Option<String>,
        /// Wait for and print a reply of this type
        #[arg(long)]
        wait: Option<String>,
        /// Socket path
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("GRAPHHUB_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            socket,
            asset_root,
            length_policy,
            launch_command,
            launch_primary,
        } => {
            let mut config = Config::load()?;
            if socket.is_some() {
                config.socket_path = socket;
            }
            if let Some(root) = asset_root {
                config.asset_root = root;
            }
            if let Some(policy) = length_policy {
                config.length_policy = policy;
            }
            if launch_command.is_some() {
                config.launch_command = launch_command;
            }
            config.launch_primary |= launch_primary;
            run_hub(&config).await?;
        }
        Commands::Request {
            kind,
            payload,
            wait,
            socket,
        } => {
            let socket = match socket {
                Some(path) => path,
                None => Config::load()?.resolved_socket_path()?,
            };
            let payload = match payload {
                Some(raw) => serde_json::from_str(&raw).context("payload is not valid JSON")?,
                None => serde_json::Value::Null,
            };
            send_request(&socket, &kind, payload, wait.as_deref()).await?;
        }
        Commands::Config { save } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                println!("Saved to {}", Config::config_path()?.display());
            }
        }
    }

    Ok(())
}

async fn run_hub(config: &Config) -> Result<()> {
    let socket_path = config.resolved_socket_path()?;
    daemon::cleanup_stale_files(&socket_path)?;
    daemon::write_pid_file(&socket_path)?;

    log::info!(
        "Starting hub on {} (length policy: {:?})",
        socket_path.display(),
        config.length_policy
    );
    let hub = Hub::from_config(config, &socket_path);
    let result = graphhub::hub::serve(hub, socket_path.clone(), shutdown_signal()).await;

    daemon::cleanup_on_shutdown(&socket_path);
    result
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            log::warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

async fn send_request(
    socket: &std::path::Path,
    kind: &str,
    payload: serde_json::Value,
    wait: Option<&str>,
) -> Result<()> {
    let mut conn = HubConnection::connect(socket).await?;
    conn.hello(ClientRole::Satellite, None).await?;
    conn.request(kind, payload).await?;

    let Some(reply) = wait else {
        return Ok(());
    };
    loop {
        let envelope = conn.recv_timeout(Duration::from_secs(10)).await?;
        if envelope.kind == "error" {
            anyhow::bail!("{kind} failed: {}", envelope.payload["message"]);
        }
        if envelope.kind == reply {
            println!("{}", serde_json::to_string_pretty(&envelope.payload)?);
            return Ok(());
        }
    }
}
