use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use gatekeeper_core::paths::status_socket_path;
use gatekeeper_core::status::{
    query_status, spawn_status_server, ServiceState, StatusRequest, StatusResponse,
};
use gatekeeper_core::{LoadOutcome, SecureConfigStore, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod admin;
mod service_state;

use crate::service_state::ServiceStatusTracker;

#[derive(Parser, Debug)]
#[command(author, version, about = "Gatekeeper configuration service", long_about = None)]
struct Cli {
    /// JSON store configuration; defaults to the per-machine data directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the background service and answer status queries
    Run,
    /// Manage the domain allow-list
    Domains {
        #[command(subcommand)]
        action: DomainsCommand,
    },
    /// Manage the administrator password
    Password {
        #[command(subcommand)]
        action: PasswordCommand,
    },
    /// Query a running service over the status channel
    Status {
        /// Send PING instead of STATUS
        #[arg(long)]
        ping: bool,
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum DomainsCommand {
    Add { domain: String },
    Remove { domain: String },
    List,
    /// Exit non-zero unless the domain is allowed
    Check { domain: String },
}

#[derive(Subcommand, Debug)]
enum PasswordCommand {
    Set,
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run => run_command(cli.config).await,
        Commands::Domains { action } => {
            let store = open_store(cli.config)?;
            match action {
                DomainsCommand::Add { domain } => admin::add_domain(&store, &domain),
                DomainsCommand::Remove { domain } => admin::remove_domain(&store, &domain),
                DomainsCommand::List => {
                    admin::list_domains(&store);
                    Ok(())
                }
                DomainsCommand::Check { domain } => {
                    if store.is_domain_allowed(&domain) {
                        println!("allowed");
                        Ok(())
                    } else {
                        Err(anyhow!("{} is not allowed", domain.trim()))
                    }
                }
            }
        }
        Commands::Password { action } => {
            let store = open_store(cli.config)?;
            match action {
                PasswordCommand::Set => admin::set_password(&store),
                PasswordCommand::Verify => {
                    if admin::verify_password(&store)? {
                        println!("password accepted");
                        Ok(())
                    } else {
                        Err(anyhow!("password rejected"))
                    }
                }
            }
        }
        Commands::Status { ping, socket } => status_command(ping, socket).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::load_file(&path),
        None => StoreConfig::from_env(),
    }
}

fn open_store(config: Option<PathBuf>) -> Result<SecureConfigStore> {
    let config = load_config(config)?;
    let store = SecureConfigStore::from_config(&config);
    report_load(store.initial_load());
    Ok(store)
}

fn report_load(outcome: &LoadOutcome) {
    match outcome {
        LoadOutcome::Verified => info!("configuration verified"),
        LoadOutcome::SecureDefaults { diagnostic, .. } => {
            warn!("running with secure defaults (deny all, no administrator): {diagnostic}")
        }
    }
}

async fn run_command(config: Option<PathBuf>) -> Result<()> {
    let tracker = Arc::new(ServiceStatusTracker::new());
    let store = Arc::new(open_store(config)?);
    info!(
        path = %store.path().display(),
        scope = %store.scope(),
        domains = store.get_whitelist().count(),
        "configuration store ready"
    );

    let socket_path = status_socket_path()?;
    let status_task = spawn_status_server(&socket_path, tracker.clone())?;
    tracker.set(ServiceState::Running);
    info!(socket = %socket_path.display(), "service started");

    wait_for_shutdown(&store).await?;

    tracker.set(ServiceState::StopPending);
    info!("service stopping");
    status_task.abort();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Wait for Ctrl-C; on unix, SIGHUP reloads the configuration from disk.
#[cfg(unix)]
async fn wait_for_shutdown(store: &Arc<SecureConfigStore>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return Ok(result?),
            _ = hangup.recv() => {
                let store = store.clone();
                let outcome = tokio::task::spawn_blocking(move || store.reload()).await?;
                report_load(&outcome);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_store: &Arc<SecureConfigStore>) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn status_command(ping: bool, socket: Option<PathBuf>) -> Result<()> {
    let socket = match socket {
        Some(socket) => socket,
        None => status_socket_path()?,
    };
    let request = if ping {
        StatusRequest::Ping
    } else {
        StatusRequest::Status
    };
    let response = query_status(&socket, request).await?;
    println!("{response}");
    match response {
        StatusResponse::Error(message) => Err(anyhow!(message)),
        _ => Ok(()),
    }
}
