//! burrow-server: authenticated WebSocket → TCP tunnel relay.
//!
//! Accepts WebSocket connections carrying `Token`/`Hostname`/`Port`
//! headers, validates the shared secret, dials the requested TCP
//! destination, and relays bytes both ways until either side closes.
//! Plain HTTP requests get a static placeholder page.

mod config;
mod dial;
mod handshake;
mod relay;
mod server;

use burrow_core::SecretStore;
use clap::Parser;
use config::ServerConfig;
use server::RelayServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// burrow-server — WebSocket to TCP tunnel relay
#[derive(Parser, Debug)]
#[command(name = "burrow-server", version, about = "WebSocket to TCP tunnel relay")]
struct Cli {
    /// Listen address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Shared secret required from tunnel clients
    #[arg(long, env = "BURROW_SECRET")]
    secret: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.burrow/config.toml")]
    config: String,

    /// Outbound TCP connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting burrow-server");

    let config_path = PathBuf::from(&cli.config);
    let (server_config, file_secret) =
        match ServerConfig::load(Some(&config_path), cli.bind, cli.connect_timeout) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        };

    // CLI/env secret takes precedence over the config file.
    let secret = cli.secret.unwrap_or(file_secret);
    let secrets = Arc::new(SecretStore::new(&secret));
    if !secrets.is_configured() {
        warn!("no shared secret configured — all tunnel requests will be denied");
    }

    #[cfg(unix)]
    spawn_reload_task(config_path, secrets.clone());

    let relay_server = RelayServer::new(server_config, secrets);

    tokio::select! {
        result = relay_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("burrow-server stopped");
}

/// Re-read the config file on SIGHUP so the shared secret can be
/// rotated without a restart. Empty secrets are ignored; the most
/// recently supplied non-empty value stays enforced.
#[cfg(unix)]
fn spawn_reload_task(config_path: PathBuf, secrets: Arc<SecretStore>) {
    tokio::spawn(async move {
        let mut hangup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGHUP handler, secret reload disabled");
                    return;
                }
            };

        while hangup.recv().await.is_some() {
            let expanded = config::expand_tilde(&config_path);
            match config::ConfigFile::read(&expanded) {
                Ok(file) => {
                    if secrets.update(&file.auth.secret) {
                        info!("shared secret updated from config file");
                    } else {
                        warn!("reload ignored: config file has no secret");
                    }
                }
                Err(e) => warn!(error = %e, "secret reload failed"),
            }
        }
    });
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
