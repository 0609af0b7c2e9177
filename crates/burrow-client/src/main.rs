//! burrow-client: local SOCKS5 proxy backed by a burrow relay.
//!
//! Listens for SOCKS5 CONNECT requests, opens a WebSocket tunnel to
//! the relay with the destination in `Hostname`/`Port` headers and the
//! shared secret in `Token`, and relays bytes both ways until either
//! side closes.

mod client;
mod config;
mod socks5;
mod tunnel;

use clap::Parser;
use client::SocksProxy;
use config::{ClientConfig, Overrides};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// burrow-client — SOCKS5 proxy over a burrow relay
#[derive(Parser, Debug)]
#[command(name = "burrow-client", version, about = "SOCKS5 proxy over a burrow relay")]
struct Cli {
    /// SOCKS5 listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Relay WebSocket url, e.g. ws://relay.example.net:4480/
    #[arg(short, long)]
    relay: Option<String>,

    /// Shared secret presented to the relay
    #[arg(long, env = "BURROW_SECRET")]
    secret: Option<String>,

    /// Username required from local SOCKS clients
    #[arg(long)]
    socks_user: Option<String>,

    /// Password required from local SOCKS clients
    #[arg(long)]
    socks_password: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.burrow/client.toml")]
    config: String,

    /// Relay connect timeout in seconds
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

    info!(version = env!("CARGO_PKG_VERSION"), "starting burrow-client");

    let config_path = PathBuf::from(&cli.config);
    let overrides = Overrides {
        listen: cli.listen,
        relay: cli.relay,
        secret: cli.secret,
        socks_user: cli.socks_user,
        socks_password: cli.socks_password,
        connect_timeout: cli.connect_timeout,
    };
    let client_config = match ClientConfig::load(Some(&config_path), overrides) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if client_config.secret.is_empty() {
        warn!("no shared secret configured — the relay will deny every tunnel");
    }

    let proxy = SocksProxy::new(client_config);

    tokio::select! {
        result = proxy.run() => {
            if let Err(e) = result {
                error!(error = %e, "client error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("burrow-client stopped");
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
