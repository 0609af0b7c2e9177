//! Core server: accepts connections and runs the per-connection
//! decision flow.
//!
//! Order per connection: classify the request (plain HTTP gets the
//! placeholder page, no auth check, no dial) → access guard →
//! destination resolver → dial → relay session. Failures terminate
//! only their own connection.

use crate::config::ServerConfig;
use crate::dial;
use crate::handshake;
use crate::relay::TunnelSession;
use burrow_core::{SecretStore, TunnelError, TunnelResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, info, warn};

/// The relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    secrets: Arc<SecretStore>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, secrets: Arc<SecretStore>) -> Self {
        Self { config, secrets }
    }

    /// Bind the configured address and serve until the task is
    /// dropped or accept fails.
    pub async fn run(&self) -> TunnelResult<()> {
        let listener = TcpListener::bind(self.config.bind).await?;
        info!(addr = %self.config.bind, "relay listener started");
        self.serve(listener).await
    }

    /// Accept loop over a pre-bound listener (separate from [`run`]
    /// so tests can bind an ephemeral port).
    ///
    /// [`run`]: RelayServer::run
    pub async fn serve(&self, listener: TcpListener) -> TunnelResult<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let secrets = self.secrets.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                match handle_connection(stream, peer, secrets, config).await {
                    Ok(()) => debug!(peer = %peer, "connection finished"),
                    Err(TunnelError::Unauthorized) => {
                        info!(peer = %peer, "tunnel request denied: bad credential")
                    }
                    Err(TunnelError::InvalidDestination(reason)) => {
                        info!(peer = %peer, reason = %reason, "tunnel request rejected")
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "connection closed with error"),
                }
            });
        }
    }
}

/// Run one inbound connection through the full decision flow.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    secrets: Arc<SecretStore>,
    config: ServerConfig,
) -> TunnelResult<()> {
    stream.set_nodelay(true)?;

    let head = timeout(config.handshake_timeout, handshake::peek_request_head(&stream))
        .await
        .map_err(|_| TunnelError::Handshake("timed out waiting for request head".into()))??;

    // (a) No tunnel intent: static content, nothing else.
    if !handshake::wants_tunnel(&head) {
        debug!(peer = %peer, "serving placeholder page");
        return handshake::serve_page(stream).await;
    }

    // (b) access guard + (c) destination resolver, answered pre-upgrade.
    let (mut ws, request) = timeout(
        config.handshake_timeout,
        handshake::accept_tunnel(stream, &secrets),
    )
    .await
    .map_err(|_| TunnelError::Handshake("websocket upgrade timed out".into()))??;

    // (d) dial. The upgrade is already accepted, so a failure here can
    // only be reported by closing the inbound channel.
    let upstream = match dial::dial(&request.destination, config.connect_timeout).await {
        Ok(upstream) => upstream,
        Err(e) => {
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Error,
                    reason: "upstream dial failed".into(),
                }))
                .await;
            return Err(e);
        }
    };

    // (e) relay until both directions finish.
    info!(peer = %peer, dest = %request.destination, "tunnel established");
    let mut session = TunnelSession::new(ws, upstream);
    session.run().await
}
