//! Bidirectional relay between an accepted WebSocket and an upstream
//! byte stream.
//!
//! Each session runs two pump tasks: inbound (WebSocket messages →
//! upstream writes, verbatim and in arrival order) and outbound
//! (upstream read chunks → one Binary message per chunk). The first
//! pump to finish or fail moves the session to `Closing` and aborts
//! the other; teardown happens exactly once per session. The upstream
//! endpoint is generic so tests can drive the engine with in-memory
//! duplex streams instead of real sockets.

use burrow_core::{TunnelError, TunnelResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Read buffer size for the upstream → WebSocket direction.
const READ_BUF_SIZE: usize = 16 * 1024;

/// Lifecycle of one tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, pumps not yet running.
    Connecting,
    /// Both directions active.
    Relaying,
    /// One direction finished or failed; tearing the other down.
    Closing,
    /// Both endpoints released. Terminal, reached exactly once.
    Closed,
}

/// One active relay owning exactly one WebSocket and one upstream
/// stream for its lifetime.
pub struct TunnelSession<S, T> {
    ws: Option<WebSocketStream<S>>,
    upstream: Option<T>,
    state: SessionState,
}

impl<S, T> TunnelSession<S, T>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Build a session from an accepted WebSocket and a dialed
    /// upstream stream.
    pub fn new(ws: WebSocketStream<S>, upstream: T) -> Self {
        Self {
            ws: Some(ws),
            upstream: Some(upstream),
            state: SessionState::Connecting,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state change");
        self.state = next;
    }

    /// Relay until both directions are done, then release both
    /// endpoints.
    ///
    /// Returns `Ok(())` on a clean close from either side (WebSocket
    /// Close frame or upstream EOF) and [`TunnelError::Relay`] /
    /// [`TunnelError::Io`] when the first-failing direction aborted
    /// the session.
    pub async fn run(&mut self) -> TunnelResult<()> {
        let ws = self
            .ws
            .take()
            .ok_or_else(|| TunnelError::Relay("session already ran".into()))?;
        let upstream = self
            .upstream
            .take()
            .ok_or_else(|| TunnelError::Relay("session already ran".into()))?;

        let (ws_tx, ws_rx) = ws.split();
        let (upstream_rd, upstream_wr) = tokio::io::split(upstream);

        self.transition(SessionState::Relaying);
        let mut inbound = tokio::spawn(pump_inbound(ws_rx, upstream_wr));
        let mut outbound = tokio::spawn(pump_outbound(upstream_rd, ws_tx));

        // First direction to finish (cleanly or not) tears down the other.
        let result = tokio::select! {
            first = &mut inbound => {
                self.transition(SessionState::Closing);
                outbound.abort();
                flatten(first)
            }
            first = &mut outbound => {
                self.transition(SessionState::Closing);
                inbound.abort();
                flatten(first)
            }
        };

        self.transition(SessionState::Closed);
        result
    }
}

fn flatten(joined: Result<TunnelResult<()>, JoinError>) -> TunnelResult<()> {
    joined.map_err(|e| TunnelError::Relay(format!("relay task failed: {e}")))?
}

/// WebSocket → upstream. Message payloads are written verbatim, no
/// re-framing. A clean Close half-closes the upstream write side and
/// leaves the read side to the outbound pump.
async fn pump_inbound<S, T>(
    mut ws_rx: SplitStream<WebSocketStream<S>>,
    mut upstream_wr: WriteHalf<T>,
) -> TunnelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite,
{
    while let Some(frame) = ws_rx.next().await {
        let msg =
            frame.map_err(|e| TunnelError::Relay(format!("websocket receive failed: {e}")))?;
        match msg {
            Message::Binary(payload) => upstream_wr.write_all(&payload).await?,
            Message::Text(text) => upstream_wr.write_all(text.as_bytes()).await?,
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; neither is payload.
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
    }
    // Signal end-of-output to the peer. Already-closed endpoints are a
    // no-op here, keeping teardown idempotent.
    let _ = upstream_wr.shutdown().await;
    Ok(())
}

/// Upstream → WebSocket. Each read chunk becomes one Binary message,
/// preserving chunk boundaries. EOF finishes the direction cleanly
/// with a Close frame.
async fn pump_outbound<S, T>(
    mut upstream_rd: ReadHalf<T>,
    mut ws_tx: SplitSink<WebSocketStream<S>, Message>,
) -> TunnelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = upstream_rd.read(&mut buf).await?;
        if n == 0 {
            let _ = ws_tx.send(Message::Close(None)).await;
            break;
        }
        ws_tx
            .send(Message::Binary(buf[..n].to_vec().into()))
            .await
            .map_err(|e| TunnelError::Relay(format!("websocket send failed: {e}")))?;
    }
    Ok(())
}
