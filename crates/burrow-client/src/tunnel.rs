//! The relay leg: dial the relay over WebSocket and pump bytes
//! between it and the local TCP stream.

use burrow_core::protocol::{HOSTNAME_HEADER, PORT_HEADER, TOKEN_HEADER};
use burrow_core::{Destination, TunnelError, TunnelResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Read buffer size for the local → relay direction.
const READ_BUF_SIZE: usize = 16 * 1024;

/// Open a tunnel to `dest` through the relay at `relay_url`.
///
/// The upgrade request carries the credential and destination in the
/// `Token`/`Hostname`/`Port` headers. The relay's pre-upgrade denials
/// come back as plain HTTP statuses and are mapped onto
/// [`TunnelError::Unauthorized`] (401) and
/// [`TunnelError::InvalidDestination`] (400).
pub async fn open_tunnel(
    relay_url: &str,
    secret: &str,
    dest: &Destination,
    timeout: Duration,
) -> TunnelResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let mut req = relay_url
        .into_client_request()
        .map_err(|e| TunnelError::Config(format!("invalid relay url {relay_url:?}: {e}")))?;

    let headers = req.headers_mut();
    headers.insert(
        TOKEN_HEADER,
        secret
            .parse()
            .map_err(|_| TunnelError::Config("secret is not a valid header value".into()))?,
    );
    headers.insert(
        HOSTNAME_HEADER,
        dest.hostname.parse().map_err(|_| {
            TunnelError::InvalidDestination("hostname is not a valid header value".into())
        })?,
    );
    headers.insert(
        PORT_HEADER,
        dest.port
            .to_string()
            .parse()
            .expect("decimal port is always a valid header value"),
    );

    let (ws, _response) = tokio::time::timeout(timeout, connect_async(req))
        .await
        .map_err(|_| {
            TunnelError::DialFailed(format!(
                "relay connect timed out after {}s",
                timeout.as_secs()
            ))
        })?
        .map_err(map_connect_error)?;

    debug!(relay = %relay_url, dest = %dest, "relay connected");
    Ok(ws)
}

fn map_connect_error(e: WsError) -> TunnelError {
    match e {
        WsError::Http(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
            TunnelError::Unauthorized
        }
        WsError::Http(resp) if resp.status() == StatusCode::BAD_REQUEST => {
            TunnelError::InvalidDestination("relay rejected the destination".into())
        }
        WsError::Http(resp) => {
            TunnelError::Handshake(format!("relay answered {}", resp.status()))
        }
        e => TunnelError::DialFailed(format!("relay connect failed: {e}")),
    }
}

/// Relay bytes both ways until either side finishes.
///
/// Local reads become one Binary message per chunk; relay payloads are
/// written verbatim. A Close from the relay half-closes the local
/// write side; local EOF sends a Close. The first direction to finish
/// (cleanly or not) aborts the other.
pub async fn bridge<S, T>(ws: WebSocketStream<S>, local: T) -> TunnelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (ws_tx, ws_rx) = ws.split();
    let (local_rd, local_wr) = tokio::io::split(local);

    let mut to_relay = tokio::spawn(pump_to_relay(local_rd, ws_tx));
    let mut from_relay = tokio::spawn(pump_from_relay(ws_rx, local_wr));

    tokio::select! {
        first = &mut to_relay => {
            from_relay.abort();
            flatten(first)
        }
        first = &mut from_relay => {
            to_relay.abort();
            flatten(first)
        }
    }
}

fn flatten(joined: Result<TunnelResult<()>, JoinError>) -> TunnelResult<()> {
    joined.map_err(|e| TunnelError::Relay(format!("relay task failed: {e}")))?
}

async fn pump_to_relay<S, T>(
    mut local_rd: ReadHalf<T>,
    mut ws_tx: SplitSink<WebSocketStream<S>, Message>,
) -> TunnelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = local_rd.read(&mut buf).await?;
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

async fn pump_from_relay<S, T>(
    mut ws_rx: SplitStream<WebSocketStream<S>>,
    mut local_wr: WriteHalf<T>,
) -> TunnelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite,
{
    while let Some(frame) = ws_rx.next().await {
        let msg =
            frame.map_err(|e| TunnelError::Relay(format!("websocket receive failed: {e}")))?;
        match msg {
            Message::Binary(payload) => local_wr.write_all(&payload).await?,
            Message::Text(text) => local_wr.write_all(text.as_bytes()).await?,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
    }
    let _ = local_wr.shutdown().await;
    Ok(())
}
