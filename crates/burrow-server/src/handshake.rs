//! Inbound request classification and WebSocket upgrade.
//!
//! Every connection starts as plain TCP. The request head is peeked
//! (not consumed) to decide the request kind: anything without
//! `Upgrade: websocket` gets the static placeholder page; upgrade
//! requests go through the access guard and destination resolver
//! inside the `accept_hdr_async` callback, so a denial is answered
//! with a plain HTTP status before any socket is dialed.

use burrow_core::{Destination, SecretStore, TunnelError, TunnelRequest, TunnelResult};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::debug;

pub use burrow_core::protocol::{HOSTNAME_HEADER, PORT_HEADER, TOKEN_HEADER};

/// Body returned for non-tunnel requests.
pub const PLACEHOLDER_PAGE: &str = "burrow relay\n";

/// Upper bound on the request head we are willing to inspect.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Peek the HTTP request head without consuming it.
///
/// Returns once the terminating blank line is seen or the head exceeds
/// [`MAX_REQUEST_HEAD`]. The caller bounds the wait with the
/// handshake timeout; this loop only re-polls until more bytes arrive.
pub async fn peek_request_head(stream: &TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before request head",
            ));
        }
        if let Some(end) = find_head_end(&buf[..n]) {
            buf.truncate(end);
            return Ok(buf);
        }
        if n == buf.len() {
            // Oversized head: classify on what we have.
            return Ok(buf);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Whether the request head declares tunnel intent
/// (`Upgrade: websocket`, case-insensitive).
pub fn wants_tunnel(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    for line in text.lines().skip(1) {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
            {
                return true;
            }
        }
    }
    false
}

/// Answer a non-tunnel request with the static placeholder page.
pub async fn serve_page(mut stream: TcpStream) -> TunnelResult<()> {
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         content-type: text/html;charset=UTF-8\r\n\
         content-length: {}\r\n\
         connection: close\r\n\r\n{}",
        PLACEHOLDER_PAGE.len(),
        PLACEHOLDER_PAGE
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Run the WebSocket upgrade with auth and destination checks.
///
/// The callback rejects with 401 when the `Token` header does not match
/// the current secret (checked at call time, never cached) and with
/// 400 when `Hostname`/`Port` fail validation. Both rejections happen
/// before any outbound dial. On success the 101 response has been sent
/// and the stream speaks WebSocket.
pub async fn accept_tunnel(
    stream: TcpStream,
    secrets: &SecretStore,
) -> TunnelResult<(WebSocketStream<TcpStream>, TunnelRequest)> {
    let mut request: Option<TunnelRequest> = None;
    let mut rejection: Option<TunnelError> = None;

    let accepted = accept_hdr_async(stream, |req: &Request, response: Response| {
        let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

        let credential = header(TOKEN_HEADER).unwrap_or("");
        if !secrets.verify(credential) {
            rejection = Some(TunnelError::Unauthorized);
            return Err(unauthorized_response());
        }

        match Destination::parse(header(HOSTNAME_HEADER), header(PORT_HEADER)) {
            Ok(destination) => {
                debug!(dest = %destination, "tunnel request validated");
                request = Some(TunnelRequest {
                    credential: credential.to_string(),
                    destination,
                });
                Ok(response)
            }
            Err(e) => {
                rejection = Some(e);
                Err(bad_request_response())
            }
        }
    })
    .await;

    match accepted {
        Ok(ws) => {
            let request = request.ok_or_else(|| {
                TunnelError::Handshake("upgrade accepted without a tunnel request".into())
            })?;
            Ok((ws, request))
        }
        Err(e) => Err(rejection
            .take()
            .unwrap_or_else(|| TunnelError::Handshake(format!("websocket handshake failed: {e}")))),
    }
}

fn unauthorized_response() -> ErrorResponse {
    tokio_tungstenite::tungstenite::http::Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .body(None)
        .expect("failed to build static unauthorized response")
}

fn bad_request_response() -> ErrorResponse {
    tokio_tungstenite::tungstenite::http::Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(None)
        .expect("failed to build static bad-request response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_upgrade_header() {
        let head = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n";
        assert!(wants_tunnel(head));
    }

    #[test]
    fn upgrade_header_is_case_insensitive() {
        let head = b"GET / HTTP/1.1\r\nupgrade: WebSocket\r\n\r\n";
        assert!(wants_tunnel(head));
    }

    #[test]
    fn plain_request_is_not_a_tunnel() {
        let head = b"GET / HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n";
        assert!(!wants_tunnel(head));
    }

    #[test]
    fn other_upgrade_values_are_not_tunnels() {
        let head = b"GET / HTTP/1.1\r\nUpgrade: h2c\r\n\r\n";
        assert!(!wants_tunnel(head));
    }

    #[test]
    fn head_end_detection() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost:"), None);
    }
}
