//! Local SOCKS5 front end.
//!
//! Order per connection: SOCKS5 handshake (auth + CONNECT parse) →
//! open the tunnel through the relay → SOCKS reply → bridge bytes
//! until either side closes. Failures terminate only their own
//! connection; relay denials are translated into SOCKS failure
//! replies so local clients see a clean refusal instead of a dropped
//! socket.

use crate::config::ClientConfig;
use crate::socks5;
use crate::tunnel;
use burrow_core::{TunnelError, TunnelResult};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// The SOCKS proxy instance.
pub struct SocksProxy {
    config: ClientConfig,
}

impl SocksProxy {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Bind the configured address and serve until the task is
    /// dropped or accept fails.
    pub async fn run(&self) -> TunnelResult<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        info!(addr = %self.config.listen, relay = %self.config.relay, "socks listener started");
        self.serve(listener).await
    }

    /// Accept loop over a pre-bound listener (separate from [`run`]
    /// so tests can bind an ephemeral port).
    ///
    /// [`run`]: SocksProxy::run
    pub async fn serve(&self, listener: TcpListener) -> TunnelResult<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let config = self.config.clone();
            tokio::spawn(async move {
                match handle_connection(stream, peer, config).await {
                    Ok(()) => debug!(peer = %peer, "connection finished"),
                    Err(TunnelError::Unauthorized) => {
                        info!(peer = %peer, "connection denied: bad credential")
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "connection closed with error"),
                }
            });
        }
    }
}

/// Run one local connection through the full decision flow.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: ClientConfig,
) -> TunnelResult<()> {
    stream.set_nodelay(true)?;

    let dest = socks5::accept(&mut stream, config.socks_auth.as_ref()).await?;
    debug!(peer = %peer, dest = %dest, "socks connect request");

    let ws = match tunnel::open_tunnel(
        &config.relay,
        &config.secret,
        &dest,
        config.connect_timeout,
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            let code = match &e {
                TunnelError::Unauthorized => socks5::REPLY_NOT_ALLOWED,
                _ => socks5::REPLY_HOST_UNREACHABLE,
            };
            let _ = socks5::reply(&mut stream, code).await;
            return Err(e);
        }
    };

    socks5::reply(&mut stream, socks5::REPLY_SUCCESS).await?;
    info!(peer = %peer, dest = %dest, "tunnel established");
    tunnel::bridge(ws, stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::protocol::{HOSTNAME_HEADER, PORT_HEADER, TOKEN_HEADER};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
    use tokio_tungstenite::tungstenite::http;

    /// A relay that checks the token, dials the requested destination,
    /// and bridges the two — enough behavior for an end-to-end run.
    async fn start_relay(secret: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut dest_addr = None;
                    let accepted = tokio_tungstenite::accept_hdr_async(
                        stream,
                        |req: &Request, resp: Response| {
                            let header = |name: &str| {
                                req.headers()
                                    .get(name)
                                    .and_then(|v| v.to_str().ok())
                                    .unwrap_or("")
                                    .to_string()
                            };
                            if header(TOKEN_HEADER) != secret {
                                return Err(http::Response::builder()
                                    .status(http::StatusCode::UNAUTHORIZED)
                                    .body(None)
                                    .unwrap());
                            }
                            dest_addr =
                                Some(format!("{}:{}", header(HOSTNAME_HEADER), header(PORT_HEADER)));
                            Ok(resp)
                        },
                    )
                    .await;
                    let Ok(ws) = accepted else { return };
                    let upstream = TcpStream::connect(dest_addr.unwrap()).await.unwrap();
                    let _ = tunnel::bridge(ws, upstream).await;
                });
            }
        });
        addr
    }

    async fn start_proxy(relay: SocketAddr, secret: &str) -> SocketAddr {
        let config = ClientConfig {
            relay: format!("ws://{relay}/"),
            listen: "127.0.0.1:0".parse().unwrap(),
            connect_timeout: Duration::from_secs(2),
            secret: secret.to_string(),
            socks_auth: None,
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let proxy = SocksProxy::new(config);
        tokio::spawn(async move {
            let _ = proxy.serve(listener).await;
        });
        addr
    }

    /// SOCKS5 greeting + CONNECT to 127.0.0.1:port; returns the reply
    /// code.
    async fn socks_connect(stream: &mut TcpStream, port: u16) -> u8 {
        stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x05, 0x00]);

        let mut req = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        req.extend_from_slice(&port.to_be_bytes());
        stream.write_all(&req).await.unwrap();

        let mut reply = [0u8; 10];
        stream.read_exact(&mut reply).await.unwrap();
        reply[1]
    }

    #[tokio::test]
    async fn socks_connect_reaches_destination_through_relay() {
        let relay = start_relay("s3cret").await;
        let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest_port = dest.local_addr().unwrap().port();

        let peer = tokio::spawn(async move {
            let (mut sock, _) = dest.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"PING");
            sock.write_all(b"PONG").await.unwrap();
        });

        let addr = start_proxy(relay, "s3cret").await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(socks_connect(&mut stream, dest_port).await, 0x00);

        stream.write_all(b"PING").await.unwrap();
        let mut pong = [0u8; 4];
        stream.read_exact(&mut pong).await.unwrap();
        assert_eq!(&pong, b"PONG");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn relay_denial_maps_to_socks_failure() {
        let relay = start_relay("s3cret").await;
        let addr = start_proxy(relay, "wrong").await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(
            socks_connect(&mut stream, 80).await,
            socks5::REPLY_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn unreachable_relay_maps_to_socks_failure() {
        // Bind then drop to get a port with nothing listening.
        let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = gone.local_addr().unwrap();
        drop(gone);

        let addr = start_proxy(relay, "s3cret").await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(
            socks_connect(&mut stream, 80).await,
            socks5::REPLY_HOST_UNREACHABLE
        );
    }
}
