//! Minimal SOCKS5 server side: method negotiation, optional
//! username/password auth (RFC 1929), and the CONNECT request.
//!
//! Only CONNECT is supported; BIND and UDP ASSOCIATE are answered with
//! a command-not-supported reply. The parsed destination is validated
//! with the same rules the relay applies, so a request the relay would
//! reject fails here without a round trip.

use burrow_core::{Destination, TunnelError, TunnelResult};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_UNACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply codes for [`reply`].
pub const REPLY_SUCCESS: u8 = 0x00;
pub const REPLY_NOT_ALLOWED: u8 = 0x02;
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const REPLY_COMMAND_UNSUPPORTED: u8 = 0x07;
pub const REPLY_ATYP_UNSUPPORTED: u8 = 0x08;

/// Credentials required from local SOCKS clients.
#[derive(Debug, Clone)]
pub struct SocksAuth {
    pub username: String,
    pub password: String,
}

/// Run the SOCKS5 handshake up to (not including) the final reply.
///
/// Negotiates the auth method (username/password when `auth` is set,
/// no-auth otherwise), then reads the CONNECT request and returns the
/// validated destination. The caller sends [`REPLY_SUCCESS`] once the
/// tunnel is up, or a failure reply when it is not.
pub async fn accept<S>(stream: &mut S, auth: Option<&SocksAuth>) -> TunnelResult<Destination>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != SOCKS_VERSION {
        return Err(TunnelError::Handshake(format!(
            "unsupported socks version 0x{:02x}",
            greeting[0]
        )));
    }
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;

    let wanted = match auth {
        Some(_) => METHOD_USER_PASS,
        None => METHOD_NO_AUTH,
    };
    if !methods.contains(&wanted) {
        stream
            .write_all(&[SOCKS_VERSION, METHOD_UNACCEPTABLE])
            .await?;
        return Err(TunnelError::Handshake(
            "no acceptable auth method offered".into(),
        ));
    }
    stream.write_all(&[SOCKS_VERSION, wanted]).await?;

    if let Some(auth) = auth {
        verify_userpass(stream, auth).await?;
    }

    read_connect(stream).await
}

/// RFC 1929 username/password subnegotiation.
async fn verify_userpass<S>(stream: &mut S, auth: &SocksAuth) -> TunnelResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != AUTH_VERSION {
        return Err(TunnelError::Handshake(format!(
            "unsupported auth subnegotiation version 0x{:02x}",
            head[0]
        )));
    }
    let mut username = vec![0u8; head[1] as usize];
    stream.read_exact(&mut username).await?;

    let mut plen = [0u8; 1];
    stream.read_exact(&mut plen).await?;
    let mut password = vec![0u8; plen[0] as usize];
    stream.read_exact(&mut password).await?;

    let ok = username == auth.username.as_bytes() && password == auth.password.as_bytes();
    stream
        .write_all(&[AUTH_VERSION, if ok { 0x00 } else { 0x01 }])
        .await?;
    if ok {
        Ok(())
    } else {
        Err(TunnelError::Unauthorized)
    }
}

/// Read the request and turn its address into a [`Destination`].
async fn read_connect<S>(stream: &mut S) -> TunnelResult<Destination>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut req = [0u8; 4];
    stream.read_exact(&mut req).await?;
    if req[0] != SOCKS_VERSION {
        return Err(TunnelError::Handshake(format!(
            "unsupported socks version 0x{:02x}",
            req[0]
        )));
    }
    if req[1] != CMD_CONNECT {
        reply(stream, REPLY_COMMAND_UNSUPPORTED).await?;
        return Err(TunnelError::Handshake(format!(
            "unsupported socks command 0x{:02x}",
            req[1]
        )));
    }

    let hostname = match req[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            String::from_utf8(domain).map_err(|_| {
                TunnelError::InvalidDestination("domain is not valid utf-8".into())
            })?
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        other => {
            reply(stream, REPLY_ATYP_UNSUPPORTED).await?;
            return Err(TunnelError::InvalidDestination(format!(
                "unsupported address type 0x{other:02x}"
            )));
        }
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);

    match Destination::parse(Some(&hostname), Some(&port.to_string())) {
        Ok(dest) => Ok(dest),
        Err(e) => {
            let _ = reply(stream, REPLY_NOT_ALLOWED).await;
            Err(e)
        }
    }
}

/// Send the final reply. The bound address fields are zeroed; no
/// SOCKS client we care about reads them for CONNECT.
pub async fn reply<S>(stream: &mut S, code: u8) -> TunnelResult<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn spawn_accept(
        mut server: DuplexStream,
        auth: Option<SocksAuth>,
    ) -> tokio::task::JoinHandle<TunnelResult<Destination>> {
        tokio::spawn(async move { accept(&mut server, auth.as_ref()).await })
    }

    async fn greet_no_auth(client: &mut DuplexStream) {
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn connect_with_ipv4_destination() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, None);

        greet_no_auth(&mut client).await;
        let mut req = vec![0x05, 0x01, 0x00, 0x01, 10, 0, 0, 7];
        req.extend_from_slice(&8080u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let dest = task.await.unwrap().unwrap();
        assert_eq!(dest.hostname, "10.0.0.7");
        assert_eq!(dest.port, 8080);
    }

    #[tokio::test]
    async fn connect_with_domain_destination() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, None);

        greet_no_auth(&mut client).await;
        let mut req = vec![0x05, 0x01, 0x00, 0x03, 11];
        req.extend_from_slice(b"example.com");
        req.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let dest = task.await.unwrap().unwrap();
        assert_eq!(dest.hostname, "example.com");
        assert_eq!(dest.port, 443);
    }

    #[tokio::test]
    async fn connect_with_ipv6_destination() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, None);

        greet_no_auth(&mut client).await;
        let mut req = vec![0x05, 0x01, 0x00, 0x04];
        req.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        req.extend_from_slice(&22u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let dest = task.await.unwrap().unwrap();
        assert_eq!(dest.hostname, "::1");
        assert_eq!(dest.port, 22);
    }

    #[tokio::test]
    async fn bind_command_is_rejected() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, None);

        greet_no_auth(&mut client).await;
        // BIND (0x02) instead of CONNECT.
        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_COMMAND_UNSUPPORTED);
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn port_zero_is_rejected() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, None);

        greet_no_auth(&mut client).await;
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_NOT_ALLOWED);
        match task.await.unwrap() {
            Err(TunnelError::InvalidDestination(_)) => {}
            other => panic!("expected InvalidDestination, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_version_fails() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, None);

        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();
        match task.await.unwrap() {
            Err(TunnelError::Handshake(_)) => {}
            other => panic!("expected Handshake error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn userpass_accepted_with_matching_credentials() {
        let auth = SocksAuth {
            username: "user".into(),
            password: "pass".into(),
        };
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, Some(auth));

        client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x05, 0x02]);

        client
            .write_all(&[0x01, 4, b'u', b's', b'e', b'r', 4, b'p', b'a', b's', b's'])
            .await
            .unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x01, 0x00]);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let dest = task.await.unwrap().unwrap();
        assert_eq!(dest.addr(), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn userpass_rejected_with_wrong_password() {
        let auth = SocksAuth {
            username: "user".into(),
            password: "pass".into(),
        };
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, Some(auth));

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x05, 0x02]);

        client
            .write_all(&[0x01, 4, b'u', b's', b'e', b'r', 3, b'b', b'a', b'd'])
            .await
            .unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x01, 0x01]);
        match task.await.unwrap() {
            Err(TunnelError::Unauthorized) => {}
            other => panic!("expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_required_but_not_offered() {
        let auth = SocksAuth {
            username: "user".into(),
            password: "pass".into(),
        };
        let (mut client, server) = tokio::io::duplex(1024);
        let task = spawn_accept(server, Some(auth));

        // Client only offers no-auth.
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x05, METHOD_UNACCEPTABLE]);
        assert!(task.await.unwrap().is_err());
    }
}
