//! Destination parsing — turns the raw `Hostname`/`Port` header values
//! into a validated connect target, or fails before anything is dialed.

use crate::error::{TunnelError, TunnelResult};
use std::fmt;

/// A validated tunnel destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Hostname or IP address, as supplied by the client.
    pub hostname: String,
    /// TCP port, 1–65535.
    pub port: u16,
}

impl Destination {
    /// Validate raw hostname and port strings.
    ///
    /// The hostname must be present and non-empty after trimming; the
    /// port must parse as a decimal integer in 1–65535.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::InvalidDestination`] on missing or
    /// malformed input. Callers must treat this as terminal for the
    /// connection — no dial is ever attempted for an invalid target.
    pub fn parse(hostname: Option<&str>, port: Option<&str>) -> TunnelResult<Self> {
        let hostname = hostname
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TunnelError::InvalidDestination("missing hostname".into()))?;

        let raw_port = port
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| TunnelError::InvalidDestination("missing port".into()))?;

        let port: u16 = raw_port.parse().map_err(|_| {
            TunnelError::InvalidDestination(format!("port is not a valid integer: {raw_port:?}"))
        })?;
        if port == 0 {
            return Err(TunnelError::InvalidDestination(
                "port must be in 1-65535".into(),
            ));
        }

        Ok(Self {
            hostname: hostname.to_string(),
            port,
        })
    }

    /// The `host:port` form accepted by `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// The handshake result of one inbound tunnel connection.
///
/// Built once from the request headers, immutable afterwards.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    /// The credential the client presented in the `Token` header.
    pub credential: String,
    /// Where the client wants to go.
    pub destination: Destination,
}
