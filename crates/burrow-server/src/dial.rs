//! Outbound TCP dialing with a bounded connect phase.

use burrow_core::{Destination, TunnelError, TunnelResult};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Open a TCP connection to the validated destination.
///
/// The connect phase is bounded by `timeout`; an unbounded dial would
/// let abusive requests pin tasks indefinitely. Refused connections,
/// DNS failures, and timeouts all surface as
/// [`TunnelError::DialFailed`] with the underlying cause.
pub async fn dial(dest: &Destination, timeout: Duration) -> TunnelResult<TcpStream> {
    let addr = dest.addr();
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| {
            TunnelError::DialFailed(format!(
                "connect to {addr} timed out after {}s",
                timeout.as_secs()
            ))
        })?
        .map_err(|e| TunnelError::DialFailed(format!("connect to {addr} failed: {e}")))?;

    stream.set_nodelay(true)?;
    debug!(dest = %dest, "upstream connected");
    Ok(stream)
}
