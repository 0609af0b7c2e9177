use thiserror::Error;

/// Errors produced by the tunnel relay.
///
/// Every failure is local to one connection; nothing here is retried
/// automatically and nothing crosses session boundaries.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TunnelResult<T> = Result<T, TunnelError>;
