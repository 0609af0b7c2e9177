//! burrow-core: Shared library for the burrow tunnel relay.
//!
//! Provides the tunnel error taxonomy, destination parsing/validation,
//! and the shared-secret store used by the access guard.

pub mod destination;
pub mod error;
pub mod protocol;
pub mod secret;

// Re-export commonly used items at crate root.
pub use destination::{Destination, TunnelRequest};
pub use error::{TunnelError, TunnelResult};
pub use secret::SecretStore;
