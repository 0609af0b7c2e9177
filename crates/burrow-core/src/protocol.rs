//! Header names shared by the relay server and the client.
//!
//! A tunnel request is an HTTP upgrade carrying the credential and the
//! destination in these headers; both binaries must agree on the names.

/// Header carrying the shared-secret credential.
pub const TOKEN_HEADER: &str = "Token";
/// Header carrying the destination hostname.
pub const HOSTNAME_HEADER: &str = "Hostname";
/// Header carrying the destination port (decimal).
pub const PORT_HEADER: &str = "Port";
