//! Client configuration: TOML file + CLI overrides.

use crate::socks5::SocksAuth;
use burrow_core::{TunnelError, TunnelResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[client]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    /// Relay WebSocket url, e.g. `ws://relay.example.net:4480/`.
    #[serde(default)]
    pub relay: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            relay: String::new(),
            listen: default_listen(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    /// Shared secret presented to the relay.
    #[serde(default)]
    pub secret: String,
    /// Username required from local SOCKS clients. Empty disables
    /// SOCKS auth.
    #[serde(default)]
    pub socks_user: String,
    #[serde(default)]
    pub socks_password: String,
}

fn default_listen() -> String {
    "127.0.0.1:4514".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}

impl ConfigFile {
    pub fn read(path: &Path) -> TunnelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str::<ConfigFile>(&content)
            .map_err(|e| TunnelError::Config(format!("config parse error: {e}")))
    }
}

/// CLI/env values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub listen: Option<SocketAddr>,
    pub relay: Option<String>,
    pub secret: Option<String>,
    pub socks_user: Option<String>,
    pub socks_password: Option<String>,
    pub connect_timeout: Option<u64>,
}

/// Resolved client configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay: String,
    pub listen: SocketAddr,
    pub connect_timeout: Duration,
    pub secret: String,
    pub socks_auth: Option<SocksAuth>,
}

impl ClientConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// Fails when no relay url is configured anywhere; every other
    /// field has a usable default.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> TunnelResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                ConfigFile::read(&expanded)?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let relay = overrides.relay.unwrap_or(file_config.client.relay);
        if relay.is_empty() {
            return Err(TunnelError::Config("no relay url configured".into()));
        }

        let listen = match overrides.listen {
            Some(addr) => addr,
            None => file_config.client.listen.parse().map_err(|e| {
                TunnelError::Config(format!(
                    "invalid listen address {:?}: {e}",
                    file_config.client.listen
                ))
            })?,
        };
        let connect_timeout_secs = overrides
            .connect_timeout
            .unwrap_or(file_config.client.connect_timeout_secs);

        let socks_user = overrides.socks_user.unwrap_or(file_config.auth.socks_user);
        let socks_password = overrides
            .socks_password
            .unwrap_or(file_config.auth.socks_password);
        let socks_auth = if socks_user.is_empty() {
            None
        } else {
            Some(SocksAuth {
                username: socks_user,
                password: socks_password,
            })
        };

        Ok(Self {
            relay,
            listen,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            secret: overrides.secret.unwrap_or(file_config.auth.secret),
            socks_auth,
        })
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s.as_ref())
}
