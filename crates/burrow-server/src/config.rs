//! Server configuration: TOML file + CLI overrides.

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
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            connect_timeout_secs: default_connect_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    /// Shared secret required from tunnel clients. Empty means
    /// unconfigured, which denies all tunnel requests.
    #[serde(default)]
    pub secret: String,
}

fn default_bind() -> String {
    "0.0.0.0:4480".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_handshake_timeout() -> u64 {
    10
}

impl ConfigFile {
    /// Read and parse a config file. Also used by the SIGHUP reload
    /// task to pick up secret changes at runtime.
    pub fn read(path: &Path) -> TunnelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str::<ConfigFile>(&content)
            .map_err(|e| TunnelError::Config(format!("config parse error: {e}")))
    }
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// Returns the resolved config plus the file-supplied secret; the
    /// caller decides precedence against the CLI/env secret.
    pub fn load(
        config_path: Option<&Path>,
        cli_bind: Option<SocketAddr>,
        cli_connect_timeout: Option<u64>,
    ) -> TunnelResult<(Self, String)> {
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

        let bind = match cli_bind {
            Some(addr) => addr,
            None => file_config.server.bind.parse().map_err(|e| {
                TunnelError::Config(format!(
                    "invalid bind address {:?}: {e}",
                    file_config.server.bind
                ))
            })?,
        };
        let connect_timeout_secs =
            cli_connect_timeout.unwrap_or(file_config.server.connect_timeout_secs);

        Ok((
            Self {
                bind,
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                handshake_timeout: Duration::from_secs(file_config.server.handshake_timeout_secs),
            },
            file_config.auth.secret,
        ))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let (config, secret) = ServerConfig::load(None, None, None).unwrap();
        assert_eq!(config.bind, "0.0.0.0:4480".parse().unwrap());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(secret.is_empty());
    }

    #[test]
    fn cli_overrides_win() {
        let bind: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let (config, _) = ServerConfig::load(None, Some(bind), Some(3)).unwrap();
        assert_eq!(config.bind, bind);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn parses_sections() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            bind = "127.0.0.1:1234"
            connect_timeout_secs = 5

            [auth]
            secret = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(file.server.bind, "127.0.0.1:1234");
        assert_eq!(file.server.connect_timeout_secs, 5);
        assert_eq!(file.server.handshake_timeout_secs, 10);
        assert_eq!(file.auth.secret, "s3cret");
    }
}
