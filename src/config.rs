//! Connection configuration.
//!
//! Loaded from a TOML file (explicit path or the platform config directory),
//! with environment-variable overrides for the values that change per shell.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};
use crate::filter::LineEnding;
use crate::protocol::field::{Charset, Environment, ProtocolCaps};
use crate::transport::tls::TlsSettings;

fn default_port() -> u16 {
    1666
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    /// Client workspace name.
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub charset: Charset,
    #[serde(default)]
    pub line_ending: LineEnding,
    /// Negotiate compressed mode after the handshake.
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub ticket: Option<String>,
    /// Present means: connect through TLS with these settings.
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: String::new(),
            client: String::new(),
            charset: Charset::default(),
            line_ending: LineEnding::default(),
            compress: false,
            ticket: None,
            tls: None,
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| WireError::Config(e.to_string()))
    }

    /// Load from an explicit path, or the default location
    /// (`<config dir>/vcwire/config.toml`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path().ok_or_else(|| {
                WireError::Config("cannot determine config directory".to_string())
            })?,
        };
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| WireError::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("vcwire").join("config.toml"))
    }

    /// Environment overrides: `VCWIRE_HOST`, `VCWIRE_USER`, `VCWIRE_TICKET`.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("VCWIRE_HOST") {
            if let Some((h, p)) = host.rsplit_once(':') {
                if let Ok(port) = p.parse() {
                    self.host = h.to_string();
                    self.port = port;
                } else {
                    self.host = host;
                }
            } else {
                self.host = host;
            }
        }
        if let Ok(user) = std::env::var("VCWIRE_USER") {
            self.user = user;
        }
        if let Ok(ticket) = std::env::var("VCWIRE_TICKET") {
            self.ticket = Some(ticket);
        }
    }

    /// The environment metadata sent with every command.
    pub fn environment(&self) -> Environment {
        let mut caps = ProtocolCaps::TAGGED | ProtocolCaps::DUPLEX | ProtocolCaps::RELAY;
        if self.compress {
            caps |= ProtocolCaps::COMPRESS;
        }
        if self.charset == Charset::Utf8 {
            caps |= ProtocolCaps::UNICODE;
        }
        Environment {
            host: std::env::var("HOSTNAME").unwrap_or_default(),
            user: self.user.clone(),
            client: self.client.clone(),
            cwd: std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            caps,
        }
    }
}
