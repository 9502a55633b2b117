//! TLS channel configuration.
//!
//! One explicitly owned factory per process or per connection pool; every
//! TLS socket creation funnels through [`SecureChannelFactory::connect`].
//! Trust-all is the default - a documented convenience/MITM tradeoff for
//! servers running self-signed certificates - and can be switched off in the
//! connection config.

use native_tls::Protocol;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

use crate::error::Result;

/// A TLS protocol version the factory can pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "tls1.0")]
    Tls10,
    #[serde(rename = "tls1.1")]
    Tls11,
    #[serde(rename = "tls1.2")]
    Tls12,
}

impl TlsVersion {
    fn to_protocol(self) -> Protocol {
        match self {
            TlsVersion::Tls10 => Protocol::Tlsv10,
            TlsVersion::Tls11 => Protocol::Tlsv11,
            TlsVersion::Tls12 => Protocol::Tlsv12,
        }
    }
}

fn default_trust_all() -> bool {
    true
}

fn default_protocol() -> TlsVersion {
    TlsVersion::Tls12
}

/// Declarative TLS settings, supplied once per connection (pool) via the
/// configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Minimum protocol version when no allow-list is given.
    #[serde(default = "default_protocol")]
    pub protocol: TlsVersion,
    /// Accept any certificate. Default true.
    #[serde(default = "default_trust_all")]
    pub trust_all: bool,
    /// Explicit allow-list of enabled versions; overrides `protocol`.
    #[serde(default)]
    pub enabled_versions: Option<Vec<TlsVersion>>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            trust_all: default_trust_all(),
            enabled_versions: None,
        }
    }
}

impl TlsSettings {
    /// The (min, max) protocol bounds these settings pin.
    fn version_bounds(&self) -> (TlsVersion, Option<TlsVersion>) {
        match &self.enabled_versions {
            Some(list) if !list.is_empty() => {
                let min = *list.iter().min().unwrap();
                let max = *list.iter().max().unwrap();
                (min, Some(max))
            }
            _ => (self.protocol, None),
        }
    }
}

/// Built once from [`TlsSettings`] and reused for every socket.
pub struct SecureChannelFactory {
    settings: TlsSettings,
    connector: tokio_native_tls::TlsConnector,
}

impl std::fmt::Debug for SecureChannelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannelFactory")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SecureChannelFactory {
    pub fn new(settings: TlsSettings) -> Result<Self> {
        let (min, max) = settings.version_bounds();

        let mut builder = native_tls::TlsConnector::builder();
        builder.min_protocol_version(Some(min.to_protocol()));
        builder.max_protocol_version(max.map(TlsVersion::to_protocol));
        if settings.trust_all {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        let connector = builder.build()?;

        Ok(Self {
            settings,
            connector: tokio_native_tls::TlsConnector::from(connector),
        })
    }

    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }

    /// Wrap an established TCP stream. The single configuration step every
    /// secure socket passes through.
    pub async fn connect(&self, domain: &str, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
        let stream = self.connector.connect(domain, tcp).await?;
        Ok(stream)
    }
}
