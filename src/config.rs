// ABOUTME: Listener configuration covering protocol variant, bind address, TLS material and shutdown policy
// ABOUTME: Parses variant names and aliases, and loads TOML config files behind the config-file feature
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::BridgeError;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default listen host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default time `close` waits for in-flight calls (5 seconds)
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;

/// Supported transport variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVariant {
    /// HTTP/1.1 over plain TCP (`http`)
    Plaintext,
    /// HTTP/1.1 over TLS (`https`)
    Tls,
    /// HTTP/2 over TLS, negotiated with ALPN `h2` (`http2`)
    SecureMultiplexed,
    /// HTTP/2 with prior knowledge over plain TCP (`http2_insecure`)
    InsecureMultiplexed,
}

/// All supported variants, in declaration order
pub const ALL_PROTOCOLS: &[ProtocolVariant] = &[
    ProtocolVariant::Plaintext,
    ProtocolVariant::Tls,
    ProtocolVariant::SecureMultiplexed,
    ProtocolVariant::InsecureMultiplexed,
];

impl ProtocolVariant {
    /// Canonical variant name used in config
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "http",
            Self::Tls => "https",
            Self::SecureMultiplexed => "http2",
            Self::InsecureMultiplexed => "http2_insecure",
        }
    }

    /// Whether the variant terminates TLS and therefore needs certificate material
    #[must_use]
    pub const fn requires_certificate(&self) -> bool {
        matches!(self, Self::Tls | Self::SecureMultiplexed)
    }

    /// Whether the variant speaks HTTP/2
    #[must_use]
    pub const fn is_multiplexed(&self) -> bool {
        matches!(self, Self::SecureMultiplexed | Self::InsecureMultiplexed)
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVariant {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" | "plaintext" => Ok(Self::Plaintext),
            "https" | "tls" => Ok(Self::Tls),
            "http2" | "secure_multiplexed" => Ok(Self::SecureMultiplexed),
            "http2_insecure" | "h2c" | "insecure_multiplexed" => Ok(Self::InsecureMultiplexed),
            _ => Err(BridgeError::invalid_protocol(s)),
        }
    }
}

/// Comma-separated list of valid protocol names for error messages
pub fn valid_protocol_names() -> String {
    ALL_PROTOCOLS
        .iter()
        .map(ProtocolVariant::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// PEM-encoded certificate chain and private key for TLS variants
#[derive(Clone, PartialEq, Eq)]
pub enum CertificateMaterial {
    /// PEM bytes held in memory
    Pem {
        /// Certificate chain, leaf first
        cert_chain: Vec<u8>,
        /// PKCS#8, PKCS#1 or SEC1 private key
        private_key: Vec<u8>,
    },
    /// PEM files read when the listener is constructed
    Files {
        /// Certificate chain file
        cert_path: PathBuf,
        /// Private key file
        key_path: PathBuf,
    },
}

impl CertificateMaterial {
    /// Material from in-memory PEM text
    pub fn from_pem(cert_chain: impl Into<Vec<u8>>, private_key: impl Into<Vec<u8>>) -> Self {
        Self::Pem {
            cert_chain: cert_chain.into(),
            private_key: private_key.into(),
        }
    }

    /// Material read from PEM files at listen time
    pub fn from_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self::Files {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem { cert_chain, .. } => f
                .debug_struct("Pem")
                .field("cert_chain_bytes", &cert_chain.len())
                .field("private_key", &"<redacted>")
                .finish(),
            Self::Files {
                cert_path,
                key_path,
            } => f
                .debug_struct("Files")
                .field("cert_path", cert_path)
                .field("key_path", key_path)
                .finish(),
        }
    }
}

/// What `close` does with connections that are still serving calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Stop accepting, let in-flight calls finish, abort whatever remains after `timeout`
    Drain {
        /// Upper bound on the wait
        timeout: Duration,
    },
    /// Stop accepting and abort in-flight calls immediately
    Abandon,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self::Drain {
            timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

/// Callback invoked once the listener has started and once it has stopped
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Configuration for one listener
///
/// The protocol is kept as the name it was configured with and parsed by
/// [`ListenerLifecycle::listen`](crate::server::ListenerLifecycle::listen),
/// which rejects unknown names before touching the network.
#[derive(Clone)]
pub struct ServerConfig {
    /// Protocol variant name (`http`, `https`, `http2`, `http2_insecure`)
    pub protocol: String,
    /// Host or IP to bind
    pub host: String,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Certificate material, required by TLS variants
    pub certificate: Option<CertificateMaterial>,
    /// Optional start/stop callback
    pub callback: Option<CompletionCallback>,
    /// Behaviour of `close` towards in-flight calls
    pub shutdown: ShutdownPolicy,
}

impl ServerConfig {
    /// Create a configuration from a raw protocol name
    pub fn new(protocol: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: DEFAULT_HOST.to_owned(),
            port,
            certificate: None,
            callback: None,
            shutdown: ShutdownPolicy::default(),
        }
    }

    /// Plain HTTP/1.1
    pub fn plaintext(port: u16) -> Self {
        Self::new(ProtocolVariant::Plaintext.as_str(), port)
    }

    /// HTTP/1.1 over TLS
    pub fn tls(port: u16, certificate: CertificateMaterial) -> Self {
        Self::new(ProtocolVariant::Tls.as_str(), port).with_certificate(certificate)
    }

    /// HTTP/2 over TLS
    pub fn secure_multiplexed(port: u16, certificate: CertificateMaterial) -> Self {
        Self::new(ProtocolVariant::SecureMultiplexed.as_str(), port).with_certificate(certificate)
    }

    /// HTTP/2 with prior knowledge
    pub fn insecure_multiplexed(port: u16) -> Self {
        Self::new(ProtocolVariant::InsecureMultiplexed.as_str(), port)
    }

    /// Set the bind host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the certificate material
    #[must_use]
    pub fn with_certificate(mut self, certificate: CertificateMaterial) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Set the start/stop callback
    #[must_use]
    pub fn with_callback(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Set the shutdown policy
    #[must_use]
    pub const fn with_shutdown_policy(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Parse the configured protocol name
    pub fn protocol_variant(&self) -> Result<ProtocolVariant, BridgeError> {
        self.protocol.parse()
    }

    /// `host:port` bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn notify(&self) {
        if let Some(callback) = &self.callback {
            callback();
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::plaintext(DEFAULT_PORT)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("certificate", &self.certificate)
            .field("callback", &self.callback.is_some())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

// ============================================================================
// Config File
// ============================================================================

/// On-disk representation of [`ServerConfig`]
///
/// ```toml
/// protocol = "http2"
/// host = "0.0.0.0"
/// port = 8443
/// cert_path = "/etc/bufbridge/cert.pem"
/// key_path = "/etc/bufbridge/key.pem"
/// shutdown = "drain"
/// drain_timeout_secs = 10
/// ```
#[cfg(feature = "config-file")]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerConfigFile {
    protocol: String,
    host: Option<String>,
    port: Option<u16>,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    shutdown: Option<String>,
    drain_timeout_secs: Option<u64>,
}

#[cfg(feature = "config-file")]
impl ServerConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self, BridgeError> {
        let file: ServerConfigFile = toml::from_str(input)
            .map_err(|e| BridgeError::config(format!("Invalid server config: {e}")))?;

        let mut config = Self::new(file.protocol, file.port.unwrap_or(DEFAULT_PORT));
        if let Some(host) = file.host {
            config.host = host;
        }

        config.certificate = match (file.cert_path, file.key_path) {
            (Some(cert), Some(key)) => Some(CertificateMaterial::from_files(cert, key)),
            (None, None) => None,
            _ => {
                return Err(BridgeError::config(
                    "cert_path and key_path must be set together",
                ))
            }
        };

        let timeout = Duration::from_secs(
            file.drain_timeout_secs
                .unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS),
        );
        config.shutdown = match file.shutdown.as_deref() {
            None | Some("drain") => ShutdownPolicy::Drain { timeout },
            Some("abandon") => ShutdownPolicy::Abandon,
            Some(other) => {
                return Err(BridgeError::config(format!(
                    "Unknown shutdown policy: {other}. Valid: drain, abandon"
                )))
            }
        };

        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &std::path::Path) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}

/// Default config file location (`<config dir>/bufbridge/server.toml`)
#[cfg(feature = "config-file")]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bufbridge").join("server.toml"))
}
