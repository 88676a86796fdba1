//! Error types for the relay.

use std::net::SocketAddr;

/// Errors surfaced by the listener and session setup.
///
/// Per-chunk I/O failures inside a pump never become a `ProxyError`; they end
/// that pump direction and are reported through its
/// [`PumpReport`](crate::proxy::PumpReport).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to resolve listen address {0}")]
    Resolve(String),
    #[error("Failed to connect to upstream {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out connecting to upstream {host}:{port}")]
    ConnectTimeout { host: String, port: u16 },
    #[error("Relay stopped while connecting to upstream {host}:{port}")]
    DialCancelled { host: String, port: u16 },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{name} must be within [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("Default listen port overflows: upstream port {0} + 1000 > 65535")]
    ListenPortOverflow(u16),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
