//! Configuration types for the Rift TCP relay.

mod faults;
mod listen;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use faults::FaultConfig;
pub use listen::{ListenConfig, MIN_BACKLOG};
pub use upstream::UpstreamConfig;

/// Offset applied to the upstream port when no listen port is configured.
pub const LISTEN_PORT_OFFSET: u16 = 1000;

/// Immutable relay configuration, fixed at startup.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub faults: FaultConfig,
}

impl ProxyConfig {
    pub fn new(upstream_host: impl Into<String>, upstream_port: u16) -> Self {
        Self {
            upstream: UpstreamConfig {
                host: upstream_host.into(),
                port: upstream_port,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ProxyConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective listen port: the configured one, or upstream port + 1000.
    pub fn listen_port(&self) -> Result<u16, ConfigError> {
        match self.listen.port {
            Some(port) => Ok(port),
            None => self
                .upstream
                .port
                .checked_add(LISTEN_PORT_OFFSET)
                .ok_or(ConfigError::ListenPortOverflow(self.upstream.port)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.port == 0 {
            return Err(ConfigError::Invalid(
                "upstream.port must be between 1 and 65535".to_string(),
            ));
        }

        let listen_port = self.listen_port()?;
        if listen_port == self.upstream.port && self.listen.host == self.upstream.host {
            return Err(ConfigError::Invalid(format!(
                "listen address {}:{} is the upstream itself",
                self.listen.host, listen_port
            )));
        }

        if self.listen.backlog < MIN_BACKLOG {
            return Err(ConfigError::Invalid(format!(
                "listen.backlog must be at least {MIN_BACKLOG}, got {}",
                self.listen.backlog
            )));
        }

        for (name, value) in [
            ("faults.packet_loss", self.faults.packet_loss),
            ("faults.corruption", self.faults.corruption),
            ("faults.disconnect", self.faults.disconnect),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }

        Ok(())
    }
}
