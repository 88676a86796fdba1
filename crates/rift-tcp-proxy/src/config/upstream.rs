//! Upstream (real server) configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_upstream_port")]
    pub port: u16,
    /// Dial timeout; an upstream that does not answer within it counts as a dial failure
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_upstream_host() -> String {
    "localhost".to_string()
}

fn default_upstream_port() -> u16 {
    8888
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            port: default_upstream_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}
