//! Listener configuration.

use serde::{Deserialize, Serialize};

/// Smallest accept backlog we allow; bursty connects need at least this much.
pub const MIN_BACKLOG: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    /// Port to accept clients on. Defaults to the upstream port + 1000.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Accept backlog passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backlog() -> u32 {
    128
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: None,
            backlog: default_backlog(),
        }
    }
}
