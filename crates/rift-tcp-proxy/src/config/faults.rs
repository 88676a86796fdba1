//! Fault injection probabilities and timings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FaultConfig {
    /// Probability that a chunk is silently discarded
    #[serde(default = "default_packet_loss")]
    pub packet_loss: f64,
    /// Mean added delay per forwarded chunk
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Probability that 1-3 bytes of a chunk are overwritten
    #[serde(default = "default_corruption")]
    pub corruption: f64,
    /// Probability that a pump stalls for `disconnect_seconds`
    #[serde(default = "default_disconnect")]
    pub disconnect: f64,
    #[serde(default = "default_disconnect_seconds")]
    pub disconnect_seconds: u64,
    /// Fixed RNG seed for reproducible runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_packet_loss() -> f64 {
    0.1
}

fn default_latency_ms() -> u64 {
    100
}

fn default_corruption() -> f64 {
    0.05
}

fn default_disconnect() -> f64 {
    0.01
}

fn default_disconnect_seconds() -> u64 {
    5
}

impl FaultConfig {
    /// A configuration that forwards every byte untouched and without delay.
    pub fn disabled() -> Self {
        Self {
            packet_loss: 0.0,
            latency_ms: 0,
            corruption: 0.0,
            disconnect: 0.0,
            disconnect_seconds: 0,
            seed: None,
        }
    }

    pub fn disconnect_duration(&self) -> Duration {
        Duration::from_secs(self.disconnect_seconds)
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            packet_loss: default_packet_loss(),
            latency_ms: default_latency_ms(),
            corruption: default_corruption(),
            disconnect: default_disconnect(),
            disconnect_seconds: default_disconnect_seconds(),
            seed: None,
        }
    }
}
