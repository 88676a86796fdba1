// Library exports for the relay binary and integration tests

pub mod config;
pub mod error;
pub mod fault;
pub mod metrics;
pub mod proxy;
pub mod unreliable;

pub use config::ProxyConfig;
pub use error::{ConfigError, ProxyError};
pub use fault::FaultPolicy;
pub use proxy::{ProxyHandle, ProxyServer};
