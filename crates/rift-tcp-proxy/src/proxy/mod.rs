//! TCP relay with per-chunk fault injection.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer (listener, accept loop) and ProxyHandle (stop)
//! - `session` - Upstream dial and the two-pump session lifecycle
//! - `pump` - One direction's read / inject / write loop
//! - `registry` - Live session tracking for forced shutdown
//! - `network` - Listener socket creation (SO_REUSEADDR)

mod network;
mod pump;
mod registry;
mod server;
mod session;

#[cfg(test)]
mod tests;

pub use network::create_reusable_listener;
pub use pump::{pump, Direction, PumpContext, PumpExit, PumpReport, PumpStats, CHUNK_SIZE};
pub use registry::{Registry, SessionGuard, SessionId, SessionInfo};
pub use server::{ProxyHandle, ProxyServer};
pub use session::{dial_upstream, open_session, SessionContext, SessionSummary};
