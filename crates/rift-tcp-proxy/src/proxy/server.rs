//! ProxyServer: owns the listening socket and the session registry.
//!
//! The accept loop hands every connection to its own session task and goes
//! straight back to `accept`. [`ProxyHandle::stop`] clears the running flag,
//! force-closes every registered session and ends the accept loop; `run`
//! then drops the listener and waits for the session tasks to release their
//! sockets before returning.

use super::network::create_reusable_listener;
use super::registry::{Registry, SessionInfo};
use super::session::{open_session, SessionContext};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::fault::FaultPolicy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// The relay's listener.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    listener: TcpListener,
    local_addr: SocketAddr,
    policy: Arc<FaultPolicy>,
    handle: ProxyHandle,
    // Signals `finished` if the server is dropped without `run` completing.
    _finished: DropGuard,
}

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Shared {
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    finished: CancellationToken,
    registry: Arc<Registry>,
    tracker: TaskTracker,
}

/// Cheap, cloneable control handle for a [`ProxyServer`].
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    shared: Arc<Shared>,
}

impl ProxyServer {
    /// Validate `config` and bind the listening socket.
    ///
    /// Bind failures are returned here, before any accept loop exists.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        config.validate()?;
        let port = config.listen_port()?;

        let addr = tokio::net::lookup_host((config.listen.host.as_str(), port))
            .await
            .map_err(|_| ProxyError::Resolve(format!("{}:{}", config.listen.host, port)))?
            .next()
            .ok_or_else(|| ProxyError::Resolve(format!("{}:{}", config.listen.host, port)))?;

        let listener = create_reusable_listener(addr, config.listen.backlog).map_err(|source| {
            error!("Failed to bind {}: {}", addr, source);
            ProxyError::Bind { addr, source }
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let shared = Shared {
            running: Arc::new(AtomicBool::new(true)),
            registry: Arc::new(Registry::new(shutdown.clone())),
            shutdown,
            finished: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        let finished = shared.finished.clone().drop_guard();
        Ok(Self {
            policy: Arc::new(FaultPolicy::new(config.faults.clone())),
            config: Arc::new(config),
            listener,
            local_addr,
            handle: ProxyHandle {
                shared: Arc::new(shared),
            },
            _finished: finished,
        })
    }

    /// Bind and serve until stopped.
    pub async fn start(config: ProxyConfig) -> Result<(), ProxyError> {
        Self::bind(config).await?.run().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ProxyHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Accept connections until [`ProxyHandle::stop`] is called.
    pub async fn run(self) -> Result<(), ProxyError> {
        let faults = &self.config.faults;
        info!("Listening on tcp://{}", self.local_addr);
        info!("Relaying to {}", self.config.upstream.authority());
        info!(
            "Faults: packet loss {}%, latency {}ms, corruption {}%, disconnect {}% for {}s",
            faults.packet_loss * 100.0,
            faults.latency_ms,
            faults.corruption * 100.0,
            faults.disconnect * 100.0,
            faults.disconnect_seconds
        );

        let shared = &self.handle.shared;
        let ctx = SessionContext {
            upstream: self.config.upstream.clone(),
            policy: Arc::clone(&self.policy),
            running: Arc::clone(&shared.running),
            registry: Arc::clone(&shared.registry),
            shutdown: shared.shutdown.clone(),
        };

        while shared.running.load(Ordering::Acquire) {
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => {
                        info!("Connection from {} established", addr);
                        let ctx = ctx.clone();
                        shared.tracker.spawn(async move {
                            if let Err(e) = open_session(stream, addr, &ctx).await {
                                warn!("Session for {} not opened: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        if !shared.running.load(Ordering::Acquire) {
                            break;
                        }
                        error!("Accept error on {}: {}", self.local_addr, e);
                        if !accept_backoff(&shared.shutdown).await {
                            break;
                        }
                    }
                },
            }
        }

        // Close the listening socket before waiting on sessions.
        drop(self.listener);
        shared.tracker.close();
        shared.tracker.wait().await;
        shared.finished.cancel();
        info!("Relay on {} stopped", self.local_addr);
        Ok(())
    }
}

/// Sleep for [`ACCEPT_BACKOFF`] unless shutdown fires first.
/// Returns false when the relay is stopping.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

impl ProxyHandle {
    /// Clear the running flag, force-close every live session and end the
    /// accept loop. Returns false if the relay was already stopped.
    pub fn stop(&self) -> bool {
        let shared = &self.shared;
        if shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let closed = shared.registry.close_all();
        shared.shutdown.cancel();
        info!("Stopping relay; force-closed {} session(s)", closed);
        true
    }

    /// [`stop`](Self::stop), then wait until the accept loop has exited and
    /// every session has released its sockets.
    pub async fn shutdown(&self) {
        self.stop();
        self.shared.finished.cancelled().await;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn active_sessions(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared.registry.list()
    }
}
