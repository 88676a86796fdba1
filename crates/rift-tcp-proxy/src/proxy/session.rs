//! Session lifecycle: dial upstream, run both pumps, release both sockets.

use super::pump::{pump, Direction, PumpContext, PumpExit, PumpReport, PumpStats};
use super::registry::{Registry, SessionId};
use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::fault::FaultPolicy;
use crate::metrics;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state every session of one listener needs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub upstream: UpstreamConfig,
    pub policy: Arc<FaultPolicy>,
    pub running: Arc<AtomicBool>,
    pub registry: Arc<Registry>,
    /// Listener-wide stop signal; aborts dials still in flight.
    pub shutdown: CancellationToken,
}

/// Result of a completed session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub label: Arc<str>,
    pub client_to_upstream: PumpReport,
    pub upstream_to_client: PumpReport,
}

/// Connect to the configured upstream, bounded by its connect timeout.
pub async fn dial_upstream(upstream: &UpstreamConfig) -> Result<TcpStream, ProxyError> {
    let connect = TcpStream::connect((upstream.host.as_str(), upstream.port));
    match tokio::time::timeout(upstream.connect_timeout(), connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProxyError::Connect {
            host: upstream.host.clone(),
            port: upstream.port,
            source,
        }),
        Err(_) => Err(ProxyError::ConnectTimeout {
            host: upstream.host.clone(),
            port: upstream.port,
        }),
    }
}

/// Relay one accepted client through a fresh upstream connection.
///
/// On dial failure, or when the relay stops before the dial completes, the
/// client socket is closed and the session is never registered. Otherwise both pumps are spawned before either is awaited, and
/// the call returns only after both directions have finished. Each socket half
/// is owned by exactly one pump, so both sockets close exactly once when the
/// pumps return; the registry guard unregisters the session on every exit path.
pub async fn open_session(
    client: TcpStream,
    client_addr: SocketAddr,
    ctx: &SessionContext,
) -> Result<SessionSummary, ProxyError> {
    let dialed = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => Err(ProxyError::DialCancelled {
            host: ctx.upstream.host.clone(),
            port: ctx.upstream.port,
        }),
        result = dial_upstream(&ctx.upstream) => result,
    };
    let upstream = match dialed {
        Ok(stream) => stream,
        Err(e) => {
            metrics::record_session("dial_failed");
            warn!("Closing client {}: {}", client_addr, e);
            drop(client);
            return Err(e);
        }
    };
    metrics::record_session("opened");

    for stream in [&client, &upstream] {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", client_addr, e);
        }
    }

    let label: Arc<str> = Arc::from(format!(
        "{} <-> {}",
        client_addr,
        ctx.upstream.authority()
    ));
    let guard = ctx.registry.register(client_addr, Arc::clone(&label));
    let id = guard.id();
    let started = Instant::now();
    info!("Session {} opened: {}", id, label);

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let pump_ctx = |direction| PumpContext {
        direction,
        label: Arc::clone(&label),
        policy: Arc::clone(&ctx.policy),
        running: Arc::clone(&ctx.running),
        cancel: guard.cancel_token().clone(),
    };

    let forward = tokio::spawn(pump(
        client_read,
        upstream_write,
        pump_ctx(Direction::ClientToUpstream),
    ));
    let backward = tokio::spawn(pump(
        upstream_read,
        client_write,
        pump_ctx(Direction::UpstreamToClient),
    ));

    let (forward, backward) = tokio::join!(
        join_pump(forward, Direction::ClientToUpstream),
        join_pump(backward, Direction::UpstreamToClient),
    );
    drop(guard);

    info!(
        "Session {} closed after {:?}: {} [{}; {}]",
        id,
        started.elapsed(),
        label,
        summarize(&forward),
        summarize(&backward)
    );

    Ok(SessionSummary {
        id,
        label,
        client_to_upstream: forward,
        upstream_to_client: backward,
    })
}

async fn join_pump(handle: JoinHandle<PumpReport>, direction: Direction) -> PumpReport {
    match handle.await {
        Ok(report) => report,
        Err(e) => {
            warn!("Pump {} task failed: {}", direction, e);
            PumpReport {
                direction,
                exit: PumpExit::Aborted,
                stats: PumpStats::default(),
            }
        }
    }
}

fn summarize(report: &PumpReport) -> String {
    let s = &report.stats;
    format!(
        "{}: {}, {} fwd / {} dropped / {} corrupted / {} stalls",
        report.direction,
        report.exit,
        s.chunks_forwarded,
        s.chunks_dropped,
        s.chunks_corrupted,
        s.stalls
    )
}
