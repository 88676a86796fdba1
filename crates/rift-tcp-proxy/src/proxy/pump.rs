//! One direction of a relayed session: read, inject faults, write.

use crate::fault::{Corruption, FaultPolicy};
use crate::metrics;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest chunk read from the source in one go.
pub const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client->upstream",
            Direction::UpstreamToClient => "upstream->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pump loop ended. None of these are fatal to the session's other direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// Source reached end of stream
    Eof,
    /// Proxy-wide running flag was cleared
    Stopped,
    /// Session was force-closed by the listener
    Cancelled,
    ReadError(io::ErrorKind),
    WriteError(io::ErrorKind),
    /// The pump task panicked or was aborted before reporting
    Aborted,
}

impl PumpExit {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            PumpExit::ReadError(_) | PumpExit::WriteError(_) | PumpExit::Aborted
        )
    }
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpExit::Eof => f.write_str("peer closed"),
            PumpExit::Stopped => f.write_str("proxy stopped"),
            PumpExit::Cancelled => f.write_str("session force-closed"),
            PumpExit::ReadError(kind) => write!(f, "read error: {kind}"),
            PumpExit::WriteError(kind) => write!(f, "write error: {kind}"),
            PumpExit::Aborted => f.write_str("pump task aborted"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub chunks_read: u64,
    pub chunks_forwarded: u64,
    pub chunks_dropped: u64,
    pub chunks_corrupted: u64,
    pub stalls: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub direction: Direction,
    pub exit: PumpExit,
    pub stats: PumpStats,
}

/// Everything a pump needs besides its two endpoints.
#[derive(Debug, Clone)]
pub struct PumpContext {
    pub direction: Direction,
    pub label: Arc<str>,
    pub policy: Arc<FaultPolicy>,
    pub running: Arc<AtomicBool>,
    pub cancel: CancellationToken,
}

/// Relay `source` into `dest` until EOF, an I/O error, the running flag
/// clearing, or session cancellation.
///
/// Chunks are forwarded in the order they are read. On EOF the write side of
/// `dest` is shut down so the far peer sees the half-close while the opposite
/// direction keeps flowing.
pub async fn pump<R, W>(mut source: R, mut dest: W, ctx: PumpContext) -> PumpReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let direction = ctx.direction;
    let label = &ctx.label;
    let mut stats = PumpStats::default();
    let mut buf = vec![0u8; CHUNK_SIZE];

    let exit = loop {
        if !ctx.running.load(Ordering::Acquire) {
            break PumpExit::Stopped;
        }

        let n = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break PumpExit::Cancelled,
            result = source.read(&mut buf) => match result {
                Ok(0) => break PumpExit::Eof,
                Ok(n) => n,
                Err(e) => break PumpExit::ReadError(e.kind()),
            },
        };

        if !ctx.running.load(Ordering::Acquire) {
            break PumpExit::Stopped;
        }

        stats.chunks_read += 1;
        stats.bytes_read += n as u64;

        if ctx.policy.should_drop() {
            warn!("Dropping chunk on {} ({}): {} bytes", label, direction, n);
            stats.chunks_dropped += 1;
            metrics::record_fault("drop", direction);
            continue;
        }

        let delay = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break PumpExit::Cancelled,
            delay = ctx.policy.apply_latency() => delay,
        };
        metrics::record_latency(direction, delay);

        let stalled = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break PumpExit::Cancelled,
            stalled = ctx.policy.maybe_disconnect() => stalled,
        };
        if stalled {
            // Stream was paused, not closed.
            warn!(
                "Simulated disconnect on {} ({}) for {}s; stream restored",
                label,
                direction,
                ctx.policy.config().disconnect_seconds
            );
            stats.stalls += 1;
            metrics::record_fault("stall", direction);
        }

        let chunk = &mut buf[..n];
        if let Corruption::Rewrote { positions } = ctx.policy.maybe_corrupt(chunk) {
            warn!(
                "Corrupted chunk on {} ({}): {} of {} bytes rewritten",
                label, direction, positions, n
            );
            stats.chunks_corrupted += 1;
            metrics::record_fault("corrupt", direction);
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break PumpExit::Cancelled,
            result = dest.write_all(chunk) => {
                if let Err(e) = result {
                    break PumpExit::WriteError(e.kind());
                }
            }
        }

        debug!("Forwarding {} ({}): {} bytes", label, direction, n);
        stats.chunks_forwarded += 1;
        stats.bytes_written += n as u64;
        metrics::record_forwarded(direction, n);
    };

    if exit == PumpExit::Eof {
        // Propagate the half-close; the peer may already be gone.
        if let Err(e) = dest.shutdown().await {
            debug!("Half-close on {} ({}) failed: {}", label, direction, e);
        }
    }

    if exit.is_error() {
        warn!(
            "Pump {} ({}) ended: {} after {} bytes in, {} bytes out",
            label, direction, exit, stats.bytes_read, stats.bytes_written
        );
    } else {
        info!(
            "Pump {} ({}) ended: {} after {} bytes in, {} bytes out",
            label, direction, exit, stats.bytes_read, stats.bytes_written
        );
    }

    PumpReport {
        direction,
        exit,
        stats,
    }
}
