//! Client-side fault injection: a TCP stream wrapper that degrades its own
//! sends and receives, for exercising an application without the relay.

use crate::fault::{should_inject, FaultPolicy};
use crate::proxy::CHUNK_SIZE;
use rand::Rng;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{info, warn};

/// Fail with probability `probability`, as if the operation's packet was lost.
pub fn simulate_packet_loss(probability: f64, rng: &mut impl Rng) -> io::Result<()> {
    if should_inject(probability, rng) {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "simulated packet loss",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was written
    Dropped,
    Sent { corrupted: bool },
}

/// A connected [`TcpStream`] whose sends pass through a [`FaultPolicy`].
///
/// Sends are dropped with the packet-loss probability, delayed by the fixed
/// latency (no jitter) and corrupted with the corruption probability before
/// being written in full.
#[derive(Debug)]
pub struct UnreliableStream {
    inner: TcpStream,
    policy: Arc<FaultPolicy>,
}

impl UnreliableStream {
    pub fn new(inner: TcpStream, policy: Arc<FaultPolicy>) -> Self {
        Self { inner, policy }
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A, policy: Arc<FaultPolicy>) -> io::Result<Self> {
        Ok(Self::new(TcpStream::connect(addr).await?, policy))
    }

    pub fn policy(&self) -> &Arc<FaultPolicy> {
        &self.policy
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.inner
    }

    pub fn into_inner(self) -> TcpStream {
        self.inner
    }

    pub async fn send_all(&mut self, data: &[u8]) -> io::Result<SendOutcome> {
        if self.policy.should_drop() {
            warn!("Simulating packet loss (dropping {} bytes)", data.len());
            return Ok(SendOutcome::Dropped);
        }

        self.fixed_latency().await;

        let mut payload = data.to_vec();
        let corrupted = self.policy.maybe_corrupt(&mut payload).is_corrupted();
        if corrupted {
            warn!("Corrupted outgoing data ({} bytes)", payload.len());
        }

        self.inner.write_all(&payload).await?;
        Ok(SendOutcome::Sent { corrupted })
    }

    pub async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }

    async fn fixed_latency(&self) {
        let latency = Duration::from_millis(self.policy.config().latency_ms);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Result of one request/response exchange through an [`UnreliableClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Response(Vec<u8>),
    /// The request was dropped before reaching the socket
    LostOnSend,
    /// The request was sent but the response is treated as lost
    LostOnReceive,
    ConnectionIssue(io::ErrorKind),
}

/// One-shot client that degrades both its request and the server's reply.
#[derive(Debug)]
pub struct UnreliableClient {
    host: String,
    port: u16,
    policy: Arc<FaultPolicy>,
    stream: Option<UnreliableStream>,
}

impl UnreliableClient {
    pub fn new(host: impl Into<String>, port: u16, policy: Arc<FaultPolicy>) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
            stream: None,
        }
    }

    pub async fn connect(&mut self) -> io::Result<()> {
        let stream =
            UnreliableStream::connect((self.host.as_str(), self.port), Arc::clone(&self.policy))
                .await?;
        info!("Connected to server at {}:{}", self.host, self.port);
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send `data` and read one response of up to 4096 bytes.
    ///
    /// Errors only when not connected; socket failures are reported as
    /// [`Exchange::ConnectionIssue`].
    pub async fn send_message(&mut self, data: &[u8]) -> io::Result<Exchange> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "not connected to server")
        })?;

        match stream.send_all(data).await {
            Ok(SendOutcome::Dropped) => return Ok(Exchange::LostOnSend),
            Ok(SendOutcome::Sent { .. }) => {}
            Err(e) => {
                warn!("Error sending data: {}", e);
                return Ok(Exchange::ConnectionIssue(e.kind()));
            }
        }

        if self.policy.should_drop() {
            warn!("Simulating packet loss during reception");
            return Ok(Exchange::LostOnReceive);
        }

        stream.fixed_latency().await;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = match stream.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Error receiving data: {}", e);
                return Ok(Exchange::ConnectionIssue(e.kind()));
            }
        };
        buf.truncate(n);

        if self.policy.maybe_corrupt(&mut buf).is_corrupted() {
            warn!("Corrupted received data ({} bytes)", n);
        }
        Ok(Exchange::Response(buf))
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Connection closed");
        }
    }
}
