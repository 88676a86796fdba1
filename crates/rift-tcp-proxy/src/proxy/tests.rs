//! Tests for the proxy module.
//!
//! Pumps are awaited directly here (not spawned) so their log lines stay in
//! the test's span for `tracing-test`.

#[cfg(test)]
mod fault_logging_tests {
    use crate::config::FaultConfig;
    use crate::fault::FaultPolicy;
    use crate::proxy::{pump, Direction, PumpContext, PumpExit};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    fn context(config: FaultConfig) -> PumpContext {
        PumpContext {
            direction: Direction::UpstreamToClient,
            label: Arc::from("127.0.0.1:5000 <-> localhost:8888"),
            policy: Arc::new(FaultPolicy::new(FaultConfig {
                seed: Some(21),
                ..config
            })),
            running: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_drop_is_logged_as_drop() {
        let (mut peer, source) = duplex(1024);
        let (dest, _sink) = duplex(1024);
        peer.write_all(b"PING").await.unwrap();
        drop(peer);

        let report = pump(
            source,
            dest,
            context(FaultConfig {
                packet_loss: 1.0,
                ..FaultConfig::disabled()
            }),
        )
        .await;

        assert_eq!(report.exit, PumpExit::Eof);
        assert!(logs_contain("Dropping chunk"));
        assert!(!logs_contain("Simulated disconnect"));
        assert!(!logs_contain("Corrupted chunk"));
        assert!(!logs_contain("read error"));
        assert!(!logs_contain("write error"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stall_is_logged_as_disconnect_not_drop() {
        let (mut peer, source) = duplex(1024);
        let (dest, mut sink) = duplex(1024);
        peer.write_all(b"PING").await.unwrap();
        drop(peer);

        let report = pump(
            source,
            dest,
            context(FaultConfig {
                disconnect: 1.0,
                disconnect_seconds: 0,
                ..FaultConfig::disabled()
            }),
        )
        .await;

        let mut received = Vec::new();
        sink.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"PING");
        assert_eq!(report.stats.stalls, report.stats.chunks_forwarded);
        assert!(logs_contain("Simulated disconnect"));
        assert!(logs_contain("stream restored"));
        assert!(!logs_contain("Dropping chunk"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_write_failure_is_logged_as_error() {
        let (mut peer, source) = duplex(1024);
        let (dest, sink) = duplex(1024);
        drop(sink);
        peer.write_all(b"PING").await.unwrap();
        drop(peer);

        let report = pump(source, dest, context(FaultConfig::disabled())).await;

        assert!(matches!(report.exit, PumpExit::WriteError(_)));
        assert!(logs_contain("write error"));
        assert!(!logs_contain("Dropping chunk"));
    }
}

#[cfg(test)]
mod running_flag_tests {
    use crate::config::FaultConfig;
    use crate::fault::FaultPolicy;
    use crate::proxy::{pump, Direction, PumpContext, PumpExit};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_flag_cleared_mid_stream_stops_forwarding() {
        let (mut peer, source) = duplex(1024);
        let (dest, mut sink) = duplex(1024);
        let running = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(pump(
            source,
            dest,
            PumpContext {
                direction: Direction::ClientToUpstream,
                label: Arc::from("flag"),
                policy: Arc::new(FaultPolicy::new(FaultConfig::disabled())),
                running: Arc::clone(&running),
                cancel: CancellationToken::new(),
            },
        ));

        peer.write_all(b"first").await.unwrap();
        let mut buf = [0u8; 5];
        sink.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"first");

        running.store(false, Ordering::Release);
        // The pump may already have exited and dropped its source.
        let _ = peer.write_all(b"second").await;

        let report = task.await.unwrap();
        assert_eq!(report.exit, PumpExit::Stopped);
        assert_eq!(report.stats.chunks_forwarded, 1);

        let mut rest = Vec::new();
        sink.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
