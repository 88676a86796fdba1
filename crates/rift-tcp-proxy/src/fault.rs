//! Probabilistic fault decisions applied to relayed chunks.
//!
//! Every decision takes its own draw from the policy's RNG, so the two
//! directions of a session (and different sessions sharing one policy) never
//! influence each other beyond sharing a random stream.

use crate::config::FaultConfig;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Upper bound on the number of byte positions rewritten by one corruption.
pub const MAX_CORRUPTED_BYTES: usize = 3;

/// Outcome of [`FaultPolicy::maybe_corrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    Untouched,
    /// `positions` distinct bytes were overwritten with new values
    Rewrote { positions: usize },
}

impl Corruption {
    pub fn is_corrupted(&self) -> bool {
        matches!(self, Corruption::Rewrote { .. })
    }
}

#[derive(Debug)]
pub struct FaultPolicy {
    config: FaultConfig,
    rng: Mutex<StdRng>,
}

impl FaultPolicy {
    pub fn new(config: FaultConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Independent draw against the packet-loss probability.
    pub fn should_drop(&self) -> bool {
        should_inject(self.config.packet_loss, &mut *self.rng.lock())
    }

    /// Delay for the next chunk: mean latency with +/-25% uniform jitter, never negative.
    pub fn latency_delay(&self) -> Duration {
        latency_delay(self.config.latency_ms, &mut *self.rng.lock())
    }

    /// Sleep for [`latency_delay`](Self::latency_delay) and return how long that was.
    pub async fn apply_latency(&self) -> Duration {
        let delay = self.latency_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// With the corruption probability, rewrite 1-3 bytes of `chunk` in place.
    /// Chunk length never changes.
    pub fn maybe_corrupt(&self, chunk: &mut [u8]) -> Corruption {
        let mut rng = self.rng.lock();
        if chunk.is_empty() || !should_inject(self.config.corruption, &mut *rng) {
            return Corruption::Untouched;
        }
        Corruption::Rewrote {
            positions: corrupt_bytes(chunk, &mut *rng),
        }
    }

    /// Independent draw against the disconnect probability.
    pub fn should_disconnect(&self) -> bool {
        should_inject(self.config.disconnect, &mut *self.rng.lock())
    }

    /// With the disconnect probability, stall the caller for the configured
    /// outage duration. Returns whether an outage was simulated.
    ///
    /// The connection stays open: this is a pause of the pump, not a close.
    pub async fn maybe_disconnect(&self) -> bool {
        if !self.should_disconnect() {
            return false;
        }
        let outage = self.config.disconnect_duration();
        if !outage.is_zero() {
            tokio::time::sleep(outage).await;
        }
        true
    }
}

pub(crate) fn should_inject(probability: f64, rng: &mut impl Rng) -> bool {
    rng.gen::<f64>() < probability
}

pub(crate) fn latency_delay(latency_ms: u64, rng: &mut impl Rng) -> Duration {
    if latency_ms == 0 {
        return Duration::ZERO;
    }
    let base = latency_ms as f64 / 1000.0;
    let spread = base / 4.0;
    let jitter = rng.gen_range(-spread..=spread);
    Duration::from_secs_f64((base + jitter).max(0.0))
}

/// Rewrite between 1 and `min(3, len)` distinct positions of `chunk`.
/// Each rewritten byte is guaranteed to differ from its previous value.
pub(crate) fn corrupt_bytes(chunk: &mut [u8], rng: &mut impl Rng) -> usize {
    if chunk.is_empty() {
        return 0;
    }
    let count = rng.gen_range(1..=MAX_CORRUPTED_BYTES).min(chunk.len());
    for pos in rand::seq::index::sample(rng, chunk.len(), count).into_vec() {
        chunk[pos] ^= rng.gen_range(1..=u8::MAX);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy(config: FaultConfig) -> FaultPolicy {
        FaultPolicy::new(FaultConfig {
            seed: Some(7),
            ..config
        })
    }

    #[test]
    fn test_should_inject_always() {
        let mut rng = rand::thread_rng();
        let count = (0..100).filter(|_| should_inject(1.0, &mut rng)).count();
        assert_eq!(count, 100);
    }

    #[test]
    fn test_should_inject_never() {
        let mut rng = rand::thread_rng();
        let count = (0..100).filter(|_| should_inject(0.0, &mut rng)).count();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_should_inject_probability() {
        let mut rng = StdRng::seed_from_u64(1234);
        let iterations = 10000;
        let target_probability = 0.3;

        let count = (0..iterations)
            .filter(|_| should_inject(target_probability, &mut rng))
            .count();

        let actual_probability = count as f64 / iterations as f64;
        // Allow 5% variance
        assert!(
            (actual_probability - target_probability).abs() < 0.05,
            "Expected ~{target_probability}, got {actual_probability}"
        );
    }

    #[test]
    fn test_no_drops_with_zero_packet_loss() {
        let policy = policy(FaultConfig::disabled());
        assert!((0..10_000).all(|_| !policy.should_drop()));
    }

    #[test]
    fn test_every_chunk_dropped_with_full_packet_loss() {
        let policy = policy(FaultConfig {
            packet_loss: 1.0,
            ..FaultConfig::disabled()
        });
        assert!((0..10_000).all(|_| policy.should_drop()));
    }

    #[test]
    fn test_corruption_changes_one_to_three_bytes() {
        let policy = policy(FaultConfig {
            corruption: 1.0,
            ..FaultConfig::disabled()
        });

        for len in [3usize, 4, 16, 4096] {
            for _ in 0..200 {
                let original: Vec<u8> = (0..len).map(|i| i as u8).collect();
                let mut chunk = original.clone();
                let outcome = policy.maybe_corrupt(&mut chunk);

                assert_eq!(chunk.len(), len);
                let differing = original
                    .iter()
                    .zip(chunk.iter())
                    .filter(|(a, b)| a != b)
                    .count();
                assert!(
                    (1..=3).contains(&differing),
                    "len {len}: {differing} bytes differ"
                );
                assert_eq!(
                    outcome,
                    Corruption::Rewrote {
                        positions: differing
                    }
                );
            }
        }
    }

    #[test]
    fn test_corruption_of_single_byte_chunk() {
        let policy = policy(FaultConfig {
            corruption: 1.0,
            ..FaultConfig::disabled()
        });

        for _ in 0..100 {
            let mut chunk = [0x41u8];
            let outcome = policy.maybe_corrupt(&mut chunk);
            assert_eq!(outcome, Corruption::Rewrote { positions: 1 });
            assert_ne!(chunk[0], 0x41);
        }
    }

    #[test]
    fn test_corruption_of_two_byte_chunk_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..500 {
            let mut chunk = [0u8; 2];
            let positions = corrupt_bytes(&mut chunk, &mut rng);
            assert!((1..=2).contains(&positions));
            assert_eq!(chunk.iter().filter(|b| **b != 0).count(), positions);
        }
    }

    #[test]
    fn test_empty_chunk_is_never_corrupted() {
        let policy = policy(FaultConfig {
            corruption: 1.0,
            ..FaultConfig::disabled()
        });
        let mut chunk: [u8; 0] = [];
        assert_eq!(policy.maybe_corrupt(&mut chunk), Corruption::Untouched);
    }

    #[test]
    fn test_no_corruption_with_zero_probability() {
        let policy = policy(FaultConfig::disabled());
        let mut chunk = *b"PING";
        for _ in 0..1000 {
            assert!(!policy.maybe_corrupt(&mut chunk).is_corrupted());
        }
        assert_eq!(&chunk, b"PING");
    }

    #[test]
    fn test_latency_delay_within_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..1000 {
            let delay = latency_delay(100, &mut rng);
            assert!(delay >= Duration::from_millis(75), "{delay:?}");
            assert!(delay <= Duration::from_millis(125), "{delay:?}");
        }
    }

    #[test]
    fn test_zero_latency_means_no_delay() {
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(latency_delay(0, &mut rng), Duration::ZERO);
    }

    #[test]
    fn test_seeded_policies_are_reproducible() {
        let config = FaultConfig {
            packet_loss: 0.5,
            seed: Some(2024),
            ..FaultConfig::default()
        };
        let a = FaultPolicy::new(config.clone());
        let b = FaultPolicy::new(config);

        let draws_a: Vec<bool> = (0..64).map(|_| a.should_drop()).collect();
        let draws_b: Vec<bool> = (0..64).map(|_| b.should_drop()).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[tokio::test]
    async fn test_apply_latency_sleeps() {
        let policy = policy(FaultConfig {
            latency_ms: 40,
            ..FaultConfig::disabled()
        });
        let start = tokio::time::Instant::now();
        let delay = policy.apply_latency().await;
        assert!(delay >= Duration::from_millis(30));
        assert!(start.elapsed() >= delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stalls_for_configured_duration() {
        let policy = policy(FaultConfig {
            disconnect: 1.0,
            disconnect_seconds: 5,
            ..FaultConfig::disabled()
        });
        let start = tokio::time::Instant::now();
        assert!(policy.maybe_disconnect().await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_no_disconnect_with_zero_probability() {
        let policy = policy(FaultConfig::disabled());
        for _ in 0..100 {
            assert!(!policy.maybe_disconnect().await);
        }
    }

    #[tokio::test]
    async fn test_policy_shared_across_tasks() {
        let policy = Arc::new(policy(FaultConfig {
            packet_loss: 1.0,
            corruption: 1.0,
            ..FaultConfig::disabled()
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let policy = Arc::clone(&policy);
            handles.push(tokio::spawn(async move {
                let mut chunk = vec![0u8; 64];
                for _ in 0..500 {
                    assert!(policy.should_drop());
                    assert!(policy.maybe_corrupt(&mut chunk).is_corrupted());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
