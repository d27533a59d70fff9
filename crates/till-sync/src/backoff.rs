//! Exponential retry backoff with bounded jitter.

use std::time::Duration;
use till_core::config::QueueConfig;

/// `base × 2^(attempts−1)` plus up to `jitter_ratio` of that again, capped at
/// `max`. With `jitter_ratio ≤ 1` the delay after attempt n+1 is never shorter
/// than the delay after attempt n, whatever jitter either draw produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        let base_ms = millis(base);
        Self {
            base_ms,
            max_ms: millis(max).max(base_ms),
            jitter_ratio: if jitter_ratio.is_finite() {
                jitter_ratio.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    pub fn from_config(cfg: &QueueConfig) -> Self {
        Self::new(cfg.base_delay(), cfg.max_delay(), cfg.jitter_ratio)
    }

    /// Un-jittered delay after the given number of failed attempts.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms(attempts))
    }

    /// Delay with jitter drawn from `unit ∈ [0, 1)`.
    pub fn delay(&self, attempts: u32, unit: f64) -> Duration {
        let d = self.base_delay_ms(attempts);
        let unit = if unit.is_finite() { unit.clamp(0.0, 1.0) } else { 0.0 };
        let jitter = (d as f64 * self.jitter_ratio * unit).floor() as u64;
        Duration::from_millis(d.saturating_add(jitter).min(self.max_ms))
    }

    pub fn delay_with_jitter(&self, attempts: u32) -> Duration {
        self.delay(attempts, rand::random::<f64>())
    }

    fn base_delay_ms(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let exp = (attempts - 1).min(63);
        self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(300), 0.5)
    }

    #[test]
    fn doubles_per_attempt() {
        let b = backoff();
        assert_eq!(b.base_delay(1), Duration::from_secs(1));
        assert_eq!(b.base_delay(2), Duration::from_secs(2));
        assert_eq!(b.base_delay(4), Duration::from_secs(8));
    }

    #[test]
    fn capped_at_max() {
        let b = backoff();
        assert_eq!(b.base_delay(20), Duration::from_secs(300));
        assert_eq!(b.base_delay(u32::MAX), Duration::from_secs(300));
        assert_eq!(b.delay(9, 0.99), Duration::from_secs(300));
    }

    #[test]
    fn jitter_is_bounded() {
        let b = backoff();
        assert_eq!(b.delay(1, 0.0), Duration::from_millis(1000));
        assert_eq!(b.delay(1, 0.5), Duration::from_millis(1250));
        for _ in 0..100 {
            let d = b.delay_with_jitter(3);
            assert!(d >= Duration::from_secs(4) && d < Duration::from_secs(6));
        }
    }

    #[test]
    fn zero_attempts_means_no_wait() {
        assert_eq!(backoff().delay(0, 0.9), Duration::ZERO);
    }

    #[test]
    fn ratio_is_clamped() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(10), 7.0);
        assert_eq!(b.delay(1, 0.5), Duration::from_millis(150));
    }
}
