//! Exponential backoff with jitter for recovery attempts.
//!
//! `delay(n) = min(base * multiplier^n, max) * (1 ± jitter)`, never below
//! `base`. Jitter spreads reconnects from many clients after a shared
//! outage.

use std::time::Duration;

use balsync_types::BackoffConfig;
use rand::Rng;

/// Delay calculator for one recovery episode.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let unit = if self.config.jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        let delay = self.delay_for(self.attempt, unit);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Deterministic delay for `attempt` with `unit` in `[-1, 1]` scaling the jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.config.base.as_secs_f64();
        let cap = self.config.max.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = base * self.config.multiplier.powi(exponent);
        let capped = if raw.is_finite() { raw.min(cap) } else { cap };

        let jittered = capped + capped * self.config.jitter * unit.clamp(-1.0, 1.0);
        Duration::from_secs_f64(jittered.clamp(base, cap.max(base)))
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start a new episode after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: f64) -> Backoff {
        Backoff::new(BackoffConfig {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter,
        })
    }

    #[test]
    fn grows_exponentially_until_cap() {
        let mut b = backoff(0.0);
        let delays: Vec<u128> = (0..8).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, [100, 200, 400, 800, 1600, 3200, 5000, 5000]);
        assert_eq!(b.attempt(), 8);
    }

    #[test]
    fn reset_starts_over() {
        let mut b = backoff(0.0);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let b = backoff(0.2);
        let near = |d: Duration, ms: u64| d.abs_diff(Duration::from_millis(ms)) < Duration::from_millis(1);
        assert!(near(b.delay_for(3, 1.0), 960));
        assert!(near(b.delay_for(3, -1.0), 640));
        // Never below base, never above cap.
        assert_eq!(b.delay_for(0, -1.0), Duration::from_millis(100));
        assert_eq!(b.delay_for(20, 1.0), Duration::from_secs(5));

        let mut b = backoff(0.2);
        for _ in 0..50 {
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let b = backoff(0.0);
        assert_eq!(b.delay_for(u32::MAX, 0.0), Duration::from_secs(5));
    }
}
