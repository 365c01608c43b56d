//! Configuration for the session supervisor and the reconciled cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BalsyncError, Result, constants};

/// What a resync does with cached assets the new snapshot does not mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentAssetPolicy {
    /// Keep the last known value.
    #[default]
    Retain,
    /// Replace with a zero balance. Assets are never removed.
    Zero,
}

/// Exponential backoff for recovery attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Cap on any single delay.
    pub max: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(constants::DEFAULT_BACKOFF_BASE_MS),
            max: Duration::from_millis(constants::DEFAULT_BACKOFF_MAX_MS),
            multiplier: constants::DEFAULT_BACKOFF_MULTIPLIER,
            jitter: constants::DEFAULT_BACKOFF_JITTER,
        }
    }
}

/// Upper bounds on every remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub snapshot: Duration,
    /// Applies to open, keepalive and close.
    pub session: Duration,
    pub subscribe: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            snapshot: Duration::from_millis(constants::DEFAULT_SNAPSHOT_TIMEOUT_MS),
            session: Duration::from_millis(constants::DEFAULT_SESSION_TIMEOUT_MS),
            subscribe: Duration::from_millis(constants::DEFAULT_SUBSCRIBE_TIMEOUT_MS),
        }
    }
}

/// Full supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub backoff: BackoffConfig,
    pub timeouts: TimeoutConfig,
    /// Upper bound on the keepalive period. The effective period is the
    /// smaller of this and half the token's advertised validity.
    pub keepalive_interval: Duration,
    /// Consecutive transient keepalive failures treated as session loss.
    pub max_keepalive_failures: u32,
    /// Capacity of the frame channel between transport and consumer.
    pub event_buffer: usize,
    /// Resync treatment of assets missing from the new snapshot.
    pub absent_assets: AbsentAssetPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            timeouts: TimeoutConfig::default(),
            keepalive_interval: Duration::from_millis(constants::DEFAULT_KEEPALIVE_INTERVAL_MS),
            max_keepalive_failures: constants::DEFAULT_MAX_KEEPALIVE_FAILURES,
            event_buffer: constants::DEFAULT_EVENT_BUFFER,
            absent_assets: AbsentAssetPolicy::default(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults overridden by `BALSYNC_*` environment variables.
    ///
    /// Unparseable values keep the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `BALSYNC_*` key.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |key: &str, current: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(current, Duration::from_millis)
        };

        config.backoff.base = millis("BALSYNC_BACKOFF_BASE_MS", config.backoff.base);
        config.backoff.max = millis("BALSYNC_BACKOFF_MAX_MS", config.backoff.max);
        config.timeouts.snapshot = millis("BALSYNC_SNAPSHOT_TIMEOUT_MS", config.timeouts.snapshot);
        config.timeouts.session = millis("BALSYNC_SESSION_TIMEOUT_MS", config.timeouts.session);
        config.timeouts.subscribe =
            millis("BALSYNC_SUBSCRIBE_TIMEOUT_MS", config.timeouts.subscribe);
        config.keepalive_interval =
            millis("BALSYNC_KEEPALIVE_INTERVAL_MS", config.keepalive_interval);

        if let Some(v) = lookup("BALSYNC_MAX_KEEPALIVE_FAILURES") {
            config.max_keepalive_failures = v.trim().parse().unwrap_or(config.max_keepalive_failures);
        }
        if let Some(v) = lookup("BALSYNC_EVENT_BUFFER") {
            config.event_buffer = v.trim().parse().unwrap_or(config.event_buffer);
        }
        if let Some(v) = lookup("BALSYNC_ABSENT_ASSETS") {
            match v.trim().to_ascii_lowercase().as_str() {
                "retain" => config.absent_assets = AbsentAssetPolicy::Retain,
                "zero" => config.absent_assets = AbsentAssetPolicy::Zero,
                _ => {}
            }
        }

        config
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns [`BalsyncError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let zero_checks = [
            ("backoff.base", self.backoff.base),
            ("timeouts.snapshot", self.timeouts.snapshot),
            ("timeouts.session", self.timeouts.session),
            ("timeouts.subscribe", self.timeouts.subscribe),
            ("keepalive_interval", self.keepalive_interval),
        ];
        for (name, value) in zero_checks {
            if value.is_zero() {
                return Err(BalsyncError::Configuration(format!("{name} must be > 0")));
            }
        }
        if self.backoff.max < self.backoff.base {
            return Err(BalsyncError::Configuration(
                "backoff.max must be >= backoff.base".into(),
            ));
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(BalsyncError::Configuration(
                "backoff.multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(BalsyncError::Configuration(
                "backoff.jitter must be in [0, 1)".into(),
            ));
        }
        if self.max_keepalive_failures == 0 {
            return Err(BalsyncError::Configuration(
                "max_keepalive_failures must be > 0".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(BalsyncError::Configuration(
                "event_buffer must be > 0".into(),
            ));
        }
        Ok(())
    }
}
