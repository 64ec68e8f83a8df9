//! Tunables for the sync engine.
//!
//! Every value has a default; none of them is a protocol contract. Configs
//! can be built in code with the `with_*` methods or loaded from JSON.

#![allow(clippy::cast_possible_truncation)] // millisecond durations fit in u64

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exponential retry backoff with a cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffPolicy {
    /// Delay after the first failure (ms)
    pub base_ms: u64,
    /// Multiplier applied per additional failure
    pub factor: u32,
    /// Upper bound on any single delay (ms)
    pub cap_ms: u64,
    /// Randomise each delay within its upper half
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 30_000,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt after `attempts` consecutive failures.
    ///
    /// Zero attempts means no delay.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let exponent = attempts.saturating_sub(1).min(32);
        let delay = u64::from(self.factor)
            .checked_pow(exponent)
            .and_then(|multiplier| self.base_ms.checked_mul(multiplier))
            .map_or(self.cap_ms, |delay| delay.min(self.cap_ms));

        if self.jitter && delay > 1 {
            let half = delay / 2;
            half + rand::thread_rng().gen_range(0..=delay - half)
        } else {
            delay
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Timeout applied to every remote call (ms)
    pub request_timeout_ms: u64,
    /// Maximum simultaneous remote requests during a drain
    pub max_concurrency: usize,
    pub backoff: BackoffPolicy,
    /// Periodic sync interval for the background loop (ms)
    pub poll_interval_ms: u64,
    /// Auto-save throttle interval (ms)
    pub throttle_ms: u64,
    /// Minimum time in background before a return to foreground triggers sync (ms)
    pub min_background_dwell_ms: u64,
    /// Window within which repeated triggers collapse into one (ms)
    pub debounce_window_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            max_concurrency: 3,
            backoff: BackoffPolicy::default(),
            poll_interval_ms: 60_000,
            throttle_ms: 500,
            min_background_dwell_ms: 5_000,
            debounce_window_ms: 2_000,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        Self::from_json(&payload)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidInput(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.backoff.factor == 0 {
            return Err(Error::InvalidInput("backoff.factor must be at least 1".into()));
        }
        if self.backoff.cap_ms < self.backoff.base_ms {
            return Err(Error::InvalidInput(
                "backoff.cap_ms must not be lower than backoff.base_ms".into(),
            ));
        }
        if self.throttle_ms == 0 {
            return Err(Error::InvalidInput("throttle_ms must be greater than zero".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle_ms = throttle.as_millis() as u64;
        self
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub const fn min_background_dwell(&self) -> Duration {
        Duration::from_millis(self.min_background_dwell_ms)
    }

    pub const fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}
