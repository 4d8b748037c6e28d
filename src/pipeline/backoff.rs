//! Poll scheduling with exponential backoff.
//!
//! A successful cycle waits the steady interval. Consecutive failures wait
//! `base * 2^(n-1)`, capped, and the count resets on the next success:
//!
//! ```text
//! failures:  1   2   3   4   5  ...  9+
//! delay(s):  5  10  20  40  80  ... 300
//! ```

use std::time::Duration;

use crate::models::PollingConfig;

/// Delays used by the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after a successful cycle
    pub interval: Duration,
    /// First backoff delay
    pub base: Duration,
    /// Upper bound on any backoff delay
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            base: Duration::from_secs(config.retry_base_secs),
            cap: Duration::from_secs(config.retry_cap_secs),
        }
    }

    /// Delay after the `retry`-th consecutive failure (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

/// Where the loop is in its success/failure cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    #[default]
    Steady,
    BackingOff {
        retries: u32,
    },
}

impl Schedule {
    pub fn on_success(self) -> Self {
        if let Schedule::BackingOff { retries } = self {
            log::info!("Poll recovered after {} failed cycle(s)", retries);
        }
        Schedule::Steady
    }

    pub fn on_failure(self) -> Self {
        let retries = match self {
            Schedule::Steady => 1,
            Schedule::BackingOff { retries } => retries.saturating_add(1),
        };
        Schedule::BackingOff { retries }
    }

    pub fn retries(&self) -> u32 {
        match self {
            Schedule::Steady => 0,
            Schedule::BackingOff { retries } => *retries,
        }
    }

    /// How long to sleep before the next cycle.
    pub fn delay(&self, policy: &RetryPolicy) -> Duration {
        match self {
            Schedule::Steady => policy.interval,
            Schedule::BackingOff { retries } => policy.backoff_delay(*retries),
        }
    }
}
