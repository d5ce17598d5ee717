//! Exponential backoff for watcher fetch loops.
//!
//! Delay for the n-th consecutive failure is `min(base * 2^(n-1), cap)`.
//! The owning watcher gives up once `max_consecutive_failures` is reached.

use std::time::Duration;

/// Maximum backoff between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Consecutive failures after which a watcher stops for good.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Backoff parameters shared by every watcher of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_consecutive_failures: u32,
}

impl RetryPolicy {
    /// Policy for order book fetches.
    pub const DEPTH: RetryPolicy = RetryPolicy {
        base: Duration::from_millis(1000),
        cap: MAX_BACKOFF,
        max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
    };

    /// Policy for trade fetches.
    pub const TRADES: RetryPolicy = RetryPolicy {
        base: Duration::from_millis(5000),
        cap: MAX_BACKOFF,
        max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
    };

    /// Delay before retrying after the given (1-based) failure count.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// What a watcher should do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration and try again.
    Wait(Duration),
    /// The failure budget is spent.
    GiveUp,
}

/// Consecutive-failure counter owned by one watcher loop.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Records a failed fetch and decides whether to retry.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.policy.max_consecutive_failures {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Wait(self.policy.delay_for(self.consecutive_failures))
        }
    }

    /// Records a successful fetch.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }
}
