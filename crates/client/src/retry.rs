//! Retry policy for batch submission, expressed as an explicit state
//! machine: `Attempting(n)` either succeeds, moves to `Attempting(n + 1)`
//! on a transient failure, or terminates. Terminal after `max_attempts`.

use std::time::Duration;

use attribution_core::config::IhcApiConfig;
use rand::Rng;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network error, timeout, 5xx, or rate-limit signal. Retried.
    Transient,
    /// Validation-style 4xx rejection or an unusable response body. Not
    /// retried; mapped straight to per-session error results.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    /// About to make attempt `n` (1-based).
    Attempting(u32),
    Succeeded,
    /// No further attempts will be made.
    Failed { attempts: u32, last_error: String },
}

impl RetryState {
    pub fn new() -> Self {
        RetryState::Attempting(1)
    }

    /// Advance the machine after a failed attempt. Transient failures move
    /// to the next attempt while the budget lasts; permanent failures and
    /// an exhausted budget are terminal.
    pub fn on_failure(self, kind: FailureKind, max_attempts: u32, error: String) -> Self {
        match self {
            RetryState::Attempting(n) => match kind {
                FailureKind::Transient if n < max_attempts => RetryState::Attempting(n + 1),
                FailureKind::Transient => RetryState::Failed {
                    attempts: n,
                    last_error: error,
                },
                FailureKind::Permanent => RetryState::Failed {
                    attempts: n,
                    last_error: error,
                },
            },
            terminal => terminal,
        }
    }

    pub fn on_success(self) -> Self {
        match self {
            RetryState::Attempting(_) => RetryState::Succeeded,
            terminal => terminal,
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff with a cap and a fixed jitter band. The jitter
/// de-synchronizes retry storms when batches run concurrently.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &IhcApiConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Delay before attempt `n + 1`, given that attempt `n` (1-based) just
    /// failed: `initial * multiplier^(n-1)`, capped, plus random jitter in
    /// `[0, jitter]`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(32);
        let scaled = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay.as_millis() as f64) as u64;
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64)
        };
        Duration::from_millis(capped + jitter_ms)
    }
}
