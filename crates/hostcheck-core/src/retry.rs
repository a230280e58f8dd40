//! Retry policy for eventually consistent remote state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and for how long a failing check is re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds).
    pub backoff_base_ms: u64,
    /// Multiplier applied per further attempt.
    pub backoff_factor: f64,
    /// Upper bound on a single delay (milliseconds).
    pub backoff_max_ms: u64,
    /// Wall-clock budget for all attempts of one check on one host (milliseconds).
    pub timeout_ms: u64,
    /// Retry transport failures too, instead of reporting `Error` at once.
    pub retry_transport: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            backoff_max_ms: 10_000,
            timeout_ms: 60_000,
            retry_transport: false,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn once() -> Self {
        Self::default()
    }

    /// `attempts` tries with the default backoff.
    pub fn attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, base: Duration, factor: f64, max: Duration) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_factor = factor;
        self.backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_transport_retries(mut self) -> Self {
        self.retry_transport = true;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `min(base * factor^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let ms = (self.backoff_base_ms as f64) * factor.powi(exp);
        Duration::from_millis(ms.min(self.backoff_max_ms as f64) as u64)
    }

    /// Whether another attempt may follow attempt number `attempt`.
    pub fn permits_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Per-check adjustments to the run-wide [`RetryPolicy`]. Unset fields
/// inherit the run policy, including command-line overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_transport: Option<bool>,
}

impl RetryOverride {
    pub fn attempts(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Self::default()
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base_ms = Some(base.as_millis() as u64);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_transport_retries(mut self, retry: bool) -> Self {
        self.retry_transport = Some(retry);
        self
    }

    /// `base` with every field set here replaced.
    pub fn apply(&self, base: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts).max(1),
            backoff_base_ms: self.backoff_base_ms.unwrap_or(base.backoff_base_ms),
            backoff_factor: self.backoff_factor.unwrap_or(base.backoff_factor),
            backoff_max_ms: self.backoff_max_ms.unwrap_or(base.backoff_max_ms),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            retry_transport: self.retry_transport.unwrap_or(base.retry_transport),
        }
    }
}
