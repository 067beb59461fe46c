//! Retry backoff policy for docbuild build jobs.
//!
//! A [`RetryPolicy`] is a pure mapping from `(mode, attempt)` to a delay,
//! capped at a maximum. The build queue consults it between attempts when a
//! builder surfaces a transient stage error; nothing in this crate sleeps
//! or retries by itself.
//!
//! # Example
//!
//! ```
//! use docbuild_retry::{RetryBackoff, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     backoff: RetryBackoff::Exponential,
//!     initial_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(30),
//!     max_retries: 3,
//! };
//!
//! assert_eq!(policy.delay(1), Duration::from_secs(1));
//! assert_eq!(policy.delay(2), Duration::from_secs(2));
//! assert_eq!(policy.delay(3), Duration::from_secs(4));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff mode for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    /// Same delay every attempt.
    Fixed,
    /// Delay grows linearly with the attempt number (default).
    #[default]
    Linear,
    /// Delay doubles each attempt.
    Exponential,
}

/// Retry policy for transient build-stage errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Backoff mode for calculating the delay between attempts.
    #[serde(default)]
    pub backoff: RetryBackoff,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Cap applied to every computed delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Maximum number of retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: RetryBackoff::Linear,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `n` (1-indexed).
    ///
    /// Fixed: `initial`. Linear: `min(n * initial, max)`. Exponential:
    /// `min(initial * 2^(n-1), max)`. `n = 0` is treated as `n = 1`.
    pub fn delay(&self, n: u32) -> Duration {
        let n = n.max(1);
        let raw = match self.backoff {
            RetryBackoff::Fixed => self.initial_delay,
            RetryBackoff::Linear => self.initial_delay.saturating_mul(n),
            RetryBackoff::Exponential => {
                let pow = n.saturating_sub(1).min(16);
                self.initial_delay.saturating_mul(2_u32.saturating_pow(pow))
            }
        };
        raw.min(self.max_delay)
    }

    /// Whether retry number `n` (1-indexed) is still within budget.
    pub fn allows(&self, n: u32) -> bool {
        n <= self.max_retries
    }

    /// Validate the policy, falling back to the default on bad inputs.
    ///
    /// Bad inputs are a zero initial delay or an initial delay above the
    /// cap. The fallback is the documented default: linear, 1s, 30s, 2
    /// retries.
    pub fn validated(self) -> Self {
        if self.initial_delay.is_zero() || self.initial_delay > self.max_delay {
            Self::default()
        } else {
            self
        }
    }
}
