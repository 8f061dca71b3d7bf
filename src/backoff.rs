//! Backoff schedules for row-lock retries and lost compare-and-swap races.
//!
//! Attempt index `0` is the initial try (no delay); retries start at `attempt = 1`.
//! Delays saturate at [`MAX_BACKOFF`] instead of overflowing.
//!
//! ```rust
//! use std::time::Duration;
//! use bucketproxy::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(10))
//!     .with_max(Duration::from_millis(50))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(10));
//! assert_eq!(backoff.delay(3), Duration::from_millis(40));
//! assert_eq!(backoff.delay(4), Duration::from_millis(50)); // capped
//! ```

use crate::error::ConfigError;
use std::time::Duration;

/// Upper bound applied when a computed delay would overflow (1 minute).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Constant(Duration),
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { schedule: Schedule::Constant(delay) }
    }

    /// `base * 2^(attempt - 1)`, uncapped until [`with_max`](Self::with_max).
    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential { base, max: None } }
    }

    /// Cap an exponential schedule. Constant schedules accept any cap at or above their delay
    /// and ignore it.
    pub fn with_max(mut self, max: Duration) -> Result<Self, ConfigError> {
        match &mut self.schedule {
            Schedule::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(ConfigError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
            }
            Schedule::Constant(delay) => {
                if max < *delay {
                    return Err(ConfigError::MaxLessThanBase { base: *delay, max });
                }
            }
        }
        Ok(self)
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.schedule {
            Schedule::Constant(delay) => delay.min(MAX_BACKOFF),
            Schedule::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier);
                let delay = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map_or(delay, |m| delay.min(m)).min(MAX_BACKOFF)
            }
        }
    }
}
