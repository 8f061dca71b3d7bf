//! How long stored bucket state outlives its last write.
//!
//! Expiration is a memory-reclamation policy. A bucket written with
//! [`ExpirationPolicy::FixedTimeToLive`] keeps living while it is actively used and is
//! dropped by the store `ttl` after its most recent write. Readers cannot tell an expired key
//! from one that was never written.

use crate::error::ConfigError;
use std::time::Duration;

/// Time-to-live attached to every write made through one proxy manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "snake_case"))]
pub enum ExpirationPolicy {
    /// State persists until explicitly removed.
    #[default]
    None,
    /// Every successful write (re)sets the time-to-live to this duration.
    FixedTimeToLive(Duration),
}

impl ExpirationPolicy {
    pub fn none() -> Self {
        ExpirationPolicy::None
    }

    /// Expire state `ttl` after the last write. Rejects a zero duration.
    pub fn fixed_time_to_live(ttl: Duration) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::ZeroTimeToLive);
        }
        Ok(ExpirationPolicy::FixedTimeToLive(ttl))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ExpirationPolicy::None)
    }

    /// TTL to send with a write, if any.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            ExpirationPolicy::None => None,
            ExpirationPolicy::FixedTimeToLive(ttl) => Some(*ttl),
        }
    }

    /// TTL in whole milliseconds, rounded up so sub-millisecond values never mean "no TTL".
    pub fn ttl_millis(&self) -> Option<u64> {
        self.ttl().map(|ttl| {
            let millis = ttl.as_nanos().div_ceil(1_000_000);
            u64::try_from(millis).unwrap_or(u64::MAX).max(1)
        })
    }
}
