//! Jitter applied to backoff delays so contending writers do not retry in lockstep.
//!
//! - `None`: exact delays, for deterministic tests.
//! - `Full`: uniform in `[0, delay]`; the default for conflict pauses.
//! - `Equal`: uniform in `[delay/2, delay]`.
//!
//! Randomness comes from `rand`'s thread-local RNG; inject a seeded one with
//! [`Jitter::apply_with_rng`].

use rand::{rng, Rng};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    None,
    #[default]
    Full,
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        // Microsecond resolution keeps sub-millisecond CAS pauses randomized.
        let micros: u64 = delay.as_micros().try_into().unwrap_or(u64::MAX);
        if micros == 0 {
            return delay;
        }
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_micros(rng.random_range(0..=micros)),
            Jitter::Equal => Duration::from_micros(rng.random_range(micros / 2..=micros)),
        }
    }
}
