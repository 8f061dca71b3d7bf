//! Test helpers for transitions.
//!
//! [`CountingTransition`] records how often a backend invoked the wrapped transition, which
//! makes accidental side effects visible: a transition that is re-applied after a lost race
//! or a serialization failure shows up as more invocations than calls.

use crate::transition::{Mutation, Transition, TransitionError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a transition and counts calls to [`Transition::apply`]. Clones share the count.
#[derive(Debug, Clone)]
pub struct CountingTransition<T> {
    inner: T,
    invocations: Arc<AtomicUsize>,
}

impl<T> CountingTransition<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, invocations: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.invocations.store(0, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transition> Transition for CountingTransition<T> {
    type Output = T::Output;

    fn apply(&self, current: Option<&[u8]>) -> Result<Mutation<Self::Output>, TransitionError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.inner.apply(current)
    }
}

/// Decode an 8-byte big-endian counter; absent state counts as zero.
pub fn read_counter(state: Option<&[u8]>) -> Result<u64, TransitionError> {
    match state {
        None => Ok(0),
        Some(bytes) => {
            let arr: [u8; 8] = bytes
                .try_into()
                .map_err(|_| format!("counter state must be 8 bytes, got {}", bytes.len()))?;
            Ok(u64::from_be_bytes(arr))
        }
    }
}

/// Counter transition adding `by` to an 8-byte big-endian counter; returns the new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    by: u64,
}

pub fn increment(by: u64) -> Increment {
    Increment { by }
}

impl Transition for Increment {
    type Output = u64;

    fn apply(&self, current: Option<&[u8]>) -> Result<Mutation<u64>, TransitionError> {
        let next = read_counter(current)?
            .checked_add(self.by)
            .ok_or("counter overflow")?;
        Ok(Mutation::write(next.to_be_bytes().to_vec(), next))
    }
}
