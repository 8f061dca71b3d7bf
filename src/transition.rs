//! The caller-supplied state transition applied inside one coordination cycle.
//!
//! A transition maps the stored state (or `None` when the key has never been written, was
//! removed, or expired) to a [`Mutation`]: the state to persist, if any, plus a result handed
//! back to the caller.
//!
//! Purity contract: adapters may call [`Transition::apply`] more than once per cycle (the
//! compare-and-swap loop re-applies after losing a race, the select-for-update adapter
//! re-applies after a serialization failure). Only the result of the final, committed
//! application is returned. A transition must therefore be a pure function of its input:
//! no I/O, no counters, no clocks read inside `apply` whose effects outlive the call.
//! [`crate::testing::CountingTransition`] helps tests catch violations.

use crate::codec::StateCodec;
use crate::error::BoxError;
use std::fmt;
use std::marker::PhantomData;

/// Error type returned by transitions.
pub type TransitionError = BoxError;

/// Outcome of applying a transition to the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation<R, S = Vec<u8>> {
    state: Option<S>,
    result: R,
}

impl<R, S> Mutation<R, S> {
    /// Persist `state` and return `result`.
    pub fn write(state: S, result: R) -> Self {
        Self { state: Some(state), result }
    }

    /// Leave the stored state untouched and return `result`.
    pub fn keep(result: R) -> Self {
        Self { state: None, result }
    }

    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    pub fn result(&self) -> &R {
        &self.result
    }

    pub fn is_write(&self) -> bool {
        self.state.is_some()
    }

    pub fn into_parts(self) -> (Option<S>, R) {
        (self.state, self.result)
    }
}

/// A pure function from the stored bytes to a [`Mutation`].
pub trait Transition: Send + Sync {
    type Output: Send;

    fn apply(&self, current: Option<&[u8]>) -> Result<Mutation<Self::Output>, TransitionError>;
}

/// Transition backed by a closure; see [`from_fn`].
#[derive(Clone, Copy)]
pub struct FnTransition<F> {
    f: F,
}

impl<F> fmt::Debug for FnTransition<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransition").field("f", &"<closure>").finish()
    }
}

/// Build a transition from a closure over raw state bytes.
///
/// ```rust
/// use bucketproxy::transition::{from_fn, Mutation, Transition};
///
/// let append = from_fn(|current| {
///     let mut state = current.map(<[u8]>::to_vec).unwrap_or_default();
///     state.push(1);
///     let len = state.len();
///     Ok(Mutation::write(state, len))
/// });
/// let mutation = append.apply(Some(&[7u8][..])).unwrap();
/// assert_eq!(mutation.state(), Some(&vec![7, 1]));
/// assert_eq!(*mutation.result(), 2);
/// ```
pub fn from_fn<F, R>(f: F) -> FnTransition<F>
where
    F: Fn(Option<&[u8]>) -> Result<Mutation<R>, TransitionError> + Send + Sync,
    R: Send,
{
    FnTransition { f }
}

impl<F, R> Transition for FnTransition<F>
where
    F: Fn(Option<&[u8]>) -> Result<Mutation<R>, TransitionError> + Send + Sync,
    R: Send,
{
    type Output = R;

    fn apply(&self, current: Option<&[u8]>) -> Result<Mutation<R>, TransitionError> {
        (self.f)(current)
    }
}

/// Transition over a decoded state type; see [`typed`].
pub struct Typed<S, C, F> {
    codec: C,
    f: F,
    _state: PhantomData<fn() -> S>,
}

impl<S, C: fmt::Debug, F> fmt::Debug for Typed<S, C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Typed").field("codec", &self.codec).field("f", &"<closure>").finish()
    }
}

/// Lift a closure over decoded state into a byte-level transition.
///
/// Stored bytes are decoded with `codec` before `f` runs and the new state is encoded after.
/// Codec failures surface as transition failures, so a corrupt record never gets overwritten.
pub fn typed<S, R, C, F>(codec: C, f: F) -> Typed<S, C, F>
where
    C: StateCodec<S>,
    F: Fn(Option<S>) -> Result<Mutation<R, S>, TransitionError> + Send + Sync,
    R: Send,
{
    Typed { codec, f, _state: PhantomData }
}

impl<S, R, C, F> Transition for Typed<S, C, F>
where
    C: StateCodec<S>,
    F: Fn(Option<S>) -> Result<Mutation<R, S>, TransitionError> + Send + Sync,
    R: Send,
{
    type Output = R;

    fn apply(&self, current: Option<&[u8]>) -> Result<Mutation<R>, TransitionError> {
        let decoded = current.map(|bytes| self.codec.decode(bytes)).transpose()?;
        let (state, result) = (self.f)(decoded)?.into_parts();
        match state {
            Some(state) => Ok(Mutation::write(self.codec.encode(&state)?, result)),
            None => Ok(Mutation::keep(result)),
        }
    }
}
