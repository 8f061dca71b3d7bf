#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucketproxy
//!
//! Coordinated updates of rate-limiter state kept in an external store.
//!
//! Many processes can share one logical bucket. Every update runs as one coordination cycle
//! (read the stored state, apply a caller-supplied transition, persist the result) and
//! concurrent cycles on the same key behave as if serialized, whatever primitive the store
//! offers:
//!
//! - **Compare-and-swap** over any key/value store implementing [`CasStore`]
//!   ([`CasBackend`]; Redis lives in the `bucketproxy-redis` crate);
//! - **Advisory locks** and **select-for-update** row locks on PostgreSQL
//!   (`bucketproxy-postgres`).
//!
//! The rate-limiting arithmetic stays with the caller: a [`Transition`] maps the stored bytes
//! (or their absence) to new bytes plus a result. Transitions may run more than once per
//! cycle and must be pure.
//!
//! ## Quick Start
//!
//! ```rust
//! use bucketproxy::{
//!     CasBackend, ClientSideConfig, ExpirationPolicy, InMemoryCasStore, Mutation, ProxyManager,
//! };
//! use bucketproxy::transition::from_fn;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ProxyManager::builder(CasBackend::new(InMemoryCasStore::new()))
//!         .with_client_side_config(
//!             ClientSideConfig::new().with_request_timeout(Duration::from_secs(3)).unwrap(),
//!         )
//!         .with_expiration(ExpirationPolicy::fixed_time_to_live(Duration::from_secs(10)).unwrap())
//!         .build()
//!         .unwrap();
//!
//!     // Take one token from a bucket holding at most 5.
//!     let take = from_fn(|current| {
//!         let tokens = current.map_or(5, |bytes| bytes[0]);
//!         if tokens == 0 {
//!             return Ok(Mutation::keep(false));
//!         }
//!         Ok(Mutation::write(vec![tokens - 1], true))
//!     });
//!
//!     assert!(manager.execute("api-key-1", &take).await.unwrap());
//!     assert_eq!(manager.read("api-key-1").await.unwrap(), Some(vec![4]));
//! }
//! ```

pub mod backend;
pub mod backoff;
pub mod cas;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod expiration;
pub mod jitter;
pub mod key;
pub mod manager;
pub mod memory;
pub mod prelude;
pub mod retry;
pub mod sleeper;
pub mod testing;
pub mod timeout;
pub mod transition;

// Re-exports
pub use backend::{Backend, CycleContext};
pub use backoff::Backoff;
pub use cas::{CasBackend, CasStore};
pub use clock::{Clock, ManualClock, SystemClock};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use codec::{CodecError, RawCodec, StateCodec};
pub use config::ClientSideConfig;
pub use error::{BoxError, ConfigError, ProxyError, ProxyResult};
pub use expiration::ExpirationPolicy;
pub use jitter::Jitter;
pub use key::{BucketKey, KeyKind, KeyMapper, KeyRef};
pub use manager::{ProxyManager, ProxyManagerBuilder};
pub use memory::InMemoryCasStore;
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::TimeoutGuard;
pub use transition::{Mutation, Transition, TransitionError};
