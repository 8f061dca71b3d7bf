//! Convenient re-exports for common bucketproxy types.
pub use crate::{
    backend::{Backend, CycleContext},
    cas::{CasBackend, CasStore},
    codec::{RawCodec, StateCodec},
    config::ClientSideConfig,
    error::{ConfigError, ProxyError, ProxyResult},
    expiration::ExpirationPolicy,
    key::{BucketKey, KeyMapper, KeyRef},
    manager::ProxyManager,
    memory::InMemoryCasStore,
    transition::{from_fn, typed, Mutation, Transition},
};
