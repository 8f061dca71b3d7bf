//! Bucket keys and how they map onto physical store addresses.
//!
//! Applications identify buckets by integers, strings, or raw bytes. Every backend addresses
//! state through a borrowed [`KeyRef`]:
//! - relational backends bind it as the primary key and derive an advisory-lock id from it;
//! - key/value backends turn it into a physical key through a [`KeyMapper`].

use crate::error::{ProxyError, ProxyResult};
use std::borrow::Cow;
use std::fmt;

/// The physical shape of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Integer,
    Text,
    Bytes,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Integer => f.write_str("integer"),
            KeyKind::Text => f.write_str("text"),
            KeyKind::Bytes => f.write_str("bytes"),
        }
    }
}

/// Borrowed, backend-agnostic view of a bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRef<'a> {
    Integer(i64),
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> KeyRef<'a> {
    pub fn kind(&self) -> KeyKind {
        match self {
            KeyRef::Integer(_) => KeyKind::Integer,
            KeyRef::Text(_) => KeyKind::Text,
            KeyRef::Bytes(_) => KeyKind::Bytes,
        }
    }

    /// Byte form used by key/value stores: decimal ASCII for integers, UTF-8 for text,
    /// verbatim for bytes.
    pub fn to_bytes(&self) -> Cow<'a, [u8]> {
        match *self {
            KeyRef::Integer(v) => Cow::Owned(v.to_string().into_bytes()),
            KeyRef::Text(s) => Cow::Borrowed(s.as_bytes()),
            KeyRef::Bytes(b) => Cow::Borrowed(b),
        }
    }

    /// Token for store-level advisory locks.
    ///
    /// Integers lock on their own value. Text and bytes are hashed with 32-bit FNV-1a, which is
    /// stable across processes, platforms, and releases; distinct keys may share a token, which
    /// only costs extra serialization.
    pub fn advisory_lock_id(&self) -> i64 {
        match *self {
            KeyRef::Integer(v) => v,
            KeyRef::Text(s) => i64::from(fnv1a_32(s.as_bytes())),
            KeyRef::Bytes(b) => i64::from(fnv1a_32(b)),
        }
    }
}

impl fmt::Display for KeyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRef::Integer(v) => write!(f, "{}", v),
            KeyRef::Text(s) => f.write_str(s),
            KeyRef::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, b| (hash ^ u32::from(*b)).wrapping_mul(PRIME))
}

/// Anything usable as an application-level bucket key.
pub trait BucketKey: fmt::Debug + Send + Sync {
    fn key_ref(&self) -> KeyRef<'_>;
}

impl BucketKey for i64 {
    fn key_ref(&self) -> KeyRef<'_> {
        KeyRef::Integer(*self)
    }
}

/// Reinterprets the bits as `i64`, so distinct values stay distinct.
impl BucketKey for u64 {
    fn key_ref(&self) -> KeyRef<'_> {
        KeyRef::Integer(*self as i64)
    }
}

impl BucketKey for str {
    fn key_ref(&self) -> KeyRef<'_> {
        KeyRef::Text(self)
    }
}

impl BucketKey for String {
    fn key_ref(&self) -> KeyRef<'_> {
        KeyRef::Text(self.as_str())
    }
}

impl BucketKey for [u8] {
    fn key_ref(&self) -> KeyRef<'_> {
        KeyRef::Bytes(self)
    }
}

impl BucketKey for Vec<u8> {
    fn key_ref(&self) -> KeyRef<'_> {
        KeyRef::Bytes(self.as_slice())
    }
}

impl<K: BucketKey + ?Sized> BucketKey for &K {
    fn key_ref(&self) -> KeyRef<'_> {
        (**self).key_ref()
    }
}

/// Maps keys onto the physical key space of a key/value store.
///
/// A mapper may pin the accepted [`KeyKind`] so a deployment that stores integer keys cannot
/// silently mix in string keys, and may prepend a namespace prefix. A mapper accepting every
/// kind tags each physical key with its kind (`i`, `s`, or `b` after the prefix), so `42`,
/// `"42"` and `b"42"` address different buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMapper {
    expected: Option<KeyKind>,
    prefix: Vec<u8>,
}

impl KeyMapper {
    /// Accept every key kind, tagging physical keys with the kind.
    pub fn any() -> Self {
        Self::default()
    }

    /// Accept integer keys only.
    pub fn integer() -> Self {
        Self { expected: Some(KeyKind::Integer), prefix: Vec::new() }
    }

    /// Accept string keys only.
    pub fn text() -> Self {
        Self { expected: Some(KeyKind::Text), prefix: Vec::new() }
    }

    /// Accept raw byte keys only.
    pub fn bytes() -> Self {
        Self { expected: Some(KeyKind::Bytes), prefix: Vec::new() }
    }

    /// Prepend `prefix` to every physical key.
    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn expected_kind(&self) -> Option<KeyKind> {
        self.expected
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Physical key for `key`, or [`ProxyError::InvalidKey`] when its kind is not accepted.
    pub fn map(&self, key: KeyRef<'_>) -> ProxyResult<Vec<u8>> {
        if let Some(expected) = self.expected {
            if key.kind() != expected {
                return Err(ProxyError::InvalidKey(format!(
                    "mapper accepts {} keys, got {} key {}",
                    expected,
                    key.kind(),
                    key
                )));
            }
        }
        let bytes = key.to_bytes();
        let mut physical = Vec::with_capacity(self.prefix.len() + 1 + bytes.len());
        physical.extend_from_slice(&self.prefix);
        if self.expected.is_none() {
            physical.push(kind_tag(key.kind()));
        }
        physical.extend_from_slice(&bytes);
        Ok(physical)
    }
}

fn kind_tag(kind: KeyKind) -> u8 {
    match kind {
        KeyKind::Integer => b'i',
        KeyKind::Text => b's',
        KeyKind::Bytes => b'b',
    }
}
