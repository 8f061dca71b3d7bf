//! Conversion between in-memory bucket state and the opaque bytes kept in the store.
//!
//! Versioned codecs wrap their payload in a three-byte envelope:
//!
//! ```text
//! +------+----------------+-------------+
//! | 0xB7 | version (u16BE)| payload ... |
//! +------+----------------+-------------+
//! ```
//!
//! A codec accepts every version up to its own and rejects newer ones, so a fleet can be
//! upgraded reader-first: new fields are added under a bumped version and old payloads keep
//! decoding.

#[cfg(feature = "json")]
use std::marker::PhantomData;

/// First byte of every versioned envelope.
pub const ENVELOPE_MAGIC: u8 = 0xB7;

const HEADER_LEN: usize = 3;

/// Failure to encode or decode bucket state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("state is {0} bytes, shorter than the envelope header")]
    Truncated(usize),
    #[error("unrecognized state envelope marker 0x{0:02x}")]
    BadMagic(u8),
    #[error("state format version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u16, supported: u16 },
    #[error("state payload: {0}")]
    Payload(String),
}

/// Decoded envelope header plus borrowed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub version: u16,
    pub payload: &'a [u8],
}

/// Wrap `payload` in a versioned envelope.
pub fn seal(version: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(ENVELOPE_MAGIC);
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split a versioned envelope into header and payload.
pub fn open(bytes: &[u8]) -> Result<Envelope<'_>, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated(bytes.len()));
    }
    if bytes[0] != ENVELOPE_MAGIC {
        return Err(CodecError::BadMagic(bytes[0]));
    }
    let version = u16::from_be_bytes([bytes[1], bytes[2]]);
    Ok(Envelope { version, payload: &bytes[HEADER_LEN..] })
}

/// Maps a state value to and from bytes.
pub trait StateCodec<S>: Send + Sync {
    fn encode(&self, state: &S) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<S, CodecError>;
}

/// Identity codec for callers that already hold serialized state. Not versioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCodec;

impl StateCodec<Vec<u8>> for RawCodec {
    fn encode(&self, state: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(state.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// JSON payload inside a versioned envelope.
///
/// Unknown fields are ignored on decode; mark fields added in later versions with
/// `#[serde(default)]` so payloads written by older versions keep decoding.
#[cfg(feature = "json")]
pub struct JsonCodec<S> {
    version: u16,
    _state: PhantomData<fn() -> S>,
}

#[cfg(feature = "json")]
impl<S> JsonCodec<S> {
    /// Codec writing format version 1.
    pub fn new() -> Self {
        Self::with_version(1)
    }

    /// Codec writing `version` and reading every version up to it.
    pub fn with_version(version: u16) -> Self {
        Self { version, _state: PhantomData }
    }

    pub fn version(&self) -> u16 {
        self.version
    }
}

#[cfg(feature = "json")]
impl<S> Default for JsonCodec<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json")]
impl<S> Clone for JsonCodec<S> {
    fn clone(&self) -> Self {
        Self::with_version(self.version)
    }
}

#[cfg(feature = "json")]
impl<S> std::fmt::Debug for JsonCodec<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec").field("version", &self.version).finish()
    }
}

#[cfg(feature = "json")]
impl<S> StateCodec<S> for JsonCodec<S>
where
    S: serde::Serialize + serde::de::DeserializeOwned,
{
    fn encode(&self, state: &S) -> Result<Vec<u8>, CodecError> {
        let payload = serde_json::to_vec(state).map_err(|e| CodecError::Payload(e.to_string()))?;
        Ok(seal(self.version, &payload))
    }

    fn decode(&self, bytes: &[u8]) -> Result<S, CodecError> {
        let envelope = open(bytes)?;
        if envelope.version > self.version {
            return Err(CodecError::UnsupportedVersion {
                found: envelope.version,
                supported: self.version,
            });
        }
        serde_json::from_slice(envelope.payload).map_err(|e| CodecError::Payload(e.to_string()))
    }
}
