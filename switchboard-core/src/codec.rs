//! Argument-scheme codecs for typed calls.
//!
//! The channel protocol moves opaque byte strings; typed calls are an
//! agreement between both endpoints on how one of those byte strings is
//! encoded. A [`PayloadCodec`] is that agreement: it owns a scheme name
//! (carried on the wire so a receiver can reject payloads it does not
//! speak) and the encode/decode pair for the payload bytes.
//!
//! [`JsonCodec`] is the built-in scheme; bring another format by
//! implementing the trait with its own scheme name.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error from encoding or decoding a typed payload.
///
/// Carries the scheme name so a caller juggling several schemes can tell
/// whose payload failed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value into payload bytes.
    #[error("{scheme} payload encode failed: {source}")]
    Encode {
        /// Scheme that was encoding.
        scheme: &'static str,
        /// The underlying serializer error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to decode payload bytes into a value.
    #[error("{scheme} payload decode failed: {source}")]
    Decode {
        /// Scheme that was decoding.
        scheme: &'static str,
        /// The underlying deserializer error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CodecError {
    /// The scheme name the failing codec announced.
    pub fn scheme(&self) -> &'static str {
        match self {
            CodecError::Encode { scheme, .. } | CodecError::Decode { scheme, .. } => scheme,
        }
    }
}

/// One argument scheme: a named payload encoding both endpoints agree on.
///
/// The trait requires `Clone + 'static` so codec instances can be stored
/// alongside handlers. Types must carry serde bounds; a format that
/// cannot go through serde needs its own handler instead.
pub trait PayloadCodec: Clone + 'static {
    /// The scheme name announced on the wire alongside encoded payloads.
    ///
    /// Receivers refuse payloads tagged with a different scheme, so two
    /// codecs must not share a name unless their encodings are
    /// interchangeable.
    fn scheme(&self) -> &'static str;

    /// Encode a value into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode payload bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// The `json` argument scheme, via serde_json.
///
/// Human-readable and convenient for debugging; not the most compact
/// choice for production traffic.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

/// Scheme name announced by [`JsonCodec`].
pub const JSON_SCHEME: &str = "json";

impl PayloadCodec for JsonCodec {
    fn scheme(&self) -> &'static str {
        JSON_SCHEME
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            scheme: JSON_SCHEME,
            source: Box::new(e),
        })
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode {
            scheme: JSON_SCHEME,
            source: Box::new(e),
        })
    }
}
