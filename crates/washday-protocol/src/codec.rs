//! Codec trait and implementations for serializing/deserializing frames.
//!
//! The server is written against [`Codec`], so the JSON encoding can be
//! swapped for a binary one without touching the handler. Game messages
//! are encoded twice: once into the opaque [`Payload::Game`] bytes and
//! again as part of the surrounding [`Envelope`].

use serde::{Serialize, de::DeserializeOwned};

use crate::{Envelope, ProtocolError};

/// Converts between Rust values and frame bytes.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Encodes `msg` as game data and wraps it in an envelope frame.
    fn encode_game<T: Serialize>(
        &self,
        seq: u64,
        timestamp: u64,
        msg: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        let inner = self.encode(msg)?;
        self.encode(&Envelope::game(seq, timestamp, inner))
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`. Behind the `json` feature (default).
///
/// ```rust
/// use washday_protocol::{Codec, Envelope, JsonCodec, SystemMessage};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::system(1, 5000, SystemMessage::Heartbeat { client_time: 5000 });
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
