//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, wrong types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A room code that is not six characters of `A-Z0-9`.
    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),

    /// The frame decoded but breaks a protocol rule (e.g. the first frame
    /// is not a handshake).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
