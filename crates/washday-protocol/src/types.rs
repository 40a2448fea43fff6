//! Core protocol types for Washday's wire format.
//!
//! Everything in this module travels on the wire. Game-level intents and
//! notifications are defined by the room layer and carried opaquely in
//! [`Payload::Game`]; this module only knows about connection plumbing.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identity of a seat in a room.
///
/// Independent of the transient connection: a human who drops and comes
/// back keeps the same `ParticipantId`. Ids are allocated per room,
/// starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// The shareable code of a room, e.g. `K7Q2XA`.
///
/// Codes are six characters from `A-Z0-9`. Clients type them by hand, so
/// [`RoomCode::parse`] trims and upper-cases before validating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Number of characters in a room code.
    pub const LEN: usize = 6;

    /// The alphabet codes are drawn from.
    pub const ALPHABET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Parses user input into a code.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let code = input.trim().to_ascii_uppercase();
        let valid = code.len() == Self::LEN
            && code.bytes().all(|b| Self::ALPHABET.contains(&b));
        if valid {
            Ok(Self(code))
        } else {
            Err(ProtocolError::InvalidRoomCode(input.to_string()))
        }
    }

    /// Builds a code from characters already known to be valid
    /// (generated server-side).
    pub fn from_generated(code: String) -> Self {
        Self(code)
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who a room notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every participant in the room.
    All,

    /// One participant.
    Participant(ParticipantId),

    /// Everyone except the given participant.
    AllExcept(ParticipantId),
}

impl Recipient {
    /// Returns `true` if `id` is covered by this recipient.
    pub fn includes(&self, id: ParticipantId) -> bool {
        match self {
            Self::All => true,
            Self::Participant(target) => *target == id,
            Self::AllExcept(excluded) => *excluded != id,
        }
    }
}

// ---------------------------------------------------------------------------
// SystemMessage: connection and room plumbing
// ---------------------------------------------------------------------------

/// Framework-level messages: handshake, heartbeat, and room membership.
///
/// Internally tagged, so `JoinRoom` serializes as
/// `{ "type": "JoinRoom", "room": "K7Q2XA", "name": "Ada" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    // -- Connection lifecycle --
    /// Client → Server: first frame on every connection.
    Handshake { version: u32 },

    /// Server → Client: handshake accepted.
    HandshakeAck { server_time: u64 },

    /// Either direction: orderly goodbye.
    Disconnect { reason: String },

    // -- Heartbeat --
    /// Client → Server keep-alive.
    Heartbeat { client_time: u64 },

    /// Server → Client keep-alive reply, echoing `client_time` for RTT.
    HeartbeatAck { client_time: u64, server_time: u64 },

    // -- Room membership --
    /// Client → Server: open a fresh room and take the first seat.
    CreateRoom { name: Option<String> },

    /// Client → Server: take a new seat in an existing room.
    JoinRoom { room: String, name: Option<String> },

    /// Client → Server: resume an existing seat after a dropped connection.
    Reconnect {
        room: String,
        participant: ParticipantId,
        token: String,
    },

    /// Client → Server: give up the seat for good.
    LeaveRoom,

    /// Server → Client: a room was created for you.
    RoomCreated { room: RoomCode },

    /// Server → Client: you hold a seat. Keep `token` to reconnect.
    RoomJoined {
        room: RoomCode,
        participant: ParticipantId,
        token: String,
    },

    // -- Errors --
    /// Server → Client: a request failed. HTTP-style `code`.
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Payload / Envelope
// ---------------------------------------------------------------------------

/// The content of an envelope: plumbing or game data.
///
/// Game data is the JSON encoding of the room layer's intents (client →
/// server) or notifications (server → client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// A framework-level message.
    System(SystemMessage),

    /// Game-specific data, opaque to this crate.
    Game(Vec<u8>),
}

/// The top-level message wrapper. Every frame on the wire is an `Envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-direction sequence number.
    pub seq: u64,

    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,

    /// The actual content.
    pub payload: Payload,
}

impl Envelope {
    /// Wraps a system message.
    pub fn system(seq: u64, timestamp: u64, msg: SystemMessage) -> Self {
        Self {
            seq,
            timestamp,
            payload: Payload::System(msg),
        }
    }

    /// Wraps already-encoded game bytes.
    pub fn game(seq: u64, timestamp: u64, data: Vec<u8>) -> Self {
        Self {
            seq,
            timestamp,
            payload: Payload::Game(data),
        }
    }
}
