//! Error types for the room layer.

use washday_protocol::{ParticipantId, RoomCode};

/// Errors that can occur during room operations.
///
/// None of these change game state: a rejected action leaves the room
/// exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomCode),

    /// Every seat is taken.
    #[error("room {0} is full")]
    RoomFull(RoomCode),

    /// The participant has no seat in this room.
    #[error("participant {0} is not in this room")]
    NotInRoom(ParticipantId),

    /// A turn action from someone other than the active participant.
    #[error("participant {participant} acted out of turn")]
    NotYourTurn {
        participant: ParticipantId,
        active: Option<ParticipantId>,
    },

    /// A scheduled bot action that no longer matches the game.
    #[error("stale action: {0}")]
    StaleAction(String),

    /// The action is not allowed in the current phase or step.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A purchase costs more than the participant holds.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u32, available: u32 },

    /// A reconnect with the wrong token.
    #[error("invalid reconnect token for {0}")]
    InvalidToken(ParticipantId),

    /// The room's command channel is full or closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomCode),
}
