//! Game-level messages: intents from clients, notifications to them.
//!
//! Both travel inside `Payload::Game` as JSON. Intents are internally
//! tagged on `type`, e.g. `{ "type": "Purchase", "cards": [0, 2] }`.

use serde::{Deserialize, Serialize};
use washday_model::{EndReason, EventCard, GameState, Participant, Prompt};
use washday_protocol::{ParticipantId, RoomCode};

// ---------------------------------------------------------------------------
// Intents (client → room)
// ---------------------------------------------------------------------------

/// Something a participant asks the room to do. Bots issue the same
/// intents through the same path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Intent {
    /// Begin the session. Repeating it is a no-op.
    Start,

    /// Seat a bot. A name is generated when omitted.
    AddBot {
        #[serde(default)]
        name: Option<String>,
    },

    /// Change the sender's display name.
    Rename { name: String },

    /// Advance the sender's turn.
    AdvanceStep { command: StepCommand },

    /// Draw the prompt the roll sent the sender to.
    RequestPrompt,

    /// Draw the event card the roll sent the sender to.
    RequestEvent,

    /// Buy the given market slots and end the turn. `next` is the
    /// participant the client expects to play next.
    Purchase {
        cards: Vec<usize>,
        #[serde(default)]
        next: Option<ParticipantId>,
    },

    /// Buy nothing and end the turn.
    DeclinePurchase {
        #[serde(default)]
        next: Option<ParticipantId>,
    },

    /// The client moved to the foreground or background.
    TabVisibility { active: bool },

    /// Ask the room to evaluate end conditions now.
    CheckEndCondition,

    /// Report the last seen version; the room replies with a snapshot if
    /// the client is behind.
    Sync { last_seen_version: u64 },

    /// Forward an arbitrary event to every other participant.
    Relay {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// A step within the sender's own turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StepCommand {
    Roll,
    AnswerPrompt {
        answer: bool,
    },
    /// Apply the active event. `target` picks the victim of a take-item
    /// effect.
    ResolveEvent {
        #[serde(default)]
        target: Option<ParticipantId>,
    },
    SelectCard {
        index: usize,
        selected: bool,
    },
    /// Set a cosmetic display field. Game rules never read these.
    Display {
        key: String,
        value: serde_json::Value,
    },
}

// ---------------------------------------------------------------------------
// Notifications (room → client)
// ---------------------------------------------------------------------------

/// Everything a client needs to rebuild its view of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room: RoomCode,
    pub state: GameState,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// Full state, in reply to a join or a `Sync` from a client that is
    /// behind.
    Snapshot { snapshot: RoomSnapshot },

    StateUpdated {
        state: GameState,
        participants: Vec<Participant>,
    },

    /// Membership, names, or connection status changed.
    ParticipantsUpdated {
        version: u64,
        participants: Vec<Participant>,
    },

    PromptActivated {
        participant: ParticipantId,
        prompt: Prompt,
    },

    /// The answer and its reasoning, revealed after answering.
    PromptResolved {
        participant: ParticipantId,
        title: String,
        given: bool,
        answer: bool,
        correct: bool,
        reasoning: String,
    },

    EventActivated {
        participant: ParticipantId,
        event: EventCard,
    },

    TurnAdvanced {
        active: ParticipantId,
        round: u32,
        turn_index: usize,
        wash_day: bool,
    },

    SessionEnded {
        reason: EndReason,
        winner: Option<ParticipantId>,
    },

    /// Full state for a human who just reconnected.
    ReconnectSync { snapshot: RoomSnapshot },

    Relay {
        from: ParticipantId,
        name: String,
        payload: serde_json::Value,
    },

    /// The client is up to date.
    Ack { version: u64 },

    /// The sender's last intent was refused. Nothing changed.
    Rejected { reason: String },

    /// The seat was resumed from another connection. This one no longer
    /// speaks for it.
    Superseded,
}

impl Notification {
    /// Notifications that move the game forward from the client's point
    /// of view. These are the ones held back for a backgrounded tab and
    /// replayed after a reconnect.
    pub fn is_forward_flow(&self) -> bool {
        matches!(
            self,
            Self::TurnAdvanced { .. }
                | Self::PromptActivated { .. }
                | Self::EventActivated { .. }
                | Self::Relay { .. }
        )
    }
}
