//! Shared game state for one room.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use washday_protocol::ParticipantId;

use crate::{ClothingItem, EventCard, Prompt};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a room's session.
///
/// Transitions are strictly ordered:
///
/// ```text
/// Lobby → Room → Active → Ended
/// ```
///
/// - **Lobby**: the room exists, nobody has joined yet.
/// - **Room**: participants are gathering; bots can be added.
/// - **Active**: turns are being played.
/// - **Ended**: terminal. State can be read but not changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Lobby,
    Room,
    Active,
    Ended,
}

impl Phase {
    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Lobby => Some(Self::Room),
            Self::Room => Some(Self::Active),
            Self::Active => Some(Self::Ended),
            Self::Ended => None,
        }
    }

    /// Returns `true` if moving to `target` is a valid transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => write!(f, "Lobby"),
            Self::Room => write!(f, "Room"),
            Self::Active => write!(f, "Active"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

// ---------------------------------------------------------------------------
// Turn steps
// ---------------------------------------------------------------------------

/// The step within the active participant's turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Roll,
    Resolve,
    Shop,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Roll => write!(f, "Roll"),
            Self::Resolve => write!(f, "Resolve"),
            Self::Shop => write!(f, "Shop"),
        }
    }
}

/// What kind of card a roll sends the participant to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Draw {
    Prompt,
    Event,
}

impl Draw {
    /// Faces 1-3 draw a prompt, 4-6 an event.
    pub fn from_die(face: u32) -> Self {
        if face <= 3 { Self::Prompt } else { Self::Event }
    }
}

/// The outcome of the current turn's roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roll {
    pub currency: u32,
    pub draw: Draw,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSlot {
    pub active: bool,
    pub prompt: Option<Prompt>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSlot {
    pub active: bool,
    pub event: Option<EventCard>,
}

/// One position in the clothing market. Empty slots are inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSlot {
    pub card: Option<ClothingItem>,
    pub selected: bool,
    pub purchased: bool,
}

impl MarketSlot {
    /// A card is on display and has not been bought.
    pub fn is_available(&self) -> bool {
        self.card.is_some() && !self.purchased
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// The shared counter reached its maximum.
    SharedCounterLimit,
    /// A participant filled every bounded wardrobe shelf.
    InventoryFull,
    /// Every human left before the session finished.
    Abandoned,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedCounterLimit => write!(f, "SharedCounterLimit"),
            Self::InventoryFull => write!(f, "InventoryFull"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// Everything every participant sees about a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub phase: Phase,
    /// Completed full cycles of turns.
    pub round: u32,
    /// Position of the active participant in the current turn order.
    pub turn_index: usize,
    pub active: Option<ParticipantId>,
    pub step: Step,
    pub roll: Option<Roll>,
    pub prompt: PromptSlot,
    pub event: EventSlot,
    pub market: Vec<MarketSlot>,
    /// Household microplastics.
    pub shared_counter: u32,
    pub shared_counter_max: u32,
    /// Counter increase deferred to the next wash day.
    pub pending_laundry: u32,
    pub end_reason: Option<EndReason>,
    /// Cosmetic client fields. Never read by game rules.
    pub display: BTreeMap<String, serde_json::Value>,
    /// Bumped on every change.
    pub version: u64,
    /// Unix millis of the last change.
    pub updated_at: u64,
}

impl GameState {
    pub fn new(market_slots: usize, shared_counter_max: u32) -> Self {
        Self {
            phase: Phase::Lobby,
            round: 0,
            turn_index: 0,
            active: None,
            step: Step::Roll,
            roll: None,
            prompt: PromptSlot::default(),
            event: EventSlot::default(),
            market: vec![MarketSlot::default(); market_slots],
            shared_counter: 0,
            shared_counter_max,
            pending_laundry: 0,
            end_reason: None,
            display: BTreeMap::new(),
            version: 0,
            updated_at: 0,
        }
    }

    /// Clears the per-turn scratch and returns to the roll step.
    pub fn reset_turn(&mut self) {
        self.step = Step::Roll;
        self.roll = None;
        self.prompt = PromptSlot::default();
        self.event = EventSlot::default();
        for slot in &mut self.market {
            slot.selected = false;
        }
    }

    /// Adds a signed delta to the shared counter, never going below zero.
    pub fn adjust_shared_counter(&mut self, delta: i32) {
        self.shared_counter = apply_delta(self.shared_counter, delta);
    }
}

/// Applies a signed delta to an unsigned amount, saturating at both ends.
pub fn apply_delta(value: u32, delta: i32) -> u32 {
    value.saturating_add_signed(delta)
}
