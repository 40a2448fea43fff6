//! Entity model for Washday.
//!
//! Plain data with small invariant-keeping methods; no I/O and no
//! timing. The room layer owns the rules that move these values around.
//!
//! # Key types
//!
//! - [`GameState`]: the shared, server-authoritative session state
//! - [`Participant`]: a human or bot seat with currency, score, wardrobe
//! - [`Inventory`]: category shelves with capacity and overflow
//! - [`ContentProvider`]: prompts, event cards, and the clothing catalog
//! - [`Deck`]: a reshuffling draw pile

mod content;
mod error;
mod game;
mod inventory;
mod participant;

pub use content::{BuiltinContent, ContentProvider, Deck, Effect, EventCard, Prompt};
pub use error::ModelError;
pub use game::{
    Draw, EndReason, EventSlot, GameState, MarketSlot, Phase, PromptSlot, Roll, Step, apply_delta,
};
pub use inventory::{Category, ClothingItem, Condition, Fiber, Inventory, InventoryLayout, Shelf};
pub use participant::{Participant, ParticipantKind, Resolution, RoundLog};
