//! Participants: human and bot seats in a room.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use washday_protocol::ParticipantId;

use crate::{ClothingItem, Draw, Inventory, InventoryLayout, apply_delta};

/// Whether a seat is played by a person or by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ParticipantKind {
    /// A person with a (possibly dropped) connection. The token lets them
    /// resume the seat and is never sent to other clients.
    Human {
        #[serde(skip)]
        reconnect_token: String,
    },
    Bot,
}

/// What a participant did in one round. Kept for the session record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundLog {
    pub rolled: Option<u32>,
    pub draw: Option<Draw>,
    pub resolved: Option<Resolution>,
    pub purchases: Vec<ClothingItem>,
}

/// The prompt or event a participant resolved, and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub title: String,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    #[serde(flatten)]
    pub kind: ParticipantKind,
    /// Has a live connection. Always `true` for bots.
    pub active: bool,
    /// The client is in the foreground. Always `true` for bots.
    pub tab_active: bool,
    pub currency: u32,
    pub score: u32,
    pub inventory: Inventory,
    #[serde(skip)]
    pub rounds: BTreeMap<u32, RoundLog>,
}

impl Participant {
    /// A connected human seat.
    pub fn human(id: ParticipantId, name: String, token: String, layout: &InventoryLayout) -> Self {
        Self::new(
            id,
            name,
            ParticipantKind::Human {
                reconnect_token: token,
            },
            layout,
        )
    }

    pub fn bot(id: ParticipantId, name: String, layout: &InventoryLayout) -> Self {
        Self::new(id, name, ParticipantKind::Bot, layout)
    }

    fn new(id: ParticipantId, name: String, kind: ParticipantKind, layout: &InventoryLayout) -> Self {
        Self {
            id,
            name,
            kind,
            active: true,
            tab_active: true,
            currency: 0,
            score: 0,
            inventory: Inventory::new(layout),
            rounds: BTreeMap::new(),
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.kind, ParticipantKind::Bot)
    }

    pub fn is_human(&self) -> bool {
        !self.is_bot()
    }

    /// The reconnect token of a human seat.
    pub fn token(&self) -> Option<&str> {
        match &self.kind {
            ParticipantKind::Human { reconnect_token } => Some(reconnect_token),
            ParticipantKind::Bot => None,
        }
    }

    /// Adds a signed amount of currency, never going below zero.
    pub fn adjust_currency(&mut self, delta: i32) {
        self.currency = apply_delta(self.currency, delta);
    }

    /// The log for `round`, created on first use.
    pub fn round_log(&mut self, round: u32) -> &mut RoundLog {
        self.rounds.entry(round).or_default()
    }
}
