//! Static content: prompts, event cards, and the clothing catalog.
//!
//! Content is provided through [`ContentProvider`] so a deployment can
//! load its own tables. [`BuiltinContent`] ships a small bundled set.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{ClothingItem, ModelError};

// ---------------------------------------------------------------------------
// Cards
// ---------------------------------------------------------------------------

/// A true/false trivia question.
///
/// The answer and its reasoning are never serialized with the card; they
/// are revealed only once the prompt is answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub title: String,
    pub statement: String,
    #[serde(skip_serializing)]
    pub answer: bool,
    #[serde(default, skip_serializing)]
    pub reasoning: String,
}

/// A narrative card with an effect on the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCard {
    pub name: String,
    pub title: String,
    pub statement: String,
    pub effect: Effect,
}

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

/// What resolving an event card does.
///
/// Parsed from colon-separated effect codes such as `microplastics:add:2`
/// or `card:get:player:1`. Serializes back to the same code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Effect {
    /// Change the shared counter now.
    SharedCounter(i32),
    /// Add to the counter on the next wash day.
    DeferredLaundry(u32),
    /// Change the active participant's currency.
    Currency(i32),
    /// Draw items from the catalog into the active participant's wardrobe.
    DrawItem(u32),
    /// Take the newest item from another participant.
    TakeItem,
    /// Discard the active participant's lowest-value item.
    Discard,
}

impl FromStr for Effect {
    type Err = ModelError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidEffect(code.to_string());
        let amount = |n: &str| n.parse::<u32>().map_err(|_| invalid());
        let signed = |n: &str| {
            let n = amount(n)?;
            i32::try_from(n).map_err(|_| invalid())
        };

        let parts: Vec<&str> = code.trim().split(':').collect();
        match parts.as_slice() {
            ["microplastics", "add", n] => Ok(Self::SharedCounter(signed(n)?)),
            ["microplastics", "remove", n] => Ok(Self::SharedCounter(-signed(n)?)),
            ["microplastics", "wait", n] => Ok(Self::DeferredLaundry(amount(n)?)),
            ["money", "add", n] => Ok(Self::Currency(signed(n)?)),
            ["money", "remove", n] => Ok(Self::Currency(-signed(n)?)),
            ["card", "get", "clothingmarket", n] => Ok(Self::DrawItem(amount(n)?)),
            ["card", "get", "player", "1"] => Ok(Self::TakeItem),
            ["card", "discard", _] => Ok(Self::Discard),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Effect {
    type Error = ModelError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        code.parse()
    }
}

impl From<Effect> for String {
    fn from(effect: Effect) -> Self {
        effect.to_string()
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SharedCounter(n) if n < 0 => write!(f, "microplastics:remove:{}", n.unsigned_abs()),
            Self::SharedCounter(n) => write!(f, "microplastics:add:{n}"),
            Self::DeferredLaundry(n) => write!(f, "microplastics:wait:{n}"),
            Self::Currency(n) if n < 0 => write!(f, "money:remove:{}", n.unsigned_abs()),
            Self::Currency(n) => write!(f, "money:add:{n}"),
            Self::DrawItem(n) => write!(f, "card:get:clothingmarket:{n}"),
            Self::TakeItem => write!(f, "card:get:player:1"),
            Self::Discard => write!(f, "card:discard:thriftstore"),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentProvider
// ---------------------------------------------------------------------------

/// Source of the static tables a room draws from.
pub trait ContentProvider: Send + Sync {
    fn prompts(&self) -> &[Prompt];
    fn events(&self) -> &[EventCard];
    /// Every clothing card that can appear in the market.
    fn catalog(&self) -> &[ClothingItem];
}

/// Content tables loaded from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinContent {
    prompts: Vec<Prompt>,
    events: Vec<EventCard>,
    catalog: Vec<ClothingItem>,
}

const BUILTIN_JSON: &str = include_str!("../content/builtin.json");

impl BuiltinContent {
    /// The tables bundled with the crate.
    pub fn load() -> Result<Self, ModelError> {
        Self::from_json(BUILTIN_JSON)
    }

    /// Parses tables from a JSON document with `prompts`, `events`, and
    /// `catalog` arrays. Event effects are validated while parsing.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let content: Self = serde_json::from_str(json)?;
        if content.catalog.is_empty() {
            return Err(ModelError::EmptyCatalog);
        }
        Ok(content)
    }
}

impl ContentProvider for BuiltinContent {
    fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    fn events(&self) -> &[EventCard] {
        &self.events
    }

    fn catalog(&self) -> &[ClothingItem] {
        &self.catalog
    }
}

// ---------------------------------------------------------------------------
// Deck
// ---------------------------------------------------------------------------

/// A shuffled draw pile over a fixed set of cards.
///
/// Every card is drawn once before any repeats; an exhausted pile is
/// reshuffled on the next draw.
#[derive(Debug, Clone)]
pub struct Deck<T> {
    cards: Vec<T>,
    pile: Vec<usize>,
}

impl<T: Clone> Deck<T> {
    pub fn new(cards: Vec<T>) -> Self {
        Self {
            cards,
            pile: Vec::new(),
        }
    }

    /// Draws the next card, or `None` if the deck has no cards at all.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<T> {
        if self.pile.is_empty() {
            self.pile = (0..self.cards.len()).collect();
            self.pile.shuffle(rng);
        }
        let idx = self.pile.pop()?;
        self.cards.get(idx).cloned()
    }

    /// Cards left before the next reshuffle.
    pub fn remaining(&self) -> usize {
        self.pile.len()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
