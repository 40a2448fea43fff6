//! Room and bot configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use washday_model::InventoryLayout;
use washday_timer::DelayRange;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Rules and limits for one room.
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Seats per room, humans and bots together.
    pub max_participants: usize,

    /// Number of clothing-market slots.
    pub market_slots: usize,

    /// Currency every participant holds when the session starts.
    pub starting_currency: u32,

    /// Score for answering a prompt correctly.
    pub prompt_bonus: u32,

    /// Shared-counter increase for a wrong answer.
    pub prompt_penalty: u32,

    /// The session ends when the shared counter reaches this value.
    pub shared_counter_max: u32,

    /// Rounds per in-game week.
    pub week_length: u32,

    /// Which round of the week is wash day (`round % week_length`).
    pub wash_day: u32,

    /// Shared-counter increase applied every wash day.
    pub wash_day_penalty: u32,

    /// How long a room with no connected human survives.
    pub cleanup_grace: Duration,

    /// How old the last turn event may be and still be replayed to a
    /// reconnecting human.
    pub replay_window: Duration,

    /// Most cosmetic display fields a room keeps.
    pub display_max_keys: usize,

    /// Largest display field, key plus JSON-encoded value, in bytes.
    pub display_max_bytes: usize,

    /// Wardrobe shelf capacities.
    pub inventory: InventoryLayout,

    /// Bot pacing and skill.
    pub bots: BotTiming,
}

impl RoomConfig {
    /// `round` is the weekly wash day.
    pub fn is_wash_day(&self, round: u32) -> bool {
        self.week_length > 0 && round % self.week_length == self.wash_day
    }

    /// `round` opens a new week.
    pub fn is_new_week(&self, round: u32) -> bool {
        self.week_length > 0 && round > 0 && round % self.week_length == 0
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_participants: 4,
            market_slots: 4,
            starting_currency: 0,
            prompt_bonus: 2,
            prompt_penalty: 1,
            shared_counter_max: 20,
            week_length: 7,
            wash_day: 6,
            wash_day_penalty: 1,
            cleanup_grace: Duration::from_secs(5 * 60),
            replay_window: Duration::from_secs(10),
            display_max_keys: 16,
            display_max_bytes: 1024,
            inventory: InventoryLayout::default(),
            bots: BotTiming::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// BotTiming
// ---------------------------------------------------------------------------

/// Delays and accuracy of simulated participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotTiming {
    /// Probability of answering a prompt correctly, `0.0..=1.0`.
    pub success_rate: f64,

    /// Pause before rolling at the start of a turn.
    pub turn_delay: DelayRange,

    /// Turn-start pause on wash day.
    pub wash_day_delay: DelayRange,

    /// Pause before resolving a card or picking items.
    pub think_delay: DelayRange,

    /// Pause between picking items and buying them.
    pub shop_decision_delay: DelayRange,
}

impl Default for BotTiming {
    fn default() -> Self {
        Self {
            success_rate: 0.7,
            turn_delay: DelayRange::millis(1_500, 3_000),
            wash_day_delay: DelayRange::millis(4_000, 7_000),
            think_delay: DelayRange::millis(800, 2_000),
            shop_decision_delay: DelayRange::millis(800, 2_000),
        }
    }
}
