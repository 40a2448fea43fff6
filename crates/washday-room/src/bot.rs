//! Simulated participants.
//!
//! A bot acts through the same intents a human sends, one step per timer.
//! At most one bot timer is pending per room: the session arms it when a
//! bot holds the turn and drops it whenever the turn changes. A bot timer
//! that fires for a step that has already passed is discarded.

use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, trace};
use washday_model::{Category, Draw, Inventory, MarketSlot, Step};
use washday_protocol::ParticipantId;

use crate::session::{Session, TimerKey, TimerOp};
use crate::{Intent, RoomError, StepCommand};

/// The point in a turn a bot timer acts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotStage {
    Roll,
    Resolve,
    /// Pick items.
    Shop,
    /// Buy what was picked.
    ShopDecision,
}

impl BotStage {
    /// The step this stage acts in.
    pub fn step(self) -> Step {
        match self {
            Self::Roll => Step::Roll,
            Self::Resolve => Step::Resolve,
            Self::Shop | Self::ShopDecision => Step::Shop,
        }
    }

    /// The stage that starts `step`.
    pub fn for_step(step: Step) -> Self {
        match step {
            Step::Roll => Self::Roll,
            Step::Resolve => Self::Resolve,
            Step::Shop => Self::Shop,
        }
    }
}

/// Market slots a bot buys with `budget`.
///
/// Best value per price first; ties keep market order. Skips items whose
/// shelf would already be full, counting earlier picks.
pub fn plan_shop(market: &[MarketSlot], budget: u32, inventory: &Inventory) -> Vec<usize> {
    let mut candidates: Vec<(usize, u32, u32, Category)> = market
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_available())
        .filter_map(|(idx, slot)| {
            slot.card
                .as_ref()
                .map(|c| (idx, c.value, c.price, c.category))
        })
        .collect();

    // value_a / price_a > value_b / price_b without floats.
    candidates.sort_by(|a, b| {
        let lhs = u64::from(a.1) * u64::from(b.2.max(1));
        let rhs = u64::from(b.1) * u64::from(a.2.max(1));
        rhs.cmp(&lhs)
    });

    let mut left = budget;
    let mut picked_per_category: HashMap<Category, usize> = HashMap::new();
    let mut picks = Vec::new();
    for (idx, _, price, category) in candidates {
        if price > left {
            continue;
        }
        let picked = picked_per_category.entry(category).or_default();
        if inventory.remaining(category).is_some_and(|free| *picked >= free) {
            continue;
        }
        *picked += 1;
        left -= price;
        picks.push(idx);
    }
    picks.sort_unstable();
    picks
}

impl Session {
    /// Makes sure the bot holding the turn has a timer for its current
    /// step. Does nothing while no human is connected.
    pub(crate) fn sync_bot_timer(&mut self) {
        if !self.game.phase.is_active() {
            return;
        }
        let Some(active) = self.game.active else {
            return;
        };
        if !self.participant(active).is_some_and(|p| p.is_bot()) {
            return;
        }
        if self.bot_armed == Some((active, self.game.step)) || !self.any_human_connected() {
            return;
        }
        self.arm_bot(active, BotStage::for_step(self.game.step));
    }

    fn arm_bot(&mut self, participant: ParticipantId, stage: BotStage) {
        let timing = &self.config.bots;
        let range = match stage {
            BotStage::Roll if self.config.is_wash_day(self.game.round) => timing.wash_day_delay,
            BotStage::Roll => timing.turn_delay,
            BotStage::Resolve | BotStage::Shop => timing.think_delay,
            BotStage::ShopDecision => timing.shop_decision_delay,
        };
        let delay = range.sample(&mut self.rng);
        trace!(room = %self.code, participant = %participant, ?stage, delay_ms = delay.as_millis() as u64, "bot timer armed");

        self.bot_armed = Some((participant, stage.step()));
        self.effects.timers.push(TimerOp::Arm {
            key: TimerKey::Bot { participant, stage },
            delay,
        });
    }

    /// Runs one bot step. Errors mean the timer was stale.
    pub(crate) fn fire_bot(&mut self, participant: ParticipantId, stage: BotStage) -> Result<(), RoomError> {
        if !self.game.phase.is_active() {
            return Err(RoomError::StaleAction(format!("session is {}", self.game.phase)));
        }
        if self.game.active != Some(participant) || !self.participant(participant).is_some_and(|p| p.is_bot()) {
            return Err(RoomError::StaleAction(format!("{participant} no longer holds the turn")));
        }
        if stage.step() != self.game.step {
            return Err(RoomError::StaleAction(format!(
                "bot stage {stage:?} fired during {}",
                self.game.step
            )));
        }
        self.bot_armed = None;

        if !self.any_human_connected() {
            debug!(room = %self.code, participant = %participant, ?stage, "bot suspended, no human connected");
            return Ok(());
        }

        match stage {
            BotStage::Roll => self.handle_intent(participant, Intent::AdvanceStep {
                command: StepCommand::Roll,
            }),
            BotStage::Resolve => {
                let intent = self.bot_resolution();
                self.handle_intent(participant, intent)
            }
            BotStage::Shop => self.bot_pick_items(participant),
            BotStage::ShopDecision => self.bot_buy(participant),
        }
    }

    /// The next resolve-step intent for the drawn card.
    fn bot_resolution(&mut self) -> Intent {
        let draw = self.game.roll.map(|r| r.draw);
        match draw {
            Some(Draw::Prompt) if self.game.prompt.active => {
                let answer = match &self.game.prompt.prompt {
                    Some(prompt) => {
                        let rate = self.config.bots.success_rate.clamp(0.0, 1.0);
                        if self.rng.random_bool(rate) {
                            prompt.answer
                        } else {
                            !prompt.answer
                        }
                    }
                    None => self.rng.random_bool(0.5),
                };
                Intent::AdvanceStep {
                    command: StepCommand::AnswerPrompt { answer },
                }
            }
            Some(Draw::Prompt) => Intent::RequestPrompt,
            Some(Draw::Event) if self.game.event.active => Intent::AdvanceStep {
                command: StepCommand::ResolveEvent { target: None },
            },
            _ => Intent::RequestEvent,
        }
    }

    fn bot_pick_items(&mut self, participant: ParticipantId) -> Result<(), RoomError> {
        let picks = match self.participant(participant) {
            Some(p) => plan_shop(&self.game.market, p.currency, &p.inventory),
            None => return Err(RoomError::NotInRoom(participant)),
        };
        // Held across the selections so they do not re-arm the shop stage.
        // With no picks the decision timer declines.
        self.bot_armed = Some((participant, Step::Shop));
        for index in picks {
            let selected = self.handle_intent(participant, Intent::AdvanceStep {
                command: StepCommand::SelectCard { index, selected: true },
            });
            if let Err(err) = selected {
                self.bot_armed = None;
                return Err(err);
            }
        }
        self.arm_bot(participant, BotStage::ShopDecision);
        Ok(())
    }

    fn bot_buy(&mut self, participant: ParticipantId) -> Result<(), RoomError> {
        let cards: Vec<usize> = self
            .game
            .market
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.selected && slot.is_available())
            .map(|(idx, _)| idx)
            .collect();
        if !cards.is_empty()
            && self
                .handle_intent(participant, Intent::Purchase { cards, next: None })
                .is_ok()
        {
            return Ok(());
        }
        self.handle_intent(participant, Intent::DeclinePurchase { next: None })
    }
}
