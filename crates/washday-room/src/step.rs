//! Turn steps: roll, resolve, shop.
//!
//! Every handler checks phase, turn, and step before touching anything,
//! so a rejected command leaves the session unchanged.

use std::collections::HashSet;

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};
use washday_model::{
    ClothingItem, Draw, Effect, EventSlot, MarketSlot, PromptSlot, Resolution, Roll, Step,
};
use washday_protocol::{ParticipantId, Recipient};

use crate::session::Session;
use crate::{Notification, RoomError, turn};

impl Session {
    fn ensure_turn(&self, from: ParticipantId) -> Result<(), RoomError> {
        if !self.game.phase.is_active() {
            return Err(RoomError::InvalidTransition(format!(
                "session is {}",
                self.game.phase
            )));
        }
        if self.game.active != Some(from) {
            return Err(RoomError::NotYourTurn {
                participant: from,
                active: self.game.active,
            });
        }
        Ok(())
    }

    fn ensure_step(&self, step: Step) -> Result<(), RoomError> {
        if self.game.step != step {
            return Err(RoomError::InvalidTransition(format!(
                "expected step {step}, current step is {}",
                self.game.step
            )));
        }
        Ok(())
    }

    fn drawn(&self) -> Option<Draw> {
        self.game.roll.map(|r| r.draw)
    }

    // -- Roll --------------------------------------------------------------

    pub(crate) fn roll(&mut self, from: ParticipantId) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Roll)?;

        let currency = self.rng.random_range(1..=6u32);
        let draw = Draw::from_die(self.rng.random_range(1..=6u32));
        let round = self.game.round;
        if let Some(p) = self.participant_mut(from) {
            p.currency = p.currency.saturating_add(currency);
            let log = p.round_log(round);
            log.rolled = Some(currency);
            log.draw = Some(draw);
        }

        self.game.roll = Some(Roll { currency, draw });
        self.game.step = Step::Resolve;
        debug!(room = %self.code, participant = %from, currency, ?draw, "rolled");

        self.commit_state();
        Ok(())
    }

    // -- Resolve -----------------------------------------------------------

    pub(crate) fn request_prompt(&mut self, from: ParticipantId) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Resolve)?;
        if self.drawn() != Some(Draw::Prompt) {
            return Err(RoomError::InvalidTransition("roll did not draw a prompt".into()));
        }
        if self.game.prompt.prompt.is_some() {
            return Err(RoomError::InvalidTransition("prompt already drawn".into()));
        }

        match self.prompts.draw(&mut self.rng) {
            Some(prompt) => {
                self.game.prompt = PromptSlot {
                    active: true,
                    prompt: Some(prompt.clone()),
                };
                self.notify(Recipient::All, Notification::PromptActivated {
                    participant: from,
                    prompt,
                });
            }
            None => {
                warn!(room = %self.code, "no prompts available, skipping to shop");
                self.enter_shop();
            }
        }

        self.commit_state();
        Ok(())
    }

    pub(crate) fn request_event(&mut self, from: ParticipantId) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Resolve)?;
        if self.drawn() != Some(Draw::Event) {
            return Err(RoomError::InvalidTransition("roll did not draw an event".into()));
        }
        if self.game.event.event.is_some() {
            return Err(RoomError::InvalidTransition("event already drawn".into()));
        }

        match self.events.draw(&mut self.rng) {
            Some(event) => {
                self.game.event = EventSlot {
                    active: true,
                    event: Some(event.clone()),
                };
                self.notify(Recipient::All, Notification::EventActivated {
                    participant: from,
                    event,
                });
            }
            None => {
                warn!(room = %self.code, "no events available, skipping to shop");
                self.enter_shop();
            }
        }

        self.commit_state();
        Ok(())
    }

    pub(crate) fn answer_prompt(&mut self, from: ParticipantId, answer: bool) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Resolve)?;
        let prompt = match &self.game.prompt {
            PromptSlot {
                active: true,
                prompt: Some(prompt),
            } => prompt.clone(),
            _ => return Err(RoomError::InvalidTransition("no active prompt".into())),
        };

        let correct = answer == prompt.answer;
        let round = self.game.round;
        let bonus = self.config.prompt_bonus;
        if let Some(p) = self.participant_mut(from) {
            if correct {
                p.score = p.score.saturating_add(bonus);
            }
            p.round_log(round).resolved = Some(Resolution {
                title: prompt.title.clone(),
                outcome: if correct { "correct" } else { "incorrect" }.into(),
            });
        }
        if !correct {
            self.game.shared_counter = self.game.shared_counter.saturating_add(self.config.prompt_penalty);
        }
        self.game.prompt.active = false;

        self.notify(Recipient::All, Notification::PromptResolved {
            participant: from,
            title: prompt.title,
            given: answer,
            answer: prompt.answer,
            correct,
            reasoning: prompt.reasoning,
        });
        self.enter_shop();
        self.check_end();
        self.commit_state();
        Ok(())
    }

    pub(crate) fn resolve_event(
        &mut self,
        from: ParticipantId,
        target: Option<ParticipantId>,
    ) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Resolve)?;
        let card = match &self.game.event {
            EventSlot {
                active: true,
                event: Some(card),
            } => card.clone(),
            _ => return Err(RoomError::InvalidTransition("no active event".into())),
        };

        // Validate the victim before anything changes.
        let victim = match card.effect {
            Effect::TakeItem => self.pick_victim(from, target)?,
            _ => None,
        };
        self.apply_effect(from, card.effect, victim);

        let round = self.game.round;
        if let Some(p) = self.participant_mut(from) {
            p.round_log(round).resolved = Some(Resolution {
                title: card.title.clone(),
                outcome: card.effect.to_string(),
            });
        }
        self.game.event.active = false;
        debug!(room = %self.code, participant = %from, effect = %card.effect, "event resolved");

        self.enter_shop();
        self.check_end();
        self.commit_state();
        Ok(())
    }

    /// Index of the participant a take-item effect takes from.
    fn pick_victim(
        &self,
        from: ParticipantId,
        target: Option<ParticipantId>,
    ) -> Result<Option<usize>, RoomError> {
        match target {
            Some(t) if t == from => Err(RoomError::InvalidTransition(
                "cannot take an item from yourself".into(),
            )),
            Some(t) => self
                .participants
                .iter()
                .position(|p| p.id == t)
                .map(Some)
                .ok_or(RoomError::NotInRoom(t)),
            None => Ok(self
                .participants
                .iter()
                .position(|p| p.id != from && !p.inventory.is_empty())),
        }
    }

    fn apply_effect(&mut self, from: ParticipantId, effect: Effect, victim: Option<usize>) {
        match effect {
            Effect::SharedCounter(delta) => self.game.adjust_shared_counter(delta),
            Effect::DeferredLaundry(amount) => {
                self.game.pending_laundry = self.game.pending_laundry.saturating_add(amount);
            }
            Effect::Currency(delta) => {
                if let Some(p) = self.participant_mut(from) {
                    p.adjust_currency(delta);
                }
            }
            Effect::DrawItem(count) => {
                for _ in 0..count {
                    let Some(item) = random_item(&self.catalog, &mut self.rng) else {
                        break;
                    };
                    if let Some(p) = self.participant_mut(from) {
                        p.inventory.add(item);
                    }
                }
            }
            Effect::TakeItem => {
                let taken = victim.and_then(|idx| self.participants[idx].inventory.take_latest());
                if let (Some(item), Some(p)) = (taken, self.participant_mut(from)) {
                    p.inventory.add(item);
                }
            }
            Effect::Discard => {
                if let Some(p) = self.participant_mut(from) {
                    p.inventory.remove_lowest_value();
                }
            }
        }
    }

    fn enter_shop(&mut self) {
        self.game.step = Step::Shop;
        self.refill_market(false);
    }

    /// Puts a fresh card in every empty slot, or in every slot when
    /// `full` is set.
    pub(crate) fn refill_market(&mut self, full: bool) {
        for idx in 0..self.game.market.len() {
            if full || self.game.market[idx].card.is_none() {
                self.game.market[idx] = MarketSlot {
                    card: random_item(&self.catalog, &mut self.rng),
                    selected: false,
                    purchased: false,
                };
            }
        }
    }

    // -- Display -----------------------------------------------------------

    /// Sets a cosmetic field for the turn in progress. Only the active
    /// participant may write, within the room's size limits.
    pub(crate) fn set_display(
        &mut self,
        from: ParticipantId,
        key: String,
        value: serde_json::Value,
    ) -> Result<(), RoomError> {
        self.ensure_turn(from)?;

        let size = key.len() + value.to_string().len();
        if size > self.config.display_max_bytes {
            return Err(RoomError::InvalidTransition(format!(
                "display field is {size} bytes, limit is {}",
                self.config.display_max_bytes
            )));
        }
        if !self.game.display.contains_key(&key) && self.game.display.len() >= self.config.display_max_keys {
            return Err(RoomError::InvalidTransition(format!(
                "display holds at most {} fields",
                self.config.display_max_keys
            )));
        }

        self.game.display.insert(key, value);
        self.commit_state();
        Ok(())
    }

    // -- Shop --------------------------------------------------------------

    pub(crate) fn select_card(
        &mut self,
        from: ParticipantId,
        index: usize,
        selected: bool,
    ) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Shop)?;
        let slot = self
            .game
            .market
            .get_mut(index)
            .filter(|s| s.is_available())
            .ok_or_else(|| RoomError::InvalidTransition(format!("market slot {index} is not available")))?;
        slot.selected = selected;

        self.commit_state();
        Ok(())
    }

    pub(crate) fn purchase(
        &mut self,
        from: ParticipantId,
        cards: &[usize],
        next: Option<ParticipantId>,
    ) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Shop)?;

        let mut seen = HashSet::new();
        let mut total: u32 = 0;
        for &index in cards {
            if !seen.insert(index) {
                return Err(RoomError::InvalidTransition(format!("market slot {index} listed twice")));
            }
            let price = self
                .game
                .market
                .get(index)
                .filter(|s| s.is_available())
                .and_then(|s| s.card.as_ref())
                .map(|c| c.price)
                .ok_or_else(|| RoomError::InvalidTransition(format!("market slot {index} is not available")))?;
            total = total.saturating_add(price);
        }
        let available = self.participant(from).map_or(0, |p| p.currency);
        if total > available {
            return Err(RoomError::InsufficientFunds {
                needed: total,
                available,
            });
        }

        let items: Vec<ClothingItem> = cards
            .iter()
            .filter_map(|&index| {
                let slot = &mut self.game.market[index];
                slot.purchased = true;
                slot.selected = false;
                slot.card.take()
            })
            .collect();
        let round = self.game.round;
        if let Some(p) = self.participant_mut(from) {
            p.currency -= total;
            for item in items {
                p.score = p.score.saturating_add(item.value);
                p.round_log(round).purchases.push(item.clone());
                p.inventory.add(item);
            }
        }
        info!(room = %self.code, participant = %from, cards = cards.len(), total, "purchase");

        if !self.check_end() {
            self.finish_turn(next);
        }
        self.commit_state();
        Ok(())
    }

    pub(crate) fn decline_purchase(
        &mut self,
        from: ParticipantId,
        next: Option<ParticipantId>,
    ) -> Result<(), RoomError> {
        self.ensure_turn(from)?;
        self.ensure_step(Step::Shop)?;
        self.finish_turn(next);
        self.commit_state();
        Ok(())
    }

    // -- Turn change -------------------------------------------------------

    /// Passes the turn on. Applies the weekly schedule when a round
    /// completes. Callers commit.
    pub(crate) fn finish_turn(&mut self, requested: Option<ParticipantId>) {
        self.cancel_bot_timers();
        self.game.reset_turn();

        let Some(adv) = turn::advance(&self.participants, self.game.active, requested) else {
            self.game.active = None;
            debug!(room = %self.code, "nobody left to play");
            return;
        };
        self.game.active = Some(adv.next);
        self.game.turn_index = adv.index;

        if adv.wrapped {
            self.game.round += 1;
            let round = self.game.round;
            if self.config.is_new_week(round) {
                self.refill_market(true);
            }
            if self.config.is_wash_day(round) {
                let increase = self
                    .config
                    .wash_day_penalty
                    .saturating_add(self.game.pending_laundry);
                self.game.shared_counter = self.game.shared_counter.saturating_add(increase);
                self.game.pending_laundry = 0;
                info!(room = %self.code, round, increase, "wash day");
            }
        }

        self.notify(Recipient::All, Notification::TurnAdvanced {
            active: adv.next,
            round: self.game.round,
            turn_index: adv.index,
            wash_day: self.config.is_wash_day(self.game.round),
        });
        self.check_end();
    }
}

/// A uniformly random catalog item.
fn random_item(catalog: &[ClothingItem], rng: &mut StdRng) -> Option<ClothingItem> {
    if catalog.is_empty() {
        return None;
    }
    catalog.get(rng.random_range(0..catalog.len())).cloned()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use washday_model::{BuiltinContent, Phase};
    use washday_protocol::RoomCode;

    use super::*;
    use crate::{Intent, RoomConfig, StepCommand};

    /// A started session with two humans; the first one is active.
    fn started() -> (Session, ParticipantId, ParticipantId) {
        let content = BuiltinContent::load().unwrap();
        let mut s = Session::new(
            RoomCode::from_generated("STEPAA".into()),
            RoomConfig::default(),
            &content,
            StdRng::seed_from_u64(3),
        );
        let (a, _) = s.join_human(None).unwrap();
        let (b, _) = s.join_human(None).unwrap();
        s.handle_intent(a, Intent::Start).unwrap();
        s.take_effects();
        (s, a, b)
    }

    fn step(command: StepCommand) -> Intent {
        Intent::AdvanceStep { command }
    }

    #[test]
    fn test_roll_adds_currency_and_moves_to_resolve() {
        let (mut s, a, _) = started();
        s.handle_intent(a, step(StepCommand::Roll)).unwrap();

        let roll = s.state().roll.unwrap();
        assert!((1..=6).contains(&roll.currency));
        assert_eq!(s.participant(a).unwrap().currency, roll.currency);
        assert_eq!(s.state().step, Step::Resolve);
    }

    #[test]
    fn test_out_of_turn_is_silent() {
        let (mut s, _, b) = started();
        let version = s.state().version;
        let err = s.handle_intent(b, step(StepCommand::Roll)).unwrap_err();
        assert!(matches!(err, RoomError::NotYourTurn { .. }));
        assert_eq!(s.state().version, version);
        assert!(s.take_effects().deliveries.is_empty());
    }

    #[test]
    fn test_wrong_step_is_rejected_with_notification() {
        let (mut s, a, _) = started();
        let err = s.handle_intent(a, Intent::DeclinePurchase { next: None }).unwrap_err();
        assert!(matches!(err, RoomError::InvalidTransition(_)));
        let deliveries = s.take_effects().deliveries;
        assert!(
            deliveries
                .iter()
                .any(|(to, n)| *to == a && matches!(n, Notification::Rejected { .. }))
        );
    }

    #[test]
    fn test_resolve_path_reaches_shop() {
        let (mut s, a, _) = started();
        s.handle_intent(a, step(StepCommand::Roll)).unwrap();

        match s.state().roll.unwrap().draw {
            Draw::Prompt => {
                assert!(s.handle_intent(a, Intent::RequestEvent).is_err());
                s.handle_intent(a, Intent::RequestPrompt).unwrap();
                assert!(s.state().prompt.active);
                s.handle_intent(a, step(StepCommand::AnswerPrompt { answer: true }))
                    .unwrap();
                assert!(!s.state().prompt.active);
            }
            Draw::Event => {
                assert!(s.handle_intent(a, Intent::RequestPrompt).is_err());
                s.handle_intent(a, Intent::RequestEvent).unwrap();
                assert!(s.state().event.active);
                s.handle_intent(a, step(StepCommand::ResolveEvent { target: None }))
                    .unwrap();
                assert!(!s.state().event.active);
            }
        }
        assert_eq!(s.state().step, Step::Shop);
        assert!(s.state().market.iter().all(|slot| slot.card.is_some()));
    }

    #[test]
    fn test_take_item_from_self_rejected() {
        let (mut s, a, _) = started();
        s.game.step = Step::Resolve;
        s.game.roll = Some(Roll {
            currency: 1,
            draw: Draw::Event,
        });
        s.game.event = EventSlot {
            active: true,
            event: Some(washday_model::EventCard {
                name: "partyoutfit".into(),
                title: "Party Outfit".into(),
                statement: String::new(),
                effect: Effect::TakeItem,
            }),
        };
        let err = s
            .handle_intent(a, step(StepCommand::ResolveEvent { target: Some(a) }))
            .unwrap_err();
        assert!(matches!(err, RoomError::InvalidTransition(_)));
        assert!(s.state().event.active, "state unchanged after rejection");
    }

    #[test]
    fn test_decline_advances_turn() {
        let (mut s, a, b) = started();
        s.game.step = Step::Shop;
        s.handle_intent(a, Intent::DeclinePurchase { next: Some(b) }).unwrap();

        assert_eq!(s.state().active, Some(b));
        assert_eq!(s.state().step, Step::Roll);
        assert_eq!(s.state().round, 0);
        assert!(s.state().roll.is_none());
    }

    #[test]
    fn test_wash_day_adds_pending_laundry() {
        let (mut s, a, b) = started();
        s.game.round = 5;
        s.game.pending_laundry = 2;
        s.game.active = Some(b);
        s.game.step = Step::Shop;

        s.handle_intent(b, Intent::DeclinePurchase { next: None }).unwrap();
        assert_eq!(s.state().active, Some(a));
        assert_eq!(s.state().round, 6);
        assert_eq!(s.state().shared_counter, 3);
        assert_eq!(s.state().pending_laundry, 0);
    }

    #[test]
    fn test_select_only_available_slots() {
        let (mut s, a, _) = started();
        s.game.step = Step::Shop;
        s.game.market[1].card = None;

        assert!(s.handle_intent(a, step(StepCommand::SelectCard { index: 0, selected: true })).is_ok());
        assert!(s.state().market[0].selected);
        assert!(s.handle_intent(a, step(StepCommand::SelectCard { index: 1, selected: true })).is_err());
        assert!(s.handle_intent(a, step(StepCommand::SelectCard { index: 99, selected: true })).is_err());
    }

    fn display(key: &str, value: serde_json::Value) -> Intent {
        step(StepCommand::Display {
            key: key.into(),
            value,
        })
    }

    #[test]
    fn test_display_only_from_active_participant() {
        let (mut s, a, b) = started();
        let version = s.state().version;

        let err = s.handle_intent(b, display("emote", serde_json::json!("wave"))).unwrap_err();
        assert!(matches!(err, RoomError::NotYourTurn { .. }));
        assert!(s.state().display.is_empty());
        assert_eq!(s.state().version, version);

        s.handle_intent(a, display("emote", serde_json::json!("wave"))).unwrap();
        assert_eq!(s.state().display["emote"], "wave");
        assert_eq!(s.state().version, version + 1);
    }

    #[test]
    fn test_display_rejects_writes_over_limits() {
        let (mut s, a, _) = started();
        let max_keys = s.config.display_max_keys;
        for i in 0..max_keys {
            s.handle_intent(a, display(&format!("k{i}"), serde_json::json!(i))).unwrap();
        }
        s.take_effects();
        let version = s.state().version;

        let err = s.handle_intent(a, display("one-more", serde_json::json!(1))).unwrap_err();
        assert!(matches!(err, RoomError::InvalidTransition(_)));
        assert_eq!(s.state().display.len(), max_keys);
        assert_eq!(s.state().version, version);
        assert!(
            s.take_effects()
                .deliveries
                .iter()
                .any(|(to, n)| *to == a && matches!(n, Notification::Rejected { .. }))
        );

        // Overwriting an existing field stays allowed at the key limit.
        s.handle_intent(a, display("k0", serde_json::json!("again"))).unwrap();

        let huge = "x".repeat(s.config.display_max_bytes);
        let err = s.handle_intent(a, display("k1", serde_json::json!(huge))).unwrap_err();
        assert!(matches!(err, RoomError::InvalidTransition(_)));
        assert_eq!(s.state().display["k1"], 1);
    }

    #[test]
    fn test_ended_session_rejects_mutations() {
        let (mut s, a, _) = started();
        s.game.shared_counter = s.game.shared_counter_max;
        s.handle_intent(a, Intent::CheckEndCondition).unwrap();
        assert_eq!(s.state().phase, Phase::Ended);

        assert!(matches!(
            s.handle_intent(a, step(StepCommand::Roll)),
            Err(RoomError::InvalidTransition(_))
        ));
        assert!(s.handle_intent(a, Intent::Sync { last_seen_version: 0 }).is_ok());
    }
}
