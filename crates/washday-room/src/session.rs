//! The per-room state machine.
//!
//! [`Session`] is synchronous: every call validates, mutates, and records
//! what the outside world should do as [`Effects`]: notifications for
//! connected humans, timer operations, a finished-session record. The
//! room actor drains the effects after each call and carries them out,
//! which keeps all game rules testable without a runtime.

use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, info};
use washday_model::{
    ClothingItem, ContentProvider, Deck, EndReason, EventCard, GameState, Participant, Phase,
    Prompt, Step,
};
use washday_protocol::{ParticipantId, Recipient, RoomCode};

use crate::bot::BotStage;
use crate::sync::{Routed, SyncManager, now_millis};
use crate::{Intent, Notification, RoomConfig, RoomError, RoomSnapshot, SessionRecord, StepCommand, end};

/// Longest accepted display name, in characters.
const MAX_NAME_LEN: usize = 24;

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Keys of the deadlines a room keeps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// A bot's next move.
    Bot {
        participant: ParticipantId,
        stage: BotStage,
    },
    /// Deletion of a room nobody is connected to.
    Cleanup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOp {
    /// Schedule `key`, replacing any pending deadline for it.
    Arm { key: TimerKey, delay: Duration },
    Cancel(TimerKey),
    /// Cancel every bot timer.
    CancelBots,
}

/// What the room actor must do after a session call.
#[derive(Debug, Default)]
pub struct Effects {
    /// Notifications, already resolved to connected humans.
    pub deliveries: Vec<Routed>,
    pub timers: Vec<TimerOp>,
    /// Set once, when the session ends.
    pub finalized: Option<SessionRecord>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    pub(crate) code: RoomCode,
    pub(crate) config: RoomConfig,
    pub(crate) participants: Vec<Participant>,
    pub(crate) game: GameState,
    pub(crate) sync: SyncManager,
    pub(crate) prompts: Deck<Prompt>,
    pub(crate) events: Deck<EventCard>,
    pub(crate) catalog: Vec<ClothingItem>,
    pub(crate) rng: StdRng,
    pub(crate) effects: Effects,
    /// The bot timer currently pending, as the bot and the step it acts in.
    pub(crate) bot_armed: Option<(ParticipantId, Step)>,
    next_id: u64,
    started_at: Option<u64>,
    cleanup_armed: bool,
}

impl Session {
    /// A fresh session in the lobby. Nobody is connected yet, so the
    /// cleanup timer starts armed.
    pub fn new(code: RoomCode, config: RoomConfig, content: &dyn ContentProvider, rng: StdRng) -> Self {
        let game = GameState::new(config.market_slots, config.shared_counter_max);
        let sync = SyncManager::new(config.replay_window);
        let mut session = Self {
            code,
            participants: Vec::new(),
            game,
            sync,
            prompts: Deck::new(content.prompts().to_vec()),
            events: Deck::new(content.events().to_vec()),
            catalog: content.catalog().to_vec(),
            rng,
            effects: Effects::default(),
            bot_armed: None,
            next_id: 1,
            started_at: None,
            cleanup_armed: false,
            config,
        };
        session.arm_cleanup_if_idle();
        session
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn state(&self) -> &GameState {
        &self.game
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub(crate) fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room: self.code.clone(),
            state: self.game.clone(),
            participants: self.participants.clone(),
        }
    }

    /// Number of notifications held for a backgrounded tab.
    pub fn deferred_len(&self) -> usize {
        self.sync.deferred_len()
    }

    /// Hands over everything accumulated since the last call.
    pub fn take_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }

    /// Returns `true` if at least one human has a live connection.
    pub fn any_human_connected(&self) -> bool {
        self.participants.iter().any(|p| p.is_human() && p.active)
    }

    // -- Membership --------------------------------------------------------

    /// Seats a new human. Returns their id and reconnect token.
    pub fn join_human(&mut self, name: Option<String>) -> Result<(ParticipantId, String), RoomError> {
        if self.game.phase == Phase::Ended {
            return Err(RoomError::InvalidTransition("session has ended".into()));
        }
        self.ensure_seat_free()?;

        let id = self.allocate_id();
        let token = generate_token(&mut self.rng);
        let name = self.pick_name(name);
        let mut participant = Participant::human(id, name, token.clone(), &self.config.inventory);
        participant.currency = self.config.starting_currency;
        self.participants.push(participant);

        if self.game.phase == Phase::Lobby {
            self.game.phase = Phase::Room;
        }
        self.cancel_cleanup();
        info!(room = %self.code, participant = %id, seats = self.participants.len(), "human joined");

        self.commit_participants();
        self.send_to(id, Notification::Snapshot {
            snapshot: self.snapshot(),
        });
        self.resume_if_idle();
        self.sync_bot_timer();
        Ok((id, token))
    }

    /// Resumes a human's seat after a dropped connection.
    pub fn reconnect(&mut self, id: ParticipantId, token: &str) -> Result<(), RoomError> {
        let participant = self.participant_mut(id).ok_or(RoomError::NotInRoom(id))?;
        if participant.token() != Some(token) {
            return Err(RoomError::InvalidToken(id));
        }
        participant.active = true;
        participant.tab_active = true;

        self.cancel_cleanup();
        info!(room = %self.code, participant = %id, "human reconnected");

        self.commit_participants();
        let replay = self.sync.on_reconnect(&self.participants, id);
        self.send_to(id, Notification::ReconnectSync {
            snapshot: self.snapshot(),
        });
        if let Some(notification) = replay {
            debug!(room = %self.code, participant = %id, "replaying last turn event");
            self.send_to(id, notification);
        }

        self.resume_if_idle();
        // A bot that was suspended, or whose delay was pending, starts its
        // current step over.
        self.bot_armed = None;
        self.sync_bot_timer();
        Ok(())
    }

    /// Marks a human's connection as dropped. The seat is kept.
    pub fn disconnect(&mut self, id: ParticipantId) {
        let Some(participant) = self.participant_mut(id) else {
            return;
        };
        if participant.is_bot() || !participant.active {
            return;
        }
        participant.active = false;
        info!(room = %self.code, participant = %id, "human disconnected");

        if self.game.phase.is_active() && self.game.active == Some(id) && self.any_human_connected() {
            debug!(room = %self.code, participant = %id, "skipping turn of disconnected participant");
            self.finish_turn(None);
            self.commit_state();
        }
        self.commit_participants();
        self.arm_cleanup_if_idle();
        self.sync_bot_timer();
    }

    /// Gives up a human's seat for good.
    pub fn leave(&mut self, id: ParticipantId) -> Result<(), RoomError> {
        let participant = self.participant_mut(id).ok_or(RoomError::NotInRoom(id))?;
        participant.active = false;

        if self.game.phase.is_active() && self.game.active == Some(id) {
            self.finish_turn(None);
            self.commit_state();
        }
        self.participants.retain(|p| p.id != id);
        info!(room = %self.code, participant = %id, seats = self.participants.len(), "participant left");

        self.commit_participants();
        self.arm_cleanup_if_idle();
        self.sync_bot_timer();
        Ok(())
    }

    // -- Intents -----------------------------------------------------------

    /// Applies an intent from a human or a bot.
    ///
    /// Rejections leave the state untouched. Out-of-turn actions are
    /// dropped quietly; any other rejection is reported to the sender.
    pub fn handle_intent(&mut self, from: ParticipantId, intent: Intent) -> Result<(), RoomError> {
        let result = self.apply_intent(from, intent);
        match &result {
            Ok(()) => self.sync_bot_timer(),
            Err(err @ RoomError::NotYourTurn { .. }) => {
                debug!(room = %self.code, participant = %from, %err, "out-of-turn intent ignored");
            }
            Err(err) => {
                debug!(room = %self.code, participant = %from, %err, "intent rejected");
                self.send_to(from, Notification::Rejected {
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    fn apply_intent(&mut self, from: ParticipantId, intent: Intent) -> Result<(), RoomError> {
        if self.participant(from).is_none() {
            return Err(RoomError::NotInRoom(from));
        }
        match intent {
            Intent::Start => self.start(from),
            Intent::AddBot { name } => self.add_bot(name),
            Intent::Rename { name } => self.rename(from, name),
            Intent::AdvanceStep { command } => match command {
                StepCommand::Roll => self.roll(from),
                StepCommand::AnswerPrompt { answer } => self.answer_prompt(from, answer),
                StepCommand::ResolveEvent { target } => self.resolve_event(from, target),
                StepCommand::SelectCard { index, selected } => self.select_card(from, index, selected),
                StepCommand::Display { key, value } => self.set_display(from, key, value),
            },
            Intent::RequestPrompt => self.request_prompt(from),
            Intent::RequestEvent => self.request_event(from),
            Intent::Purchase { cards, next } => self.purchase(from, &cards, next),
            Intent::DeclinePurchase { next } => self.decline_purchase(from, next),
            Intent::TabVisibility { active } => {
                self.set_tab_visibility(from, active);
                Ok(())
            }
            Intent::CheckEndCondition => {
                if self.check_end() {
                    self.commit_state();
                }
                Ok(())
            }
            Intent::Sync { last_seen_version } => {
                self.catch_up(from, last_seen_version);
                Ok(())
            }
            Intent::Relay { name, payload } => {
                self.notify(Recipient::AllExcept(from), Notification::Relay { from, name, payload });
                Ok(())
            }
        }
    }

    fn start(&mut self, from: ParticipantId) -> Result<(), RoomError> {
        match self.game.phase {
            Phase::Active => {
                debug!(room = %self.code, participant = %from, "session already started");
                return Ok(());
            }
            Phase::Ended => return Err(RoomError::InvalidTransition("session has ended".into())),
            Phase::Lobby | Phase::Room => {}
        }
        if !self.game.phase.can_transition_to(Phase::Active) {
            return Err(RoomError::InvalidTransition(format!(
                "cannot start from {}",
                self.game.phase
            )));
        }
        if !self.any_human_connected() {
            return Err(RoomError::InvalidTransition("no connected human".into()));
        }

        self.game.phase = Phase::Active;
        self.game.round = 0;
        self.started_at = Some(now_millis());
        self.refill_market(true);
        info!(room = %self.code, participants = self.participants.len(), "session started");

        // Hands the first turn out and commits.
        self.resume_if_idle();
        Ok(())
    }

    fn add_bot(&mut self, name: Option<String>) -> Result<(), RoomError> {
        if self.game.phase != Phase::Room {
            return Err(RoomError::InvalidTransition(
                "bots can only be added before the session starts".into(),
            ));
        }
        self.ensure_seat_free()?;

        let id = self.allocate_id();
        let name = self.pick_name(name);
        let mut bot = Participant::bot(id, name, &self.config.inventory);
        bot.currency = self.config.starting_currency;
        self.participants.push(bot);
        info!(room = %self.code, participant = %id, "bot added");

        self.commit_participants();
        Ok(())
    }

    fn rename(&mut self, from: ParticipantId, name: String) -> Result<(), RoomError> {
        if self.game.phase == Phase::Ended {
            return Err(RoomError::InvalidTransition("session has ended".into()));
        }
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(RoomError::InvalidTransition(format!(
                "name must be 1 to {MAX_NAME_LEN} characters"
            )));
        }
        let name = name.to_string();
        if let Some(p) = self.participant_mut(from) {
            p.name = name;
        }
        self.commit_participants();
        Ok(())
    }

    fn set_tab_visibility(&mut self, from: ParticipantId, active: bool) {
        let Some(p) = self.participant_mut(from) else {
            return;
        };
        if p.is_bot() {
            return;
        }
        p.tab_active = active;
        if active {
            self.sync.flush(from, &mut self.effects.deliveries);
        }
    }

    fn catch_up(&mut self, from: ParticipantId, last_seen: u64) {
        let reply = if self.sync.is_behind(last_seen, &self.game) {
            Notification::Snapshot {
                snapshot: self.snapshot(),
            }
        } else {
            Notification::Ack {
                version: self.game.version,
            }
        };
        self.send_to(from, reply);
    }

    // -- Timers ------------------------------------------------------------

    /// Handles a timer that reached its deadline.
    pub fn fire(&mut self, key: TimerKey) {
        match key {
            TimerKey::Cleanup => {
                self.cleanup_armed = false;
                info!(room = %self.code, "cleanup grace period expired");
                self.abandon();
            }
            TimerKey::Bot { participant, stage } => {
                if let Err(err) = self.fire_bot(participant, stage) {
                    debug!(room = %self.code, participant = %participant, ?stage, %err, "bot action dropped");
                }
                self.sync_bot_timer();
            }
        }
    }

    fn arm_cleanup_if_idle(&mut self) {
        if self.cleanup_armed || self.any_human_connected() {
            return;
        }
        self.cleanup_armed = true;
        self.effects.timers.push(TimerOp::Arm {
            key: TimerKey::Cleanup,
            delay: self.config.cleanup_grace,
        });
        info!(
            room = %self.code,
            grace_secs = self.config.cleanup_grace.as_secs(),
            "no connected humans, cleanup scheduled"
        );
    }

    fn cancel_cleanup(&mut self) {
        if self.cleanup_armed {
            self.cleanup_armed = false;
            self.effects.timers.push(TimerOp::Cancel(TimerKey::Cleanup));
            debug!(room = %self.code, "cleanup cancelled");
        }
    }

    pub(crate) fn cancel_bot_timers(&mut self) {
        self.bot_armed = None;
        self.effects.timers.push(TimerOp::CancelBots);
    }

    // -- Ending ------------------------------------------------------------

    /// Evaluates end conditions and ends the session if one holds.
    pub(crate) fn check_end(&mut self) -> bool {
        if !self.game.phase.is_active() {
            return false;
        }
        match end::evaluate(&self.game, &self.participants) {
            Some(reason) => {
                self.end_session(reason);
                true
            }
            None => false,
        }
    }

    /// Ends a started session as abandoned. No-op in any other phase.
    pub fn abandon(&mut self) {
        if self.game.phase.is_active() {
            self.end_session(EndReason::Abandoned);
            self.commit_state();
        }
    }

    fn end_session(&mut self, reason: EndReason) {
        if !self.game.phase.can_transition_to(Phase::Ended) {
            return;
        }
        self.game.phase = Phase::Ended;
        self.game.end_reason = Some(reason);
        self.cancel_bot_timers();

        let ended_at = now_millis();
        let record = end::build_record(
            &self.code,
            &self.game,
            &self.participants,
            self.started_at.unwrap_or(ended_at),
            ended_at,
            reason,
        );
        info!(room = %self.code, %reason, rounds = self.game.round, winner = ?record.winner, "session ended");

        self.notify(Recipient::All, Notification::SessionEnded {
            reason,
            winner: record.winner,
        });
        self.effects.finalized = Some(record);
    }

    // -- Helpers -----------------------------------------------------------

    /// Gives the turn to the first in order if an active session has
    /// nobody playing (everyone had left or dropped).
    fn resume_if_idle(&mut self) {
        if !self.game.phase.is_active() || self.game.active.is_some() {
            return;
        }
        if let Some(first) = crate::turn::first_turn(&self.participants) {
            self.game.reset_turn();
            self.game.active = Some(first.next);
            self.game.turn_index = first.index;
            self.notify(Recipient::All, Notification::TurnAdvanced {
                active: first.next,
                round: self.game.round,
                turn_index: first.index,
                wash_day: self.config.is_wash_day(self.game.round),
            });
            self.commit_state();
        }
    }

    /// Records a change to the game state and broadcasts it.
    pub(crate) fn commit_state(&mut self) {
        self.sync.stamp(&mut self.game);
        let update = Notification::StateUpdated {
            state: self.game.clone(),
            participants: self.participants.clone(),
        };
        self.notify(Recipient::All, update);
    }

    /// Records a membership change and broadcasts it.
    fn commit_participants(&mut self) {
        self.sync.stamp(&mut self.game);
        let update = Notification::ParticipantsUpdated {
            version: self.game.version,
            participants: self.participants.clone(),
        };
        self.notify(Recipient::All, update);
    }

    pub(crate) fn notify(&mut self, to: Recipient, notification: Notification) {
        self.sync
            .route(&self.participants, to, notification, &mut self.effects.deliveries);
    }

    /// Sends straight to one connected human, bypassing the visibility
    /// queue.
    fn send_to(&mut self, id: ParticipantId, notification: Notification) {
        if self.participant(id).is_some_and(|p| p.is_human() && p.active) {
            self.effects.deliveries.push((id, notification));
        }
    }

    fn ensure_seat_free(&self) -> Result<(), RoomError> {
        if self.participants.len() >= self.config.max_participants {
            return Err(RoomError::RoomFull(self.code.clone()));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> ParticipantId {
        let id = ParticipantId(self.next_id);
        self.next_id += 1;
        id
    }

    fn pick_name(&mut self, requested: Option<String>) -> String {
        match requested.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.chars().take(MAX_NAME_LEN).collect(),
            _ => generate_name(&mut self.rng),
        }
    }
}

/// 128 random bits as 32 lowercase hex characters.
fn generate_token(rng: &mut StdRng) -> String {
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A four-character placeholder name.
fn generate_name(rng: &mut StdRng) -> String {
    (0..4)
        .map(|_| {
            let idx = rng.random_range(0..RoomCode::ALPHABET.len());
            char::from(RoomCode::ALPHABET[idx])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use washday_model::BuiltinContent;

    use super::*;

    fn session() -> Session {
        let content = BuiltinContent::load().unwrap();
        Session::new(
            RoomCode::from_generated("TESTAA".into()),
            RoomConfig::default(),
            &content,
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_new_session_arms_cleanup() {
        let mut s = session();
        let effects = s.take_effects();
        assert!(effects.timers.contains(&TimerOp::Arm {
            key: TimerKey::Cleanup,
            delay: Duration::from_secs(300),
        }));
        assert_eq!(s.state().phase, Phase::Lobby);
    }

    #[test]
    fn test_first_join_moves_to_room_and_cancels_cleanup() {
        let mut s = session();
        s.take_effects();
        let (id, token) = s.join_human(Some("Ada".into())).unwrap();

        assert_eq!(s.state().phase, Phase::Room);
        assert_eq!(token.len(), 32);
        assert_eq!(s.participant(id).unwrap().name, "Ada");

        let effects = s.take_effects();
        assert!(effects.timers.contains(&TimerOp::Cancel(TimerKey::Cleanup)));
        assert!(
            effects
                .deliveries
                .iter()
                .any(|(to, n)| *to == id && matches!(n, Notification::Snapshot { .. }))
        );
    }

    #[test]
    fn test_generated_name_when_missing() {
        let mut s = session();
        let (id, _) = s.join_human(Some("   ".into())).unwrap();
        let name = &s.participant(id).unwrap().name;
        assert_eq!(name.len(), 4);
        assert!(name.bytes().all(|b| RoomCode::ALPHABET.contains(&b)));
    }

    #[test]
    fn test_room_full() {
        let mut s = session();
        let (host, _) = s.join_human(None).unwrap();
        for _ in 0..3 {
            s.handle_intent(host, Intent::AddBot { name: None }).unwrap();
        }
        assert!(matches!(s.join_human(None), Err(RoomError::RoomFull(_))));
        assert!(matches!(
            s.handle_intent(host, Intent::AddBot { name: None }),
            Err(RoomError::RoomFull(_))
        ));
    }

    #[test]
    fn test_reconnect_requires_token() {
        let mut s = session();
        let (id, token) = s.join_human(None).unwrap();
        s.disconnect(id);
        assert_eq!(s.reconnect(id, "wrong"), Err(RoomError::InvalidToken(id)));
        assert_eq!(s.reconnect(ParticipantId(42), &token), Err(RoomError::NotInRoom(ParticipantId(42))));
        assert!(s.reconnect(id, &token).is_ok());
        assert!(s.participant(id).unwrap().active);
    }

    #[test]
    fn test_last_disconnect_arms_cleanup_once() {
        let mut s = session();
        let (a, _) = s.join_human(None).unwrap();
        let (b, _) = s.join_human(None).unwrap();
        s.take_effects();

        s.disconnect(a);
        assert!(s.take_effects().timers.is_empty());
        s.disconnect(b);
        s.disconnect(b);
        let arms = s
            .take_effects()
            .timers
            .into_iter()
            .filter(|op| matches!(op, TimerOp::Arm { key: TimerKey::Cleanup, .. }))
            .count();
        assert_eq!(arms, 1);
    }

    #[test]
    fn test_rename_validates() {
        let mut s = session();
        let (id, _) = s.join_human(None).unwrap();
        assert!(s.handle_intent(id, Intent::Rename { name: "  Grace ".into() }).is_ok());
        assert_eq!(s.participant(id).unwrap().name, "Grace");
        assert!(matches!(
            s.handle_intent(id, Intent::Rename { name: String::new() }),
            Err(RoomError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_relay_goes_to_everyone_else() {
        let mut s = session();
        let (a, _) = s.join_human(None).unwrap();
        let (b, _) = s.join_human(None).unwrap();
        s.take_effects();

        s.handle_intent(a, Intent::Relay {
            name: "wave".into(),
            payload: serde_json::json!({ "x": 1 }),
        })
        .unwrap();
        let deliveries = s.take_effects().deliveries;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, b);
        assert!(matches!(&deliveries[0].1, Notification::Relay { from, .. } if *from == a));
    }

    #[test]
    fn test_sync_acks_when_current() {
        let mut s = session();
        let (id, _) = s.join_human(None).unwrap();
        s.take_effects();
        let version = s.state().version;

        s.handle_intent(id, Intent::Sync { last_seen_version: version }).unwrap();
        let deliveries = s.take_effects().deliveries;
        assert!(matches!(deliveries[0].1, Notification::Ack { version: v } if v == version));

        s.handle_intent(id, Intent::Sync { last_seen_version: 0 }).unwrap();
        let deliveries = s.take_effects().deliveries;
        assert!(matches!(deliveries[0].1, Notification::Snapshot { .. }));
        assert_eq!(s.state().version, version, "catch-up does not change the version");
    }
}
