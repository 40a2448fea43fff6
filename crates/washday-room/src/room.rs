//! Room actor: an isolated Tokio task that owns one session.
//!
//! The outside world talks to a room only through its command channel.
//! The actor applies each command to the [`Session`], then carries out the
//! resulting effects: it delivers notifications, keeps the room's timers,
//! and hands finished sessions to the persistence sink. Timer deadlines
//! are awaited in the same loop as commands, so a bot move and a human
//! intent never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use washday_model::Phase;
use washday_protocol::{ParticipantId, RoomCode};
use washday_timer::Timers;

use crate::session::{Session, TimerKey, TimerOp};
use crate::{Intent, Notification, PersistenceSink, RoomError, RoomSnapshot};

/// Channel for delivering notifications to one participant's connection.
pub type ParticipantSender = mpsc::UnboundedSender<Notification>;

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    Join {
        name: Option<String>,
        sender: ParticipantSender,
        reply: oneshot::Sender<Result<Seat, RoomError>>,
    },

    Reconnect {
        participant: ParticipantId,
        token: String,
        sender: ParticipantSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// The connection behind `sender` dropped. Ignored if the participant
    /// has reconnected on another channel since.
    Disconnect {
        participant: ParticipantId,
        sender: ParticipantSender,
    },

    Leave {
        participant: ParticipantId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    Intent {
        from: ParticipantId,
        intent: Intent,
    },

    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },

    Info {
        reply: oneshot::Sender<RoomInfo>,
    },

    /// Ends the session as abandoned and stops the actor.
    Shutdown,
}

/// A seat handed to a joining human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub participant: ParticipantId,
    /// Presented on reconnect.
    pub token: String,
}

/// Room metadata, without the game state.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub code: RoomCode,
    pub phase: Phase,
    /// Seats taken, humans and bots.
    pub participants: usize,
    pub humans_connected: usize,
    pub version: u64,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    code: RoomCode,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.code.clone()))
    }

    /// Seats a new human whose notifications go to `sender`.
    pub async fn join(&self, name: Option<String>, sender: ParticipantSender) -> Result<Seat, RoomError> {
        self.request(|reply| RoomCommand::Join { name, sender, reply })
            .await?
    }

    /// Resumes a seat on a new connection.
    pub async fn reconnect(
        &self,
        participant: ParticipantId,
        token: String,
        sender: ParticipantSender,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Reconnect {
            participant,
            token,
            sender,
            reply,
        })
        .await?
    }

    /// Reports a dropped connection (fire-and-forget).
    pub async fn disconnect(&self, participant: ParticipantId, sender: ParticipantSender) -> Result<(), RoomError> {
        self.send(RoomCommand::Disconnect { participant, sender }).await
    }

    pub async fn leave(&self, participant: ParticipantId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Leave { participant, reply })
            .await?
    }

    /// Delivers an intent (fire-and-forget). Rejections come back as
    /// notifications.
    pub async fn send_intent(&self, from: ParticipantId, intent: Intent) -> Result<(), RoomError> {
        self.send(RoomCommand::Intent { from, intent }).await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor<S> {
    session: Session,
    timers: Timers<TimerKey>,
    senders: HashMap<ParticipantId, ParticipantSender>,
    sink: Arc<S>,
    /// Told the room's code when cleanup removes it.
    expired: mpsc::UnboundedSender<RoomCode>,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl<S: PersistenceSink> RoomActor<S> {
    async fn run(mut self) {
        let code = self.session.code().clone();
        tracing::info!(room = %code, "room actor started");
        self.apply_effects();

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                fired = self.timers.expired() => {
                    let cleanup = fired.key == TimerKey::Cleanup;
                    tracing::trace!(room = %code, key = ?fired.key, late_ms = fired.late_by.as_millis() as u64, "timer fired");
                    self.session.fire(fired.key);
                    self.apply_effects();
                    if cleanup {
                        let _ = self.expired.send(code.clone());
                        break;
                    }
                }
            }
        }

        let stats = self.timers.stats();
        tracing::info!(
            room = %code,
            pending_timers = self.timers.len(),
            timers_fired = stats.fired,
            timers_cancelled = stats.cancelled,
            "room actor stopped"
        );
    }

    /// Returns `false` when the actor should stop.
    fn handle_command(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join { name, sender, reply } => {
                let result = self.session.join_human(name).map(|(participant, token)| {
                    self.senders.insert(participant, sender);
                    Seat { participant, token }
                });
                self.apply_effects();
                let _ = reply.send(result);
            }
            RoomCommand::Reconnect {
                participant,
                token,
                sender,
                reply,
            } => {
                let result = self.session.reconnect(participant, &token);
                if result.is_ok() {
                    let replaced = self.senders.insert(participant, sender.clone());
                    if let Some(old) = replaced.filter(|old| !old.same_channel(&sender)) {
                        tracing::debug!(room = %self.session.code(), %participant, "seat moved to a new connection");
                        let _ = old.send(Notification::Superseded);
                    }
                }
                self.apply_effects();
                let _ = reply.send(result);
            }
            RoomCommand::Disconnect { participant, sender } => {
                let current = self
                    .senders
                    .get(&participant)
                    .is_some_and(|s| s.same_channel(&sender));
                if current {
                    self.senders.remove(&participant);
                    self.session.disconnect(participant);
                    self.apply_effects();
                }
            }
            RoomCommand::Leave { participant, reply } => {
                let result = self.session.leave(participant);
                self.apply_effects();
                self.senders.remove(&participant);
                let _ = reply.send(result);
            }
            RoomCommand::Intent { from, intent } => {
                // Rejections are delivered as notifications.
                let _ = self.session.handle_intent(from, intent);
                self.apply_effects();
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Shutdown => {
                tracing::info!(room = %self.session.code(), "room shutting down");
                self.session.abandon();
                self.apply_effects();
                return false;
            }
        }
        true
    }

    /// Carries out what the last session call asked for.
    fn apply_effects(&mut self) {
        let effects = self.session.take_effects();

        for (to, notification) in effects.deliveries {
            // A closed channel means the connection is going away; its
            // handler reports the disconnect.
            if let Some(sender) = self.senders.get(&to) {
                let _ = sender.send(notification);
            }
        }

        for op in effects.timers {
            match op {
                TimerOp::Arm { key, delay } => {
                    self.timers.schedule(key, delay);
                }
                TimerOp::Cancel(key) => {
                    self.timers.cancel(&key);
                }
                TimerOp::CancelBots => {
                    self.timers.cancel_where(|k| matches!(k, TimerKey::Bot { .. }));
                }
            }
        }

        if let Some(record) = effects.finalized {
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                let room = record.room.clone();
                if let Err(err) = sink.finalize(record).await {
                    tracing::warn!(room = %room, error = %err, "failed to persist session");
                }
            });
        }
    }

    fn info(&self) -> RoomInfo {
        let participants = self.session.participants();
        RoomInfo {
            code: self.session.code().clone(),
            phase: self.session.state().phase,
            participants: participants.len(),
            humans_connected: participants.iter().filter(|p| p.is_human() && p.active).count(),
            version: self.session.state().version,
        }
    }
}

/// Spawns a room actor for `session` and returns a handle to it.
///
/// `channel_size` bounds the command queue; senders wait when it is full.
pub(crate) fn spawn_room<S: PersistenceSink>(
    session: Session,
    sink: Arc<S>,
    expired: mpsc::UnboundedSender<RoomCode>,
    channel_size: usize,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(channel_size);
    let code = session.code().clone();

    let actor = RoomActor {
        session,
        timers: Timers::new(),
        senders: HashMap::new(),
        sink,
        expired,
        receiver: rx,
    };
    tokio::spawn(actor.run());

    RoomHandle { code, sender: tx }
}
