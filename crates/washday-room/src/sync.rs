//! Keeping disconnect-prone clients consistent with the room.
//!
//! Three mechanisms:
//!
//! - **Versions.** Every change bumps the state's version. A client that
//!   reports an older version gets a full snapshot.
//! - **Visibility queue.** A lone human playing against bots who puts the
//!   tab in the background would otherwise miss the bots' moves. Their
//!   forward-flow notifications are held until the tab is visible again.
//! - **Reconnect replay.** A human who reconnects to a bot room shortly
//!   after a turn event gets that event again, so the client can animate
//!   it instead of jumping straight to the snapshot.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use washday_model::{GameState, Participant};
use washday_protocol::{ParticipantId, Recipient};

use crate::Notification;

/// Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A notification routed to one connected human.
pub type Routed = (ParticipantId, Notification);

/// Recent forward-flow notifications kept for reconnect replay.
const FORWARD_HISTORY: usize = 8;

/// Per-room synchronization state.
#[derive(Debug)]
pub struct SyncManager {
    deferred: VecDeque<Routed>,
    /// Newest last, with the recipients each was addressed to.
    recent_forward: VecDeque<(Recipient, Notification, Instant)>,
    replay_window: Duration,
}

impl SyncManager {
    pub fn new(replay_window: Duration) -> Self {
        Self {
            deferred: VecDeque::new(),
            recent_forward: VecDeque::new(),
            replay_window,
        }
    }

    /// Records a change: bumps the version and stamps the time.
    pub fn stamp(&self, state: &mut GameState) {
        state.version += 1;
        state.updated_at = now_millis();
    }

    /// Resolves `to` into connected humans and queues or delivers
    /// `notification` for each of them.
    pub fn route(
        &mut self,
        participants: &[Participant],
        to: Recipient,
        notification: Notification,
        out: &mut Vec<Routed>,
    ) {
        let forward = notification.is_forward_flow();
        if forward {
            if self.recent_forward.len() == FORWARD_HISTORY {
                self.recent_forward.pop_front();
            }
            self.recent_forward
                .push_back((to, notification.clone(), Instant::now()));
        }
        let backgrounded = lone_human(participants)
            .filter(|h| !h.tab_active)
            .map(|h| h.id);

        for p in participants {
            if !p.is_human() || !p.active || !to.includes(p.id) {
                continue;
            }
            if forward && backgrounded == Some(p.id) {
                tracing::trace!(participant = %p.id, "tab hidden, deferring notification");
                self.deferred.push_back((p.id, notification.clone()));
            } else {
                out.push((p.id, notification.clone()));
            }
        }
    }

    /// Releases everything held for `id`, oldest first.
    pub fn flush(&mut self, id: ParticipantId, out: &mut Vec<Routed>) {
        let (mine, others): (VecDeque<_>, VecDeque<_>) =
            self.deferred.drain(..).partition(|(to, _)| *to == id);
        self.deferred = others;
        if !mine.is_empty() {
            tracing::debug!(participant = %id, count = mine.len(), "flushing deferred notifications");
        }
        out.extend(mine);
    }

    /// Number of held notifications.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Handles a human's reconnect: drops anything held for them (the
    /// reconnect snapshot supersedes it) and returns the newest forward-flow
    /// notification that was addressed to them, if it should be replayed.
    pub fn on_reconnect(&mut self, participants: &[Participant], id: ParticipantId) -> Option<Notification> {
        self.deferred.retain(|(to, _)| *to != id);

        if !bot_dominated(participants) {
            return None;
        }
        let (_, notification, at) = self
            .recent_forward
            .iter()
            .rev()
            .find(|(to, _, _)| to.includes(id))?;
        (at.elapsed() <= self.replay_window).then(|| notification.clone())
    }

    /// `true` when a client at `last_seen` is behind `state`.
    pub fn is_behind(&self, last_seen: u64, state: &GameState) -> bool {
        last_seen < state.version
    }
}

/// The only human, if every other seat is a bot.
fn lone_human(participants: &[Participant]) -> Option<&Participant> {
    let mut humans = participants.iter().filter(|p| p.is_human());
    let human = humans.next()?;
    humans.next().is_none().then_some(human)
}

/// Exactly one human and at least one bot.
pub fn bot_dominated(participants: &[Participant]) -> bool {
    lone_human(participants).is_some() && participants.iter().any(Participant::is_bot)
}
