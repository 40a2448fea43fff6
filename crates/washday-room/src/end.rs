//! End conditions and the finished-session record.

use washday_model::{EndReason, GameState, Participant};
use washday_protocol::{ParticipantId, RoomCode};

use crate::{ParticipantRecord, SessionRecord};

/// Checks the end conditions in priority order: the shared counter
/// first, then any participant with a full wardrobe.
pub fn evaluate(state: &GameState, participants: &[Participant]) -> Option<EndReason> {
    if state.shared_counter >= state.shared_counter_max {
        return Some(EndReason::SharedCounterLimit);
    }
    if participants.iter().any(|p| p.inventory.is_full()) {
        return Some(EndReason::InventoryFull);
    }
    None
}

/// The participant with the highest score. Ties go to the earlier seat.
pub fn winner(participants: &[Participant]) -> Option<ParticipantId> {
    participants
        .iter()
        .fold(None::<&Participant>, |best, p| match best {
            Some(b) if b.score >= p.score => Some(b),
            _ => Some(p),
        })
        .map(|p| p.id)
}

/// Builds the record handed to the persistence sink.
pub fn build_record(
    room: &RoomCode,
    state: &GameState,
    participants: &[Participant],
    started_at: u64,
    ended_at: u64,
    reason: EndReason,
) -> SessionRecord {
    let winner = match reason {
        EndReason::Abandoned => None,
        _ => winner(participants),
    };
    SessionRecord {
        room: room.clone(),
        started_at,
        ended_at,
        duration_ms: ended_at.saturating_sub(started_at),
        reason,
        rounds: state.round,
        shared_counter: state.shared_counter,
        winner,
        participants: participants
            .iter()
            .map(|p| ParticipantRecord {
                id: p.id,
                name: p.name.clone(),
                bot: p.is_bot(),
                currency: p.currency,
                score: p.score,
                items: p.inventory.items().cloned().collect(),
                rounds: p.rounds.clone(),
            })
            .collect(),
    }
}
