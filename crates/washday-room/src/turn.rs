//! Turn order.
//!
//! Connected humans play first, in the order they joined, then bots in
//! the order they were added. The order is recomputed on every advance,
//! so a human who drops out is skipped and one who comes back slots in
//! again without any bookkeeping.

use washday_model::Participant;
use washday_protocol::ParticipantId;

/// The result of passing the turn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnAdvance {
    /// Who plays next.
    pub next: ParticipantId,
    /// Position of `next` in the current order.
    pub index: usize,
    /// The order wrapped around, so a round is complete.
    pub wrapped: bool,
}

/// Connected humans in seating order, then bots in seating order.
pub fn compute_order(participants: &[Participant]) -> Vec<ParticipantId> {
    let humans = participants.iter().filter(|p| p.is_human() && p.active);
    let bots = participants.iter().filter(|p| p.is_bot());
    humans.chain(bots).map(|p| p.id).collect()
}

/// Every seat, connected or not, in the same human-then-bot layout.
fn seating(participants: &[Participant]) -> Vec<ParticipantId> {
    let humans = participants.iter().filter(|p| p.is_human());
    let bots = participants.iter().filter(|p| p.is_bot());
    humans.chain(bots).map(|p| p.id).collect()
}

/// The first turn of a session.
pub fn first_turn(participants: &[Participant]) -> Option<TurnAdvance> {
    compute_order(participants)
        .first()
        .map(|&next| TurnAdvance {
            next,
            index: 0,
            wrapped: false,
        })
}

/// Who plays after `current`.
///
/// If `current` has dropped out of the order, the walk continues from
/// their seat. A `requested` successor that disagrees with the order is
/// ignored. Returns `None` only when nobody can play.
pub fn advance(
    participants: &[Participant],
    current: Option<ParticipantId>,
    requested: Option<ParticipantId>,
) -> Option<TurnAdvance> {
    let order = compute_order(participants);
    if order.is_empty() {
        return None;
    }

    let natural = match current.and_then(|c| order.iter().position(|&id| id == c)) {
        Some(pos) => {
            let index = (pos + 1) % order.len();
            TurnAdvance {
                next: order[index],
                index,
                wrapped: pos + 1 == order.len(),
            }
        }
        None => walk_from_seat(participants, &order, current),
    };

    if let Some(requested) = requested.filter(|&r| r != natural.next) {
        tracing::warn!(
            %requested,
            corrected = %natural.next,
            "requested next participant disagrees with turn order"
        );
    }

    Some(natural)
}

/// Finds the first playable seat after `current`'s seat. `order` must be
/// non-empty.
fn walk_from_seat(
    participants: &[Participant],
    order: &[ParticipantId],
    current: Option<ParticipantId>,
) -> TurnAdvance {
    let seats = seating(participants);
    let start = current.and_then(|c| seats.iter().position(|&id| id == c));

    let Some(start) = start else {
        return TurnAdvance {
            next: order[0],
            index: 0,
            wrapped: false,
        };
    };

    let (through_current, after_current) = seats.split_at(start + 1);
    let found = after_current
        .iter()
        .map(|id| (id, false))
        .chain(through_current.iter().map(|id| (id, true)))
        .find_map(|(id, wrapped)| {
            order
                .iter()
                .position(|o| o == id)
                .map(|index| (index, wrapped))
        });

    match found {
        Some((index, wrapped)) => TurnAdvance {
            next: order[index],
            index,
            wrapped,
        },
        None => TurnAdvance {
            next: order[0],
            index: 0,
            wrapped: true,
        },
    }
}
