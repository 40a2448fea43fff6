//! Scenario tests for the session state machine, driven the way clients
//! and timers drive it.

use rand::SeedableRng;
use rand::rngs::StdRng;
use washday_model::{BuiltinContent, Category, Draw, EndReason, InventoryLayout, Phase, Step};
use washday_protocol::{ParticipantId, RoomCode};
use washday_room::{
    BotStage, Effects, Intent, Notification, RoomConfig, RoomError, Session, StepCommand, TimerKey,
    TimerOp,
};

// =========================================================================
// Helpers
// =========================================================================

/// Content with one prompt (answer: false), one event with `effect`, and
/// one shirt costing `price`.
fn content(with_prompt: bool, effect: &str, price: u32) -> BuiltinContent {
    let prompts = if with_prompt {
        r#"[{ "title": "Cold Wash", "statement": "Hot washes shed fewer fibers", "answer": false }]"#
    } else {
        "[]"
    };
    let json = format!(
        r#"{{
            "prompts": {prompts},
            "events": [
                {{ "name": "test", "title": "Test Event", "statement": "", "effect": "{effect}" }}
            ],
            "catalog": [
                {{ "category": "Shirt", "condition": "New", "material": "Cotton",
                   "fiber": "Natural", "value": 3, "price": {price} }}
            ]
        }}"#
    );
    BuiltinContent::from_json(&json).unwrap()
}

fn session(config: RoomConfig, content: &BuiltinContent) -> Session {
    Session::new(
        RoomCode::from_generated("SCENE1".into()),
        config,
        content,
        StdRng::seed_from_u64(11),
    )
}

fn step(command: StepCommand) -> Intent {
    Intent::AdvanceStep { command }
}

/// Plays `id`'s roll and resolve steps, answering prompts with `true`.
/// Returns what the roll drew.
fn roll_and_resolve(s: &mut Session, id: ParticipantId) -> Draw {
    s.handle_intent(id, step(StepCommand::Roll)).unwrap();
    let draw = s.state().roll.unwrap().draw;
    match draw {
        Draw::Prompt => {
            s.handle_intent(id, Intent::RequestPrompt).unwrap();
            if s.state().prompt.active {
                s.handle_intent(id, step(StepCommand::AnswerPrompt { answer: true }))
                    .unwrap();
            }
        }
        Draw::Event => {
            s.handle_intent(id, Intent::RequestEvent).unwrap();
            if s.state().event.active {
                s.handle_intent(id, step(StepCommand::ResolveEvent { target: None }))
                    .unwrap();
            }
        }
    }
    draw
}

fn play_turn(s: &mut Session, id: ParticipantId) -> Draw {
    let draw = roll_and_resolve(s, id);
    s.handle_intent(id, Intent::DeclinePurchase { next: None }).unwrap();
    draw
}

/// The most recently armed bot timer.
fn bot_timer(effects: &Effects) -> Option<TimerKey> {
    effects.timers.iter().rev().find_map(|op| match op {
        TimerOp::Arm {
            key: key @ TimerKey::Bot { .. },
            ..
        } => Some(key.clone()),
        _ => None,
    })
}

/// Fires bot timers until the turn comes back to `human`.
fn run_bots_until(s: &mut Session, human: ParticipantId) {
    for _ in 0..20 {
        if s.state().active == Some(human) || s.state().phase == Phase::Ended {
            return;
        }
        let key = bot_timer(&s.take_effects()).expect("bot timer armed");
        s.fire(key);
    }
    panic!("bots never handed the turn back");
}

// =========================================================================
// Start and turn order
// =========================================================================

#[test]
fn test_start_with_bots_gives_human_first_turn() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (human, _) = s.join_human(Some("Ada".into())).unwrap();
    for _ in 0..3 {
        s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    }
    s.take_effects();

    s.handle_intent(human, Intent::Start).unwrap();

    let state = s.state();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.active, Some(human));
    assert_eq!(state.round, 0);
    assert_eq!(state.step, Step::Roll);
    assert!(state.market.iter().all(|slot| slot.card.is_some()));
    assert!(bot_timer(&s.take_effects()).is_none(), "no bot timer on a human turn");
}

#[test]
fn test_start_is_idempotent() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (a, _) = s.join_human(None).unwrap();
    let (b, _) = s.join_human(None).unwrap();
    s.handle_intent(a, Intent::Start).unwrap();
    let version = s.state().version;

    s.handle_intent(b, Intent::Start).unwrap();
    assert_eq!(s.state().version, version);
    assert_eq!(s.state().active, Some(a));
}

#[test]
fn test_round_completes_when_order_wraps() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (a, _) = s.join_human(None).unwrap();
    let (b, _) = s.join_human(None).unwrap();
    s.handle_intent(a, Intent::Start).unwrap();

    play_turn(&mut s, a);
    assert_eq!(s.state().active, Some(b));
    assert_eq!(s.state().round, 0);

    play_turn(&mut s, b);
    assert_eq!(s.state().active, Some(a));
    assert_eq!(s.state().round, 1);
    assert_eq!(s.state().turn_index, 0);

    play_turn(&mut s, a);
    play_turn(&mut s, b);
    assert_eq!(s.state().round, 2);
}

#[test]
fn test_leaving_active_participant_passes_turn() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (a, _) = s.join_human(None).unwrap();
    let (b, _) = s.join_human(None).unwrap();
    s.handle_intent(a, Intent::Start).unwrap();

    s.leave(a).unwrap();
    assert_eq!(s.state().active, Some(b));
    assert!(s.participant(a).is_none());
    assert_eq!(s.leave(a), Err(RoomError::NotInRoom(a)));
}

// =========================================================================
// Shop
// =========================================================================

#[test]
fn test_over_budget_purchase_changes_nothing() {
    let content = content(false, "money:add:1", 100);
    let mut s = session(RoomConfig::default(), &content);
    let (id, _) = s.join_human(None).unwrap();
    s.handle_intent(id, Intent::Start).unwrap();
    roll_and_resolve(&mut s, id);
    assert_eq!(s.state().step, Step::Shop);

    let before = s.state().clone();
    let currency = s.participant(id).unwrap().currency;
    s.take_effects();

    let err = s
        .handle_intent(id, Intent::Purchase {
            cards: vec![0],
            next: None,
        })
        .unwrap_err();
    assert!(matches!(err, RoomError::InsufficientFunds { needed: 100, .. }));
    assert_eq!(s.state(), &before);
    assert_eq!(s.participant(id).unwrap().currency, currency);
    assert!(s.participant(id).unwrap().inventory.is_empty());

    let deliveries = s.take_effects().deliveries;
    assert!(
        deliveries
            .iter()
            .any(|(to, n)| *to == id && matches!(n, Notification::Rejected { .. }))
    );
}

#[test]
fn test_duplicate_slots_rejected() {
    let content = content(false, "money:add:1", 0);
    let mut s = session(RoomConfig::default(), &content);
    let (id, _) = s.join_human(None).unwrap();
    s.handle_intent(id, Intent::Start).unwrap();
    roll_and_resolve(&mut s, id);

    let err = s
        .handle_intent(id, Intent::Purchase {
            cards: vec![1, 1],
            next: None,
        })
        .unwrap_err();
    assert!(matches!(err, RoomError::InvalidTransition(_)));
    assert!(s.state().market[1].card.is_some());
}

#[test]
fn test_overflow_then_full_wardrobe_ends_session() {
    let content = content(false, "money:add:1", 0);
    let config = RoomConfig {
        inventory: InventoryLayout {
            shirt: 1,
            pants: 0,
            sweater: 0,
            jacket: 0,
        },
        ..RoomConfig::default()
    };
    let mut s = session(config, &content);
    let (id, _) = s.join_human(None).unwrap();
    s.handle_intent(id, Intent::Start).unwrap();
    roll_and_resolve(&mut s, id);
    s.take_effects();

    s.handle_intent(id, Intent::Purchase {
        cards: vec![0, 1],
        next: None,
    })
    .unwrap();

    let p = s.participant(id).unwrap();
    assert_eq!(p.inventory.shelf(Category::Shirt).unwrap().items.len(), 1);
    assert_eq!(p.inventory.shelf(Category::Extra).unwrap().items.len(), 1);
    assert_eq!(p.score, 6);

    assert_eq!(s.state().phase, Phase::Ended);
    assert_eq!(s.state().end_reason, Some(EndReason::InventoryFull));
    let record = s.take_effects().finalized.expect("session record");
    assert_eq!(record.winner, Some(id));
    assert_eq!(record.participants[0].items.len(), 2);
}

// =========================================================================
// Shared counter
// =========================================================================

#[test]
fn test_counter_limit_ends_session() {
    // Both the wrong answer and the event add one.
    let content = content(true, "microplastics:add:1", 1);
    let config = RoomConfig {
        shared_counter_max: 1,
        ..RoomConfig::default()
    };
    let mut s = session(config, &content);
    let (id, _) = s.join_human(None).unwrap();
    s.handle_intent(id, Intent::Start).unwrap();

    roll_and_resolve(&mut s, id);

    assert_eq!(s.state().shared_counter, 1);
    assert_eq!(s.state().phase, Phase::Ended);
    assert_eq!(s.state().end_reason, Some(EndReason::SharedCounterLimit));
    let effects = s.take_effects();
    let record = effects.finalized.expect("session record");
    assert_eq!(record.reason, EndReason::SharedCounterLimit);
    assert!(
        effects
            .deliveries
            .iter()
            .any(|(_, n)| matches!(n, Notification::SessionEnded { .. }))
    );

    let version = s.state().version;
    assert!(matches!(
        s.handle_intent(id, Intent::DeclinePurchase { next: None }),
        Err(RoomError::InvalidTransition(_))
    ));
    assert!(s.handle_intent(id, Intent::Start).is_err());
    assert_eq!(s.state().version, version);
    assert!(s.take_effects().finalized.is_none(), "a session finalizes once");
}

/// Plays turns with two humans until one of them draws an event.
fn first_event(s: &mut Session, a: ParticipantId, b: ParticipantId) {
    for turn in 0..40 {
        let id = if turn % 2 == 0 { a } else { b };
        if roll_and_resolve(s, id) == Draw::Event {
            return;
        }
        s.handle_intent(id, Intent::DeclinePurchase { next: None }).unwrap();
    }
    panic!("no event drawn");
}

#[test]
fn test_counter_never_goes_below_zero() {
    let content = content(false, "microplastics:remove:5", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (a, _) = s.join_human(None).unwrap();
    let (b, _) = s.join_human(None).unwrap();
    s.handle_intent(a, Intent::Start).unwrap();

    first_event(&mut s, a, b);
    assert_eq!(s.state().shared_counter, 0);
    assert_eq!(s.state().step, Step::Shop);
}

#[test]
fn test_currency_never_goes_below_zero() {
    let content = content(false, "money:remove:1000", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (a, _) = s.join_human(None).unwrap();
    let (b, _) = s.join_human(None).unwrap();
    s.handle_intent(a, Intent::Start).unwrap();

    first_event(&mut s, a, b);
    let active = s.state().active.unwrap();
    assert_eq!(s.participant(active).unwrap().currency, 0);
}

// =========================================================================
// Bots
// =========================================================================

#[test]
fn test_bots_play_and_hand_turn_back() {
    let content = content(true, "money:add:3", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (human, _) = s.join_human(None).unwrap();
    s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    s.handle_intent(human, Intent::Start).unwrap();

    play_turn(&mut s, human);
    assert_ne!(s.state().active, Some(human));

    run_bots_until(&mut s, human);
    assert_eq!(s.state().active, Some(human));
    assert_eq!(s.state().round, 1);
    let bots_rolled = s
        .participants()
        .iter()
        .filter(|p| p.is_bot())
        .all(|p| p.currency > 0 || !p.inventory.is_empty());
    assert!(bots_rolled);
}

#[test]
fn test_stale_bot_timer_is_noop() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (human, _) = s.join_human(None).unwrap();
    s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    s.handle_intent(human, Intent::Start).unwrap();
    play_turn(&mut s, human);
    let bot = s.state().active.unwrap();

    let roll_key = bot_timer(&s.take_effects()).expect("bot roll armed");
    assert_eq!(roll_key, TimerKey::Bot {
        participant: bot,
        stage: BotStage::Roll,
    });
    s.fire(roll_key.clone());
    assert_eq!(s.state().step, Step::Resolve);
    let resolve_key = bot_timer(&s.take_effects()).expect("bot resolve armed");

    // The roll timer again, after the step moved on.
    let version = s.state().version;
    let currency = s.participant(bot).unwrap().currency;
    s.fire(roll_key.clone());
    assert_eq!(s.state().version, version);
    assert_eq!(s.state().step, Step::Resolve);
    assert_eq!(s.participant(bot).unwrap().currency, currency);
    let effects = s.take_effects();
    assert!(effects.deliveries.is_empty());
    assert!(bot_timer(&effects).is_none());

    // And once the turn has passed back to the human.
    s.fire(resolve_key);
    run_bots_until(&mut s, human);
    s.take_effects();
    let version = s.state().version;
    s.fire(roll_key);
    assert_eq!(s.state().version, version);
    assert_eq!(s.state().active, Some(human));
    assert_eq!(s.state().step, Step::Roll);
    let effects = s.take_effects();
    assert!(effects.deliveries.is_empty());
    assert!(bot_timer(&effects).is_none());
}

#[test]
fn test_bot_with_nothing_affordable_still_waits_before_declining() {
    let content = content(true, "money:add:1", 99);
    let mut s = session(RoomConfig::default(), &content);
    let (human, _) = s.join_human(None).unwrap();
    s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    s.handle_intent(human, Intent::Start).unwrap();
    play_turn(&mut s, human);
    let bot = s.state().active.unwrap();
    let shop = TimerKey::Bot {
        participant: bot,
        stage: BotStage::Shop,
    };

    let mut key = bot_timer(&s.take_effects()).expect("bot timer armed");
    for _ in 0..10 {
        if key == shop {
            break;
        }
        s.fire(key);
        key = bot_timer(&s.take_effects()).expect("bot timer armed");
    }
    assert_eq!(key, shop);

    s.fire(key);
    assert_eq!(s.state().active, Some(bot), "nothing decided yet");
    assert_eq!(s.state().step, Step::Shop);
    let decision = bot_timer(&s.take_effects()).expect("decision armed");
    assert_eq!(decision, TimerKey::Bot {
        participant: bot,
        stage: BotStage::ShopDecision,
    });

    s.fire(decision);
    assert_eq!(s.state().active, Some(human));
    assert!(s.participant(bot).unwrap().inventory.is_empty());
}

#[test]
fn test_bot_suspends_without_humans_and_resumes_on_reconnect() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (human, token) = s.join_human(None).unwrap();
    s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    s.handle_intent(human, Intent::Start).unwrap();
    play_turn(&mut s, human);
    let key = bot_timer(&s.take_effects()).expect("bot timer armed");

    s.disconnect(human);
    let effects = s.take_effects();
    assert!(effects.timers.contains(&TimerOp::Arm {
        key: TimerKey::Cleanup,
        delay: RoomConfig::default().cleanup_grace,
    }));

    let version = s.state().version;
    s.fire(key.clone());
    assert_eq!(s.state().version, version, "suspended bot does not move");
    assert!(bot_timer(&s.take_effects()).is_none());

    s.reconnect(human, &token).unwrap();
    let effects = s.take_effects();
    assert!(effects.timers.contains(&TimerOp::Cancel(TimerKey::Cleanup)));
    assert_eq!(bot_timer(&effects), Some(key));

    let to_human: Vec<&Notification> = effects
        .deliveries
        .iter()
        .filter(|(to, _)| *to == human)
        .map(|(_, n)| n)
        .collect();
    assert!(matches!(to_human[to_human.len() - 2], Notification::ReconnectSync { .. }));
    assert!(matches!(to_human[to_human.len() - 1], Notification::TurnAdvanced { .. }));
}

#[test]
fn test_reconnect_replays_turn_event_not_own_relay() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (human, token) = s.join_human(None).unwrap();
    s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    s.handle_intent(human, Intent::Start).unwrap();
    s.handle_intent(human, Intent::Relay {
        name: "emote".into(),
        payload: serde_json::json!({ "face": "grin" }),
    })
    .unwrap();
    s.take_effects();

    s.disconnect(human);
    s.take_effects();
    s.reconnect(human, &token).unwrap();

    let to_human: Vec<Notification> = s
        .take_effects()
        .deliveries
        .into_iter()
        .filter(|(to, _)| *to == human)
        .map(|(_, n)| n)
        .collect();
    assert!(
        !to_human.iter().any(|n| matches!(n, Notification::Relay { .. })),
        "own relay is not echoed back: {to_human:?}"
    );
    assert!(matches!(
        to_human.last(),
        Some(Notification::TurnAdvanced { active, .. }) if *active == human
    ));
}

#[test]
fn test_hidden_tab_defers_bot_moves() {
    let content = content(true, "money:add:1", 1);
    let mut s = session(RoomConfig::default(), &content);
    let (human, _) = s.join_human(None).unwrap();
    s.handle_intent(human, Intent::AddBot { name: None }).unwrap();
    s.handle_intent(human, Intent::Start).unwrap();
    s.handle_intent(human, Intent::TabVisibility { active: false })
        .unwrap();
    play_turn(&mut s, human);

    run_bots_until(&mut s, human);
    assert!(s.deferred_len() > 0);
    let effects = s.take_effects();
    assert!(
        !effects
            .deliveries
            .iter()
            .any(|(_, n)| matches!(n, Notification::TurnAdvanced { .. })),
        "turn events are held while the tab is hidden"
    );

    s.handle_intent(human, Intent::TabVisibility { active: true })
        .unwrap();
    assert_eq!(s.deferred_len(), 0);
    let flushed = s.take_effects().deliveries;
    assert!(
        flushed
            .iter()
            .any(|(_, n)| matches!(n, Notification::TurnAdvanced { active, .. } if *active == human))
    );
}
