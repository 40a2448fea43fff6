//! Session runtime for Washday rooms.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns one
//! [`Session`]: the participants, the turn order, the roll/resolve/shop
//! step machine, the bots, and the end conditions.
//!
//! # Key types
//!
//! - [`RoomRegistry`]: creates rooms under join codes and forgets them
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`Session`]: the synchronous game state machine inside a room
//! - [`Intent`] / [`Notification`]: what clients send and receive
//! - [`PersistenceSink`]: where finished sessions are stored
//! - [`RoomConfig`]: rules, limits, and bot pacing

#![allow(async_fn_in_trait)]

mod bot;
mod config;
mod end;
mod error;
mod notify;
mod persistence;
mod registry;
mod room;
mod session;
mod step;
mod sync;
pub mod turn;

pub use bot::{BotStage, plan_shop};
pub use config::{BotTiming, RoomConfig};
pub use end::{build_record, evaluate as evaluate_end, winner};
pub use error::RoomError;
pub use notify::{Intent, Notification, RoomSnapshot, StepCommand};
pub use persistence::{JsonLinesSink, ParticipantRecord, PersistenceError, PersistenceSink, SessionRecord, TracingSink};
pub use registry::RoomRegistry;
pub use room::{ParticipantSender, RoomHandle, RoomInfo, Seat};
pub use session::{Effects, Session, TimerKey, TimerOp};
pub use sync::{Routed, SyncManager, bot_dominated, now_millis};
