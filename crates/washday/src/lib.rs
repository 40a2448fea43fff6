//! # Washday
//!
//! Server for Washday, a turn-based laundry game played in small rooms.
//!
//! Clients connect over WebSocket, create or join a room by its six-letter
//! code, and then exchange JSON intents and notifications with the room's
//! authoritative session. Bots fill empty seats and play on their own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use washday::prelude::*;
//!
//! # async fn run() -> Result<(), WashdayError> {
//! let server = WashdayServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(TracingSink)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{BIND_ENV, CONFIG_ENV, RECORDS_ENV, ServerConfig};
pub use error::WashdayError;
pub use server::{PROTOCOL_VERSION, WashdayServer, WashdayServerBuilder};

pub use washday_model::{BuiltinContent, ContentProvider};
pub use washday_protocol::{Codec, Envelope, JsonCodec, ParticipantId, Payload, RoomCode, SystemMessage};
pub use washday_room::{
    Intent, JsonLinesSink, Notification, PersistenceSink, RoomConfig, RoomSnapshot, SessionRecord, StepCommand,
    TracingSink,
};

/// Everything needed to start a server.
pub mod prelude {
    pub use crate::{
        JsonLinesSink, PersistenceSink, RoomConfig, ServerConfig, TracingSink, WashdayError, WashdayServer,
        WashdayServerBuilder,
    };
}
