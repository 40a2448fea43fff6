//! Wire protocol for Washday.
//!
//! - **Types** ([`Envelope`], [`SystemMessage`], [`ParticipantId`],
//!   [`RoomCode`], [`Recipient`]): what travels on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how it becomes bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Room (intents / notifications)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{Envelope, ParticipantId, Payload, Recipient, RoomCode, SystemMessage};
