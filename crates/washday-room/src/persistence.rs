//! Where finished sessions go.
//!
//! The room hands a [`SessionRecord`] to a [`PersistenceSink`] when the
//! session ends. Finalization runs in its own task; a failing sink is
//! logged and never reaches game state.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use washday_model::{ClothingItem, EndReason, RoundLog};
use washday_protocol::{ParticipantId, RoomCode};

/// A finished session, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub room: RoomCode,
    /// Unix millis.
    pub started_at: u64,
    /// Unix millis.
    pub ended_at: u64,
    pub duration_ms: u64,
    pub reason: EndReason,
    pub rounds: u32,
    pub shared_counter: u32,
    /// Highest score. `None` for abandoned sessions.
    pub winner: Option<ParticipantId>,
    pub participants: Vec<ParticipantRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub name: String,
    pub bot: bool,
    pub currency: u32,
    pub score: u32,
    pub items: Vec<ClothingItem>,
    pub rounds: BTreeMap<u32, RoundLog>,
}

/// Errors from a persistence sink. Logged, never surfaced to players.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Receives finished sessions.
///
/// # Example
///
/// ```rust
/// use washday_room::{PersistenceError, PersistenceSink, SessionRecord};
///
/// /// Drops every record.
/// struct NullSink;
///
/// impl PersistenceSink for NullSink {
///     async fn finalize(&self, _record: SessionRecord) -> Result<(), PersistenceError> {
///         Ok(())
///     }
/// }
/// ```
pub trait PersistenceSink: Send + Sync + 'static {
    /// Stores one finished session.
    fn finalize(
        &self,
        record: SessionRecord,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Logs a one-line summary of each session and keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl PersistenceSink for TracingSink {
    async fn finalize(&self, record: SessionRecord) -> Result<(), PersistenceError> {
        tracing::info!(
            room = %record.room,
            reason = %record.reason,
            rounds = record.rounds,
            duration_ms = record.duration_ms,
            winner = ?record.winner,
            participants = record.participants.len(),
            "session finalized"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonLinesSink
// ---------------------------------------------------------------------------

/// Appends each record as one JSON line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    /// Serializes appends from concurrently finishing rooms.
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceSink for JsonLinesSink {
    async fn finalize(&self, record: SessionRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        tracing::debug!(room = %record.room, path = %self.path.display(), "session record written");
        Ok(())
    }
}
