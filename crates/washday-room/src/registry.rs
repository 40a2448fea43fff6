//! Room registry: creates rooms, finds them by code, and forgets them.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use washday_model::ContentProvider;
use washday_protocol::RoomCode;

use crate::room::spawn_room;
use crate::session::Session;
use crate::{PersistenceSink, RoomConfig, RoomError, RoomHandle};

/// Default command channel size for room actors.
const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Every live room, keyed by its join code.
///
/// Rooms remove themselves from play when their cleanup timer fires; the
/// registry learns about it through [`reap_expired`](Self::reap_expired).
pub struct RoomRegistry<S> {
    rooms: HashMap<RoomCode, RoomHandle>,
    config: RoomConfig,
    content: Arc<dyn ContentProvider>,
    sink: Arc<S>,
    expired_tx: mpsc::UnboundedSender<RoomCode>,
    expired_rx: mpsc::UnboundedReceiver<RoomCode>,
    rng: StdRng,
}

impl<S: PersistenceSink> RoomRegistry<S> {
    /// Creates an empty registry. Every room gets a copy of `config`.
    pub fn new(config: RoomConfig, content: Arc<dyn ContentProvider>, sink: Arc<S>) -> Self {
        Self::with_rng(config, content, sink, StdRng::from_os_rng())
    }

    /// A registry whose codes, dice, and bots are reproducible.
    pub fn seeded(config: RoomConfig, content: Arc<dyn ContentProvider>, sink: Arc<S>, seed: u64) -> Self {
        Self::with_rng(config, content, sink, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: RoomConfig, content: Arc<dyn ContentProvider>, sink: Arc<S>, rng: StdRng) -> Self {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        Self {
            rooms: HashMap::new(),
            config,
            content,
            sink,
            expired_tx,
            expired_rx,
            rng,
        }
    }

    /// Creates a room under a fresh code and starts its actor.
    pub fn create_room(&mut self) -> RoomCode {
        let code = loop {
            let candidate = generate_code(&mut self.rng);
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
            tracing::debug!(code = %candidate, "room code collision, retrying");
        };

        let session = Session::new(
            code.clone(),
            self.config.clone(),
            self.content.as_ref(),
            StdRng::from_rng(&mut self.rng),
        );
        let handle = spawn_room(
            session,
            Arc::clone(&self.sink),
            self.expired_tx.clone(),
            DEFAULT_CHANNEL_SIZE,
        );
        self.rooms.insert(code.clone(), handle);
        tracing::info!(room = %code, rooms = self.rooms.len(), "room created");
        code
    }

    /// Looks a room up by code.
    pub fn get_room(&self, code: &RoomCode) -> Result<RoomHandle, RoomError> {
        self.rooms
            .get(code)
            .cloned()
            .ok_or_else(|| RoomError::NotFound(code.clone()))
    }

    /// Shuts a room down and forgets it. A running session ends as
    /// abandoned.
    pub async fn delete_room(&mut self, code: &RoomCode) -> Result<(), RoomError> {
        let handle = self
            .rooms
            .remove(code)
            .ok_or_else(|| RoomError::NotFound(code.clone()))?;
        // A room that already stopped has nothing left to shut down.
        let _ = handle.shutdown().await;
        tracing::info!(room = %code, rooms = self.rooms.len(), "room deleted");
        Ok(())
    }

    /// Forgets rooms whose actors have stopped on their own. Returns
    /// their codes.
    pub fn reap_expired(&mut self) -> Vec<RoomCode> {
        let mut reaped = Vec::new();
        while let Ok(code) = self.expired_rx.try_recv() {
            if self.rooms.remove(&code).is_some() {
                reaped.push(code);
            }
        }
        let closed: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|(_, handle)| handle.is_closed())
            .map(|(code, _)| code.clone())
            .collect();
        for code in closed {
            self.rooms.remove(&code);
            reaped.push(code);
        }
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), rooms = self.rooms.len(), "expired rooms removed");
        }
        reaped
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Codes of all live rooms, in no particular order.
    pub fn room_codes(&self) -> Vec<RoomCode> {
        self.rooms.keys().cloned().collect()
    }
}

fn generate_code(rng: &mut StdRng) -> RoomCode {
    let code: String = (0..RoomCode::LEN)
        .map(|_| {
            let idx = rng.random_range(0..RoomCode::ALPHABET.len());
            char::from(RoomCode::ALPHABET[idx])
        })
        .collect();
    RoomCode::from_generated(code)
}
