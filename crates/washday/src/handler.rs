//! Per-connection handler: handshake, room membership, and routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version → send HandshakeAck
//!   2. Loop: receive envelopes → dispatch system or game messages, and
//!      forward the room's notifications to the client as game frames

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use washday_protocol::{Codec, Envelope, ParticipantId, Payload, ProtocolError, RoomCode, SystemMessage};
use washday_room::{Intent, Notification, ParticipantSender, PersistenceSink, RoomError, RoomHandle};
use washday_transport::{Connection, WebSocketConnection};

use crate::WashdayError;
use crate::server::{PROTOCOL_VERSION, ServerState};

// HTTP-style codes carried in `SystemMessage::Error`.
const BAD_REQUEST: u16 = 400;
const UNAUTHORIZED: u16 = 401;
const NOT_FOUND: u16 = 404;
const CONFLICT: u16 = 409;
const GONE: u16 = 410;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, C>>,
) -> Result<(), WashdayError>
where
    S: PersistenceSink,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");
    let start = Instant::now();

    // --- Step 1: Handshake ---
    perform_handshake(&conn, &state, &start).await?;
    tracing::info!(%conn_id, peer = %conn.peer_addr(), "client connected");

    // --- Step 2: Message loop ---
    let (outbound, mut notifications) = mpsc::unbounded_channel();
    let mut client = Client {
        conn: &conn,
        state: state.as_ref(),
        outbound,
        membership: None,
        seq: 1,
        start,
    };
    let result = client.run(&mut notifications).await;

    // The seat survives; the room keeps it for a reconnect.
    client.release().await;
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
    tracing::info!(%conn_id, "client gone");
    result
}

/// Receives the Handshake, validates it, and sends the Ack.
async fn perform_handshake<S, C: Codec>(
    conn: &WebSocketConnection,
    state: &ServerState<S, C>,
    start: &Instant,
) -> Result<(), WashdayError> {
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage("connection closed before handshake".into()).into());
        }
        Ok(Err(e)) => return Err(WashdayError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let envelope: Envelope = state.codec.decode(&data)?;

    let version = match envelope.payload {
        Payload::System(SystemMessage::Handshake { version }) => version,
        _ => {
            send_error(conn, &state.codec, BAD_REQUEST, "expected Handshake", 0, start).await?;
            return Err(ProtocolError::InvalidMessage("first message must be Handshake".into()).into());
        }
    };

    if version != PROTOCOL_VERSION {
        send_error(
            conn,
            &state.codec,
            BAD_REQUEST,
            &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
            0,
            start,
        )
        .await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let ack = Envelope::system(
        0,
        elapsed_ms(start),
        SystemMessage::HandshakeAck {
            server_time: elapsed_ms(start),
        },
    );
    conn.send(&state.codec.encode(&ack)?).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The room seat a connection holds.
struct Membership {
    handle: RoomHandle,
    participant: ParticipantId,
}

/// One connected client after the handshake.
struct Client<'a, S, C> {
    conn: &'a WebSocketConnection,
    state: &'a ServerState<S, C>,
    /// Handed to rooms so they can push notifications to this connection.
    outbound: ParticipantSender,
    membership: Option<Membership>,
    seq: u64,
    start: Instant,
}

impl<S, C> Client<'_, S, C>
where
    S: PersistenceSink,
    C: Codec,
{
    async fn run(
        &mut self,
        notifications: &mut mpsc::UnboundedReceiver<Notification>,
    ) -> Result<(), WashdayError> {
        let idle_timeout = self.state.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                inbound = self.conn.recv() => {
                    let data = match inbound {
                        Ok(Some(data)) => data,
                        Ok(None) => {
                            tracing::info!(participant = ?self.participant(), "connection closed cleanly");
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::debug!(participant = ?self.participant(), error = %e, "recv error");
                            return Ok(());
                        }
                    };
                    idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);

                    let envelope: Envelope = match self.state.codec.decode(&data) {
                        Ok(env) => env,
                        Err(e) => {
                            tracing::debug!(error = %e, "failed to decode envelope");
                            continue;
                        }
                    };
                    match envelope.payload {
                        Payload::System(msg) => {
                            if self.handle_system(msg).await? {
                                return Ok(());
                            }
                        }
                        Payload::Game(data) => self.handle_game(&data).await?,
                    }
                }
                Some(notification) = notifications.recv() => {
                    self.send_notification(&notification).await?;
                    if matches!(notification, Notification::Superseded) {
                        tracing::info!(participant = ?self.participant(), "seat resumed elsewhere, closing");
                        // The seat belongs to the other connection now.
                        self.membership = None;
                        return Ok(());
                    }
                }
                () = &mut idle => {
                    tracing::info!(participant = ?self.participant(), "connection timed out");
                    return Ok(());
                }
            }
        }
    }

    fn participant(&self) -> Option<ParticipantId> {
        self.membership.as_ref().map(|m| m.participant)
    }

    /// Handles a system message. Returns `true` if the connection should
    /// close.
    async fn handle_system(&mut self, msg: SystemMessage) -> Result<bool, WashdayError> {
        match msg {
            SystemMessage::Heartbeat { client_time } => {
                let server_time = elapsed_ms(&self.start);
                self.send_system(SystemMessage::HeartbeatAck {
                    client_time,
                    server_time,
                })
                .await?;
            }
            SystemMessage::CreateRoom { name } => self.create_room(name).await?,
            SystemMessage::JoinRoom { room, name } => self.join_room(&room, name).await?,
            SystemMessage::Reconnect {
                room,
                participant,
                token,
            } => self.reconnect(&room, participant, token).await?,
            SystemMessage::LeaveRoom => self.leave().await,
            SystemMessage::Disconnect { reason } => {
                tracing::info!(participant = ?self.participant(), %reason, "client disconnected");
                return Ok(true);
            }
            _ => {
                tracing::debug!(participant = ?self.participant(), "ignoring unexpected system message");
            }
        }
        Ok(false)
    }

    /// Decodes an intent and forwards it to the room.
    async fn handle_game(&mut self, data: &[u8]) -> Result<(), WashdayError> {
        let Some(membership) = &self.membership else {
            return self.send_error(CONFLICT, "not in a room").await;
        };
        let intent: Intent = match self.state.codec.decode(data) {
            Ok(intent) => intent,
            Err(e) => {
                let message = format!("invalid intent: {e}");
                return self.send_error(BAD_REQUEST, &message).await;
            }
        };

        let result = membership.handle.send_intent(membership.participant, intent).await;
        if let Err(e) = result {
            // The room is gone; so is the seat.
            self.membership = None;
            self.send_room_error(&e).await?;
        }
        Ok(())
    }

    // -- Membership --------------------------------------------------------

    async fn create_room(&mut self, name: Option<String>) -> Result<(), WashdayError> {
        if self.membership.is_some() {
            return self.send_error(CONFLICT, "already in a room").await;
        }
        let (code, handle) = {
            let mut rooms = self.state.rooms.lock().await;
            let code = rooms.create_room();
            let handle = rooms.get_room(&code)?;
            (code, handle)
        };
        self.send_system(SystemMessage::RoomCreated { room: code }).await?;
        self.take_seat(handle, name).await
    }

    async fn join_room(&mut self, room: &str, name: Option<String>) -> Result<(), WashdayError> {
        if self.membership.is_some() {
            return self.send_error(CONFLICT, "already in a room").await;
        }
        let code = match RoomCode::parse(room) {
            Ok(code) => code,
            Err(e) => return self.send_error(BAD_REQUEST, &e.to_string()).await,
        };
        let handle = self.state.rooms.lock().await.get_room(&code);
        match handle {
            Ok(handle) => self.take_seat(handle, name).await,
            Err(e) => self.send_room_error(&e).await,
        }
    }

    async fn take_seat(&mut self, handle: RoomHandle, name: Option<String>) -> Result<(), WashdayError> {
        match handle.join(name, self.outbound.clone()).await {
            Ok(seat) => {
                let room = handle.code().clone();
                tracing::info!(room = %room, participant = %seat.participant, "seat taken");
                self.membership = Some(Membership {
                    handle,
                    participant: seat.participant,
                });
                self.send_system(SystemMessage::RoomJoined {
                    room,
                    participant: seat.participant,
                    token: seat.token,
                })
                .await
            }
            Err(e) => self.send_room_error(&e).await,
        }
    }

    async fn reconnect(
        &mut self,
        room: &str,
        participant: ParticipantId,
        token: String,
    ) -> Result<(), WashdayError> {
        if self.membership.is_some() {
            return self.send_error(CONFLICT, "already in a room").await;
        }
        let code = match RoomCode::parse(room) {
            Ok(code) => code,
            Err(e) => return self.send_error(BAD_REQUEST, &e.to_string()).await,
        };
        let handle = match self.state.rooms.lock().await.get_room(&code) {
            Ok(handle) => handle,
            Err(e) => return self.send_room_error(&e).await,
        };

        match handle
            .reconnect(participant, token.clone(), self.outbound.clone())
            .await
        {
            Ok(()) => {
                tracing::info!(room = %code, %participant, "seat resumed");
                self.membership = Some(Membership { handle, participant });
                self.send_system(SystemMessage::RoomJoined {
                    room: code,
                    participant,
                    token,
                })
                .await
            }
            Err(e) => self.send_room_error(&e).await,
        }
    }

    async fn leave(&mut self) {
        let Some(membership) = self.membership.take() else {
            tracing::debug!("leave without a room, ignoring");
            return;
        };
        if let Err(e) = membership.handle.leave(membership.participant).await {
            tracing::debug!(participant = %membership.participant, error = %e, "leave room failed");
        }
    }

    /// Tells the room this connection is gone.
    async fn release(&mut self) {
        if let Some(membership) = self.membership.take() {
            let result = membership
                .handle
                .disconnect(membership.participant, self.outbound.clone())
                .await;
            if let Err(e) = result {
                tracing::debug!(participant = %membership.participant, error = %e, "disconnect not delivered");
            }
        }
    }

    // -- Sending -----------------------------------------------------------

    async fn send_system(&mut self, msg: SystemMessage) -> Result<(), WashdayError> {
        let envelope = Envelope::system(self.next_seq(), elapsed_ms(&self.start), msg);
        let bytes = self.state.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_notification(&mut self, notification: &Notification) -> Result<(), WashdayError> {
        let seq = self.next_seq();
        let bytes = self
            .state
            .codec
            .encode_game(seq, elapsed_ms(&self.start), notification)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_error(&mut self, code: u16, message: &str) -> Result<(), WashdayError> {
        let seq = self.next_seq();
        send_error(self.conn, &self.state.codec, code, message, seq, &self.start).await
    }

    async fn send_room_error(&mut self, err: &RoomError) -> Result<(), WashdayError> {
        let code = match err {
            RoomError::NotFound(_) | RoomError::NotInRoom(_) => NOT_FOUND,
            RoomError::InvalidToken(_) => UNAUTHORIZED,
            RoomError::RoomFull(_) | RoomError::InvalidTransition(_) => CONFLICT,
            RoomError::Unavailable(_) => GONE,
            _ => BAD_REQUEST,
        };
        self.send_error(code, &err.to_string()).await
    }

    fn next_seq(&mut self) -> u64 {
        let current = self.seq;
        self.seq += 1;
        current
    }
}

/// Sends a `SystemMessage::Error` envelope to the client.
async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    code: u16,
    message: &str,
    seq: u64,
    start: &Instant,
) -> Result<(), WashdayError> {
    let envelope = Envelope::system(
        seq,
        elapsed_ms(start),
        SystemMessage::Error {
            code,
            message: message.to_string(),
        },
    );
    let bytes = codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

fn elapsed_ms(start: &Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
