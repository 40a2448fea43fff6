//! Integration tests for the Washday server, handler, and full connection flow.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use washday::prelude::*;
use washday::{Envelope, ParticipantId, PROTOCOL_VERSION, Payload, RoomCode, SystemMessage};

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a server on a random port and returns the address.
async fn start_server() -> String {
    start_with(WashdayServer::builder()).await
}

async fn start_with(builder: WashdayServerBuilder) -> String {
    let server = builder
        .bind("127.0.0.1:0")
        .seed(7)
        .build(TracingSink)
        .await
        .expect("server should build");

    let addr = server.local_addr().expect("should have local addr").to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

fn encode_envelope(envelope: &Envelope) -> Message {
    let bytes = serde_json::to_vec(envelope).expect("encode");
    Message::Binary(bytes.into())
}

async fn send_system(ws: &mut ClientWs, msg: SystemMessage) {
    ws.send(encode_envelope(&Envelope::system(1, 0, msg))).await.expect("send");
}

async fn send_intent(ws: &mut ClientWs, intent: Value) {
    let data = serde_json::to_vec(&intent).expect("encode intent");
    ws.send(encode_envelope(&Envelope::game(1, 0, data))).await.expect("send");
}

/// Receives the next envelope, failing after two seconds.
async fn recv(ws: &mut ClientWs) -> Envelope {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("recv");
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

async fn recv_system(ws: &mut ClientWs) -> SystemMessage {
    match recv(ws).await.payload {
        Payload::System(msg) => msg,
        Payload::Game(data) => {
            let value: Value = serde_json::from_slice(&data).expect("game json");
            panic!("expected a system message, got {value}")
        }
    }
}

/// Skips notifications until one of the given type arrives.
async fn recv_notification(ws: &mut ClientWs, kind: &str) -> Value {
    loop {
        if let Payload::Game(data) = recv(ws).await.payload {
            let value: Value = serde_json::from_slice(&data).expect("game json");
            if value["type"] == kind {
                return value;
            }
        }
    }
}

/// Sends a handshake and returns the reply.
async fn handshake(ws: &mut ClientWs) -> SystemMessage {
    send_system(ws, SystemMessage::Handshake {
        version: PROTOCOL_VERSION,
    })
    .await;
    recv_system(ws).await
}

/// Creates a room and returns its code, the seat, and the token.
async fn create_room(ws: &mut ClientWs, name: &str) -> (RoomCode, ParticipantId, String) {
    send_system(ws, SystemMessage::CreateRoom {
        name: Some(name.into()),
    })
    .await;
    let code = match recv_system(ws).await {
        SystemMessage::RoomCreated { room } => room,
        other => panic!("expected RoomCreated, got {other:?}"),
    };
    match recv_system(ws).await {
        SystemMessage::RoomJoined {
            room,
            participant,
            token,
        } => {
            assert_eq!(room, code);
            (code, participant, token)
        }
        other => panic!("expected RoomJoined, got {other:?}"),
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_handshake_success() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    match handshake(&mut ws).await {
        SystemMessage::HandshakeAck { .. } => {}
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    send_system(&mut ws, SystemMessage::Handshake { version: 999 }).await;
    match recv_system(&mut ws).await {
        SystemMessage::Error { code, message } => {
            assert_eq!(code, 400);
            assert!(message.contains("version mismatch"));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_non_handshake_first_message() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    send_system(&mut ws, SystemMessage::Heartbeat { client_time: 0 }).await;
    match recv_system(&mut ws).await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error 400, got {other:?}"),
    }
}

#[tokio::test]
async fn test_heartbeat_response() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    send_system(&mut ws, SystemMessage::Heartbeat { client_time: 12345 }).await;
    match recv_system(&mut ws).await {
        SystemMessage::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 12345),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_envelope_ignored() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    ws.send(Message::Binary(b"not json".to_vec().into())).await.expect("send");

    // The bad envelope was skipped; the connection still answers.
    send_system(&mut ws, SystemMessage::Heartbeat { client_time: 999 }).await;
    assert!(matches!(
        recv_system(&mut ws).await,
        SystemMessage::HeartbeatAck { client_time: 999, .. }
    ));
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    send_system(&mut ws, SystemMessage::Disconnect { reason: "bye".into() }).await;

    let result = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
    match result {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_idle_connection_dropped() {
    let addr = start_with(WashdayServer::builder().idle_timeout(Duration::from_millis(100))).await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    let result = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
    assert!(
        matches!(result, Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_)))),
        "silent client should be dropped"
    );
}

#[tokio::test]
async fn test_create_room_sends_code_seat_and_snapshot() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    let (code, participant, token) = create_room(&mut ws, "Ada").await;
    assert_eq!(code.as_str().len(), RoomCode::LEN);
    assert!(!token.is_empty());

    let snapshot = recv_notification(&mut ws, "Snapshot").await;
    assert_eq!(snapshot["snapshot"]["room"], code.as_str());
    let participants = snapshot["snapshot"]["participants"].as_array().expect("participants");
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0]["id"], participant.0);
}

#[tokio::test]
async fn test_join_room_not_found() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    send_system(&mut ws, SystemMessage::JoinRoom {
        room: "ZZZZZZ".into(),
        name: None,
    })
    .await;
    match recv_system(&mut ws).await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 404),
        other => panic!("expected Error 404, got {other:?}"),
    }
}

#[tokio::test]
async fn test_join_room_malformed_code() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    send_system(&mut ws, SystemMessage::JoinRoom {
        room: "nope".into(),
        name: None,
    })
    .await;
    match recv_system(&mut ws).await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error 400, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_client_joins_by_lowercase_code() {
    let addr = start_server().await;
    let mut host = connect(&addr).await;
    handshake(&mut host).await;
    let (code, host_id, _) = create_room(&mut host, "Ada").await;

    let mut guest = connect(&addr).await;
    handshake(&mut guest).await;
    send_system(&mut guest, SystemMessage::JoinRoom {
        room: format!(" {} ", code.as_str().to_lowercase()),
        name: Some("Grace".into()),
    })
    .await;
    match recv_system(&mut guest).await {
        SystemMessage::RoomJoined { room, participant, .. } => {
            assert_eq!(room, code);
            assert_ne!(participant, host_id);
        }
        other => panic!("expected RoomJoined, got {other:?}"),
    }

    // The host hears about the new seat.
    loop {
        let update = recv_notification(&mut host, "ParticipantsUpdated").await;
        if update["participants"].as_array().map(Vec::len) == Some(2) {
            break;
        }
    }
}

#[tokio::test]
async fn test_game_message_not_in_room() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;

    send_intent(&mut ws, json!({ "type": "Start" })).await;
    match recv_system(&mut ws).await {
        SystemMessage::Error { code, message } => {
            assert_eq!(code, 409);
            assert!(message.contains("not in a room"));
        }
        other => panic!("expected Error 409, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_intent_rejected() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    create_room(&mut ws, "Ada").await;

    send_intent(&mut ws, json!({ "type": "Teleport" })).await;
    loop {
        if let Payload::System(SystemMessage::Error { code, message }) = recv(&mut ws).await.payload {
            assert_eq!(code, 400);
            assert!(message.contains("invalid intent"));
            break;
        }
    }
}

#[tokio::test]
async fn test_start_hands_out_first_turn() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    let (_, participant, _) = create_room(&mut ws, "Ada").await;

    send_intent(&mut ws, json!({ "type": "AddBot" })).await;
    recv_notification(&mut ws, "ParticipantsUpdated").await;
    send_intent(&mut ws, json!({ "type": "Start" })).await;

    let turn = recv_notification(&mut ws, "TurnAdvanced").await;
    assert_eq!(turn["active"], participant.0);
    assert_eq!(turn["wash_day"], false);
}

#[tokio::test]
async fn test_reconnect_with_token_resumes_seat() {
    let addr = start_server().await;
    let mut first = connect(&addr).await;
    handshake(&mut first).await;
    let (code, participant, token) = create_room(&mut first, "Ada").await;
    drop(first);

    let mut second = connect(&addr).await;
    handshake(&mut second).await;
    send_system(&mut second, SystemMessage::Reconnect {
        room: code.as_str().into(),
        participant,
        token: token.clone(),
    })
    .await;
    match recv_system(&mut second).await {
        SystemMessage::RoomJoined {
            room,
            participant: resumed,
            token: echoed,
        } => {
            assert_eq!(room, code);
            assert_eq!(resumed, participant);
            assert_eq!(echoed, token);
        }
        other => panic!("expected RoomJoined, got {other:?}"),
    }

    let sync = recv_notification(&mut second, "ReconnectSync").await;
    assert_eq!(sync["snapshot"]["room"], code.as_str());
}

#[tokio::test]
async fn test_reconnect_elsewhere_closes_old_connection() {
    let addr = start_server().await;
    let mut first = connect(&addr).await;
    handshake(&mut first).await;
    let (code, participant, token) = create_room(&mut first, "Ada").await;
    recv_notification(&mut first, "Snapshot").await;

    let mut second = connect(&addr).await;
    handshake(&mut second).await;
    send_system(&mut second, SystemMessage::Reconnect {
        room: code.as_str().into(),
        participant,
        token,
    })
    .await;
    assert!(matches!(
        recv_system(&mut second).await,
        SystemMessage::RoomJoined { .. }
    ));

    recv_notification(&mut first, "Superseded").await;
    let closed = loop {
        match tokio::time::timeout(Duration::from_secs(2), first.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => break false,
        }
    };
    assert!(closed, "the superseded connection is closed");

    // The seat still works from the new connection.
    send_intent(&mut second, json!({ "type": "Sync", "last_seen_version": 0 })).await;
    recv_notification(&mut second, "Snapshot").await;
}

#[tokio::test]
async fn test_reconnect_with_wrong_token() {
    let addr = start_server().await;
    let mut first = connect(&addr).await;
    handshake(&mut first).await;
    let (code, participant, _) = create_room(&mut first, "Ada").await;

    let mut second = connect(&addr).await;
    handshake(&mut second).await;
    send_system(&mut second, SystemMessage::Reconnect {
        room: code.as_str().into(),
        participant,
        token: "not-the-token".into(),
    })
    .await;
    match recv_system(&mut second).await {
        SystemMessage::Error { code, .. } => assert_eq!(code, 401),
        other => panic!("expected Error 401, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_room_twice_conflicts() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws).await;
    create_room(&mut ws, "Ada").await;

    send_system(&mut ws, SystemMessage::CreateRoom { name: None }).await;
    loop {
        if let Payload::System(SystemMessage::Error { code, .. }) = recv(&mut ws).await.payload {
            assert_eq!(code, 409);
            break;
        }
    }
}
