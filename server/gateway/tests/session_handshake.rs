//! Exercises `SessionHandler` end to end over a real loopback WebSocket,
//! rather than against `Room` directly, for the two scenarios that are
//! genuinely about the session loop: the join/welcome sequence and a
//! ban-on-reconnect rejection.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use room_core::{BanRecord, Room, RoomConfig, SqliteStore};
use room_gateway::config::Config;
use room_gateway::state::AppState;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn spawn_test_server(room: Arc<Room>) -> SocketAddr {
    let cfg = Config::parse_from(["room-gateway-test"]);
    let state = AppState::new(room, Arc::new(cfg));
    let app = room_gateway::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test]
async fn join_handshake_sends_welcome_sequence() {
    let room = Arc::new(
        Room::new(RoomConfig::default(), Arc::new(SqliteStore::open_in_memory().unwrap())).unwrap(),
    );
    let addr = spawn_test_server(room).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    ws.send(WsMessage::Text(
        serde_json::json!({"type": "join", "username": "Alice"})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let user_list: serde_json::Value = match ws.next().await.unwrap().unwrap() {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    };
    assert_eq!(user_list["type"], "user_list");
    assert!(user_list["self_id"].is_number());
    assert_eq!(user_list["server_name"], "bken server");

    let channel_list: serde_json::Value = match ws.next().await.unwrap().unwrap() {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    };
    assert_eq!(channel_list["type"], "channel_list");
}

#[tokio::test]
async fn banned_ip_is_rejected_on_reconnect() {
    let room = Arc::new(
        Room::new(RoomConfig::default(), Arc::new(SqliteStore::open_in_memory().unwrap())).unwrap(),
    );
    let addr = spawn_test_server(room.clone()).await;

    // Loopback test clients all connect from 127.0.0.1; ban that address
    // before the handshake so the join is rejected instead of welcomed.
    room.record_ban(BanRecord {
        id: 0,
        username: "Eve".to_string(),
        ip: Some("127.0.0.1".parse().unwrap()),
        reason: "test ban".to_string(),
        banned_by: "test-suite".to_string(),
        duration_s: 0,
        created_at_ms: chrono::Utc::now().timestamp_millis(),
    })
    .unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    ws.send(WsMessage::Text(
        serde_json::json!({"type": "join", "username": "Eve"})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    match ws.next().await.unwrap().unwrap() {
        WsMessage::Text(text) => {
            let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["type"], "banned");
        }
        WsMessage::Close(_) => {}
        other => panic!("expected a banned frame or close, got {other:?}"),
    }
}
