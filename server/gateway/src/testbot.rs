use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use room_core::{ChannelId, Room, ServerMessage};

use crate::outbound::MpscSink;

const BOT_INTERVAL: Duration = Duration::from_secs(10);

/// Joins `Room` directly as a synthetic client — no socket, no TLS, no
/// dispatch loop — and periodically sends recognizably-synthetic chat and
/// typing traffic to the lobby. Exists to exercise fan-out and the circuit
/// breaker without a second real client (spec.md component table's
/// "TestBot", §4.7).
pub async fn run(room: Arc<Room>, username: String) {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ServerMessage>(8);
    let sink = Arc::new(MpscSink::new(tx));
    // The bot's own inbox is drained and discarded: it never reads replies.
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let (id, _replaced) = room.add_or_replace_client(&username, IpAddr::V4(Ipv4Addr::LOCALHOST), sink);
    tracing::info!(username, ?id, "test bot joined");

    let counter = AtomicU64::new(0);
    let mut ticker = tokio::time::interval(BOT_INTERVAL);
    loop {
        ticker.tick().await;
        let n = counter.fetch_add(1, Ordering::Relaxed);
        let now_ms = chrono::Utc::now().timestamp_millis();

        room.broadcast_to_channel(
            ChannelId::LOBBY,
            ServerMessage::Typing { id, username: username.clone(), channel_id: ChannelId::LOBBY },
            Some(id),
        );

        let msg = match room.submit_chat(
            id,
            ChannelId::LOBBY,
            &format!("[testbot] synthetic message #{n}"),
            None,
            None,
            now_ms,
        ) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "test bot chat rejected");
                continue;
            }
        };

        room.broadcast_control(
            ServerMessage::Chat {
                id,
                username: username.clone(),
                message: msg.content,
                ts: msg.ts_ms,
                channel_id: msg.channel_id,
                msg_id: msg.id,
                mentions: msg.mentions,
                file: msg.file,
                reply_to: msg.reply_to,
            },
            None,
        );
    }
}
