//! Per-connection loop (spec §4.2): join handshake, registration, welcome,
//! rate-limited read loop, dispatch, teardown. State machine is
//! `NEW -> AWAIT_JOIN -> REGISTERED -> ACTIVE -> TERMINATING`; the stages
//! below run strictly in that order and every exit path (return, break,
//! cancellation) funnels into `teardown`, which is idempotent.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use room_core::{validate_name, ClientId, ClientMessage, OutboundSink, Room, ServerMessage};

use crate::dispatch;
use crate::outbound::MpscSink;
use crate::ratelimit::RateLimiter;
use crate::recording::NoopRecordingCollaborator;
use crate::state::AppState;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocket, Message>;

async fn send_frame(sink: &mut WsSink, msg: &ServerMessage) -> bool {
    let Ok(text) = serde_json::to_string(msg) else { return false };
    sink.send(Message::Text(text.into())).await.is_ok()
}

/// Drives one accepted WebSocket connection end to end. Never panics or
/// propagates an error out — every failure path is a silent return, matching
/// spec §7's "handlers never raise out of the session loop".
pub async fn run(socket: WebSocket, state: AppState, remote_ip: IpAddr) {
    state.connection_metrics.conn_accepted();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // AWAIT_JOIN: exactly one frame, with a timeout, must be a valid `join`.
    let first_frame = match tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_rx.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            state.connection_metrics.join_rejected("no_join_frame");
            return;
        }
    };
    let Ok(ClientMessage::Join { username }) = serde_json::from_str::<ClientMessage>(first_frame.as_ref()) else {
        state.connection_metrics.join_rejected("bad_join_frame");
        return;
    };
    let Some(display_name) = validate_name(&username) else {
        state.connection_metrics.join_rejected("bad_username");
        return;
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    if let Some(ban) = state.room.is_ip_banned(remote_ip, now_ms) {
        send_frame(&mut ws_tx, &ServerMessage::Banned { reason: ban.reason }).await;
        state.connection_metrics.join_rejected("ip_banned");
        return;
    }
    if let Some(ban) = state.room.is_username_banned(&display_name, now_ms) {
        send_frame(&mut ws_tx, &ServerMessage::Banned { reason: ban.reason }).await;
        state.connection_metrics.join_rejected("username_banned");
        return;
    }
    if state.room.client_count() >= state.config.max_connections {
        state.connection_metrics.join_rejected("max_connections");
        return;
    }
    if state.room.client_count_for_ip(remote_ip) >= state.config.max_connections_per_ip {
        state.connection_metrics.join_rejected("max_connections_per_ip");
        return;
    }

    // REGISTERED: claim an id, evict any live same-name session.
    let (tx, mut outbound_rx) = tokio::sync::mpsc::channel(crate::outbound::OUTBOUND_QUEUE_DEPTH);
    let sink: Arc<dyn OutboundSink> = Arc::new(MpscSink::new(tx));
    let (self_id, replaced) = state.room.add_or_replace_client(&display_name, remote_ip, sink);
    if let Some(replaced) = replaced {
        replaced.cancel.cancel();
        state.room.broadcast_departure(replaced.id, replaced.previous_owner);
    }
    state.room.claim_ownership(self_id);

    // Welcome sequence, written directly (no writer task yet, so nothing can
    // interleave ahead of it): user_list, channel_list, announcement.
    let users = state.room.client_summaries();
    let welcome = ServerMessage::UserList {
        self_id,
        users: users.clone(),
        server_name: state.room.server_name(),
        owner_id: state.room.owner_id(),
        api_port: state.room.api_port(),
        ice_servers: state.room.ice_servers(),
    };
    if !send_frame(&mut ws_tx, &welcome).await {
        teardown(&state.room, self_id).await;
        return;
    }
    send_frame(&mut ws_tx, &ServerMessage::ChannelList { channels: state.room.get_channel_list() }).await;
    if let Some(content) = state.room.get_announcement() {
        send_frame(&mut ws_tx, &ServerMessage::Announcement { content }).await;
    }

    // ACTIVE: broadcast user_joined, then hand the write half to its own
    // dedicated drain task so per-recipient ordering only depends on
    // enqueue order (spec §5).
    if let Some(summary) = users.into_iter().find(|u| u.id == self_id) {
        state.room.broadcast_control(ServerMessage::UserJoined(summary), Some(self_id));
    }

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if !send_frame(&mut ws_tx, &msg).await {
                break;
            }
        }
    });

    let Some(cancel) = state.room.cancel_token(self_id) else {
        teardown(&state.room, self_id).await;
        let _ = writer.await;
        return;
    };
    let mut limiter = RateLimiter::control_default();
    let recording = NoopRecordingCollaborator;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !limiter.allow() {
                            state.connection_metrics.rate_limited();
                            continue;
                        }
                        let Ok(msg) = serde_json::from_str::<ClientMessage>(text.as_ref()) else { continue };
                        state.connection_metrics.control_msg_rx(msg_kind(&msg));
                        dispatch::handle(&state, self_id, msg, &recording).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    // TERMINATING: idempotent regardless of which branch above exited.
    teardown(&state.room, self_id).await;
    let _ = writer.await;
    state.connection_metrics.conn_closed();
}

/// Removes the client and runs the departure broadcast exactly once. Safe to
/// call more than once for the same id, but only the departing session's own
/// exit path should ever call it: kick/ban instead cancel the target's
/// token (`Room::disconnect_client`) and let that session's own read loop
/// observe the cancellation and run this itself, which is what actually
/// closes its transport.
pub async fn teardown(room: &Room, id: ClientId) {
    let previous_owner = room.owner_id();
    if room.remove_client(id) {
        room.broadcast_departure(id, previous_owner);
    }
}

fn msg_kind(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Join { .. } => "join",
        ClientMessage::Ping => "ping",
        ClientMessage::Replay { .. } => "replay",
        ClientMessage::Chat { .. } => "chat",
        ClientMessage::EditMessage { .. } => "edit_message",
        ClientMessage::DeleteMessage { .. } => "delete_message",
        ClientMessage::Typing { .. } => "typing",
        ClientMessage::SearchMessages { .. } => "search_messages",
        ClientMessage::PinMessage { .. } => "pin_message",
        ClientMessage::UnpinMessage { .. } => "unpin_message",
        ClientMessage::GetPinnedMessages { .. } => "get_pinned_messages",
        ClientMessage::AddReaction { .. } => "add_reaction",
        ClientMessage::RemoveReaction { .. } => "remove_reaction",
        ClientMessage::WebrtcOffer { .. } => "webrtc_offer",
        ClientMessage::WebrtcAnswer { .. } => "webrtc_answer",
        ClientMessage::WebrtcIce { .. } => "webrtc_ice",
        ClientMessage::CreateChannel { .. } => "create_channel",
        ClientMessage::RenameChannel { .. } => "rename_channel",
        ClientMessage::DeleteChannel { .. } => "delete_channel",
        ClientMessage::JoinChannel { .. } => "join_channel",
        ClientMessage::MoveUser { .. } => "move_user",
        ClientMessage::SetChannelLimit { .. } => "set_channel_limit",
        ClientMessage::Kick { .. } => "kick",
        ClientMessage::Ban { .. } => "ban",
        ClientMessage::Unban { .. } => "unban",
        ClientMessage::MuteUser { .. } => "mute_user",
        ClientMessage::UnmuteUser { .. } => "unmute_user",
        ClientMessage::SetRole { .. } => "set_role",
        ClientMessage::Announce { .. } => "announce",
        ClientMessage::SetSlowMode { .. } => "set_slow_mode",
        ClientMessage::Rename { .. } => "rename",
        ClientMessage::RenameUser { .. } => "rename_user",
        ClientMessage::StartRecording { .. } => "start_recording",
        ClientMessage::StopRecording { .. } => "stop_recording",
        ClientMessage::ListRecordings => "list_recordings",
        ClientMessage::Unknown => "unknown",
    }
}
