use room_core::{
    has_permission, Action, ChannelId, ClientId, ClientMessage, Role, Room, ServerMessage,
};

use crate::linkpreview;
use crate::recording::RecordingCollaborator;
use crate::state::AppState;

/// One incoming frame, fully handled: validate → permission → Room mutation
/// → broadcast, per spec.md §4.2. Nothing here ever propagates an error out
/// to the caller — every branch ends in either a Room call, a direct reply,
/// or a silent drop.
pub async fn handle(
    state: &AppState,
    self_id: ClientId,
    msg: ClientMessage,
    recording: &dyn RecordingCollaborator,
) {
    let room = &state.room;
    let Some(role) = room.client_role(self_id) else { return };
    let now_ms = chrono::Utc::now().timestamp_millis();

    match msg {
        ClientMessage::Join { .. } => {
            // Only valid as the handshake's first frame; handled before the
            // dispatch loop starts. A second `join` on an active session is
            // simply ignored.
        }

        ClientMessage::Ping => {
            room.send_control_to(self_id, ServerMessage::Pong);
        }

        ClientMessage::Replay { since } => {
            for cursor in since {
                for m in room.get_messages_since(cursor.channel_id, cursor.last_seen_msg_id) {
                    room.send_control_to(
                        self_id,
                        ServerMessage::Chat {
                            id: m.sender_id,
                            username: m.sender_username,
                            message: m.content,
                            ts: m.ts_ms,
                            channel_id: m.channel_id,
                            msg_id: m.id,
                            mentions: m.mentions,
                            file: m.file,
                            reply_to: m.reply_to,
                        },
                    );
                }
            }
        }

        ClientMessage::Chat { channel_id, message, file_id, reply_to } => {
            // File upload/storage is out of scope; a referenced file_id still
            // needs a stand-in attachment so an empty-content, file-only chat
            // passes `validate_chat`'s "empty body requires a file" rule.
            let file = file_id.map(|id| room_core::FileAttachment {
                file_id: id,
                name: String::new(),
                size: 0,
                content_type: String::new(),
            });
            match room.submit_chat(self_id, channel_id, &message, file, reply_to, now_ms) {
                Ok(m) => {
                    state.room_metrics.op_total("chat");
                    room.broadcast_control(
                        ServerMessage::Chat {
                            id: m.sender_id,
                            username: m.sender_username.clone(),
                            message: m.content.clone(),
                            ts: m.ts_ms,
                            channel_id: m.channel_id,
                            msg_id: m.id,
                            mentions: m.mentions.clone(),
                            file: m.file.clone(),
                            reply_to: m.reply_to.clone(),
                        },
                        None,
                    );
                    if let Some(url) = linkpreview::first_url(&m.content) {
                        linkpreview::spawn_fetch(room.clone(), url.to_string(), m.id, m.channel_id);
                    }
                }
                Err(room_core::RoomError::SlowMode(channel_id)) => {
                    room.send_control_to(self_id, ServerMessage::error_for_channel("slow_mode", channel_id));
                }
                Err(_) => {} // invalid content / unknown sender: silent drop
            }
        }

        ClientMessage::EditMessage { msg_id, content } => {
            if room.update_msg_content(msg_id, self_id, &content, now_ms).is_ok() {
                room.broadcast_control(ServerMessage::MessageEdited { msg_id, content, edited_ts: now_ms }, None);
            }
        }

        ClientMessage::DeleteMessage { msg_id } => {
            if room.mark_msg_deleted(msg_id, self_id, role).is_ok() {
                room.broadcast_control(ServerMessage::MessageDeleted { msg_id }, None);
            }
        }

        ClientMessage::Typing { channel_id } => {
            let Some(username) = room.client_display_name(self_id) else { return };
            room.broadcast_to_channel(channel_id, ServerMessage::Typing { id: self_id, username, channel_id }, Some(self_id));
        }

        ClientMessage::SearchMessages { channel_id, query, before, limit } => {
            let results = room.search_messages(channel_id, &query, before, limit.unwrap_or(50));
            room.send_control_to(self_id, ServerMessage::SearchResults { results });
        }

        ClientMessage::PinMessage { msg_id } => {
            if room.pin_message(msg_id).is_ok() {
                room.broadcast_control(ServerMessage::MessagePinned { msg_id }, None);
            }
        }

        ClientMessage::UnpinMessage { msg_id } => {
            if room.unpin_message(msg_id).is_ok() {
                room.broadcast_control(ServerMessage::MessageUnpinned { msg_id }, None);
            }
        }

        ClientMessage::GetPinnedMessages { channel_id } => {
            let messages = room.get_pinned_messages(channel_id);
            room.send_control_to(self_id, ServerMessage::PinnedList { channel_id, messages });
        }

        ClientMessage::AddReaction { msg_id, emoji } => {
            if room.add_reaction(msg_id, self_id, &emoji) {
                room.broadcast_control(ServerMessage::ReactionAdded { msg_id, emoji, user_id: self_id }, None);
            }
        }

        ClientMessage::RemoveReaction { msg_id, emoji } => {
            if room.remove_reaction(msg_id, self_id, &emoji) {
                room.broadcast_control(ServerMessage::ReactionRemoved { msg_id, emoji, user_id: self_id }, None);
            }
        }

        ClientMessage::WebrtcOffer { target_id, sdp } => forward_signal(room, self_id, target_id, |id| ServerMessage::WebrtcOffer { id, sdp }),
        ClientMessage::WebrtcAnswer { target_id, sdp } => forward_signal(room, self_id, target_id, |id| ServerMessage::WebrtcAnswer { id, sdp }),
        ClientMessage::WebrtcIce { target_id, candidate } => forward_signal(room, self_id, target_id, |id| ServerMessage::WebrtcIce { id, candidate }),

        ClientMessage::CreateChannel { name, max_users, slow_mode_seconds } => {
            if role < Role::Owner {
                return;
            }
            if let Ok(channel) = room.create_channel(&name, max_users.unwrap_or(0), slow_mode_seconds.unwrap_or(0)) {
                room.broadcast_control(ServerMessage::ChannelList { channels: room.get_channel_list() }, None);
                room.record_audit_log(Some(self_id), &actor_name(room, self_id), "create_channel", &channel.name, serde_json::json!({}));
            }
        }

        ClientMessage::RenameChannel { channel_id, name } => {
            if role < Role::Owner {
                return;
            }
            if room.rename_channel(channel_id, &name).is_ok() {
                room.broadcast_control(ServerMessage::ChannelList { channels: room.get_channel_list() }, None);
            }
        }

        ClientMessage::DeleteChannel { channel_id } => {
            if role < Role::Owner {
                return;
            }
            if let Ok(moved) = room.delete_channel(channel_id) {
                room.broadcast_control(ServerMessage::ChannelList { channels: room.get_channel_list() }, None);
                for id in moved {
                    room.broadcast_control(ServerMessage::UserChannel { id, channel_id: ChannelId::LOBBY }, None);
                }
            }
        }

        ClientMessage::JoinChannel { channel_id } => {
            match room.join_channel(self_id, channel_id) {
                Ok(()) => room.broadcast_control(ServerMessage::UserChannel { id: self_id, channel_id }, None),
                Err(room_core::RoomError::ChannelFull) => {
                    room.send_control_to(self_id, ServerMessage::error("Channel is full"));
                }
                Err(_) => {}
            }
        }

        ClientMessage::MoveUser { id, channel_id } => {
            if role < Role::Owner {
                return;
            }
            if room.set_client_channel(id, channel_id).is_ok() {
                room.broadcast_control(ServerMessage::UserChannel { id, channel_id }, None);
            }
        }

        ClientMessage::SetChannelLimit { channel_id, max_users } => {
            if role < Role::Owner {
                return;
            }
            if room.set_channel_max_users(channel_id, max_users).is_ok() {
                room.broadcast_control(ServerMessage::ChannelList { channels: room.get_channel_list() }, None);
            }
        }

        ClientMessage::Kick { id } => {
            if role < Role::Owner || id == self_id || room.client_role(id) == Some(Role::Owner) {
                return;
            }
            room.send_control_to(id, ServerMessage::Kicked);
            room.disconnect_client(id);
        }

        ClientMessage::Ban { id, ban_ip, reason, duration_s } => {
            if !has_permission(role, Action::Ban) || id == self_id || room.client_role(id) == Some(Role::Owner) {
                return;
            }
            let Some(username) = room.client_display_name(id) else { return };
            let ip = if ban_ip { room.client_remote_ip(id) } else { None };
            let ban = room_core::BanRecord {
                id: 0,
                username: username.clone(),
                ip,
                reason: reason.clone(),
                banned_by: actor_name(room, self_id),
                duration_s,
                created_at_ms: now_ms,
            };
            if room.record_ban(ban).is_ok() {
                room.record_audit_log(Some(self_id), &actor_name(room, self_id), "ban", &username, serde_json::json!({"reason": reason}));
                room.send_control_to(id, ServerMessage::Banned { reason });
                room.disconnect_client(id);
            }
        }

        ClientMessage::Unban { ban_id } => {
            if !has_permission(role, Action::Unban) {
                return;
            }
            let _ = room.remove_ban(ban_id);
        }

        ClientMessage::MuteUser { id, duration_s } => {
            if !has_permission(role, Action::MuteUser) || room.client_role(id) == Some(Role::Owner) {
                return;
            }
            let expiry = duration_s.map(|s| now_ms + (s as i64) * 1000);
            if room.set_client_mute(id, true, expiry).is_ok() {
                room.broadcast_control(ServerMessage::UserMuted { id, muted: true, expires_at_ms: expiry }, None);
            }
        }

        ClientMessage::UnmuteUser { id } => {
            if !has_permission(role, Action::UnmuteUser) {
                return;
            }
            if room.set_client_mute(id, false, None).is_ok() {
                room.broadcast_control(ServerMessage::UserMuted { id, muted: false, expires_at_ms: None }, None);
            }
        }

        ClientMessage::SetRole { id, role: new_role } => {
            if role < Role::Owner || id == self_id || !room_core::Role::assignable().contains(&new_role) {
                return;
            }
            if room.set_client_role(id, new_role).is_ok() {
                room.broadcast_control(ServerMessage::RoleChanged { id, role: new_role }, None);
            }
        }

        ClientMessage::Announce { content } => {
            if !has_permission(role, Action::Announce) {
                return;
            }
            let Some(name) = room.client_display_name(self_id) else { return };
            room.set_announcement(&content, &name);
            room.broadcast_control(ServerMessage::Announcement { content }, None);
        }

        ClientMessage::SetSlowMode { channel_id, seconds } => {
            if !has_permission(role, Action::SetSlowMode) {
                return;
            }
            let _ = room.set_slow_mode(channel_id, seconds);
        }

        ClientMessage::Rename { name } => {
            if role < Role::Owner {
                return;
            }
            if room.rename_server(&name).is_ok() {
                room.broadcast_control(ServerMessage::ChannelList { channels: room.get_channel_list() }, None);
            }
        }

        ClientMessage::RenameUser { username } => {
            if let Ok(summary) = room.rename_client(self_id, &username) {
                room.broadcast_control(ServerMessage::UserJoined(summary), None);
            }
        }

        ClientMessage::StartRecording { channel_id } => {
            if role < Role::Owner {
                return;
            }
            recording.start(channel_id);
            room.broadcast_control(ServerMessage::RecordingStarted { channel_id }, None);
        }

        ClientMessage::StopRecording { channel_id } => {
            if role < Role::Owner {
                return;
            }
            recording.stop(channel_id);
            room.broadcast_control(ServerMessage::RecordingStopped { channel_id }, None);
        }

        ClientMessage::ListRecordings => {
            if role < Role::Owner {
                return;
            }
            room.send_control_to(self_id, ServerMessage::RecordingsList { recordings: recording.list() });
        }

        ClientMessage::Unknown => {}
    }
}

fn forward_signal(room: &Room, self_id: ClientId, target_id: ClientId, build: impl FnOnce(ClientId) -> ServerMessage) {
    if target_id == self_id || room.client_role(target_id).is_none() {
        return;
    }
    room.send_control_to(target_id, build(self_id));
}

fn actor_name(room: &Room, id: ClientId) -> String {
    room.client_display_name(id).unwrap_or_else(|| "unknown".to_string())
}
