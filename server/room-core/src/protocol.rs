//! Wire protocol: one tagged enum per direction instead of the single
//! all-optional-fields envelope the distilled spec describes (see DESIGN.md,
//! REDESIGN FLAG). The wire format — one JSON object per frame, `type` field
//! selects the variant — is unchanged; only the in-process representation is
//! a proper discriminated union, so `match` on it is exhaustive.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, ClientId, MsgId};
use crate::model::{ChannelListItem, ClientSummary, FileAttachment, IceServer, ReplyPreview};
use crate::perms::Role;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        username: String,
    },
    Ping,
    Replay {
        #[serde(default)]
        since: Vec<ReplayCursor>,
    },

    Chat {
        channel_id: ChannelId,
        #[serde(default)]
        message: String,
        #[serde(default)]
        file_id: Option<String>,
        #[serde(default)]
        reply_to: Option<MsgId>,
    },
    EditMessage {
        msg_id: MsgId,
        content: String,
    },
    DeleteMessage {
        msg_id: MsgId,
    },
    Typing {
        channel_id: ChannelId,
    },
    SearchMessages {
        channel_id: ChannelId,
        query: String,
        #[serde(default)]
        before: Option<MsgId>,
        #[serde(default)]
        limit: Option<usize>,
    },
    PinMessage {
        msg_id: MsgId,
    },
    UnpinMessage {
        msg_id: MsgId,
    },
    GetPinnedMessages {
        channel_id: ChannelId,
    },

    AddReaction {
        msg_id: MsgId,
        emoji: String,
    },
    RemoveReaction {
        msg_id: MsgId,
        emoji: String,
    },

    WebrtcOffer {
        target_id: ClientId,
        sdp: serde_json::Value,
    },
    WebrtcAnswer {
        target_id: ClientId,
        sdp: serde_json::Value,
    },
    WebrtcIce {
        target_id: ClientId,
        candidate: serde_json::Value,
    },

    CreateChannel {
        name: String,
        #[serde(default)]
        max_users: Option<u32>,
        #[serde(default)]
        slow_mode_seconds: Option<u32>,
    },
    RenameChannel {
        channel_id: ChannelId,
        name: String,
    },
    DeleteChannel {
        channel_id: ChannelId,
    },
    JoinChannel {
        channel_id: ChannelId,
    },
    MoveUser {
        id: ClientId,
        channel_id: ChannelId,
    },
    SetChannelLimit {
        channel_id: ChannelId,
        max_users: u32,
    },

    Kick {
        id: ClientId,
    },
    Ban {
        id: ClientId,
        #[serde(default)]
        ban_ip: bool,
        reason: String,
        #[serde(default)]
        duration_s: u64,
    },
    Unban {
        ban_id: u64,
    },
    MuteUser {
        id: ClientId,
        #[serde(default)]
        duration_s: Option<u64>,
    },
    UnmuteUser {
        id: ClientId,
    },
    SetRole {
        id: ClientId,
        role: Role,
    },
    Announce {
        content: String,
    },
    SetSlowMode {
        channel_id: ChannelId,
        seconds: u32,
    },
    Rename {
        name: String,
    },
    RenameUser {
        username: String,
    },

    StartRecording {
        channel_id: ChannelId,
    },
    StopRecording {
        channel_id: ChannelId,
    },
    ListRecordings,

    /// Anything we don't (yet) recognize. Keeps deserialization infallible for
    /// unknown `type` values instead of erroring the whole frame out.
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayCursor {
    pub channel_id: ChannelId,
    pub last_seen_msg_id: MsgId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    UserList {
        self_id: ClientId,
        users: Vec<ClientSummary>,
        server_name: String,
        owner_id: Option<ClientId>,
        api_port: u16,
        ice_servers: Vec<IceServer>,
    },
    ChannelList {
        channels: Vec<ChannelListItem>,
    },
    Announcement {
        content: String,
    },
    Pong,

    Chat {
        id: ClientId,
        username: String,
        message: String,
        ts: i64,
        channel_id: ChannelId,
        msg_id: MsgId,
        mentions: Vec<ClientId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<FileAttachment>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyPreview>,
    },
    MessageEdited {
        msg_id: MsgId,
        content: String,
        edited_ts: i64,
    },
    MessageDeleted {
        msg_id: MsgId,
    },
    Typing {
        id: ClientId,
        username: String,
        channel_id: ChannelId,
    },
    SearchResults {
        results: Vec<crate::model::Message>,
    },
    MessagePinned {
        msg_id: MsgId,
    },
    MessageUnpinned {
        msg_id: MsgId,
    },
    PinnedList {
        channel_id: ChannelId,
        messages: Vec<crate::model::Message>,
    },

    ReactionAdded {
        msg_id: MsgId,
        emoji: String,
        user_id: ClientId,
    },
    ReactionRemoved {
        msg_id: MsgId,
        emoji: String,
        user_id: ClientId,
    },

    WebrtcOffer {
        id: ClientId,
        sdp: serde_json::Value,
    },
    WebrtcAnswer {
        id: ClientId,
        sdp: serde_json::Value,
    },
    WebrtcIce {
        id: ClientId,
        candidate: serde_json::Value,
    },

    UserJoined(ClientSummary),
    UserLeft {
        id: ClientId,
    },
    UserChannel {
        id: ClientId,
        channel_id: ChannelId,
    },
    OwnerChanged {
        owner_id: ClientId,
    },
    RoleChanged {
        id: ClientId,
        role: Role,
    },
    UserMuted {
        id: ClientId,
        muted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at_ms: Option<i64>,
    },

    Kicked,
    Banned {
        reason: String,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
    },

    LinkPreview {
        msg_id: MsgId,
        channel_id: ChannelId,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        site_name: Option<String>,
    },

    RecordingStarted {
        channel_id: ChannelId,
    },
    RecordingStopped {
        channel_id: ChannelId,
    },
    RecordingsList {
        recordings: Vec<String>,
    },
}

impl ServerMessage {
    pub fn error(code: &str) -> Self {
        ServerMessage::Error { error: code.to_string(), channel_id: None }
    }

    pub fn error_for_channel(code: &str, channel_id: ChannelId) -> Self {
        ServerMessage::Error { error: code.to_string(), channel_id: Some(channel_id) }
    }
}
