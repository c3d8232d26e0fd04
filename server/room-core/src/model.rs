use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{ChannelId, ClientId, MsgId};
use crate::outbound::OutboundSink;
use crate::perms::Role;
use crate::sendhealth::SendHealth;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// In-memory representation of a connected client. Owned exclusively by `Room`;
/// a `Session` only ever reaches it through `Room`'s lock, by id.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub display_name: String,
    pub channel_id: ChannelId,
    pub role: Role,
    pub muted: bool,
    pub mute_expires_at_ms: Option<i64>,
    pub remote_ip: IpAddr,
    pub last_control_ts_ms: i64,
    pub control_msg_count_in_window: u32,
    pub last_chat_ts_by_channel: HashMap<ChannelId, i64>,
    pub send_health: Arc<SendHealth>,
    pub sink: Arc<dyn OutboundSink>,
    /// Cancelled by `Room` when this session must be forcibly torn down
    /// (kick, ban, or eviction by a same-name rejoin) from another task.
    pub cancel: CancellationToken,
}

impl Client {
    pub fn new(
        id: ClientId,
        display_name: String,
        remote_ip: IpAddr,
        role: Role,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            id,
            display_name,
            channel_id: ChannelId::LOBBY,
            role,
            muted: false,
            mute_expires_at_ms: None,
            remote_ip,
            last_control_ts_ms: 0,
            control_msg_count_in_window: 0,
            last_chat_ts_by_channel: HashMap::new(),
            send_health: Arc::new(SendHealth::default()),
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Snapshot used in `user_list` / broadcasts. Cheap clone of small fields only.
    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            id: self.id,
            username: self.display_name.clone(),
            role: self.role,
            channel_id: self.channel_id,
            muted: self.is_effectively_muted(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn is_effectively_muted(&self, now_ms: i64) -> bool {
        match self.mute_expires_at_ms {
            Some(exp) if exp <= now_ms => false,
            Some(_) => self.muted,
            None => self.muted,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: ClientId,
    pub username: String,
    pub role: Role,
    pub channel_id: ChannelId,
    pub muted: bool,
}

#[derive(Clone, Debug)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub position: u32,
    pub max_users: u32,
    pub slow_mode_seconds: u32,
}

impl Channel {
    pub fn is_unlimited(&self) -> bool {
        self.max_users == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelListItem {
    pub id: ChannelId,
    pub name: String,
    pub position: u32,
    pub max_users: u32,
    pub slow_mode_seconds: u32,
}

impl From<&Channel> for ChannelListItem {
    fn from(c: &Channel) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            position: c.position,
            max_users: c.max_users,
            slow_mode_seconds: c.slow_mode_seconds,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileAttachment {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub msg_id: MsgId,
    pub sender_username: String,
    pub snippet: String,
    pub deleted: bool,
}

/// Authoritative message row. `sender_username` and `ts_ms` are always
/// server-stamped; never trust wire-supplied values for either.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MsgId,
    pub sender_id: ClientId,
    pub sender_username: String,
    pub channel_id: ChannelId,
    pub content: String,
    pub ts_ms: i64,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<ReplyPreview>,
    pub deleted: bool,
    pub edited: bool,
    pub last_edit_ts_ms: Option<i64>,
    pub pinned: bool,
    pub mentions: Vec<ClientId>,
    pub reactions: HashMap<String, HashSet<ClientId>>,
}

impl Message {
    pub fn preview(&self) -> ReplyPreview {
        ReplyPreview {
            msg_id: self.id,
            sender_username: self.sender_username.clone(),
            snippet: snippet(&self.content),
            deleted: self.deleted,
        }
    }
}

fn snippet(content: &str) -> String {
    const MAX: usize = 80;
    if content.len() <= MAX {
        content.to_string()
    } else {
        let mut end = MAX;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &content[..end])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: u64,
    pub actor_id: Option<ClientId>,
    pub actor_name: String,
    pub action: String,
    pub target: String,
    pub details_json: serde_json::Value,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: u64,
    pub username: String,
    pub ip: Option<IpAddr>,
    pub reason: String,
    pub banned_by: String,
    pub duration_s: u64,
    pub created_at_ms: i64,
}

impl BanRecord {
    pub fn is_permanent(&self) -> bool {
        self.duration_s == 0
    }

    pub fn expires_at_ms(&self) -> Option<i64> {
        if self.is_permanent() {
            None
        } else {
            Some(self.created_at_ms + (self.duration_s as i64) * 1000)
        }
    }

    pub fn is_active(&self, now_ms: i64) -> bool {
        match self.expires_at_ms() {
            None => true,
            Some(exp) => now_ms < exp,
        }
    }
}
