//! The single in-memory authority (spec §4.3). One `parking_lot::RwLock`
//! guards every map and counter here — this supersedes the teacher's split
//! `ChannelService`/`MembershipService`, which held independent locks and so
//! could not offer the "single mutex guards all maps" invariant spec §5
//! requires. Message-id and client-id allocation use their own atomics and
//! don't need the lock at all.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::audit::AuditWriter;
use crate::config::RoomConfig;
use crate::errors::{RoomError, RoomResult};
use crate::ids::{ChannelId, ChannelIdGen, ClientId, ClientIdGen, MsgId, MsgIdGen};
use crate::mentions::{resolve_mentions, sort_roster_for_mentions};
use crate::model::{
    AuditLogEntry, BanRecord, Channel, ChannelListItem, Client, ClientSummary, IceServer, Message,
    ReplyPreview,
};
use crate::outbound::OutboundSink;
use crate::perms::Role;
use crate::persistence::PersistenceStore;
use crate::protocol::ServerMessage;
use crate::sendhealth::BreakerParams;
use crate::validation::{validate_chat_content, validate_name};

struct OwnerEntry {
    owner: ClientId,
    channel_id: ChannelId,
}

/// The client evicted by a same-name rejoin, and what the caller needs to
/// finish tearing it down: its cancellation token (to stop its session loop)
/// and the owner id as it stood immediately before removal (to feed
/// `broadcast_departure`'s owner-change check).
pub struct ReplacedClient {
    pub id: ClientId,
    pub cancel: tokio_util::sync::CancellationToken,
    pub previous_owner: Option<ClientId>,
}

struct Inner {
    clients: HashMap<ClientId, Client>,
    channels: HashMap<ChannelId, Channel>,
    rings: HashMap<ChannelId, VecDeque<Message>>,
    owner_index: HashMap<MsgId, OwnerEntry>,
    owner_eviction: VecDeque<MsgId>,
    owner_id: Option<ClientId>,
    announcement: Option<String>,
    server_name: String,
}

pub struct Room {
    inner: RwLock<Inner>,
    persistence: Arc<dyn PersistenceStore>,
    audit: AuditWriter,
    config: RoomConfig,
    client_ids: ClientIdGen,
    channel_ids: ChannelIdGen,
    msg_ids: MsgIdGen,
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

impl Room {
    /// Loads channels/announcement from persistence, seeding a "General"
    /// channel on first run (spec §3 Channel lifecycle).
    pub fn new(config: RoomConfig, persistence: Arc<dyn PersistenceStore>) -> RoomResult<Self> {
        let mut channels = persistence
            .list_channels()
            .map_err(|e| RoomError::FailedPrecondition("failed loading channels").context(e))?;

        let channel_ids = ChannelIdGen::default();
        if channels.is_empty() {
            let general = Channel {
                id: ChannelId(1),
                name: "General".to_string(),
                position: 0,
                max_users: 0,
                slow_mode_seconds: 0,
            };
            persistence
                .insert_channel(&general)
                .map_err(|e| RoomError::FailedPrecondition("failed seeding General channel").context(e))?;
            channels.push(general);
        }
        for ch in &channels {
            channel_ids.observe(ch.id);
        }

        let announcement = persistence.get_announcement().unwrap_or(None);

        let inner = Inner {
            clients: HashMap::new(),
            channels: channels.into_iter().map(|c| (c.id, c)).collect(),
            rings: HashMap::new(),
            owner_index: HashMap::new(),
            owner_eviction: VecDeque::new(),
            owner_id: None,
            announcement,
            server_name: config.server_name.clone(),
        };

        Ok(Self {
            inner: RwLock::new(inner),
            persistence,
            audit: AuditWriter,
            config,
            client_ids: ClientIdGen::default(),
            channel_ids,
            msg_ids: MsgIdGen::default(),
        })
    }

    fn breaker_params(&self) -> BreakerParams {
        BreakerParams {
            open_threshold: self.config.breaker_open_threshold,
            probe_cadence: self.config.breaker_probe_cadence,
        }
    }

    /// Attempts delivery to one client, honoring the circuit breaker. Must be
    /// called with the Room lock NOT held.
    fn deliver_one(&self, sink: &Arc<dyn OutboundSink>, health: &Arc<crate::sendhealth::SendHealth>, msg: &ServerMessage) {
        let params = self.breaker_params();
        if health.should_skip(params) {
            return;
        }
        if sink.enqueue(msg.clone()) {
            health.record_success();
        } else {
            health.record_failure(params);
        }
    }

    fn deliver_many(&self, targets: Vec<(Arc<dyn OutboundSink>, Arc<crate::sendhealth::SendHealth>)>, msg: ServerMessage) {
        for (sink, health) in targets {
            self.deliver_one(&sink, &health, &msg);
        }
    }

    // -------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------

    /// Returns the assigned id, plus the replaced client's id/cancel-token/
    /// pre-removal owner if a live client shared the same display name. The
    /// caller cancels the replaced client's transport and broadcasts its
    /// departure (`Room::broadcast_departure`) — Room only owns in-memory
    /// state, never the connection itself.
    pub fn add_or_replace_client(
        &self,
        display_name: &str,
        remote_ip: IpAddr,
        sink: Arc<dyn OutboundSink>,
    ) -> (ClientId, Option<ReplacedClient>) {
        let role = self
            .persistence
            .get_user_role(display_name)
            .unwrap_or(None)
            .unwrap_or(Role::User);

        let mut inner = self.inner.write();

        let normalized = normalize_name(display_name);
        let replaced = inner
            .clients
            .values()
            .find(|c| normalize_name(&c.display_name) == normalized)
            .map(|c| (c.id, c.cancel.clone()));

        let replaced_out = replaced.map(|(old_id, cancel)| {
            let previous_owner = inner.owner_id;
            Self::remove_client_locked(&mut inner, old_id);
            ReplacedClient { id: old_id, cancel, previous_owner }
        });

        let new_id = self.client_ids.next();
        let client = Client::new(new_id, display_name.to_string(), remote_ip, role, sink);
        inner.clients.insert(new_id, client);

        (new_id, replaced_out)
    }

    /// Clone of the client's cancellation token, used by the session loop to
    /// select on forced disconnection alongside its socket read.
    pub fn cancel_token(&self, id: ClientId) -> Option<tokio_util::sync::CancellationToken> {
        self.inner.read().clients.get(&id).map(|c| c.cancel.clone())
    }

    /// Signals a client's session to stop reading and tear itself down
    /// (kick, ban). Does not remove the client itself — the session's own
    /// exit path calls `remove_client`/`broadcast_departure`.
    pub fn disconnect_client(&self, id: ClientId) {
        if let Some(c) = self.inner.read().clients.get(&id) {
            c.cancel.cancel();
        }
    }

    /// Sets ownership only if currently unset. Returns true if this call claimed it.
    pub fn claim_ownership(&self, id: ClientId) -> bool {
        let mut inner = self.inner.write();
        if inner.owner_id.is_none() {
            inner.owner_id = Some(id);
            if let Some(c) = inner.clients.get_mut(&id) {
                c.role = Role::Owner;
            }
            true
        } else {
            false
        }
    }

    /// Idempotent; returns whether the client was present.
    pub fn remove_client(&self, id: ClientId) -> bool {
        let mut inner = self.inner.write();
        Self::remove_client_locked(&mut inner, id)
    }

    fn remove_client_locked(inner: &mut Inner, id: ClientId) -> bool {
        let removed = inner.clients.remove(&id).is_some();
        if !removed {
            return false;
        }
        if inner.owner_id == Some(id) {
            inner.owner_id = Self::pick_new_owner(inner);
        }
        removed
    }

    fn pick_new_owner(inner: &mut Inner) -> Option<ClientId> {
        let new_owner = inner.clients.keys().min().copied();
        if let Some(id) = new_owner {
            if let Some(c) = inner.clients.get_mut(&id) {
                c.role = Role::Owner;
            }
        }
        new_owner
    }

    /// Runs the teardown broadcast sequence for a departed client: `user_left`
    /// to everyone, then `owner_changed` if ownership moved. Call after
    /// `remove_client` returns true. Kept separate from `remove_client` itself
    /// so callers (handshake replacement vs. normal disconnect) can decide
    /// whether/how to sequence it against other welcome traffic.
    pub fn broadcast_departure(&self, id: ClientId, previous_owner: Option<ClientId>) {
        self.broadcast_control(ServerMessage::UserLeft { id }, None);
        let new_owner = self.inner.read().owner_id;
        if previous_owner == Some(id) && new_owner != previous_owner {
            if let Some(owner_id) = new_owner {
                self.broadcast_control(ServerMessage::OwnerChanged { owner_id }, None);
            }
        }
    }

    pub fn owner_id(&self) -> Option<ClientId> {
        self.inner.read().owner_id
    }

    pub fn has_owner(&self) -> bool {
        self.inner.read().owner_id.is_some()
    }

    // -------------------------------------------------------------------
    // Snapshots / welcome payload
    // -------------------------------------------------------------------

    pub fn client_summaries(&self) -> Vec<ClientSummary> {
        let inner = self.inner.read();
        inner.clients.values().map(Client::summary).collect()
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }

    pub fn client_count_for_ip(&self, ip: IpAddr) -> usize {
        self.inner.read().clients.values().filter(|c| c.remote_ip == ip).count()
    }

    pub fn client_role(&self, id: ClientId) -> Option<Role> {
        self.inner.read().clients.get(&id).map(|c| c.role)
    }

    pub fn client_channel(&self, id: ClientId) -> Option<ChannelId> {
        self.inner.read().clients.get(&id).map(|c| c.channel_id)
    }

    pub fn client_remote_ip(&self, id: ClientId) -> Option<IpAddr> {
        self.inner.read().clients.get(&id).map(|c| c.remote_ip)
    }

    pub fn client_display_name(&self, id: ClientId) -> Option<String> {
        self.inner.read().clients.get(&id).map(|c| c.display_name.clone())
    }

    /// A client renaming themselves (`rename_user`). Rejects names already in
    /// use by another live client, same rule `add_or_replace_client` applies
    /// to join-time names.
    pub fn rename_client(&self, id: ClientId, new_name: &str) -> RoomResult<ClientSummary> {
        let name = validate_name(new_name).ok_or(RoomError::InvalidArgument("username"))?;
        let normalized = normalize_name(&name);
        let mut inner = self.inner.write();
        if inner
            .clients
            .values()
            .any(|c| c.id != id && normalize_name(&c.display_name) == normalized)
        {
            return Err(RoomError::AlreadyExists("username"));
        }
        let client = inner.clients.get_mut(&id).ok_or(RoomError::NotFound("client"))?;
        client.display_name = name;
        Ok(client.summary())
    }

    pub fn server_name(&self) -> String {
        self.inner.read().server_name.clone()
    }

    pub fn rename_server(&self, new_name: &str) -> RoomResult<()> {
        let name = validate_name(new_name).ok_or(RoomError::InvalidArgument("server name"))?;
        self.inner.write().server_name = name.clone();
        if let Err(e) = self.persistence.set_setting("server_name", &name) {
            tracing::warn!(error = %e, "failed to persist server name");
        }
        Ok(())
    }

    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.config.ice_servers.clone()
    }

    pub fn api_port(&self) -> u16 {
        self.config.api_port
    }

    pub fn get_announcement(&self) -> Option<String> {
        self.inner.read().announcement.clone()
    }

    pub fn set_announcement(&self, content: &str, created_by: &str) {
        self.inner.write().announcement = Some(content.to_string());
        if let Err(e) = self.persistence.set_announcement(content, created_by) {
            tracing::warn!(error = %e, "failed to persist announcement");
        }
    }

    // -------------------------------------------------------------------
    // Broadcast primitives
    // -------------------------------------------------------------------

    pub fn broadcast_control(&self, msg: ServerMessage, exclude: Option<ClientId>) {
        let targets: Vec<_> = {
            let inner = self.inner.read();
            inner
                .clients
                .values()
                .filter(|c| Some(c.id) != exclude)
                .map(|c| (c.sink.clone(), c.send_health.clone()))
                .collect()
        };
        self.deliver_many(targets, msg);
    }

    pub fn broadcast_to_channel(&self, channel_id: ChannelId, msg: ServerMessage, exclude: Option<ClientId>) {
        let targets: Vec<_> = {
            let inner = self.inner.read();
            inner
                .clients
                .values()
                .filter(|c| c.channel_id == channel_id && Some(c.id) != exclude)
                .map(|c| (c.sink.clone(), c.send_health.clone()))
                .collect()
        };
        self.deliver_many(targets, msg);
    }

    pub fn send_control_to(&self, target: ClientId, msg: ServerMessage) -> bool {
        let found = {
            let inner = self.inner.read();
            inner.clients.get(&target).map(|c| (c.sink.clone(), c.send_health.clone()))
        };
        match found {
            Some((sink, health)) => {
                self.deliver_one(&sink, &health, &msg);
                true
            }
            None => false,
        }
    }

    // -------------------------------------------------------------------
    // Channel management
    // -------------------------------------------------------------------

    pub fn channel_count(&self) -> usize {
        self.inner.read().channels.len()
    }

    pub fn get_channel_list(&self) -> Vec<ChannelListItem> {
        let inner = self.inner.read();
        let mut list: Vec<_> = inner.channels.values().map(ChannelListItem::from).collect();
        list.sort_by_key(|c| c.position);
        list
    }

    pub fn create_channel(&self, name: &str, max_users: u32, slow_mode_seconds: u32) -> RoomResult<Channel> {
        let name = validate_name(name).ok_or(RoomError::InvalidArgument("channel name"))?;
        let slow_mode_seconds = slow_mode_seconds.min(self.config.slow_mode_max_seconds);

        let mut inner = self.inner.write();
        if inner.channels.values().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            return Err(RoomError::AlreadyExists("channel name"));
        }
        let position = inner.channels.len() as u32;
        let channel = Channel {
            id: self.channel_ids.next(),
            name,
            position,
            max_users,
            slow_mode_seconds,
        };
        if let Err(e) = self.persistence.insert_channel(&channel) {
            tracing::warn!(error = %e, "failed to persist new channel");
        }
        inner.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    pub fn rename_channel(&self, id: ChannelId, name: &str) -> RoomResult<()> {
        let name = validate_name(name).ok_or(RoomError::InvalidArgument("channel name"))?;
        let mut inner = self.inner.write();
        if inner.channels.values().any(|c| c.id != id && c.name.eq_ignore_ascii_case(&name)) {
            return Err(RoomError::AlreadyExists("channel name"));
        }
        let channel = inner.channels.get_mut(&id).ok_or(RoomError::NotFound("channel"))?;
        channel.name = name;
        let snapshot = channel.clone();
        if let Err(e) = self.persistence.update_channel(&snapshot) {
            tracing::warn!(error = %e, "failed to persist channel rename");
        }
        Ok(())
    }

    /// Forbidden when it would leave zero channels. Moves occupants to the
    /// lobby (channel 0) and discards that channel's message ring.
    pub fn delete_channel(&self, id: ChannelId) -> RoomResult<Vec<ClientId>> {
        let mut inner = self.inner.write();
        if !inner.channels.contains_key(&id) {
            return Err(RoomError::NotFound("channel"));
        }
        if inner.channels.len() <= 1 {
            return Err(RoomError::FailedPrecondition("cannot delete the last channel"));
        }
        inner.channels.remove(&id);
        inner.rings.remove(&id);

        let mut moved = Vec::new();
        for c in inner.clients.values_mut() {
            if c.channel_id == id {
                c.channel_id = ChannelId::LOBBY;
                moved.push(c.id);
            }
        }

        if let Err(e) = self.persistence.delete_channel(id) {
            tracing::warn!(error = %e, "failed to persist channel deletion");
        }
        Ok(moved)
    }

    pub fn can_join_channel(&self, id: ChannelId) -> RoomResult<bool> {
        if id.is_lobby() {
            return Ok(true);
        }
        let inner = self.inner.read();
        let channel = inner.channels.get(&id).ok_or(RoomError::NotFound("channel"))?;
        if channel.is_unlimited() {
            return Ok(true);
        }
        let occupancy = inner.clients.values().filter(|c| c.channel_id == id).count() as u32;
        Ok(occupancy < channel.max_users)
    }

    /// Updates the client's channel membership. Caller has already checked
    /// `can_join_channel`.
    pub fn set_client_channel(&self, id: ClientId, channel_id: ChannelId) -> RoomResult<()> {
        let mut inner = self.inner.write();
        if !channel_id.is_lobby() && !inner.channels.contains_key(&channel_id) {
            return Err(RoomError::NotFound("channel"));
        }
        let client = inner.clients.get_mut(&id).ok_or(RoomError::NotFound("client"))?;
        client.channel_id = channel_id;
        Ok(())
    }

    /// Checks occupancy and moves the client in one call, closing the gap
    /// between `can_join_channel` and `set_client_channel` that would
    /// otherwise let two simultaneous joiners both pass the check.
    pub fn join_channel(&self, id: ClientId, channel_id: ChannelId) -> RoomResult<()> {
        let mut inner = self.inner.write();
        if !channel_id.is_lobby() {
            let channel = inner.channels.get(&channel_id).ok_or(RoomError::NotFound("channel"))?;
            if !channel.is_unlimited() {
                let occupancy = inner.clients.values().filter(|c| c.channel_id == channel_id).count() as u32;
                if occupancy >= channel.max_users {
                    return Err(RoomError::ChannelFull);
                }
            }
        }
        let client = inner.clients.get_mut(&id).ok_or(RoomError::NotFound("client"))?;
        client.channel_id = channel_id;
        Ok(())
    }

    pub fn set_channel_max_users(&self, id: ChannelId, max_users: u32) -> RoomResult<()> {
        let mut inner = self.inner.write();
        let channel = inner.channels.get_mut(&id).ok_or(RoomError::NotFound("channel"))?;
        channel.max_users = max_users;
        let snapshot = channel.clone();
        if let Err(e) = self.persistence.update_channel(&snapshot) {
            tracing::warn!(error = %e, "failed to persist channel limit");
        }
        Ok(())
    }

    pub fn set_slow_mode(&self, id: ChannelId, seconds: u32) -> RoomResult<()> {
        let seconds = seconds.min(self.config.slow_mode_max_seconds);
        let mut inner = self.inner.write();
        let channel = inner.channels.get_mut(&id).ok_or(RoomError::NotFound("channel"))?;
        channel.slow_mode_seconds = seconds;
        let snapshot = channel.clone();
        if let Err(e) = self.persistence.update_channel(&snapshot) {
            tracing::warn!(error = %e, "failed to persist slow mode");
        }
        Ok(())
    }

    /// Returns false (without mutating state) if the cooldown window hasn't
    /// elapsed. Test-and-update happen under the same write lock, so there is
    /// no TOCTOU between checking and recording the new timestamp.
    pub fn check_slow_mode(&self, client_id: ClientId, channel_id: ChannelId, now_ms: i64) -> bool {
        let mut inner = self.inner.write();
        let cooldown_s = inner.channels.get(&channel_id).map(|c| c.slow_mode_seconds).unwrap_or(0);
        if cooldown_s == 0 {
            if let Some(client) = inner.clients.get_mut(&client_id) {
                client.last_chat_ts_by_channel.insert(channel_id, now_ms);
            }
            return true;
        }
        let Some(client) = inner.clients.get_mut(&client_id) else { return true };
        let last = client.last_chat_ts_by_channel.get(&channel_id).copied();
        if let Some(last) = last {
            if now_ms - last < (cooldown_s as i64) * 1000 {
                return false;
            }
        }
        client.last_chat_ts_by_channel.insert(channel_id, now_ms);
        true
    }

    // -------------------------------------------------------------------
    // Message store
    // -------------------------------------------------------------------

    pub fn next_msg_id(&self) -> MsgId {
        self.msg_ids.next()
    }

    fn evict_owner_index_if_needed(inner: &mut Inner, cap: usize) {
        while inner.owner_eviction.len() > cap {
            if let Some(old) = inner.owner_eviction.pop_front() {
                inner.owner_index.remove(&old);
            }
        }
    }

    /// Records a freshly-stamped message into the per-channel ring and the
    /// global owner index. Trims both to their configured bounds.
    pub fn record_msg(&self, msg: Message) {
        let mut inner = self.inner.write();
        let channel_id = msg.channel_id;
        let id = msg.id;
        let owner = msg.sender_id;

        let ring_size = self.config.message_ring_size;
        let ring = inner.rings.entry(channel_id).or_default();
        ring.push_back(msg);
        while ring.len() > ring_size {
            ring.pop_front();
        }

        inner.owner_index.insert(id, OwnerEntry { owner, channel_id });
        inner.owner_eviction.push_back(id);
        let cap = self.config.owner_map_size;
        Self::evict_owner_index_if_needed(&mut inner, cap);
    }

    pub fn get_msg_owner(&self, id: MsgId) -> Option<ClientId> {
        self.inner.read().owner_index.get(&id).map(|e| e.owner)
    }

    fn find_msg_mut<'a>(inner: &'a mut Inner, id: MsgId) -> Option<&'a mut Message> {
        let channel_id = inner.owner_index.get(&id)?.channel_id;
        inner.rings.get_mut(&channel_id)?.iter_mut().find(|m| m.id == id)
    }

    pub fn get_msg_preview(&self, id: MsgId) -> Option<ReplyPreview> {
        let mut inner = self.inner.write();
        Self::find_msg_mut(&mut inner, id).map(|m| m.preview())
    }

    pub fn update_msg_content(&self, id: MsgId, editor: ClientId, new_content: &str, now_ms: i64) -> RoomResult<()> {
        if !validate_chat_content(new_content) {
            return Err(RoomError::InvalidArgument("content too long"));
        }
        let mut inner = self.inner.write();
        let msg = Self::find_msg_mut(&mut inner, id).ok_or(RoomError::NotFound("message"))?;
        if msg.sender_id != editor {
            return Err(RoomError::PermissionDenied("not the sender"));
        }
        if msg.deleted {
            return Err(RoomError::FailedPrecondition("message deleted"));
        }
        if msg.file.is_some() {
            return Err(RoomError::FailedPrecondition("cannot edit a file message"));
        }
        msg.content = new_content.to_string();
        msg.edited = true;
        msg.last_edit_ts_ms = Some(now_ms);
        Ok(())
    }

    pub fn mark_msg_deleted(&self, id: MsgId, requester: ClientId, requester_role: Role) -> RoomResult<()> {
        let mut inner = self.inner.write();
        let owner = inner.owner_index.get(&id).map(|e| e.owner).ok_or(RoomError::NotFound("message"))?;
        if owner != requester && requester_role < Role::Owner {
            return Err(RoomError::PermissionDenied("not sender or owner"));
        }
        if let Some(msg) = Self::find_msg_mut(&mut inner, id) {
            msg.deleted = true;
            msg.content.clear();
        }
        Ok(())
    }

    pub fn get_messages_since(&self, channel_id: ChannelId, last_seen: MsgId) -> Vec<Message> {
        let inner = self.inner.read();
        inner
            .rings
            .get(&channel_id)
            .map(|ring| ring.iter().filter(|m| m.id.0 > last_seen.0).cloned().collect())
            .unwrap_or_default()
    }

    /// Validates, slow-mode-checks, stamps, and records a chat in one call —
    /// the orchestration spec scenario 2/3 describe as a single server step.
    /// `sender_username` and `ts_ms` are stamped here, never taken from the wire.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_chat(
        &self,
        sender_id: ClientId,
        channel_id: ChannelId,
        content: &str,
        file: Option<crate::model::FileAttachment>,
        reply_to: Option<MsgId>,
        now_ms: i64,
    ) -> RoomResult<Message> {
        if !validate_chat(content, file.is_some()) {
            return Err(RoomError::InvalidArgument("chat content"));
        }
        if !self.check_slow_mode(sender_id, channel_id, now_ms) {
            return Err(RoomError::SlowMode(channel_id));
        }

        let sender_username = self.client_display_name(sender_id).ok_or(RoomError::NotFound("client"))?;
        let mentions = self.resolve_mentions_in(content);
        let reply_preview = reply_to.and_then(|id| self.get_msg_preview(id));

        let msg = Message {
            id: self.next_msg_id(),
            sender_id,
            sender_username,
            channel_id,
            content: content.to_string(),
            ts_ms: now_ms,
            file,
            reply_to: reply_preview,
            deleted: false,
            edited: false,
            last_edit_ts_ms: None,
            pinned: false,
            mentions,
            reactions: HashMap::new(),
        };
        self.record_msg(msg.clone());
        Ok(msg)
    }

    // -------------------------------------------------------------------
    // Reactions and pins
    // -------------------------------------------------------------------

    pub fn add_reaction(&self, id: MsgId, user: ClientId, emoji: &str) -> bool {
        let mut inner = self.inner.write();
        match Self::find_msg_mut(&mut inner, id) {
            Some(msg) => msg.reactions.entry(emoji.to_string()).or_default().insert(user),
            None => false,
        }
    }

    pub fn remove_reaction(&self, id: MsgId, user: ClientId, emoji: &str) -> bool {
        let mut inner = self.inner.write();
        match Self::find_msg_mut(&mut inner, id) {
            Some(msg) => match msg.reactions.get_mut(emoji) {
                Some(set) => set.remove(&user),
                None => false,
            },
            None => false,
        }
    }

    pub fn pin_message(&self, id: MsgId) -> RoomResult<()> {
        let mut inner = self.inner.write();
        let msg = Self::find_msg_mut(&mut inner, id).ok_or(RoomError::NotFound("message"))?;
        msg.pinned = true;
        Ok(())
    }

    pub fn unpin_message(&self, id: MsgId) -> RoomResult<()> {
        let mut inner = self.inner.write();
        let msg = Self::find_msg_mut(&mut inner, id).ok_or(RoomError::NotFound("message"))?;
        msg.pinned = false;
        Ok(())
    }

    pub fn get_pinned_messages(&self, channel_id: ChannelId) -> Vec<Message> {
        let inner = self.inner.read();
        inner
            .rings
            .get(&channel_id)
            .map(|ring| ring.iter().filter(|m| m.pinned).cloned().collect())
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------
    // Search
    // -------------------------------------------------------------------

    /// Newest-first, paginated backward by `before` MsgID (spec §4.3).
    pub fn search_messages(&self, channel_id: ChannelId, query: &str, before: Option<MsgId>, limit: usize) -> Vec<Message> {
        let limit = limit.min(50);
        let needle = query.to_lowercase();
        let inner = self.inner.read();
        let Some(ring) = inner.rings.get(&channel_id) else { return Vec::new() };

        ring.iter()
            .rev()
            .filter(|m| !m.deleted)
            .filter(|m| before.map(|b| m.id.0 < b.0).unwrap_or(true))
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------
    // Mentions
    // -------------------------------------------------------------------

    pub fn resolve_mentions_in(&self, text: &str) -> Vec<ClientId> {
        let inner = self.inner.read();
        let mut roster: Vec<(ClientId, &str)> =
            inner.clients.values().map(|c| (c.id, c.display_name.as_str())).collect();
        sort_roster_for_mentions(&mut roster);
        resolve_mentions(text, &roster)
    }

    // -------------------------------------------------------------------
    // Moderation
    // -------------------------------------------------------------------

    pub fn set_client_role(&self, id: ClientId, role: Role) -> RoomResult<()> {
        let display_name = {
            let mut inner = self.inner.write();
            let client = inner.clients.get_mut(&id).ok_or(RoomError::NotFound("client"))?;
            client.role = role;
            client.display_name.clone()
        };
        if let Err(e) = self.persistence.set_user_role(&display_name, role) {
            tracing::warn!(error = %e, "failed to persist role change");
        }
        Ok(())
    }

    pub fn set_client_mute(&self, id: ClientId, muted: bool, expiry_ms: Option<i64>) -> RoomResult<()> {
        let mut inner = self.inner.write();
        let client = inner.clients.get_mut(&id).ok_or(RoomError::NotFound("client"))?;
        client.muted = muted;
        client.mute_expires_at_ms = expiry_ms;
        Ok(())
    }

    pub fn record_ban(&self, ban: BanRecord) -> RoomResult<u64> {
        self.persistence
            .insert_ban(&ban)
            .map_err(|e| RoomError::FailedPrecondition("ban insert failed").context(e))
    }

    pub fn remove_ban(&self, id: u64) -> RoomResult<()> {
        self.persistence
            .remove_ban(id)
            .map_err(|e| RoomError::FailedPrecondition("ban removal failed").context(e))
    }

    pub fn is_ip_banned(&self, ip: IpAddr, now_ms: i64) -> Option<BanRecord> {
        self.persistence.is_ip_banned(ip, now_ms).unwrap_or(None)
    }

    pub fn is_username_banned(&self, username: &str, now_ms: i64) -> Option<BanRecord> {
        self.persistence.is_username_banned(username, now_ms).unwrap_or(None)
    }

    pub fn record_audit_log(&self, actor_id: Option<ClientId>, actor_name: &str, action: &str, target: &str, details: serde_json::Value) {
        self.audit.record(self.persistence.as_ref(), actor_id, actor_name, action, target, details);
    }

    pub fn recent_audit_log(&self, limit: usize) -> Vec<AuditLogEntry> {
        self.persistence.list_audit_log(limit).unwrap_or_default()
    }

    /// Keeps the audit table bounded; call periodically from a background task.
    pub fn trim_audit_log(&self) {
        if let Err(e) = self.persistence.trim_audit_log(10_000) {
            tracing::warn!(error = %e, "failed to trim audit log");
        }
    }

    /// Keeps the bans table bounded by removing rows whose window has
    /// elapsed; the authoritative check on join is always the live query
    /// predicate (`is_ip_banned`/`is_username_banned`), so a lagging sweep
    /// never lets an expired ban block a reconnect.
    pub fn purge_expired_bans(&self, now_ms: i64) -> usize {
        self.persistence.purge_expired_bans(now_ms).unwrap_or(0)
    }
}

// Small helper so `?` keeps working while attaching a persistence cause to a
// RoomError without adding a generic `From` that would blur validation vs.
// infra failures.
trait WithCause<E> {
    fn context(self, cause: E) -> Self;
}

impl<E: std::fmt::Display> WithCause<E> for RoomError {
    fn context(self, cause: E) -> Self {
        tracing::warn!(%cause, "room operation failed");
        self
    }
}

/// A chat frame is valid if it fits the length bound, or is empty but carries
/// a file attachment (the attachment alone is the message body in that case).
pub fn validate_chat(content: &str, has_file: bool) -> bool {
    if content.is_empty() {
        has_file
    } else {
        validate_chat_content(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message as RoomMessage;
    use crate::persistence::SqliteStore;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    struct RecordingSink {
        sent: Mutex<Vec<ServerMessage>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(Vec::new()) })
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl OutboundSink for RecordingSink {
        fn enqueue(&self, msg: ServerMessage) -> bool {
            self.sent.lock().unwrap().push(msg);
            true
        }
    }

    struct DeadSink;

    impl OutboundSink for DeadSink {
        fn enqueue(&self, _msg: ServerMessage) -> bool {
            false
        }
    }

    fn test_room() -> Room {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        Room::new(RoomConfig::default(), store).unwrap()
    }

    fn local_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn first_client_to_join_can_claim_ownership() {
        let room = test_room();
        let sink = RecordingSink::new();
        let (id, replaced) = room.add_or_replace_client("alice", local_ip(), sink);
        assert!(replaced.is_none());
        assert!(room.claim_ownership(id));
        assert_eq!(room.owner_id(), Some(id));
        assert_eq!(room.client_role(id), Some(Role::Owner));
    }

    #[test]
    fn second_claim_attempt_is_rejected() {
        let room = test_room();
        let (a, _) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        let (b, _) = room.add_or_replace_client("bob", local_ip(), RecordingSink::new());
        assert!(room.claim_ownership(a));
        assert!(!room.claim_ownership(b));
        assert_eq!(room.owner_id(), Some(a));
    }

    #[test]
    fn rejoining_same_name_replaces_the_old_session() {
        let room = test_room();
        let (first, replaced) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        assert!(replaced.is_none());
        let (second, replaced) = room.add_or_replace_client("Alice", local_ip(), RecordingSink::new());
        assert_eq!(replaced.map(|r| r.id), Some(first));
        assert_ne!(first, second);
        assert_eq!(room.client_summaries().len(), 1);
    }

    #[test]
    fn removing_the_owner_transfers_ownership_to_a_remaining_client() {
        let room = test_room();
        let (a, _) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        let (b, _) = room.add_or_replace_client("bob", local_ip(), RecordingSink::new());
        room.claim_ownership(a);
        assert!(room.remove_client(a));
        assert_eq!(room.owner_id(), Some(b));
        room.broadcast_departure(a, Some(a));
    }

    #[test]
    fn removing_a_nonexistent_client_is_a_no_op() {
        let room = test_room();
        assert!(!room.remove_client(ClientId(999)));
    }

    #[test]
    fn chat_mentions_resolve_against_current_roster() {
        let room = test_room();
        let (alice, _) = room.add_or_replace_client("Al", local_ip(), RecordingSink::new());
        let (alice_full, _) = room.add_or_replace_client("Alice", local_ip(), RecordingSink::new());
        let mentions = room.resolve_mentions_in("hey @Alice, got a sec?");
        assert_eq!(mentions, vec![alice_full]);
        assert!(!mentions.contains(&alice));
    }

    #[test]
    fn submit_chat_stamps_sender_and_resolves_mentions() {
        let room = test_room();
        let (alice, _) = room.add_or_replace_client("Alice", local_ip(), RecordingSink::new());
        let (bob, _) = room.add_or_replace_client("Bob", local_ip(), RecordingSink::new());
        let msg = room.submit_chat(bob, ChannelId::LOBBY, "hi @Alice", None, None, 1_000).unwrap();
        assert_eq!(msg.sender_id, bob);
        assert_eq!(msg.sender_username, "Bob");
        assert_eq!(msg.mentions, vec![alice]);
        assert_eq!(msg.ts_ms, 1_000);
    }

    #[test]
    fn submit_chat_rejects_within_the_slow_mode_window() {
        let room = test_room();
        let channel = room.create_channel("slow-room", 0, 5).unwrap();
        let (bob, _) = room.add_or_replace_client("Bob", local_ip(), RecordingSink::new());
        room.submit_chat(bob, channel.id, "first", None, None, 0).unwrap();
        let err = room.submit_chat(bob, channel.id, "too soon", None, None, 2_000).unwrap_err();
        assert!(matches!(err, RoomError::SlowMode(id) if id == channel.id));
    }

    #[test]
    fn slow_mode_blocks_until_the_cooldown_elapses() {
        let room = test_room();
        let channel = room.create_channel("general-2", 0, 10).unwrap();
        let (client, _) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        assert!(room.check_slow_mode(client, channel.id, 1_000));
        assert!(!room.check_slow_mode(client, channel.id, 5_000));
        assert!(room.check_slow_mode(client, channel.id, 11_500));
    }

    #[test]
    fn deleting_the_last_channel_is_rejected() {
        let room = test_room();
        let channels = room.get_channel_list();
        assert_eq!(channels.len(), 1);
        assert!(room.delete_channel(channels[0].id).is_err());
    }

    #[test]
    fn joining_a_full_channel_is_rejected() {
        let room = test_room();
        let channel = room.create_channel("tiny", 1, 0).unwrap();
        let (a, _) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        let (b, _) = room.add_or_replace_client("bob", local_ip(), RecordingSink::new());
        room.join_channel(a, channel.id).unwrap();
        assert!(matches!(room.join_channel(b, channel.id), Err(RoomError::ChannelFull)));
    }

    #[test]
    fn deleting_a_channel_moves_its_occupants_to_the_lobby() {
        let room = test_room();
        let extra = room.create_channel("side-room", 0, 0).unwrap();
        let (client, _) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        room.set_client_channel(client, extra.id).unwrap();
        let moved = room.delete_channel(extra.id).unwrap();
        assert_eq!(moved, vec![client]);
        assert_eq!(room.client_channel(client), Some(ChannelId::LOBBY));
    }

    #[test]
    fn editing_a_message_is_only_allowed_by_its_sender() {
        let room = test_room();
        let (sender, _) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        let (other, _) = room.add_or_replace_client("bob", local_ip(), RecordingSink::new());
        let msg_id = room.next_msg_id();
        room.record_msg(RoomMessage {
            id: msg_id,
            sender_id: sender,
            sender_username: "alice".into(),
            channel_id: ChannelId::LOBBY,
            content: "hello".into(),
            ts_ms: 0,
            file: None,
            reply_to: None,
            deleted: false,
            edited: false,
            last_edit_ts_ms: None,
            pinned: false,
            mentions: Vec::new(),
            reactions: HashMap::new(),
        });

        assert!(room.update_msg_content(msg_id, other, "nope", 1).is_err());
        assert!(room.update_msg_content(msg_id, sender, "edited", 1).is_ok());
    }

    #[test]
    fn a_failing_sink_opens_the_circuit_breaker_after_repeated_failures() {
        let room = test_room();
        let (id, _) = room.add_or_replace_client("alice", local_ip(), Arc::new(DeadSink));
        for _ in 0..room.config.breaker_open_threshold {
            room.send_control_to(id, ServerMessage::Pong);
        }
        let health = room.inner.read().clients.get(&id).unwrap().send_health.clone();
        assert!(health.is_open(room.breaker_params()));
    }

    #[test]
    fn bans_by_ip_block_future_joins_from_that_address() {
        let room = test_room();
        let ip = local_ip();
        room.record_ban(BanRecord {
            id: 0,
            username: "troll".into(),
            ip: Some(ip),
            reason: "spam".into(),
            banned_by: "alice".into(),
            duration_s: 0,
            created_at_ms: 0,
        })
        .unwrap();
        assert!(room.is_ip_banned(ip, 1_000).is_some());
    }

    #[test]
    fn broadcast_reaches_every_connected_client_except_the_excluded_one() {
        let room = test_room();
        let sink_a = RecordingSink::new();
        let sink_b = RecordingSink::new();
        let (a, _) = room.add_or_replace_client("alice", local_ip(), sink_a.clone());
        let (_b, _) = room.add_or_replace_client("bob", local_ip(), sink_b.clone());
        room.broadcast_control(ServerMessage::Announcement { content: "hi".into() }, Some(a));
        assert_eq!(sink_a.count(), 0);
        assert_eq!(sink_b.count(), 1);
    }

    #[test]
    fn renaming_to_a_name_already_in_use_is_rejected() {
        let room = test_room();
        let (alice, _) = room.add_or_replace_client("alice", local_ip(), RecordingSink::new());
        let (_bob, _) = room.add_or_replace_client("bob", local_ip(), RecordingSink::new());
        assert!(room.rename_client(alice, "Bob").is_err());
        let summary = room.rename_client(alice, "Alicia").unwrap();
        assert_eq!(summary.username, "Alicia");
        assert_eq!(room.client_display_name(alice).as_deref(), Some("Alicia"));
    }
}
