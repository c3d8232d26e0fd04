use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Server-assigned, unique for the lifetime of the session. 0 is never issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u16);

/// 0 is the lobby / server-wide scope, never an allocated channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    pub const LOBBY: ChannelId = ChannelId(0);

    pub fn is_lobby(self) -> bool {
        self.0 == 0
    }
}

/// Monotonically increasing, unique for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MsgId(pub u64);

/// Generates [`ClientId`]s, wrapping past u16::MAX back to 1 (skipping 0).
#[derive(Debug, Default)]
pub struct ClientIdGen(AtomicU16);

impl ClientIdGen {
    pub fn next(&self) -> ClientId {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return ClientId(id);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ChannelIdGen(AtomicU32);

impl ChannelIdGen {
    pub fn next(&self) -> ChannelId {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return ChannelId(id);
            }
        }
    }

    /// Ensures the next generated id is strictly greater than `existing`, used when
    /// channel ids are restored from persistence at startup.
    pub fn observe(&self, existing: ChannelId) {
        self.0.fetch_max(existing.0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct MsgIdGen(AtomicU64);

impl MsgIdGen {
    pub fn next(&self) -> MsgId {
        MsgId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
