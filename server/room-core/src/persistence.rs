//! Narrow synchronous persistence boundary (spec §6). `Room` only ever calls
//! through this trait; the concrete `SqliteStore` is the one implementation
//! shipped here, but tests and the gateway binary are free to swap in another
//! (e.g. a pure in-memory fake for unit tests that don't want file I/O).

use std::net::IpAddr;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{PersistenceError, PersistenceResult};
use crate::ids::ChannelId;
use crate::model::{AuditLogEntry, BanRecord, Channel};
use crate::perms::Role;

pub trait PersistenceStore: Send + Sync {
    fn get_setting(&self, key: &str) -> PersistenceResult<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()>;

    fn list_channels(&self) -> PersistenceResult<Vec<Channel>>;
    fn insert_channel(&self, channel: &Channel) -> PersistenceResult<()>;
    fn update_channel(&self, channel: &Channel) -> PersistenceResult<()>;
    fn delete_channel(&self, id: ChannelId) -> PersistenceResult<()>;

    fn insert_audit_log(&self, entry: &AuditLogEntry) -> PersistenceResult<()>;
    fn list_audit_log(&self, limit: usize) -> PersistenceResult<Vec<AuditLogEntry>>;
    fn trim_audit_log(&self, keep: usize) -> PersistenceResult<()>;

    fn insert_ban(&self, ban: &BanRecord) -> PersistenceResult<u64>;
    fn remove_ban(&self, id: u64) -> PersistenceResult<()>;
    fn list_bans(&self) -> PersistenceResult<Vec<BanRecord>>;
    fn is_username_banned(&self, username: &str, now_ms: i64) -> PersistenceResult<Option<BanRecord>>;
    fn is_ip_banned(&self, ip: IpAddr, now_ms: i64) -> PersistenceResult<Option<BanRecord>>;
    fn purge_expired_bans(&self, now_ms: i64) -> PersistenceResult<usize>;

    fn get_user_role(&self, username: &str) -> PersistenceResult<Option<Role>>;
    fn set_user_role(&self, username: &str, role: Role) -> PersistenceResult<()>;

    fn get_announcement(&self) -> PersistenceResult<Option<String>>;
    fn set_announcement(&self, content: &str, created_by: &str) -> PersistenceResult<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Ordered, append-only migration list. Each entry runs exactly once, recorded
/// in `schema_migrations`; never edit a past entry, only append new ones.
const MIGRATIONS: &[(u32, &str)] = &[
    (1, r#"
        CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT NOT NULL);
        CREATE TABLE channels (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            position INTEGER NOT NULL,
            max_users INTEGER NOT NULL DEFAULT 0,
            slow_mode_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE TABLE files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            disk_path TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE audit_log (
            id INTEGER PRIMARY KEY,
            actor_id INTEGER,
            actor_name TEXT NOT NULL,
            action TEXT NOT NULL,
            target TEXT NOT NULL,
            details_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE bans (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL,
            ip TEXT,
            reason TEXT NOT NULL,
            banned_by TEXT NOT NULL,
            duration_s INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE user_roles (username TEXT PRIMARY KEY, role TEXT NOT NULL);
        CREATE TABLE announcements (
            id INTEGER PRIMARY KEY,
            content TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_bans_username ON bans(username);
        CREATE INDEX idx_bans_ip ON bans(ip);
    "#),
];

impl SqliteStore {
    pub fn open(path: &str) -> PersistenceResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> PersistenceResult<()> {
        let mut conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL);",
        )?;

        for (version, sql) in MIGRATIONS {
            let already: Option<u32> = conn
                .query_row(
                    "SELECT version FROM schema_migrations WHERE version = ?1",
                    params![version],
                    |row| row.get(0),
                )
                .optional()?;
            if already.is_some() {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| PersistenceError::Migration(*version, e.to_string()))?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
                params![version],
            )?;
            tx.commit()?;
        }
        Ok(())
    }
}

fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: ChannelId(row.get::<_, u32>(0)?),
        name: row.get(1)?,
        position: row.get(2)?,
        max_users: row.get::<_, u32>(3)?,
        slow_mode_seconds: row.get::<_, u32>(4)?,
    })
}

fn row_to_ban(row: &rusqlite::Row) -> rusqlite::Result<BanRecord> {
    let ip_str: Option<String> = row.get(2)?;
    Ok(BanRecord {
        id: row.get::<_, i64>(0)? as u64,
        username: row.get(1)?,
        ip: ip_str.and_then(|s| s.parse().ok()),
        reason: row.get(3)?,
        banned_by: row.get(4)?,
        duration_s: row.get::<_, i64>(5)? as u64,
        created_at_ms: row.get(6)?,
    })
}

impl PersistenceStore for SqliteStore {
    fn get_setting(&self, key: &str) -> PersistenceResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?)
    }

    fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn list_channels(&self) -> PersistenceResult<Vec<Channel>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, position, max_users, slow_mode_seconds FROM channels ORDER BY position ASC",
        )?;
        let rows = stmt.query_map([], row_to_channel)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn insert_channel(&self, channel: &Channel) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO channels (id, name, position, max_users, slow_mode_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![channel.id.0, channel.name, channel.position, channel.max_users, channel.slow_mode_seconds],
        )?;
        Ok(())
    }

    fn update_channel(&self, channel: &Channel) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE channels SET name = ?2, position = ?3, max_users = ?4, slow_mode_seconds = ?5 WHERE id = ?1",
            params![channel.id.0, channel.name, channel.position, channel.max_users, channel.slow_mode_seconds],
        )?;
        Ok(())
    }

    fn delete_channel(&self, id: ChannelId) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM channels WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    fn insert_audit_log(&self, entry: &AuditLogEntry) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (actor_id, actor_name, action, target, details_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![
                entry.actor_id.map(|c| c.0),
                entry.actor_name,
                entry.action,
                entry.target,
                entry.details_json.to_string(),
            ],
        )?;
        Ok(())
    }

    fn list_audit_log(&self, limit: usize) -> PersistenceResult<Vec<AuditLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, actor_id, actor_name, action, target, details_json, strftime('%s', created_at) * 1000
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let details: String = row.get(5)?;
            Ok(AuditLogEntry {
                id: row.get::<_, i64>(0)? as u64,
                actor_id: row.get::<_, Option<u16>>(1)?.map(crate::ids::ClientId),
                actor_name: row.get(2)?,
                action: row.get(3)?,
                target: row.get(4)?,
                details_json: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                created_at_ms: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn trim_audit_log(&self, keep: usize) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM audit_log WHERE id NOT IN (SELECT id FROM audit_log ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        Ok(())
    }

    fn insert_ban(&self, ban: &BanRecord) -> PersistenceResult<u64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bans (username, ip, reason, banned_by, duration_s, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![
                ban.username,
                ban.ip.map(|ip| ip.to_string()),
                ban.reason,
                ban.banned_by,
                ban.duration_s as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn remove_ban(&self, id: u64) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM bans WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    fn list_bans(&self) -> PersistenceResult<Vec<BanRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, username, ip, reason, banned_by, duration_s, strftime('%s', created_at) * 1000 FROM bans",
        )?;
        let rows = stmt.query_map([], row_to_ban)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn is_username_banned(&self, username: &str, now_ms: i64) -> PersistenceResult<Option<BanRecord>> {
        for ban in self.list_bans()? {
            if ban.username.eq_ignore_ascii_case(username) && ban.is_active(now_ms) {
                return Ok(Some(ban));
            }
        }
        Ok(None)
    }

    fn is_ip_banned(&self, ip: IpAddr, now_ms: i64) -> PersistenceResult<Option<BanRecord>> {
        for ban in self.list_bans()? {
            if ban.ip == Some(ip) && ban.is_active(now_ms) {
                return Ok(Some(ban));
            }
        }
        Ok(None)
    }

    fn purge_expired_bans(&self, now_ms: i64) -> PersistenceResult<usize> {
        let expired: Vec<u64> = self
            .list_bans()?
            .into_iter()
            .filter(|b| !b.is_active(now_ms))
            .map(|b| b.id)
            .collect();
        let n = expired.len();
        for id in expired {
            self.remove_ban(id)?;
        }
        Ok(n)
    }

    fn get_user_role(&self, username: &str) -> PersistenceResult<Option<Role>> {
        let conn = self.conn.lock().unwrap();
        let role: Option<String> = conn
            .query_row("SELECT role FROM user_roles WHERE username = ?1", params![username], |r| r.get(0))
            .optional()?;
        Ok(role.and_then(|s| Role::from_str(&s)))
    }

    fn set_user_role(&self, username: &str, role: Role) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_roles (username, role) VALUES (?1, ?2)
             ON CONFLICT(username) DO UPDATE SET role = excluded.role",
            params![username, role.as_str()],
        )?;
        Ok(())
    }

    fn get_announcement(&self) -> PersistenceResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT content FROM announcements ORDER BY id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn set_announcement(&self, content: &str, created_by: &str) -> PersistenceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO announcements (content, created_by, created_at) VALUES (?1, ?2, datetime('now'))",
            params![content, created_by],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn migrations_apply_once_and_are_idempotent_on_reopen() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_setting("server_name", "test").unwrap();
        assert_eq!(store.get_setting("server_name").unwrap().as_deref(), Some("test"));
    }

    #[test]
    fn ban_by_ip_then_expiry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let ban = BanRecord {
            id: 0,
            username: "bob".into(),
            ip: Some(ip),
            reason: "spam".into(),
            banned_by: "alice".into(),
            duration_s: 0,
            created_at_ms: 1_000,
        };
        store.insert_ban(&ban).unwrap();
        let found = store.is_ip_banned(ip, 2_000).unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().reason, "spam");
    }

    #[test]
    fn audit_log_trims_to_bound() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..10 {
            store
                .insert_audit_log(&AuditLogEntry {
                    id: 0,
                    actor_id: None,
                    actor_name: "sys".into(),
                    action: format!("action{i}"),
                    target: "x".into(),
                    details_json: serde_json::Value::Null,
                    created_at_ms: 0,
                })
                .unwrap();
        }
        store.trim_audit_log(3).unwrap();
        assert_eq!(store.list_audit_log(100).unwrap().len(), 3);
    }
}
