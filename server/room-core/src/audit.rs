use serde_json::json;

use crate::ids::ClientId;
use crate::persistence::PersistenceStore;

/// Writes audit entries through to persistence. Failures are logged and
/// swallowed — spec §4.3/§7: persistence failures never block the control
/// path, the broadcast still happens even if the audit row didn't land.
pub struct AuditWriter;

impl AuditWriter {
    pub fn record(
        &self,
        store: &dyn PersistenceStore,
        actor_id: Option<ClientId>,
        actor_name: &str,
        action: &str,
        target: &str,
        details: serde_json::Value,
    ) {
        let entry = crate::model::AuditLogEntry {
            id: 0,
            actor_id,
            actor_name: actor_name.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            details_json: details,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = store.insert_audit_log(&entry) {
            tracing::warn!(action, target, error = %e, "audit log write failed");
        }
    }

    pub fn ctx_kv(k: &str, v: impl Into<serde_json::Value>) -> serde_json::Value {
        json!({ k: v.into() })
    }
}
