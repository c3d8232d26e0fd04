use metrics::{counter, histogram};

/// Metrics for the Room authority: dispatched operations, permission denials,
/// persistence latency, and fan-out health.
pub struct RoomMetrics {
    ns: &'static str,
}

impl RoomMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn op_total(&self, op: &'static str) {
        counter!(format!("{}_room_ops_total", self.ns), "op" => op).increment(1);
    }

    pub fn perm_denied(&self, action: &'static str) {
        counter!(format!("{}_room_perm_denied_total", self.ns), "action" => action).increment(1);
    }

    pub fn persistence_seconds(&self, op: &'static str, seconds: f64) {
        histogram!(format!("{}_room_persistence_seconds", self.ns), "op" => op).record(seconds);
    }

    pub fn fanout_send_failure(&self) {
        counter!(format!("{}_room_fanout_send_failures_total", self.ns)).increment(1);
    }

    pub fn breaker_opened(&self) {
        counter!(format!("{}_room_breaker_opened_total", self.ns)).increment(1);
    }

    pub fn breaker_recovered(&self) {
        counter!(format!("{}_room_breaker_recovered_total", self.ns)).increment(1);
    }
}
