use metrics::{counter, histogram};

/// Metrics for the transport/session layer: connection lifecycle and the
/// volume of control traffic flowing through each session's read/write loop.
pub struct ConnectionMetrics {
    ns: &'static str,
}

impl ConnectionMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    pub fn conn_accepted(&self) {
        counter!(format!("{}_gateway_connections_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn conn_closed(&self) {
        counter!(format!("{}_gateway_connections_closed_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn join_rejected(&self, reason: &'static str) {
        counter!(format!("{}_gateway_join_rejected_total", self.ns), "reason" => reason).increment(1);
    }

    #[inline]
    pub fn control_msg_rx(&self, kind: &'static str) {
        counter!(format!("{}_gateway_control_rx_total", self.ns), "kind" => kind).increment(1);
    }

    #[inline]
    pub fn control_msg_tx(&self, kind: &'static str) {
        counter!(format!("{}_gateway_control_tx_total", self.ns), "kind" => kind).increment(1);
    }

    #[inline]
    pub fn rate_limited(&self) {
        counter!(format!("{}_gateway_rate_limited_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn handshake_seconds(&self, seconds: f64) {
        histogram!(format!("{}_gateway_handshake_seconds", self.ns)).record(seconds);
    }
}
