use room_core::{OutboundSink, ServerMessage};
use tokio::sync::mpsc;

/// Depth of the per-client outbound queue. A session's write side is the sole
/// consumer; once full we count the send as a failure and let the circuit
/// breaker decide whether to keep trying that client at all.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// `Room`'s view of a connected client's write side: a bounded channel back
/// to that client's own connection task, which owns the actual socket and is
/// the single consumer draining it in enqueue order (spec §5 per-recipient
/// ordering guarantee).
pub struct MpscSink {
    tx: mpsc::Sender<ServerMessage>,
}

impl MpscSink {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }
}

impl OutboundSink for MpscSink {
    fn enqueue(&self, msg: ServerMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}
