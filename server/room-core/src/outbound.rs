use crate::protocol::ServerMessage;

/// What `Room` holds per client to reach its transport, instead of holding the
/// transport itself (see DESIGN.md — arena-style `ClientId` indexing, no
/// Room<->Client cyclic ownership). The gateway's concrete implementation
/// wraps a bounded mpsc sender feeding a dedicated per-client writer task, so
/// `enqueue` never blocks the Room lock and ordering per recipient is total.
pub trait OutboundSink: Send + Sync {
    /// Attempts to enqueue `msg` for delivery. Returns `false` if the queue is
    /// full or the client has already disconnected — either counts as a send
    /// failure for circuit-breaker purposes.
    fn enqueue(&self, msg: ServerMessage) -> bool;
}
