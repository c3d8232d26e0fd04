use std::sync::Arc;

use room_core::Room;
use room_metrics::{ConnectionMetrics, RoomMetrics};

use crate::config::Config;

/// Shared handles every connection task holds a clone of. `Room` is the only
/// piece of mutable shared state; everything else here is read-only config or
/// write-only metrics sinks.
#[derive(Clone)]
pub struct AppState {
    pub room: Arc<Room>,
    pub connection_metrics: Arc<ConnectionMetrics>,
    pub room_metrics: Arc<RoomMetrics>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(room: Arc<Room>, config: Arc<Config>) -> Self {
        Self {
            room,
            connection_metrics: Arc::new(ConnectionMetrics::new("room")),
            room_metrics: Arc::new(RoomMetrics::new("room")),
            config,
        }
    }
}
