use crate::model::IceServer;

/// Deployment-tuned constants and knobs, separate from the gateway's CLI-parsed
/// `Config` — this is the subset `Room` itself needs, independent of transport.
#[derive(Clone, Debug)]
pub struct RoomConfig {
    pub server_name: String,
    pub message_ring_size: usize,
    pub owner_map_size: usize,
    pub ice_servers: Vec<IceServer>,
    pub api_port: u16,
    pub breaker_open_threshold: u32,
    pub breaker_probe_cadence: u32,
    pub control_rate_limit_per_sec: u32,
    pub slow_mode_max_seconds: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            server_name: "bken server".to_string(),
            message_ring_size: 200,
            owner_map_size: 10_000,
            ice_servers: Vec::new(),
            api_port: 0,
            breaker_open_threshold: 5,
            breaker_probe_cadence: 20,
            control_rate_limit_per_sec: 50,
            slow_mode_max_seconds: 3600,
        }
    }
}
