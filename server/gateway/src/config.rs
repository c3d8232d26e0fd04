use std::net::SocketAddr;

use clap::Parser;

/// CLI and environment configuration for the room gateway binary.
///
/// Fields either feed the transport layer directly (listen address, TLS
/// paths) or get threaded into `room_core::RoomConfig` so `Room` never has
/// to know about `clap`.
#[derive(Parser, Debug, Clone)]
#[command(name = "room-gateway", about = "LAN voice-chat coordination gateway")]
pub struct Config {
    /// Address the WebSocket/TLS listener binds to.
    #[arg(long, env = "ROOM_LISTEN", default_value = "0.0.0.0:9443")]
    pub listen: SocketAddr,

    /// SQLite database file. Created (and migrated) on first run.
    #[arg(long, env = "ROOM_DATA_FILE", default_value = "room.sqlite3")]
    pub data_file: String,

    /// Display name advertised to clients before anyone claims ownership.
    #[arg(long, env = "ROOM_SERVER_NAME", default_value = "bken server")]
    pub server_name: String,

    /// PEM certificate chain. If unset (with --tls-key also unset), a
    /// self-signed certificate is generated for localhost.
    #[arg(long, env = "ROOM_TLS_CERT")]
    pub tls_cert: Option<String>,

    /// PEM private key, paired with --tls-cert.
    #[arg(long, env = "ROOM_TLS_KEY")]
    pub tls_key: Option<String>,

    /// TURN server URL handed to clients in the ICE server list.
    #[arg(long, env = "ROOM_TURN_URL")]
    pub turn_url: Option<String>,

    /// TURN username, required if --turn-url is set.
    #[arg(long, env = "ROOM_TURN_USERNAME")]
    pub turn_username: Option<String>,

    /// TURN credential, required if --turn-url is set.
    #[arg(long, env = "ROOM_TURN_CREDENTIAL")]
    pub turn_credential: Option<String>,

    /// Display name reserved for the synthetic test-bot sender. The bot
    /// does not run unless a name is given here.
    #[arg(long, env = "ROOM_TEST_BOT_USERNAME")]
    pub test_bot_username: Option<String>,

    /// Hard cap on concurrent registered clients.
    #[arg(long, env = "ROOM_MAX_CONNECTIONS", default_value_t = 256)]
    pub max_connections: usize,

    /// Hard cap on concurrent registered clients sharing one remote IP.
    #[arg(long, env = "ROOM_MAX_CONNECTIONS_PER_IP", default_value_t = 8)]
    pub max_connections_per_ip: usize,

    /// Address the Prometheus scrape endpoint binds to.
    #[arg(long, env = "ROOM_METRICS_LISTEN", default_value = "0.0.0.0:9090")]
    pub metrics_listen: String,

    /// Messages retained per channel for history/replay.
    #[arg(long, env = "ROOM_MESSAGE_RING_SIZE", default_value_t = 200)]
    pub message_ring_size: usize,

    /// Entries retained in the global message-id-to-owner index.
    #[arg(long, env = "ROOM_OWNER_MAP_SIZE", default_value_t = 10_000)]
    pub owner_map_size: usize,
}

impl Config {
    /// ICE server list derived from the optional TURN flags, always
    /// including a public STUN fallback.
    pub fn ice_servers(&self) -> Vec<room_core::IceServer> {
        let mut servers = vec![room_core::IceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        }];
        if let Some(url) = &self.turn_url {
            servers.push(room_core::IceServer {
                urls: vec![url.clone()],
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            });
        }
        servers
    }

    pub fn room_config(&self) -> room_core::RoomConfig {
        room_core::RoomConfig {
            server_name: self.server_name.clone(),
            message_ring_size: self.message_ring_size,
            owner_map_size: self.owner_map_size,
            ice_servers: self.ice_servers(),
            api_port: self.listen.port(),
            ..room_core::RoomConfig::default()
        }
    }
}
