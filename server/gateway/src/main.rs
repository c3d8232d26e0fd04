use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use room_core::{Room, SqliteStore};
use room_gateway::config::Config;
use room_gateway::state::AppState;
use room_gateway::{build_router, testbot};
use room_metrics::{MetricsConfig, MetricsServer};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const MAINTENANCE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    let metrics = MetricsServer::install(MetricsConfig {
        listen: cfg.metrics_listen.clone(),
        namespace: "room",
    })?;
    tokio::spawn(async move {
        if let Err(e) = metrics.serve().await {
            tracing::warn!(error = %e, "metrics server exited");
        }
    });

    let store = Arc::new(SqliteStore::open(&cfg.data_file)?);
    let room = Arc::new(Room::new(cfg.room_config(), store)?);

    spawn_maintenance_sweep(room.clone());

    if let Some(username) = cfg.test_bot_username.clone() {
        let bot_room = room.clone();
        tokio::spawn(async move { testbot::run(bot_room, username).await });
    }

    let listen = cfg.listen;
    let tls_cert = cfg.tls_cert.clone();
    let tls_key = cfg.tls_key.clone();
    let state = AppState::new(room, Arc::new(cfg));

    let app = build_router(state);
    let tls_config = room_gateway::tls::rustls_config(tls_cert.as_deref(), tls_key.as_deref()).await?;

    info!(%listen, "room gateway listening");
    axum_server::bind_rustls(listen, tls_config)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}

/// Keeps the bans and audit-log tables bounded (spec §9 "Ban expiry": the
/// join-time query predicate is always authoritative, so a lagging sweep
/// never lets an expired ban block a reconnect).
fn spawn_maintenance_sweep(room: Arc<Room>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            let purged = room.purge_expired_bans(now_ms);
            if purged > 0 {
                tracing::debug!(purged, "purged expired bans");
            }
            room.trim_audit_log();
        }
    });
}
