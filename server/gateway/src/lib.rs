pub mod config;
pub mod dispatch;
pub mod linkpreview;
pub mod outbound;
pub mod ratelimit;
pub mod recording;
pub mod session;
pub mod state;
pub mod testbot;
pub mod tls;

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Builds the full route table. Split out from `main` so integration tests
/// can serve it over a plain loopback listener without standing up TLS.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, state, addr.ip()))
}
