//! Gateway server
//!
//! The server-side counterpart of the client engine: challenge
//! issuance, handshake validation, the session table, per-connection
//! broadcast sequencing, and method dispatch.

pub mod methods;
pub mod session;
pub mod state;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::Result;

pub use methods::{FnHandler, MethodHandler, MethodRegistry};
pub use session::SessionEntry;
pub use state::{AuthMode, AuthSettings, Broadcast, GatewayState};

/// Build the gateway router: the WebSocket endpoint at `/` plus a plain
/// HTTP health probe
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<Arc<GatewayState>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "uptimeMs": state.uptime_ms(),
        "sessions": state.session_count().await,
    }))
}

/// Bind and serve until the task is cancelled
pub async fn run(addr: SocketAddr, state: Arc<GatewayState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(%local, "gateway listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
