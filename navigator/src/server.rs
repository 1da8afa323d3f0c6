//! Thin HTTP status surface.
//!
//! Three read-only endpoints for the cab display and for ops checks:
//! `/health`, `/sync` (server time, for client clock offset) and `/state`
//! (the live run snapshot). The snapshot is a single struct behind an
//! `RwLock`; only the run loop writes it.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::guidance::BannerState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Finished,
}

/// Everything the status surface exposes about the current run.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NavSnapshot {
    pub status: RunStatus,
    pub active_stop_index: Option<usize>,
    pub active_stop_label: Option<String>,
    pub banner: Option<BannerState>,
    pub last_instruction: Option<String>,
    pub off_route: bool,
    /// Last non-fatal collaborator failure, for the cab display.
    pub last_error: Option<String>,
}

pub type SharedSnapshot = Arc<RwLock<NavSnapshot>>;

pub fn router(snapshot: SharedSnapshot) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync", get(sync))
        .route("/state", get(state))
        .layer(CorsLayer::permissive())
        .with_state(snapshot)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn sync() -> Json<Value> {
    Json(json!({ "serverTimeMs": chrono::Utc::now().timestamp_millis() }))
}

async fn state(State(snapshot): State<SharedSnapshot>) -> Json<NavSnapshot> {
    Json(snapshot.read().await.clone())
}

pub async fn serve(addr: &str, snapshot: SharedSnapshot) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status surface on http://{}", listener.local_addr()?);
    axum::serve(listener, router(snapshot)).await?;
    Ok(())
}
