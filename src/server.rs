use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::services::ServeDir;

use crate::config::TreeNode;
use crate::health::HealthChecker;
use crate::scan::ScanManager;
use crate::status::normalize_identifier;
use crate::types::now_rfc3339;

/// Shared handler state: the two long-lived subsystems. Both are internally
/// synchronized, so the state itself is plain-cloneable.
#[derive(Clone)]
pub struct AppState {
    pub scan: ScanManager,
    pub health: HealthChecker,
}

#[derive(Debug, Deserialize, Default)]
pub struct StartScanRequest {
    #[serde(default)]
    pub subnet: Option<String>,
}

/// Serve the polling API plus the static UI until the process is stopped.
///
/// Authentication is an external gate in front of this server; nothing here
/// checks credentials.
pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let app = router(state);
    tracing::info!(bind, "serving dashboard API");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/scan/start", post(start_scan))
        .route("/scan/progress", get(scan_progress))
        .route("/scan/cancel", post(cancel_scan))
        .route("/health/statuses", get(all_statuses))
        .route("/health/status/{*identifier}", get(one_status))
        .route("/nodes", put(replace_nodes))
        .with_state(state);

    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    Router::new().nest("/api", api).fallback_service(static_svc)
}

async fn start_scan(
    State(state): State<AppState>,
    body: Option<Json<StartScanRequest>>,
) -> impl IntoResponse {
    let subnet = body.and_then(|Json(req)| req.subnet);
    match state.scan.start(subnet).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

async fn scan_progress(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scan.get_progress())
}

async fn cancel_scan(State(state): State<AppState>) -> impl IntoResponse {
    state.scan.cancel();
    Json(json!({ "success": true }))
}

async fn all_statuses(State(state): State<AppState>) -> impl IntoResponse {
    let statuses = state.health.store().snapshot().await;
    Json(json!({ "timestamp": now_rfc3339(), "statuses": statuses }))
}

async fn one_status(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> impl IntoResponse {
    // Accept un-normalized identifiers from the UI.
    let identifier = normalize_identifier(&identifier);
    match state.health.store().get(&identifier).await {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no status for {identifier}") })),
        )
            .into_response(),
    }
}

async fn replace_nodes(
    State(state): State<AppState>,
    Json(nodes): Json<Vec<TreeNode>>,
) -> impl IntoResponse {
    state.health.set_nodes(nodes).await;
    Json(json!({ "success": true }))
}
