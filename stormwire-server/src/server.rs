//! HTTP server
//!
//! REST surface for local consumers plus the `/ws` streaming endpoint.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use stormwire_common::alert::Significance;
use stormwire_common::events::RemovalReason;

use crate::diagnostics::DiagnosticsRing;
use crate::sources::SourceHealth;
use crate::store::{AlertStore, RemoveOutcome};
use crate::ws::BroadcastHub;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AlertStore>,
    pub hub: Arc<BroadcastHub>,
    pub diagnostics: Arc<DiagnosticsRing>,
    /// `None` when the push source is disabled by configuration
    pub push_health: Option<Arc<SourceHealth>>,
    pub pull_health: Arc<SourceHealth>,
    pub started_at: DateTime<Utc>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/alerts", get(get_alerts))
        .route("/api/alerts/:product_id", get(get_alert).delete(delete_alert))
        .route("/api/stats", get(get_stats))
        .route("/api/recent", get(get_recent))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Bind and serve until the shutdown signal fires.
pub async fn start(
    bind_addr: &str,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), crate::error::Error> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| crate::error::Error::Config(format!("cannot bind {bind_addr}: {e}")))?;
    info!(addr = bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| crate::error::Error::Internal(format!("server error: {e}")))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    phenomenon: Option<String>,
    state: Option<String>,
    significance: Option<String>,
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let significance = match &query.significance {
        Some(raw) => Some(
            raw.to_ascii_uppercase()
                .parse::<Significance>()
                .map_err(|_| StatusCode::BAD_REQUEST)?,
        ),
        None => None,
    };

    let mut alerts = state.store.snapshot();
    if let Some(phenomenon) = &query.phenomenon {
        let phenomenon = phenomenon.to_ascii_uppercase();
        alerts.retain(|a| a.phenomenon == phenomenon);
    }
    if let Some(us_state) = &query.state {
        let us_state = us_state.to_ascii_uppercase();
        alerts.retain(|a| a.states().contains(&us_state));
    }
    if let Some(significance) = significance {
        alerts.retain(|a| a.significance == significance);
    }

    Ok(Json(json!({
        "count": alerts.len(),
        "alerts": alerts,
    })))
}

async fn get_alert(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.store.get(&product_id) {
        Some(alert) => Ok(Json(serde_json::to_value(alert).unwrap_or_default())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn delete_alert(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.store.remove(&product_id, RemovalReason::Manual) {
        RemoveOutcome::Removed => Ok(Json(json!({ "removed": product_id }))),
        RemoveOutcome::Absent => Err(StatusCode::NOT_FOUND),
    }
}

async fn get_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.store.stats()).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn get_recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(20).min(100);
    let products = state.diagnostics.recent(limit);
    Json(json!({
        "count": products.len(),
        "products": products,
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let push = match &state.push_health {
        Some(health) => json!({ "enabled": true, "health": health.snapshot() }),
        None => json!({ "enabled": false }),
    };

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "services": {
            "store": {
                "active_alerts": state.store.len(),
            },
            "websocket": {
                "subscribers": state.hub.subscriber_count(),
            },
            "push": push,
            "pull": state.pull_health.snapshot(),
        },
    }))
}

async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| hub.handle_socket(socket))
}
