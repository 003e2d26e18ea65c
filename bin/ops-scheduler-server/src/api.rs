//! HTTP surface: health, metrics, notification queries and the SSE hub

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use ops_common::Notification;
use ops_notify::{HubMessage, NotificationHub};
use ops_scheduler::{EscalationTimerService, TaskStatus};
use ops_store::{SessionFactory, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn SessionFactory>,
    pub hub: NotificationHub,
    pub scheduler: Arc<EscalationTimerService>,
    pub metrics: Option<PrometheusHandle>,
    /// Flips to true on shutdown so open SSE streams end
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/q/health", get(health_handler))
        .route("/q/health/live", get(live_handler))
        .route("/q/health/ready", get(ready_handler))
        .route("/hubs/notifications", get(hub_handler))
        .route("/api/notifications", get(list_notifications_handler))
        .route("/api/notifications/{id}/read", post(mark_read_handler));

    if state.metrics.is_some() {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Notification {0} not found")]
    NotificationNotFound(i64),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(e) => {
                error!(error = %e, "Store error while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    scheduler_running: bool,
    connected_clients: usize,
    tasks: Vec<TaskStatus>,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let running = state.scheduler.is_running();
    Json(HealthResponse {
        status: if running { "UP" } else { "DOWN" },
        scheduler_running: running,
        connected_clients: state.hub.connected_clients(),
        tasks: state.scheduler.status(),
    })
}

async fn live_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.factory.open_session().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "READY" }))),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "NOT_READY", "error": e.to_string() })),
            )
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    user_id: String,
    #[serde(default)]
    unread_only: bool,
}

async fn list_notifications_handler(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let mut session = state.factory.open_session().await?;
    let notifications = session
        .notifications_for_user(&query.user_id, query.unread_only)
        .await?;
    Ok(Json(notifications))
}

async fn mark_read_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.factory.open_session().await?;
    if session.mark_notification_read(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotificationNotFound(id))
    }
}

async fn hub_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let mut shutdown = state.shutdown.clone();
    let events = hub_events(state.hub.subscribe()).take_until(async move {
        let _ = shutdown.wait_for(|stopping| *stopping).await;
    });

    debug!(clients = state.hub.connected_clients(), "Notification hub client connected");
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// One SSE event per hub message. A lagging client skips what it missed.
fn hub_events(
    rx: broadcast::Receiver<HubMessage>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let event = Event::default().event(message.target).json_data(&message.event);
                    return Some((event, rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification hub client lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}
