//! HTTP handlers and router for the dispatch worker.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use adcrm_core::{Category, Level, Notification, Payload, UserId};
use adcrm_notify::GroupHub;
use adcrm_queue::{QueueBackend, RoutingTable};
use adcrm_store::StoreError;

use crate::live;
use crate::service::{ChannelSet, NotificationService};

const DEFAULT_FEED_LIMIT: usize = 50;
const MAX_FEED_LIMIT: usize = 500;

pub struct AppState {
    pub service: NotificationService,
    pub hub: Arc<GroupHub>,
    pub backend: Arc<dyn QueueBackend>,
    pub routing: Arc<RoutingTable>,
}

/// Build the worker router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queues", get(queue_depths))
        .route("/api/notifications", axum::routing::post(create_notification))
        .route("/api/notifications/{user_id}", get(list_notifications))
        .route("/ws/notifications/{user_id}", get(live::ws_upgrade))
        .with_state(state)
}

// ── Health ────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct QueueDepth {
    pub queue: String,
    pub depth: usize,
}

pub async fn queue_depths(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<QueueDepth>>, (StatusCode, String)> {
    let mut depths = Vec::new();
    for queue in state.routing.queues() {
        let depth = state
            .backend
            .depth(&queue)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        depths.push(QueueDepth { queue, depth });
    }
    Ok(Json(depths))
}

// ── Notifications ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub recipient_id: UserId,
    pub level: Level,
    pub category: Category,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub channels: Option<ChannelSet>,
}

pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<Notification>), (StatusCode, String)> {
    let payload = Payload::from_value(req.payload)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let notification = state
        .service
        .notify(
            req.recipient_id,
            req.level,
            req.category,
            payload,
            req.channels.unwrap_or_default(),
        )
        .await
        .map_err(store_error_response)?;

    Ok((StatusCode::CREATED, Json(notification)))
}

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub limit: Option<usize>,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(params): Query<FeedParams>,
) -> Result<Json<Vec<Notification>>, (StatusCode, String)> {
    let limit = params.limit.unwrap_or(DEFAULT_FEED_LIMIT).min(MAX_FEED_LIMIT);
    state
        .service
        .store()
        .list_for_recipient(user_id, limit)
        .await
        .map(Json)
        .map_err(store_error_response)
}

fn store_error_response(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::Invalid(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        StoreError::NotFound(_) | StoreError::RecipientNotFound(_) => {
            (StatusCode::NOT_FOUND, e.to_string())
        }
        _ => {
            warn!(error = %e, "store request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
