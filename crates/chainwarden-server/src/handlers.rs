//! API route handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::models::{BlockEvent, BlockedEvent, RequestAccessBody};
use crate::state::AppState;

fn require_ui_token(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if state.authorized(header) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// POST /block - Record a block reported by the proxy and relay it to the UI.
pub async fn report_block(State(state): State<AppState>, body: Bytes) -> Result<StatusCode> {
    let report: BlockEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid block event: {e}")))?;

    let blocked = state.store.add(&report);
    info!(
        id = %blocked.id,
        product = %blocked.product,
        package = %blocked.package_name,
        version = ?blocked.package_version,
        "Received block event"
    );

    state.notifier.notify_blocked(blocked);
    Ok(StatusCode::OK)
}

/// GET /ping - Liveness probe.
pub async fn ping() -> &'static str {
    "pong"
}

/// GET /v1/events - All blocked events.
pub async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BlockedEvent>>> {
    require_ui_token(&state, &headers)?;
    Ok(Json(state.store.list()))
}

/// GET /v1/events/{id} - One blocked event.
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BlockedEvent>> {
    require_ui_token(&state, &headers)?;
    state
        .store
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("event {id}")))
}

/// POST /v1/events/{id}/request-access - Record a user's bypass request.
///
/// Nothing is unblocked here; the request is only logged. Unlike `/block`,
/// an unreadable body is not an error.
pub async fn request_access(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    require_ui_token(&state, &headers)?;

    // The body only carries an optional message; a bad one is dropped.
    let request = if body.is_empty() {
        RequestAccessBody::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            debug!(%id, error = %e, "Ignoring malformed request-access body");
            RequestAccessBody::default()
        })
    };

    let event = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("event {id}")))?;

    info!(
        id = %event.id,
        product = %event.product,
        package = %event.package_name,
        "Received request-access for blocked package"
    );
    if let Some(message) = request.message {
        debug!(id = %event.id, %message, "Request-access message");
    }

    Ok(StatusCode::OK)
}
