//! HTTP request handlers.

use super::AppState;
use crate::db::{TargetInput, TargetPatch, MAX_INTERVAL_MS};
use crate::notify::Event;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!("Request failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn interval_in_range(interval_ms: Option<u64>) -> bool {
    interval_ms.map_or(true, |ms| ms > 0 && ms <= MAX_INTERVAL_MS)
}

fn interval_error() -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        format!("intervalMs must be between 1 and {}", MAX_INTERVAL_MS),
    )
}

pub async fn handle_health(State(state): State<AppState>) -> Response {
    let scheduled = state.scheduler.scheduled_count().await;
    Json(json!({ "status": "ok", "scheduled": scheduled })).into_response()
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> Response {
    match state.store.list_targets() {
        Ok(targets) => Json(json!({ "targets": targets })).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_get_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_target(&id) {
        Ok(Some(target)) => Json(json!({ "target": target })).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Target not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<TargetInput>,
) -> Response {
    if is_blank(&req.name) || is_blank(&req.address) {
        return error_response(StatusCode::BAD_REQUEST, "Name and address are required");
    }
    if !interval_in_range(req.interval_ms) {
        return interval_error();
    }

    match state.store.create_target(req) {
        Ok(target) => {
            state.notifier.emit(Event::TargetAdded(target.clone()));
            state.scheduler.schedule(&target).await;
            (
                StatusCode::CREATED,
                Json(json!({ "success": true, "target": target })),
            )
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<TargetPatch>,
) -> Response {
    if patch.name.as_deref().is_some_and(is_blank) || patch.address.as_deref().is_some_and(is_blank) {
        return error_response(StatusCode::BAD_REQUEST, "Name and address cannot be empty");
    }
    if !interval_in_range(patch.interval_ms) {
        return interval_error();
    }

    match state.store.update_target(&id, patch) {
        Ok(Some(target)) => {
            state.scheduler.schedule(&target).await;
            state.notifier.emit(Event::TargetUpdated(target.clone()));
            Json(json!({ "success": true, "target": target })).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Target not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_target(&id) {
        Ok(true) => {
            state.scheduler.unschedule(&id).await;
            state.notifier.emit(Event::TargetDeleted(id));
            Json(json!({ "success": true })).into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Target not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.history(&id) {
        Ok(Some(history)) => Json(json!({ "history": history })).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Target not found"),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// WebSocket: live events
// ============================================================================

pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(mut socket: WebSocket, state: AppState) {
    // Subscribe before the snapshot so nothing falls between the two.
    let mut rx = state.notifier.subscribe();

    let targets = match state.store.list_targets() {
        Ok(targets) => targets,
        Err(e) => {
            tracing::error!("Failed to load targets for subscriber: {}", e);
            return;
        }
    };
    if send_event(&mut socket, &Event::Initial(targets)).await.is_err() {
        return;
    }

    tracing::debug!("WebSocket subscriber connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("WebSocket subscriber disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::Text(text.into())).await
}
