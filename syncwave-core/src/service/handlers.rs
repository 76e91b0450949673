//! HTTP handlers

use super::realtime::RealtimeService;
use super::types::*;
use crate::error::SyncError;
use crate::event_store::EventEnvelope;
use crate::replay::{ActorSync, IncrementalSync};
use crate::transport::stream::EventStream;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{sse::Sse, IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// Error returned by every handler. Engine errors keep their meaning in the
/// status code; anything else is a 500.
pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<SyncError>() {
            Some(SyncError::ClientNotFound(_)) => StatusCode::NOT_FOUND,
            Some(SyncError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Some(SyncError::VersionConflict { .. }) => StatusCode::CONFLICT,
            Some(SyncError::Transport(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Some(SyncError::AppendFailed { .. }) | Some(SyncError::QueryFailed(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = ErrorResponse {
            error: self.0.to_string(),
            details: self.0.chain().nth(1).map(ToString::to_string),
        };
        (status, Json(error_response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// GET /ws - Upgrade to the socket protocol
pub async fn open_socket(
    State(service): State<Arc<RealtimeService>>,
    Query(query): Query<StreamQuery>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let socket = service
        .socket()
        .ok_or_else(|| SyncError::Transport("websocket transport is disabled".to_string()))?;
    Ok(socket.accept(upgrade, query.actor_filter()))
}

/// GET /events - Open a Server-Sent Events stream
pub async fn open_stream(
    State(service): State<Arc<RealtimeService>>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<EventStream>> {
    let stream = service
        .stream()
        .ok_or_else(|| SyncError::Transport("sse transport is disabled".to_string()))?;
    Ok(stream.open(query.actor_filter())?)
}

/// GET /sync/:actor_id - Page of events after `knownVersion`
pub async fn incremental_sync(
    State(service): State<Arc<RealtimeService>>,
    Path(actor_id): Path<String>,
    Query(query): Query<SyncQuery>,
) -> ApiResult<Json<IncrementalSync>> {
    let page = service
        .incremental_sync(&actor_id, query.known_version, query.max_events)
        .await?;
    Ok(Json(page))
}

/// GET /actors/:actor_id/state - Reconstructed actor state
pub async fn actor_state(
    State(service): State<Arc<RealtimeService>>,
    Path(actor_id): Path<String>,
) -> ApiResult<Json<ActorSync>> {
    Ok(Json(service.sync_actor(&actor_id).await?))
}

/// POST /actors/:actor_id/events - Append and fan out
pub async fn publish_event(
    State(service): State<Arc<RealtimeService>>,
    Path(actor_id): Path<String>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<EventEnvelope>)> {
    if request.event_type.trim().is_empty() {
        return Err(SyncError::InvalidRequest("event type must not be empty".to_string()).into());
    }
    let envelope = service
        .publish(&actor_id, &request.event_type, request.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(envelope)))
}

/// GET /health
pub async fn health(State(service): State<Arc<RealtimeService>>) -> Json<HealthResponse> {
    let status = if service.is_connected() { "ok" } else { "stopped" };
    Json(HealthResponse {
        status: status.to_string(),
        transports: service.connection_info().await,
    })
}
