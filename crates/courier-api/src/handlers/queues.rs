//! Handlers for queue CRUD and the point-to-point messaging operations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use courier_broker::CreateQueue;
use courier_core::models::{AckToken, Message, Queue, QueueId};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{error::ApiError, server::AppState};

/// Request body for `POST /v1/queues/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Message payload, any JSON value.
    pub body: serde_json::Value,
    /// Seconds before the message becomes visible to receivers.
    #[serde(default)]
    pub delay_seconds: u32,
}

/// Query parameters for `POST /v1/queues/{id}/receive`.
#[derive(Debug, Deserialize)]
pub struct ReceiveParams {
    /// Optional consumer identity, logged with the lease grant.
    pub consumer_id: Option<String>,
}

/// Request body for `POST /v1/messages/ack`.
#[derive(Debug, Deserialize)]
pub struct AckRequest {
    /// Token of the lease being settled.
    pub ack_token: Uuid,
}

/// `POST /v1/queues` — creates a queue.
pub async fn create_queue(
    State(state): State<AppState>,
    Json(params): Json<CreateQueue>,
) -> Result<(StatusCode, Json<Queue>), ApiError> {
    let queue = state.queues.create_queue(params).await?;
    Ok((StatusCode::CREATED, Json(queue)))
}

/// `GET /v1/queues` — lists queues as an `items` envelope.
pub async fn list_queues(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let queues = state.queues.list_queues().await?;
    Ok(Json(json!({ "items": queues })))
}

/// `GET /v1/queues/{id}` — fetches one queue.
pub async fn get_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Queue>, ApiError> {
    let queue = state.queues.queue(QueueId(id)).await?;
    Ok(Json(queue))
}

/// `DELETE /v1/queues/{id}` — deletes a queue and purges its messages.
pub async fn delete_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.queues.delete_queue(QueueId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/queues/{id}/messages` — enqueues a message.
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message_id =
        state.queues.send(QueueId(id), request.body, request.delay_seconds).await?;
    Ok(Json(json!({ "message_id": message_id })))
}

/// `POST /v1/queues/{id}/receive` — leases the next eligible message.
///
/// An empty queue answers 204 with no body; the SDK maps that to `None`.
pub async fn receive_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ReceiveParams>,
) -> Result<axum::response::Response, ApiError> {
    use axum::response::IntoResponse;

    let leased =
        state.queues.receive(QueueId(id), params.consumer_id.as_deref()).await?;

    Ok(match leased {
        Some(message) => Json::<Message>(message).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// `POST /v1/messages/ack` — settles a lease by its token.
pub async fn ack_message(
    State(state): State<AppState>,
    Json(request): Json<AckRequest>,
) -> Result<StatusCode, ApiError> {
    state.queues.ack(AckToken(request.ack_token)).await?;
    Ok(StatusCode::NO_CONTENT)
}
