//! Handlers for topic CRUD, publishing, and the subscription registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use courier_core::models::{Subscription, SubscriptionId, Topic, TopicId};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{error::ApiError, server::AppState};

/// Request body for `POST /v1/topics`.
#[derive(Debug, Deserialize)]
pub struct CreateTopicRequest {
    /// Topic name, unique within the account.
    pub name: String,
}

/// Request body for `POST /v1/topics/{id}/publish`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Message payload, any JSON value.
    pub body: serde_json::Value,
}

/// Request body for `POST /v1/topics/{id}/subscriptions`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Subscription name.
    pub name: String,
    /// Push target. Omit for a subscription that only records membership.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// `POST /v1/topics` — creates a topic.
pub async fn create_topic(
    State(state): State<AppState>,
    Json(request): Json<CreateTopicRequest>,
) -> Result<(StatusCode, Json<Topic>), ApiError> {
    let topic = state.topics.create_topic(request.name).await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

/// `GET /v1/topics` — lists topics.
pub async fn list_topics(
    State(state): State<AppState>,
) -> Result<Json<Vec<Topic>>, ApiError> {
    Ok(Json(state.topics.list_topics().await?))
}

/// `GET /v1/topics/{id}` — fetches one topic.
pub async fn get_topic(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Topic>, ApiError> {
    Ok(Json(state.topics.topic(TopicId(id)).await?))
}

/// `DELETE /v1/topics/{id}` — deletes a topic and cancels pending fan-out.
pub async fn delete_topic(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.topics.delete_topic(TopicId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/topics/{id}/publish` — publishes to every active
/// subscription.
pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message_id = state.topics.publish(TopicId(id), request.body).await?;
    Ok(Json(json!({ "message_id": message_id })))
}

/// `POST /v1/topics/{id}/subscriptions` — subscribes to a topic.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let subscription =
        state.topics.subscribe(TopicId(id), request.name, request.webhook_url).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// `GET /v1/topics/{id}/subscriptions` — lists a topic's subscriptions.
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    Ok(Json(state.topics.list_subscriptions(TopicId(id)).await?))
}

/// `DELETE /v1/topics/{id}/subscriptions/{sub_id}` — stops future fan-out
/// to a subscription.
pub async fn delete_subscription(
    State(state): State<AppState>,
    Path((id, sub_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.topics.delete_subscription(TopicId(id), SubscriptionId(sub_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
