//! HTTP server configuration and request routing.
//!
//! Axum router over request-scoped application state. The state carries
//! the engines; there is deliberately no process-wide default client or
//! global configuration — every handler works from what the request's
//! state hands it.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use courier_broker::{QueueEngine, TopicEngine};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::handlers;

/// Request-scoped application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Point-to-point queue engine.
    pub queues: Arc<QueueEngine>,
    /// Publish/subscribe topic engine.
    pub topics: Arc<TopicEngine>,
}

impl AppState {
    /// Creates application state over the given engines.
    pub fn new(queues: Arc<QueueEngine>, topics: Arc<TopicEngine>) -> Self {
        Self { queues, topics }
    }
}

/// Creates the router with all routes and middleware.
///
/// Middleware order: request tracing, then a request timeout. Handlers
/// receive [`AppState`] through the extractor.
pub fn create_router(state: AppState) -> Router {
    create_router_with_timeout(state, Duration::from_secs(30))
}

/// Creates the router with an explicit request timeout.
pub fn create_router_with_timeout(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check));

    let queue_routes = Router::new()
        .route(
            "/v1/queues",
            post(handlers::queues::create_queue).get(handlers::queues::list_queues),
        )
        .route(
            "/v1/queues/{id}",
            get(handlers::queues::get_queue).delete(handlers::queues::delete_queue),
        )
        .route("/v1/queues/{id}/messages", post(handlers::queues::send_message))
        .route("/v1/queues/{id}/receive", post(handlers::queues::receive_message))
        .route("/v1/messages/ack", post(handlers::queues::ack_message));

    let topic_routes = Router::new()
        .route(
            "/v1/topics",
            post(handlers::topics::create_topic).get(handlers::topics::list_topics),
        )
        .route(
            "/v1/topics/{id}",
            get(handlers::topics::get_topic).delete(handlers::topics::delete_topic),
        )
        .route("/v1/topics/{id}/publish", post(handlers::topics::publish))
        .route(
            "/v1/topics/{id}/subscriptions",
            post(handlers::topics::subscribe).get(handlers::topics::list_subscriptions),
        )
        .route(
            "/v1/topics/{id}/subscriptions/{sub_id}",
            axum::routing::delete(handlers::topics::delete_subscription),
        );

    Router::new()
        .merge(health_routes)
        .merge(queue_routes)
        .merge(topic_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Serves the API until the shutdown future resolves.
///
/// # Errors
///
/// Returns error if binding or serving fails.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router_with_timeout(state, request_timeout);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "API server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use courier_broker::MemoryBrokerStorage;
    use courier_core::{storage::memory::MemoryStorage, TestClock};
    use tower::util::ServiceExt;

    use super::*;

    fn test_state() -> AppState {
        let clock = Arc::new(TestClock::new());
        let storage = Arc::new(MemoryStorage::new());
        let broker_storage = Arc::new(MemoryBrokerStorage::new(storage));
        AppState::new(
            Arc::new(QueueEngine::new(broker_storage.clone(), clock.clone())),
            Arc::new(TopicEngine::new(broker_storage, clock)),
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_answers_ok() {
        let app = create_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn queue_crud_round_trip() {
        let app = create_router(test_state());

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/queues")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"orders","visibility_timeout_seconds":15}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::CREATED);
        let queue = body_json(create).await;
        assert_eq!(queue["name"], "orders");
        assert_eq!(queue["visibility_timeout_seconds"], 15);

        let list = app
            .clone()
            .oneshot(Request::builder().uri("/v1/queues").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        assert_eq!(body_json(list).await["items"].as_array().unwrap().len(), 1);

        let queue_id = queue["id"].as_str().unwrap().to_string();
        let delete = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/v1/queues/{queue_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn send_receive_ack_over_http() {
        let app = create_router(test_state());

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/queues")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"jobs"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let queue_id = body_json(create).await["id"].as_str().unwrap().to_string();

        let send = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/queues/{queue_id}/messages"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"body":{"job":"resize"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(send.status(), StatusCode::OK);
        assert!(body_json(send).await["message_id"].is_string());

        let receive = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/queues/{queue_id}/receive"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(receive.status(), StatusCode::OK);
        let message = body_json(receive).await;
        assert_eq!(message["state"], "in_flight");
        assert_eq!(message["attempt"], 1);
        let token = message["ack_token"].as_str().unwrap().to_string();

        // Queue drained: the next receive is an empty 204.
        let empty = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/queues/{queue_id}/receive"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::NO_CONTENT);

        let ack = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/messages/ack")
                    .header("content-type", "application/json")
                    .body(Body::from(format!(r#"{{"ack_token":"{token}"}}"#)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ack.status(), StatusCode::NO_CONTENT);

        // Second ack with the same token is the documented caller error.
        let stale = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/messages/ack")
                    .header("content-type", "application/json")
                    .body(Body::from(format!(r#"{{"ack_token":"{token}"}}"#)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stale.status(), StatusCode::CONFLICT);
        assert!(body_json(stale).await["detail"]
            .as_str()
            .unwrap()
            .contains("invalid ack token"));
    }

    #[tokio::test]
    async fn unknown_queue_answers_not_found_detail() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/queues/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["detail"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn topic_subscribe_and_publish_over_http() {
        let app = create_router(test_state());

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/topics")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"events"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::CREATED);
        let topic_id = body_json(create).await["id"].as_str().unwrap().to_string();

        let subscribe = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/topics/{topic_id}/subscriptions"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"audit","webhook_url":"https://audit.example/hook"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(subscribe.status(), StatusCode::CREATED);
        let sub_id = body_json(subscribe).await["id"].as_str().unwrap().to_string();

        let publish = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/topics/{topic_id}/publish"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"body":"x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(publish.status(), StatusCode::OK);

        let unsubscribe = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/v1/topics/{topic_id}/subscriptions/{sub_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unsubscribe.status(), StatusCode::NO_CONTENT);
    }
}
