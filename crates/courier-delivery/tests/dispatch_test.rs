//! Integration tests for the dispatch engine against the memory backend.
//!
//! Uses `process_batch` for deterministic single-step execution, a test
//! clock for backoff timing, and wiremock endpoints standing in for
//! subscriber webhooks.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::{
    models::{Delivery, DeliveryState, Message, MessageId, SubscriptionId, Topic, TopicId},
    storage::memory::MemoryStorage,
    Clock, TestClock,
};
use courier_delivery::{
    ClientConfig, DispatchConfig, Dispatcher, MemoryDeliveryStorage, RetryPolicy,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct DispatchEnv {
    storage: Arc<MemoryStorage>,
    clock: Arc<TestClock>,
    dispatcher: Dispatcher,
}

impl DispatchEnv {
    fn new(max_attempts: u32) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(TestClock::new());
        let config = DispatchConfig {
            retry_policy: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                jitter_factor: 0.0,
            },
            client_config: ClientConfig {
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryDeliveryStorage::new(storage.clone())),
            config,
            clock.clone(),
        )
        .expect("dispatcher construction");

        Self { storage, clock, dispatcher }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// Seeds one published message with one delivery task per URL.
    fn seed_fanout(&self, urls: &[String]) -> (MessageId, Vec<Delivery>) {
        let now = self.now();
        let topic = Topic { id: TopicId::new(), name: "orders".to_string(), created_at: now };
        self.storage.create_topic(topic.clone()).unwrap();

        let subscription_ids: Vec<SubscriptionId> =
            urls.iter().map(|_| SubscriptionId::new()).collect();
        let message = Message::published(
            topic.id,
            subscription_ids.clone(),
            serde_json::json!({"order": 42}),
            now,
        );
        let message_id = self.storage.create_message(message).unwrap();

        let deliveries: Vec<Delivery> = urls
            .iter()
            .zip(subscription_ids)
            .map(|(url, sub_id)| Delivery::scheduled(message_id, sub_id, url.clone(), now))
            .collect();
        self.storage.create_deliveries(&deliveries).unwrap();

        (message_id, deliveries)
    }
}

#[tokio::test]
async fn successful_dispatch_marks_delivered() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let env = DispatchEnv::new(5);
    let (_message_id, deliveries) = env.seed_fanout(&[format!("{}/hook", mock_server.uri())]);

    let processed = env.dispatcher.process_batch().await.unwrap();
    assert_eq!(processed, 1);

    let delivery = env.storage.find_delivery(deliveries[0].id).unwrap();
    assert_eq!(delivery.state, DeliveryState::Delivered);

    let stats = env.dispatcher.stats().await;
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.in_flight, 0);

    mock_server.verify().await;
}

#[tokio::test]
async fn failed_dispatch_schedules_backoff_retry() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let env = DispatchEnv::new(5);
    let (_message_id, deliveries) = env.seed_fanout(&[format!("{}/hook", mock_server.uri())]);

    env.dispatcher.process_batch().await.unwrap();

    let delivery = env.storage.find_delivery(deliveries[0].id).unwrap();
    assert_eq!(delivery.state, DeliveryState::Retrying);
    assert_eq!(delivery.attempt, 1);
    assert_eq!(delivery.next_attempt_at, env.now() + chrono::Duration::seconds(1));
    assert!(delivery.last_error.as_deref().unwrap().contains("500"));

    // Not due yet: nothing to claim.
    assert_eq!(env.dispatcher.process_batch().await.unwrap(), 0);

    // Past the backoff delay the task dispatches again.
    env.clock.advance(Duration::from_secs(1));
    assert_eq!(env.dispatcher.process_batch().await.unwrap(), 1);

    let delivery = env.storage.find_delivery(deliveries[0].id).unwrap();
    assert_eq!(delivery.attempt, 2);
    // Second failure backs off twice as long.
    assert_eq!(delivery.next_attempt_at, env.now() + chrono::Duration::seconds(2));
}

#[tokio::test]
async fn retry_ceiling_leaves_task_failed() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let env = DispatchEnv::new(3);
    let (_message_id, deliveries) = env.seed_fanout(&[format!("{}/hook", mock_server.uri())]);

    for _ in 0..3 {
        env.dispatcher.process_batch().await.unwrap();
        env.clock.advance(Duration::from_secs(60));
    }

    let delivery = env.storage.find_delivery(deliveries[0].id).unwrap();
    assert_eq!(delivery.state, DeliveryState::Failed);
    assert_eq!(delivery.attempt, 3);

    // Terminal: nothing left to claim, no further outbound calls.
    assert_eq!(env.dispatcher.process_batch().await.unwrap(), 0);
    assert_eq!(env.dispatcher.stats().await.permanent_failures, 1);

    mock_server.verify().await;
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(410).set_body_string("gone"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let env = DispatchEnv::new(5);
    let (_message_id, deliveries) = env.seed_fanout(&[format!("{}/hook", mock_server.uri())]);

    env.dispatcher.process_batch().await.unwrap();

    let delivery = env.storage.find_delivery(deliveries[0].id).unwrap();
    assert_eq!(delivery.state, DeliveryState::Failed);
    assert_eq!(delivery.attempt, 1);

    mock_server.verify().await;
}

#[tokio::test]
async fn one_failing_subscriber_never_blocks_another() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let env = DispatchEnv::new(3);
    let (_message_id, deliveries) = env.seed_fanout(&[
        format!("{}/flaky", mock_server.uri()),
        format!("{}/healthy", mock_server.uri()),
    ]);

    env.dispatcher.process_batch().await.unwrap();

    let flaky = env.storage.find_delivery(deliveries[0].id).unwrap();
    let healthy = env.storage.find_delivery(deliveries[1].id).unwrap();
    assert_eq!(flaky.state, DeliveryState::Retrying);
    assert_eq!(healthy.state, DeliveryState::Delivered);

    mock_server.verify().await;
}

#[tokio::test]
async fn rate_limited_endpoint_sets_retry_after_schedule() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_string("slow down")
                .append_header("Retry-After", "120"),
        )
        .mount(&mock_server)
        .await;

    let env = DispatchEnv::new(5);
    let (_message_id, deliveries) = env.seed_fanout(&[format!("{}/hook", mock_server.uri())]);

    env.dispatcher.process_batch().await.unwrap();

    let delivery = env.storage.find_delivery(deliveries[0].id).unwrap();
    assert_eq!(delivery.state, DeliveryState::Retrying);
    assert_eq!(delivery.next_attempt_at, env.now() + chrono::Duration::seconds(120));
}

#[tokio::test]
async fn engine_lifecycle_starts_and_stops_workers() {
    let env = DispatchEnv::new(5);
    let storage = Arc::new(MemoryDeliveryStorage::new(env.storage.clone()));
    let mut dispatcher = Dispatcher::new(
        storage,
        DispatchConfig { worker_count: 2, ..Default::default() },
        env.clock.clone(),
    )
    .unwrap();

    dispatcher.start().await.unwrap();
    assert_eq!(dispatcher.stats().await.active_workers, 2);

    dispatcher.shutdown().await.unwrap();
}
