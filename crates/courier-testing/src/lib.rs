//! Test infrastructure for deterministic broker testing.
//!
//! Provides a complete environment over the embedded memory backend: both
//! engines, a dispatcher factory with a predictable retry policy, a
//! virtual clock, and a wiremock server standing in for subscriber
//! webhooks. Time-dependent behavior (lease expiry, backoff schedules) is
//! driven by advancing the clock instead of sleeping, so scenario tests
//! run in milliseconds and never flake on timing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_broker::{MemoryBrokerStorage, QueueEngine, TopicEngine};
use courier_core::{storage::memory::MemoryStorage, Clock, TestClock};
use courier_delivery::{
    ClientConfig, DispatchConfig, Dispatcher, MemoryDeliveryStorage, RetryPolicy,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

pub mod fixtures;

pub use fixtures::QueueBuilder;

/// Complete test environment over the memory backend.
pub struct TestEnv {
    /// Virtual clock shared by engines and dispatchers.
    pub clock: Arc<TestClock>,
    /// The backing store, exposed for direct state assertions.
    pub storage: Arc<MemoryStorage>,
    /// Point-to-point queue engine.
    pub queues: Arc<QueueEngine>,
    /// Publish/subscribe topic engine.
    pub topics: Arc<TopicEngine>,
    /// Mock HTTP server standing in for subscriber webhooks.
    pub http_mock: MockServer,
}

impl TestEnv {
    /// Creates a fresh environment with an empty store and a running mock
    /// server.
    pub async fn new() -> Self {
        let clock = Arc::new(TestClock::new());
        let storage = Arc::new(MemoryStorage::new());
        let broker_storage = Arc::new(MemoryBrokerStorage::new(storage.clone()));

        Self {
            queues: Arc::new(QueueEngine::new(broker_storage.clone(), clock.clone())),
            topics: Arc::new(TopicEngine::new(broker_storage, clock.clone())),
            http_mock: MockServer::start().await,
            clock,
            storage,
        }
    }

    /// Creates a dispatcher over this environment's store with a
    /// deterministic retry policy: no jitter, one-second base delay.
    pub fn dispatcher(&self, max_attempts: u32) -> Dispatcher {
        self.dispatcher_with_policy(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.0,
        })
    }

    /// Creates a dispatcher with an explicit retry policy.
    pub fn dispatcher_with_policy(&self, retry_policy: RetryPolicy) -> Dispatcher {
        let config = DispatchConfig {
            retry_policy,
            client_config: ClientConfig {
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
            ..Default::default()
        };

        Dispatcher::new(
            Arc::new(MemoryDeliveryStorage::new(self.storage.clone())),
            config,
            self.clock.clone(),
        )
        .expect("dispatcher construction")
    }

    /// Advances virtual time.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Current virtual timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// Mounts a webhook endpoint answering with a fixed status and returns
    /// its URL.
    pub async fn mock_webhook(&self, path: &str, status: u16) -> String {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(path))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.http_mock)
            .await;

        format!("{}{}", self.http_mock.uri(), path)
    }

    /// URL for a path on the mock server without mounting anything.
    pub fn webhook_url(&self, path: &str) -> String {
        format!("{}{}", self.http_mock.uri(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn env_wires_engines_over_shared_state() {
        let env = TestEnv::new().await;
        let queue = env.queues.create_queue(courier_broker::CreateQueue::new("smoke")).await
            .unwrap();

        env.queues.send(queue.id, serde_json::json!("x"), 0).await.unwrap();

        assert_eq!(env.storage.live_depth(queue.id), 1);
    }

    #[tokio::test]
    async fn advancing_time_moves_the_shared_clock() {
        let env = TestEnv::new().await;
        let before = env.now();

        env.advance_time(Duration::from_secs(90));

        assert_eq!(env.now() - before, chrono::Duration::seconds(90));
    }
}
