//! Builder-style fixtures for test data setup.

use courier_broker::CreateQueue;
use courier_core::models::{Queue, QueueUseCase, Subscription, Topic};

use crate::TestEnv;

/// Builder for test queues with policy overrides.
///
/// ```no_run
/// # use courier_testing::{QueueBuilder, TestEnv};
/// # async fn example(env: &TestEnv) {
/// let queue = QueueBuilder::new("orders")
///     .visibility_timeout_seconds(5)
///     .max_attempts(3)
///     .create(env)
///     .await;
/// # }
/// ```
pub struct QueueBuilder {
    params: CreateQueue,
}

impl QueueBuilder {
    /// Starts a builder with default policy for the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { params: CreateQueue::new(name) }
    }

    /// Sets the lease duration.
    pub fn visibility_timeout_seconds(mut self, seconds: i32) -> Self {
        self.params.visibility_timeout_seconds = seconds;
        self
    }

    /// Sets the dead-letter attempt ceiling.
    pub fn max_attempts(mut self, attempts: i32) -> Self {
        self.params.max_attempts = attempts;
        self
    }

    /// Bounds the live depth.
    pub fn max_depth(mut self, depth: i32) -> Self {
        self.params.max_depth = Some(depth);
        self
    }

    /// Switches the queue to strict head-of-line ordering.
    pub fn fifo(mut self) -> Self {
        self.params.use_case = QueueUseCase::Fifo;
        self
    }

    /// Creates the queue through the environment's engine.
    pub async fn create(self, env: &TestEnv) -> Queue {
        env.queues.create_queue(self.params).await.expect("queue fixture creation")
    }
}

/// Creates a topic with one webhook subscription per path, mounting each
/// path on the mock server with the given status.
pub async fn topic_with_webhooks(
    env: &TestEnv,
    name: &str,
    endpoints: &[(&str, u16)],
) -> (Topic, Vec<Subscription>) {
    let topic = env.topics.create_topic(name).await.expect("topic fixture creation");

    let mut subscriptions = Vec::with_capacity(endpoints.len());
    for (path, status) in endpoints {
        let url = env.mock_webhook(path, *status).await;
        let subscription = env
            .topics
            .subscribe(topic.id, path.trim_start_matches('/'), Some(url))
            .await
            .expect("subscription fixture creation");
        subscriptions.push(subscription);
    }

    (topic, subscriptions)
}
