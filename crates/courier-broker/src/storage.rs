//! Storage abstraction layer for the broker engines.
//!
//! Provides trait-based abstractions over storage operations so the
//! engines can run against PostgreSQL in production and the embedded
//! memory backend in tests and single-process deployments. The atomicity
//! of the lease grant and the acknowledgement lives behind this seam; the
//! engines only orchestrate.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use courier_core::{
    error::Result,
    models::{
        AckToken, Delivery, Message, MessageId, Queue, QueueId, Subscription, SubscriptionId,
        Topic, TopicId,
    },
    storage::{memory::MemoryStorage, Storage},
};

/// Storage operations required by the queue and topic engines.
///
/// Implementations must provide atomic read-modify-write on a message's
/// `(state, ack_token, attempt, visible_at)` tuple: `lease_next` and `ack`
/// are the compare-and-swap pair the delivery guarantees rest on.
pub trait BrokerStorage: Send + Sync + 'static {
    /// Creates a queue. Names are unique.
    fn create_queue(&self, queue: Queue)
        -> Pin<Box<dyn Future<Output = Result<QueueId>> + Send + '_>>;

    /// Finds a queue by ID.
    fn find_queue(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Queue>>> + Send + '_>>;

    /// Lists all queues, oldest first.
    fn list_queues(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Queue>>> + Send + '_>>;

    /// Deletes a queue, purging owned messages. Returns whether it existed.
    fn delete_queue(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Persists a new message.
    fn create_message(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId>> + Send + '_>>;

    /// Grants a lease on the next eligible message of the queue, or `None`
    /// when nothing is eligible. Exactly one concurrent caller can win any
    /// given message.
    fn lease_next(
        &self,
        queue: Queue,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>>> + Send + '_>>;

    /// Acknowledges by current lease token. Returns `false` when the token
    /// matches no active lease.
    fn ack(&self, token: AckToken) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Returns long-expired in-flight messages to pending. Observability
    /// aid only; lease expiry is evaluated lazily at receive time.
    fn reap_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Live depth of a queue (pending + in-flight).
    fn live_depth(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>>;

    /// Creates a topic. Names are unique.
    fn create_topic(&self, topic: Topic)
        -> Pin<Box<dyn Future<Output = Result<TopicId>> + Send + '_>>;

    /// Finds a topic by ID.
    fn find_topic(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Topic>>> + Send + '_>>;

    /// Lists all topics, oldest first.
    fn list_topics(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Topic>>> + Send + '_>>;

    /// Deletes a topic with its subscriptions and messages; deliveries not
    /// yet dispatching are cancelled. Returns whether it existed.
    fn delete_topic(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Creates a subscription.
    fn create_subscription(
        &self,
        subscription: Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionId>> + Send + '_>>;

    /// Lists the subscriptions of a topic, oldest first.
    fn list_subscriptions(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>>;

    /// Deletes a subscription scoped to its topic. Returns whether it
    /// existed. Deliveries created at publish time are untouched.
    fn delete_subscription(
        &self,
        topic_id: TopicId,
        subscription_id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Persists the delivery tasks of one publish.
    fn create_deliveries(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production storage implementation using PostgreSQL.
///
/// Wraps the repository container from `courier-core` to implement the
/// `BrokerStorage` trait.
pub struct PostgresBrokerStorage {
    storage: Arc<Storage>,
}

impl PostgresBrokerStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl BrokerStorage for PostgresBrokerStorage {
    fn create_queue(
        &self,
        queue: Queue,
    ) -> Pin<Box<dyn Future<Output = Result<QueueId>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queues.create(&queue).await })
    }

    fn find_queue(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Queue>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queues.find_by_id(queue_id).await })
    }

    fn list_queues(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Queue>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queues.list().await })
    }

    fn delete_queue(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queues.delete(queue_id).await })
    }

    fn create_message(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.create(&message).await })
    }

    fn lease_next(
        &self,
        queue: Queue,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.lease_next(&queue, now).await })
    }

    fn ack(&self, token: AckToken) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.ack(token).await })
    }

    fn reap_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.reap_expired(now).await })
    }

    fn live_depth(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.live_depth(queue_id).await })
    }

    fn create_topic(
        &self,
        topic: Topic,
    ) -> Pin<Box<dyn Future<Output = Result<TopicId>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.topics.create(&topic).await })
    }

    fn find_topic(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Topic>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.topics.find_by_id(topic_id).await })
    }

    fn list_topics(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Topic>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.topics.list().await })
    }

    fn delete_topic(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.topics.delete(topic_id).await })
    }

    fn create_subscription(
        &self,
        subscription: Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionId>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.subscriptions.create(&subscription).await })
    }

    fn list_subscriptions(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.subscriptions.list_by_topic(topic_id).await })
    }

    fn delete_subscription(
        &self,
        topic_id: TopicId,
        subscription_id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.subscriptions.delete(topic_id, subscription_id).await })
    }

    fn create_deliveries(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.create_batch(&deliveries).await })
    }
}

/// Embedded storage implementation over the in-memory backend.
///
/// Shares its [`MemoryStorage`] with the delivery dispatcher's adapter so
/// published messages and their delivery tasks live in one place.
pub struct MemoryBrokerStorage {
    storage: Arc<MemoryStorage>,
}

impl MemoryBrokerStorage {
    /// Creates a new memory storage adapter.
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self { storage }
    }
}

impl BrokerStorage for MemoryBrokerStorage {
    fn create_queue(
        &self,
        queue: Queue,
    ) -> Pin<Box<dyn Future<Output = Result<QueueId>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.create_queue(queue)))
    }

    fn find_queue(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Queue>>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.find_queue(queue_id))))
    }

    fn list_queues(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Queue>>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.list_queues())))
    }

    fn delete_queue(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.delete_queue(queue_id))))
    }

    fn create_message(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.create_message(message)))
    }

    fn lease_next(
        &self,
        queue: Queue,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.lease_next(&queue, now)))
    }

    fn ack(&self, token: AckToken) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.ack(token)))
    }

    fn reap_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.reap_expired(now)))
    }

    fn live_depth(
        &self,
        queue_id: QueueId,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.live_depth(queue_id))))
    }

    fn create_topic(
        &self,
        topic: Topic,
    ) -> Pin<Box<dyn Future<Output = Result<TopicId>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.create_topic(topic)))
    }

    fn find_topic(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Topic>>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.find_topic(topic_id))))
    }

    fn list_topics(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Topic>>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.list_topics())))
    }

    fn delete_topic(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.delete_topic(topic_id))))
    }

    fn create_subscription(
        &self,
        subscription: Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionId>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.create_subscription(subscription)))
    }

    fn list_subscriptions(
        &self,
        topic_id: TopicId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.list_subscriptions(topic_id))))
    }

    fn delete_subscription(
        &self,
        topic_id: TopicId,
        subscription_id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(std::future::ready(
            Ok(self.storage.delete_subscription(topic_id, subscription_id)),
        ))
    }

    fn create_deliveries(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.create_deliveries(&deliveries)))
    }
}
