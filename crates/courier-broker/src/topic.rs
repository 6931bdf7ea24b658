//! Topic engine for publish/subscribe fan-out.
//!
//! A publish persists one message tagged with the ids of the subscriptions
//! active at that instant, plus one delivery task per webhook-bearing
//! subscription in the snapshot. The publish call returns as soon as those
//! rows exist; dispatch workers pick the tasks up asynchronously, so a
//! slow or failing subscriber never delays the publisher or another
//! subscriber.

use std::sync::Arc;

use courier_core::{
    error::{CoreError, Result},
    models::{
        Delivery, Message, MessageId, Subscription, SubscriptionId, Topic, TopicId,
    },
    Clock,
};
use tracing::{debug, info};

use crate::storage::BrokerStorage;

/// Topic engine coordinating the subscription registry and fan-out.
pub struct TopicEngine {
    storage: Arc<dyn BrokerStorage>,
    clock: Arc<dyn Clock>,
}

impl TopicEngine {
    /// Creates a topic engine over the given storage and clock.
    pub fn new(storage: Arc<dyn BrokerStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Creates a new topic.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty name, `ConstraintViolation` for
    /// a duplicate one.
    pub async fn create_topic(&self, name: impl Into<String>) -> Result<Topic> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInput("topic name must not be empty".to_string()));
        }

        let topic = Topic { id: TopicId::new(), name, created_at: self.clock.now_utc() };
        self.storage.create_topic(topic.clone()).await?;

        info!(topic_id = %topic.id, name = %topic.name, "topic created");
        Ok(topic)
    }

    /// Fetches a topic by ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub async fn topic(&self, topic_id: TopicId) -> Result<Topic> {
        self.storage
            .find_topic(topic_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("topic {topic_id}")))
    }

    /// Lists all topics.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub async fn list_topics(&self) -> Result<Vec<Topic>> {
        self.storage.list_topics().await
    }

    /// Deletes a topic with its subscriptions and published messages.
    ///
    /// Delivery tasks not yet claimed by a worker are cancelled. A task
    /// already dispatching completes its outbound call; the result is
    /// discarded when the worker reports it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub async fn delete_topic(&self, topic_id: TopicId) -> Result<()> {
        if self.storage.delete_topic(topic_id).await? {
            info!(topic_id = %topic_id, "topic deleted, pending deliveries cancelled");
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("topic {topic_id}")))
        }
    }

    /// Publishes a message to every subscription active right now.
    ///
    /// Returns the message ID as soon as the message and its delivery
    /// tasks are persisted. Fan-out is asynchronous: this call never waits
    /// on a webhook. Subscriptions created after this call do not receive
    /// the message.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown topic.
    pub async fn publish(&self, topic_id: TopicId, body: serde_json::Value) -> Result<MessageId> {
        self.topic(topic_id).await?;

        let now = self.clock.now_utc();
        let snapshot = self.storage.list_subscriptions(topic_id).await?;
        let subscriber_ids: Vec<SubscriptionId> = snapshot.iter().map(|s| s.id).collect();

        let message = Message::published(topic_id, subscriber_ids, body, now);
        let message_id = self.storage.create_message(message).await?;

        let deliveries: Vec<Delivery> = snapshot
            .iter()
            .filter_map(|subscription| {
                subscription.webhook_url.as_ref().map(|url| {
                    Delivery::scheduled(message_id, subscription.id, url.clone(), now)
                })
            })
            .collect();
        let fanout = deliveries.len();
        self.storage.create_deliveries(deliveries).await?;

        debug!(
            topic_id = %topic_id,
            message_id = %message_id,
            subscriptions = snapshot.len(),
            fanout,
            "message published"
        );

        Ok(message_id)
    }

    /// Subscribes to a topic.
    ///
    /// The subscription receives messages published after this call only.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown topic and `InvalidInput` for a
    /// webhook URL that is not http(s).
    pub async fn subscribe(
        &self,
        topic_id: TopicId,
        name: impl Into<String>,
        webhook_url: Option<String>,
    ) -> Result<Subscription> {
        self.topic(topic_id).await?;

        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "subscription name must not be empty".to_string(),
            ));
        }
        if let Some(url) = &webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CoreError::InvalidInput(format!(
                    "webhook_url must be http(s): {url}"
                )));
            }
        }

        let subscription = Subscription {
            id: SubscriptionId::new(),
            topic_id,
            name,
            webhook_url,
            created_at: self.clock.now_utc(),
        };
        self.storage.create_subscription(subscription.clone()).await?;

        info!(
            topic_id = %topic_id,
            subscription_id = %subscription.id,
            name = %subscription.name,
            "subscription created"
        );

        Ok(subscription)
    }

    /// Lists the subscriptions of a topic.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown topic.
    pub async fn list_subscriptions(&self, topic_id: TopicId) -> Result<Vec<Subscription>> {
        self.topic(topic_id).await?;
        self.storage.list_subscriptions(topic_id).await
    }

    /// Deletes a subscription.
    ///
    /// Stops future fan-out immediately. Deliveries created by earlier
    /// publishes belong to their snapshots and run to completion
    /// independently.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the subscription does not exist under this
    /// topic.
    pub async fn delete_subscription(
        &self,
        topic_id: TopicId,
        subscription_id: SubscriptionId,
    ) -> Result<()> {
        if self.storage.delete_subscription(topic_id, subscription_id).await? {
            info!(
                topic_id = %topic_id,
                subscription_id = %subscription_id,
                "subscription deleted"
            );
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("subscription {subscription_id}")))
        }
    }
}
