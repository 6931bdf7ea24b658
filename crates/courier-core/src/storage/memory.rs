//! Embedded in-memory storage backend.
//!
//! Implements the same observable semantics as the PostgreSQL repositories
//! without a database: the lease/ack compare-and-swap runs under a
//! per-message lock, so concurrent receivers racing for one message
//! serialize on that message alone while unrelated messages proceed in
//! parallel. Used by the test harness and available for single-process
//! deployments that accept non-durable state.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::{
    error::{CoreError, Result},
    models::{
        AckToken, Delivery, DeliveryId, DeliveryState, DueDelivery, Message, MessageId,
        MessageState, Queue, QueueId, QueueUseCase, Subscription, SubscriptionId, Topic, TopicId,
    },
};

/// Message record under its per-message lock.
#[derive(Debug)]
struct StoredMessage {
    message: Message,
}

/// In-memory storage with per-message lease locking.
#[derive(Default)]
pub struct MemoryStorage {
    queues: RwLock<HashMap<QueueId, Queue>>,
    topics: RwLock<HashMap<TopicId, Topic>>,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    messages: RwLock<HashMap<MessageId, Arc<Mutex<StoredMessage>>>>,
    /// Per-queue message IDs in insertion order.
    queue_index: RwLock<HashMap<QueueId, Vec<MessageId>>>,
    /// Current lease token -> message. Exactly one entry per in-flight
    /// message.
    ack_index: RwLock<HashMap<AckToken, MessageId>>,
    deliveries: RwLock<HashMap<DeliveryId, Delivery>>,
    /// Delivery IDs in creation order for stable claiming.
    delivery_order: RwLock<Vec<DeliveryId>>,
}

impl MemoryStorage {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    // --- queues -----------------------------------------------------------

    /// Creates a queue. Names are unique.
    pub fn create_queue(&self, queue: Queue) -> Result<QueueId> {
        let mut queues = self.queues.write();
        if queues.values().any(|q| q.name == queue.name) {
            return Err(CoreError::ConstraintViolation(format!(
                "queue name already exists: {}",
                queue.name
            )));
        }
        let id = queue.id;
        queues.insert(id, queue);
        Ok(id)
    }

    /// Finds a queue by ID.
    pub fn find_queue(&self, queue_id: QueueId) -> Option<Queue> {
        self.queues.read().get(&queue_id).cloned()
    }

    /// Lists all queues, oldest first.
    pub fn list_queues(&self) -> Vec<Queue> {
        let mut queues: Vec<Queue> = self.queues.read().values().cloned().collect();
        queues.sort_by_key(|q| q.created_at);
        queues
    }

    /// Deletes a queue and purges its messages.
    pub fn delete_queue(&self, queue_id: QueueId) -> bool {
        if self.queues.write().remove(&queue_id).is_none() {
            return false;
        }

        let ids = self.queue_index.write().remove(&queue_id).unwrap_or_default();
        let mut messages = self.messages.write();
        let mut ack_index = self.ack_index.write();
        for message_id in ids {
            if let Some(slot) = messages.remove(&message_id) {
                if let Some(token) = slot.lock().message.ack_token {
                    ack_index.remove(&token);
                }
            }
        }
        true
    }

    // --- topics and subscriptions ----------------------------------------

    /// Creates a topic. Names are unique.
    pub fn create_topic(&self, topic: Topic) -> Result<TopicId> {
        let mut topics = self.topics.write();
        if topics.values().any(|t| t.name == topic.name) {
            return Err(CoreError::ConstraintViolation(format!(
                "topic name already exists: {}",
                topic.name
            )));
        }
        let id = topic.id;
        topics.insert(id, topic);
        Ok(id)
    }

    /// Finds a topic by ID.
    pub fn find_topic(&self, topic_id: TopicId) -> Option<Topic> {
        self.topics.read().get(&topic_id).cloned()
    }

    /// Lists all topics, oldest first.
    pub fn list_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.topics.read().values().cloned().collect();
        topics.sort_by_key(|t| t.created_at);
        topics
    }

    /// Deletes a topic, its subscriptions, its published messages, and
    /// every delivery that has not yet produced a result. A worker holding
    /// a claimed delivery finds the row gone and discards its result.
    pub fn delete_topic(&self, topic_id: TopicId) -> bool {
        if self.topics.write().remove(&topic_id).is_none() {
            return false;
        }

        self.subscriptions.write().retain(|_, s| s.topic_id != topic_id);

        let removed: Vec<MessageId> = {
            let mut messages = self.messages.write();
            let doomed: Vec<MessageId> = messages
                .iter()
                .filter(|(_, slot)| {
                    slot.lock().message.destination.topic_id() == Some(topic_id)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &doomed {
                messages.remove(id);
            }
            doomed
        };

        let mut deliveries = self.deliveries.write();
        deliveries.retain(|_, d| !removed.contains(&d.message_id));
        self.delivery_order.write().retain(|id| deliveries.contains_key(id));
        true
    }

    /// Creates a subscription.
    pub fn create_subscription(&self, subscription: Subscription) -> Result<SubscriptionId> {
        let id = subscription.id;
        self.subscriptions.write().insert(id, subscription);
        Ok(id)
    }

    /// Lists the subscriptions of a topic, oldest first.
    pub fn list_subscriptions(&self, topic_id: TopicId) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.topic_id == topic_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        subs
    }

    /// Deletes a subscription scoped to its topic. Existing deliveries are
    /// untouched: they belong to publish-time snapshots.
    pub fn delete_subscription(&self, topic_id: TopicId, subscription_id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.get(&subscription_id) {
            Some(s) if s.topic_id == topic_id => {
                subs.remove(&subscription_id);
                true
            },
            _ => false,
        }
    }

    // --- messages ---------------------------------------------------------

    /// Persists a new message.
    ///
    /// The per-queue index records insertion order, which breaks
    /// `created_at` ties during selection.
    pub fn create_message(&self, message: Message) -> Result<MessageId> {
        let id = message.id;
        if let Some(queue_id) = message.destination.queue_id() {
            self.queue_index.write().entry(queue_id).or_default().push(id);
        }
        self.messages.write().insert(id, Arc::new(Mutex::new(StoredMessage { message })));
        Ok(id)
    }

    /// Grants a lease on the next eligible message. Same contract as the
    /// PostgreSQL repository: oldest-first selection, attempt incremented
    /// once per grant, dead-letter past `max_attempts`, fresh token
    /// invalidating the previous one, FIFO head blocking for `fifo` queues.
    pub fn lease_next(&self, queue: &Queue, now: DateTime<Utc>) -> Result<Option<Message>> {
        let candidates: Vec<MessageId> =
            self.queue_index.read().get(&queue.id).cloned().unwrap_or_default();

        for message_id in candidates {
            let Some(slot) = self.messages.read().get(&message_id).cloned() else {
                continue;
            };
            let mut stored = slot.lock();
            let message = &mut stored.message;

            match queue.use_case {
                QueueUseCase::GeneralPurpose => {
                    if !message.lease_eligible(now) {
                        continue;
                    }
                },
                QueueUseCase::Fifo => {
                    if message.state.is_terminal() {
                        continue;
                    }
                    // The head blocks the queue until it is eligible.
                    if message.visible_at > now {
                        return Ok(None);
                    }
                },
            }

            if message.attempt + 1 > queue.max_attempts {
                if let Some(token) = message.ack_token.take() {
                    self.ack_index.write().remove(&token);
                }
                message.state = MessageState::Dead;
                tracing::warn!(
                    message_id = %message.id,
                    queue_id = %queue.id,
                    attempts = message.attempt,
                    "message exhausted delivery attempts, dead-lettered"
                );
                continue;
            }

            let token = AckToken::mint();
            if let Some(previous) = message.ack_token.take() {
                self.ack_index.write().remove(&previous);
            }
            message.state = MessageState::InFlight;
            message.attempt += 1;
            message.ack_token = Some(token);
            message.visible_at = now + queue.visibility_timeout();
            self.ack_index.write().insert(token, message_id);

            return Ok(Some(message.clone()));
        }

        Ok(None)
    }

    /// Acknowledges by current lease token. Returns false on any mismatch;
    /// state is untouched in that case.
    pub fn ack(&self, token: AckToken) -> Result<bool> {
        let message_id = self.ack_index.read().get(&token).copied();
        let Some(message_id) = message_id else {
            return Ok(false);
        };
        let Some(slot) = self.messages.read().get(&message_id).cloned() else {
            return Ok(false);
        };

        let mut stored = slot.lock();
        let message = &mut stored.message;
        if message.state == MessageState::InFlight && message.ack_token == Some(token) {
            message.state = MessageState::Acked;
            message.ack_token = None;
            self.ack_index.write().remove(&token);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Returns long-expired in-flight messages to pending.
    pub fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let slots: Vec<Arc<Mutex<StoredMessage>>> =
            self.messages.read().values().cloned().collect();

        let mut reaped = 0;
        for slot in slots {
            let mut stored = slot.lock();
            let message = &mut stored.message;
            if message.state == MessageState::InFlight && message.visible_at <= now {
                if let Some(token) = message.ack_token.take() {
                    self.ack_index.write().remove(&token);
                }
                message.state = MessageState::Pending;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Finds a message by ID.
    pub fn find_message(&self, message_id: MessageId) -> Option<Message> {
        let slot = self.messages.read().get(&message_id).cloned()?;
        let stored = slot.lock();
        Some(stored.message.clone())
    }

    /// Live depth of a queue: pending plus in-flight.
    pub fn live_depth(&self, queue_id: QueueId) -> i64 {
        self.count_in_states(queue_id, &[MessageState::Pending, MessageState::InFlight])
    }

    /// Counts a queue's messages in a given state.
    pub fn count_messages(&self, queue_id: QueueId, state: MessageState) -> i64 {
        self.count_in_states(queue_id, &[state])
    }

    fn count_in_states(&self, queue_id: QueueId, states: &[MessageState]) -> i64 {
        let ids = self.queue_index.read().get(&queue_id).cloned().unwrap_or_default();
        let messages = self.messages.read();
        ids.iter()
            .filter_map(|id| messages.get(id))
            .filter(|slot| states.contains(&slot.lock().message.state))
            .count() as i64
    }

    // --- deliveries -------------------------------------------------------

    /// Persists the delivery tasks of one publish.
    pub fn create_deliveries(&self, batch: &[Delivery]) -> Result<()> {
        let mut deliveries = self.deliveries.write();
        let mut order = self.delivery_order.write();
        for delivery in batch {
            deliveries.insert(delivery.id, delivery.clone());
            order.push(delivery.id);
        }
        Ok(())
    }

    /// Claims due deliveries, transitioning them to dispatching and
    /// attaching the message body.
    pub fn claim_due(&self, batch_size: usize, now: DateTime<Utc>) -> Result<Vec<DueDelivery>> {
        let order = self.delivery_order.read().clone();
        let mut deliveries = self.deliveries.write();

        let mut due: Vec<DeliveryId> = order
            .iter()
            .filter(|id| {
                deliveries.get(*id).is_some_and(|d| {
                    matches!(d.state, DeliveryState::Scheduled | DeliveryState::Retrying)
                        && d.next_attempt_at <= now
                })
            })
            .copied()
            .collect();
        due.sort_by_key(|id| deliveries[id].next_attempt_at);
        due.truncate(batch_size);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let Some(delivery) = deliveries.get_mut(&id) else { continue };
            let Some(body) =
                self.find_message(delivery.message_id).map(|m| m.body)
            else {
                continue;
            };
            delivery.state = DeliveryState::Dispatching;
            delivery.updated_at = now;
            claimed.push(DueDelivery { delivery: delivery.clone(), body });
        }
        Ok(claimed)
    }

    /// Marks a dispatching delivery as delivered. Missing or cancelled
    /// rows are a silent no-op.
    pub fn mark_delivered(&self, delivery_id: DeliveryId, now: DateTime<Utc>) -> Result<()> {
        if let Some(delivery) = self.deliveries.write().get_mut(&delivery_id) {
            if delivery.state == DeliveryState::Dispatching {
                delivery.state = DeliveryState::Delivered;
                delivery.updated_at = now;
            }
        }
        Ok(())
    }

    /// Reschedules a dispatching delivery for a later attempt.
    pub fn mark_retrying(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(delivery) = self.deliveries.write().get_mut(&delivery_id) {
            if delivery.state == DeliveryState::Dispatching {
                delivery.state = DeliveryState::Retrying;
                delivery.attempt = attempt;
                delivery.next_attempt_at = next_attempt_at;
                delivery.last_error = Some(error.to_string());
                delivery.updated_at = now;
            }
        }
        Ok(())
    }

    /// Marks a dispatching delivery as permanently failed.
    pub fn mark_failed(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(delivery) = self.deliveries.write().get_mut(&delivery_id) {
            if delivery.state == DeliveryState::Dispatching {
                delivery.state = DeliveryState::Failed;
                delivery.attempt = attempt;
                delivery.last_error = Some(error.to_string());
                delivery.updated_at = now;
            }
        }
        Ok(())
    }

    /// Finds a delivery by ID.
    pub fn find_delivery(&self, delivery_id: DeliveryId) -> Option<Delivery> {
        self.deliveries.read().get(&delivery_id).cloned()
    }

    /// Lists the deliveries of a message, oldest first.
    pub fn find_deliveries_by_message(&self, message_id: MessageId) -> Vec<Delivery> {
        let mut deliveries: Vec<Delivery> = self
            .deliveries
            .read()
            .values()
            .filter(|d| d.message_id == message_id)
            .cloned()
            .collect();
        deliveries.sort_by_key(|d| d.created_at);
        deliveries
    }

    /// Counts deliveries in a given state.
    pub fn count_deliveries(&self, state: DeliveryState) -> i64 {
        self.deliveries.read().values().filter(|d| d.state == state).count() as i64
    }
}
