//! Point-to-point queue engine.
//!
//! Owns the producer/consumer contract: enqueue with optional delay,
//! visibility-timeout leasing, acknowledgement by single-use token,
//! redelivery of expired leases, and dead-lettering after the per-queue
//! attempt ceiling. The atomicity of each transition lives in the storage
//! layer; the engine validates input, applies queue policy, and reports.

use std::{sync::Arc, time::Duration};

use courier_core::{
    error::{CoreError, Result},
    models::{AckToken, Message, MessageId, Queue, QueueId, QueueUseCase},
    Clock,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::BrokerStorage;

/// Parameters for queue creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQueue {
    /// Queue name, unique within the account.
    pub name: String,
    /// Selection-order hint.
    #[serde(default)]
    pub use_case: QueueUseCase,
    /// Lease duration granted by `receive`, in seconds.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: i32,
    /// Lease grants permitted before dead-lettering.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Optional bound on live depth.
    #[serde(default)]
    pub max_depth: Option<i32>,
}

fn default_visibility_timeout() -> i32 {
    crate::DEFAULT_VISIBILITY_TIMEOUT_SECONDS
}

fn default_max_attempts() -> i32 {
    crate::DEFAULT_MAX_ATTEMPTS
}

impl CreateQueue {
    /// Creates parameters with default policy for the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            use_case: QueueUseCase::GeneralPurpose,
            visibility_timeout_seconds: crate::DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            max_depth: None,
        }
    }
}

/// Queue engine coordinating sends, leases, and acknowledgements.
///
/// Cheap to clone pieces: the engine holds its storage and clock behind
/// `Arc` and is itself usually shared behind one.
pub struct QueueEngine {
    storage: Arc<dyn BrokerStorage>,
    clock: Arc<dyn Clock>,
}

impl QueueEngine {
    /// Creates a queue engine over the given storage and clock.
    pub fn new(storage: Arc<dyn BrokerStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Creates a new queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty name or non-positive policy
    /// values, `ConstraintViolation` for a duplicate name.
    pub async fn create_queue(&self, params: CreateQueue) -> Result<Queue> {
        if params.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("queue name must not be empty".to_string()));
        }
        if params.visibility_timeout_seconds <= 0 {
            return Err(CoreError::InvalidInput(
                "visibility_timeout_seconds must be positive".to_string(),
            ));
        }
        if params.max_attempts <= 0 {
            return Err(CoreError::InvalidInput("max_attempts must be positive".to_string()));
        }
        if params.max_depth.is_some_and(|d| d <= 0) {
            return Err(CoreError::InvalidInput("max_depth must be positive".to_string()));
        }

        let queue = Queue {
            id: QueueId::new(),
            name: params.name,
            use_case: params.use_case,
            visibility_timeout_seconds: params.visibility_timeout_seconds,
            max_attempts: params.max_attempts,
            max_depth: params.max_depth,
            created_at: self.clock.now_utc(),
        };

        self.storage.create_queue(queue.clone()).await?;

        info!(
            queue_id = %queue.id,
            name = %queue.name,
            use_case = %queue.use_case,
            visibility_timeout_seconds = queue.visibility_timeout_seconds,
            "queue created"
        );

        Ok(queue)
    }

    /// Fetches a queue by ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub async fn queue(&self, queue_id: QueueId) -> Result<Queue> {
        self.storage
            .find_queue(queue_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("queue {queue_id}")))
    }

    /// Lists all queues.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub async fn list_queues(&self) -> Result<Vec<Queue>> {
        self.storage.list_queues().await
    }

    /// Deletes a queue and purges every message it owns.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub async fn delete_queue(&self, queue_id: QueueId) -> Result<()> {
        if self.storage.delete_queue(queue_id).await? {
            info!(queue_id = %queue_id, "queue deleted, owned messages purged");
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("queue {queue_id}")))
        }
    }

    /// Enqueues a message.
    ///
    /// The message becomes observable to `receive` once `delay_seconds`
    /// have elapsed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown queue and `CapacityExceeded` when
    /// a configured depth bound is reached. The depth check runs before the
    /// insert; concurrent senders can transiently overshoot the bound by
    /// the number of in-flight sends.
    pub async fn send(
        &self,
        queue_id: QueueId,
        body: serde_json::Value,
        delay_seconds: u32,
    ) -> Result<MessageId> {
        let queue = self.queue(queue_id).await?;

        if let Some(max_depth) = queue.max_depth {
            let depth = self.storage.live_depth(queue_id).await?;
            if depth >= i64::from(max_depth) {
                warn!(queue_id = %queue_id, depth, max_depth, "send rejected, queue at capacity");
                return Err(CoreError::CapacityExceeded { queue_id, max_depth });
            }
        }

        let now = self.clock.now_utc();
        let visible_at = now + chrono::Duration::seconds(i64::from(delay_seconds));
        let message = Message::queued(queue_id, body, visible_at, now);
        let message_id = self.storage.create_message(message).await?;

        debug!(
            queue_id = %queue_id,
            message_id = %message_id,
            delay_seconds,
            "message enqueued"
        );

        Ok(message_id)
    }

    /// Receives the next eligible message under a fresh lease.
    ///
    /// Returns `None` when nothing is eligible — a normal empty receive,
    /// not a failure. The returned message carries the ack token of the
    /// granted lease; the lease expires `visibility_timeout_seconds` after
    /// this call, at which point the message becomes redeliverable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown queue.
    pub async fn receive(
        &self,
        queue_id: QueueId,
        consumer_id: Option<&str>,
    ) -> Result<Option<Message>> {
        let queue = self.queue(queue_id).await?;
        let now = self.clock.now_utc();

        let leased = self.storage.lease_next(queue, now).await?;

        if let Some(message) = &leased {
            debug!(
                queue_id = %queue_id,
                message_id = %message.id,
                attempt = message.attempt,
                consumer_id = consumer_id.unwrap_or("-"),
                lease_expires_at = %message.visible_at,
                "lease granted"
            );
        }

        Ok(leased)
    }

    /// Acknowledges a message by the token of its current lease.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAckToken` when the token matches no active lease:
    /// the message was already acked, the lease expired and was re-granted,
    /// or the token never existed. Safe to call repeatedly.
    pub async fn ack(&self, token: AckToken) -> Result<()> {
        if self.storage.ack(token).await? {
            debug!(ack_token = %token, "message acknowledged");
            Ok(())
        } else {
            Err(CoreError::InvalidAckToken)
        }
    }

    /// Proactively returns long-expired leases to pending.
    ///
    /// Not required for correctness — expiry is evaluated at receive time —
    /// but keeps state counts honest between receives.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub async fn reap_expired(&self) -> Result<u64> {
        let reaped = self.storage.reap_expired(self.clock.now_utc()).await?;
        if reaped > 0 {
            info!(reaped, "expired leases returned to pending");
        }
        Ok(reaped)
    }

    /// Spawns the optional background reaper.
    ///
    /// Runs [`QueueEngine::reap_expired`] every `interval` until the
    /// returned token is cancelled. Storage errors are logged and the loop
    /// continues.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let engine = self.clone();
        let reaper_token = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = engine.clock.sleep(interval) => {},
                    () = reaper_token.cancelled() => break,
                }
                if let Err(error) = engine.reap_expired().await {
                    warn!(error = %error, "reaper sweep failed");
                }
            }
            debug!("reaper stopped");
        });

        token
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{storage::memory::MemoryStorage, MessageState, TestClock};

    use super::*;
    use crate::storage::MemoryBrokerStorage;

    fn engine() -> (QueueEngine, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        let storage = Arc::new(MemoryBrokerStorage::new(Arc::new(MemoryStorage::new())));
        (QueueEngine::new(storage, clock.clone()), clock)
    }

    #[tokio::test]
    async fn lease_expiry_invalidates_previous_token() {
        let (engine, clock) = engine();
        let queue = engine
            .create_queue(CreateQueue {
                visibility_timeout_seconds: 5,
                max_attempts: 3,
                ..CreateQueue::new("orders")
            })
            .await
            .unwrap();

        engine.send(queue.id, serde_json::json!("a"), 0).await.unwrap();

        let first = engine.receive(queue.id, None).await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        let stale = first.ack_token.unwrap();

        clock.advance(Duration::from_secs(6));

        let second = engine.receive(queue.id, None).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        let current = second.ack_token.unwrap();

        assert!(matches!(engine.ack(stale).await, Err(CoreError::InvalidAckToken)));
        engine.ack(current).await.unwrap();
        assert!(engine.receive(queue.id, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_message_invisible_until_due() {
        let (engine, clock) = engine();
        let queue = engine.create_queue(CreateQueue::new("delayed")).await.unwrap();

        engine.send(queue.id, serde_json::json!("b"), 10).await.unwrap();
        assert!(engine.receive(queue.id, None).await.unwrap().is_none());

        clock.advance(Duration::from_secs(10));
        assert!(engine.receive(queue.id, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn capacity_bound_rejects_send() {
        let (engine, _clock) = engine();
        let queue = engine
            .create_queue(CreateQueue { max_depth: Some(2), ..CreateQueue::new("bounded") })
            .await
            .unwrap();

        engine.send(queue.id, serde_json::json!(1), 0).await.unwrap();
        engine.send(queue.id, serde_json::json!(2), 0).await.unwrap();

        let err = engine.send(queue.id, serde_json::json!(3), 0).await.unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { max_depth: 2, .. }));
    }

    #[tokio::test]
    async fn ack_frees_capacity() {
        let (engine, _clock) = engine();
        let queue = engine
            .create_queue(CreateQueue { max_depth: Some(1), ..CreateQueue::new("tight") })
            .await
            .unwrap();

        engine.send(queue.id, serde_json::json!(1), 0).await.unwrap();
        let message = engine.receive(queue.id, None).await.unwrap().unwrap();
        engine.ack(message.ack_token.unwrap()).await.unwrap();

        engine.send(queue.id, serde_json::json!(2), 0).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_queue_is_not_found() {
        let (engine, _clock) = engine();
        let missing = QueueId::new();

        assert!(matches!(
            engine.send(missing, serde_json::json!(1), 0).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(engine.receive(missing, None).await, Err(CoreError::NotFound(_))));
        assert!(matches!(engine.delete_queue(missing).await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_queue_name_rejected() {
        let (engine, _clock) = engine();
        engine.create_queue(CreateQueue::new("dup")).await.unwrap();

        assert!(matches!(
            engine.create_queue(CreateQueue::new("dup")).await,
            Err(CoreError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn invalid_policy_rejected() {
        let (engine, _clock) = engine();

        assert!(matches!(
            engine.create_queue(CreateQueue::new("")).await,
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            engine
                .create_queue(CreateQueue {
                    visibility_timeout_seconds: 0,
                    ..CreateQueue::new("bad")
                })
                .await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_message_is_dead_and_gone() {
        let (engine, clock) = engine();
        let queue = engine
            .create_queue(CreateQueue {
                visibility_timeout_seconds: 1,
                max_attempts: 3,
                ..CreateQueue::new("poison")
            })
            .await
            .unwrap();

        engine.send(queue.id, serde_json::json!("p"), 0).await.unwrap();

        for attempt in 1..=3 {
            let message = engine.receive(queue.id, None).await.unwrap().unwrap();
            assert_eq!(message.attempt, attempt);
            clock.advance(Duration::from_secs(2));
        }

        assert!(engine.receive(queue.id, None).await.unwrap().is_none());
        clock.advance(Duration::from_secs(3600));
        assert!(engine.receive(queue.id, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reaper_returns_expired_leases() {
        let clock = Arc::new(TestClock::new());
        let storage = Arc::new(MemoryStorage::new());
        let engine = QueueEngine::new(
            Arc::new(MemoryBrokerStorage::new(storage.clone())),
            clock.clone(),
        );
        let queue = engine
            .create_queue(CreateQueue {
                visibility_timeout_seconds: 5,
                ..CreateQueue::new("reaped")
            })
            .await
            .unwrap();

        engine.send(queue.id, serde_json::json!("r"), 0).await.unwrap();
        engine.receive(queue.id, None).await.unwrap().unwrap();

        assert_eq!(engine.reap_expired().await.unwrap(), 0);
        clock.advance(Duration::from_secs(6));
        assert_eq!(engine.reap_expired().await.unwrap(), 1);
        assert_eq!(storage.count_messages(queue.id, MessageState::Pending), 1);
    }
}
