//! Storage abstraction layer for the dispatch engine.
//!
//! Workers claim due delivery tasks and report results through this seam.
//! Both implementations share one property the cancellation contract
//! relies on: reporting a result for a row that no longer exists (or left
//! the dispatching state) is a silent no-op, so work cancelled mid-flight
//! is simply discarded.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use courier_core::{
    error::Result,
    models::{Delivery, DeliveryId, DeliveryState, DueDelivery},
    storage::{memory::MemoryStorage, Storage},
};

/// Storage operations required by the dispatch engine.
pub trait DeliveryStorage: Send + Sync + 'static {
    /// Claims up to `batch_size` due delivery tasks, transitioning them to
    /// dispatching. Concurrent workers claim disjoint batches.
    fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DueDelivery>>> + Send + '_>>;

    /// Marks a dispatching task as delivered (terminal).
    fn mark_delivered(
        &self,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Reschedules a dispatching task for a later attempt.
    fn mark_retrying(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks a dispatching task as permanently failed (terminal).
    fn mark_failed(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finds a delivery task by ID.
    fn find_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>>;

    /// Counts delivery tasks in a given state.
    fn count_by_state(
        &self,
        state: DeliveryState,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>>;
}

/// Production storage implementation using PostgreSQL.
pub struct PostgresDeliveryStorage {
    storage: Arc<Storage>,
}

impl PostgresDeliveryStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl DeliveryStorage for PostgresDeliveryStorage {
    fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DueDelivery>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.claim_due(batch_size, now).await })
    }

    fn mark_delivered(
        &self,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.mark_delivered(delivery_id, now).await })
    }

    fn mark_retrying(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .deliveries
                .mark_retrying(delivery_id, attempt, next_attempt_at, &error, now)
                .await
        })
    }

    fn mark_failed(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.deliveries.mark_failed(delivery_id, attempt, &error, now).await
        })
    }

    fn find_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.find_by_id(delivery_id).await })
    }

    fn count_by_state(
        &self,
        state: DeliveryState,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.count_by_state(state).await })
    }
}

/// Embedded storage implementation over the in-memory backend.
///
/// Shares its [`MemoryStorage`] with the broker's adapter so publishes and
/// their dispatch lifecycles operate on the same state.
pub struct MemoryDeliveryStorage {
    storage: Arc<MemoryStorage>,
}

impl MemoryDeliveryStorage {
    /// Creates a new memory storage adapter.
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self { storage }
    }
}

impl DeliveryStorage for MemoryDeliveryStorage {
    fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DueDelivery>>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.claim_due(batch_size, now)))
    }

    fn mark_delivered(
        &self,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.mark_delivered(delivery_id, now)))
    }

    fn mark_retrying(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.mark_retrying(
            delivery_id,
            attempt,
            next_attempt_at,
            &error,
            now,
        )))
    }

    fn mark_failed(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(std::future::ready(self.storage.mark_failed(delivery_id, attempt, &error, now)))
    }

    fn find_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.find_delivery(delivery_id))))
    }

    fn count_by_state(
        &self,
        state: DeliveryState,
    ) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(self.storage.count_deliveries(state))))
    }
}
