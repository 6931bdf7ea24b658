//! Repository for fan-out delivery tasks.
//!
//! Delivery rows are created in bulk at publish time — one per
//! subscription active at that instant — and claimed by dispatch workers
//! with the same skip-locked idiom the queue lease uses. State updates are
//! keyed on the row still existing: a task cancelled by topic deletion
//! while its HTTP call was in flight simply has its result discarded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Delivery, DeliveryId, DeliveryState, DueDelivery, MessageId},
};

const DELIVERY_COLUMNS: &str = "id, message_id, subscription_id, url, state, attempt, \
                                next_attempt_at, last_error, created_at, updated_at";

/// Repository for delivery-task database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Persists the delivery tasks of one publish, atomically.
    ///
    /// # Errors
    ///
    /// Returns error if any insert fails; nothing is persisted in that
    /// case.
    pub async fn create_batch(&self, deliveries: &[Delivery]) -> Result<()> {
        if deliveries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for delivery in deliveries {
            sqlx::query(
                r#"
                INSERT INTO deliveries (
                    id, message_id, subscription_id, url, state, attempt,
                    next_attempt_at, last_error, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(delivery.id)
            .bind(delivery.message_id)
            .bind(delivery.subscription_id)
            .bind(&delivery.url)
            .bind(delivery.state)
            .bind(delivery.attempt)
            .bind(delivery.next_attempt_at)
            .bind(&delivery.last_error)
            .bind(delivery.created_at)
            .bind(delivery.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Claims due delivery tasks for dispatch.
    ///
    /// Selects up to `batch_size` tasks that are scheduled or retrying with
    /// `next_attempt_at <= now`, transitions them to `dispatching`, and
    /// joins in the message body so workers need no second round trip.
    /// `FOR UPDATE SKIP LOCKED` lets concurrent workers claim disjoint
    /// batches without blocking each other.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueDelivery>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<DeliveryId> = sqlx::query_scalar(
            r#"
            SELECT id FROM deliveries
            WHERE state IN ('scheduled', 'retrying')
              AND next_attempt_at <= $1
            ORDER BY next_attempt_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let rows: Vec<(sqlx::types::Json<serde_json::Value>, Delivery)> = {
            use sqlx::Row;

            let raw = sqlx::query(
                r#"
                UPDATE deliveries d
                SET state = 'dispatching', updated_at = $2
                FROM messages m
                WHERE d.id = ANY($1) AND m.id = d.message_id
                RETURNING m.body AS message_body,
                          d.id, d.message_id, d.subscription_id, d.url, d.state,
                          d.attempt, d.next_attempt_at, d.last_error,
                          d.created_at, d.updated_at
                "#,
            )
            .bind(&ids)
            .bind(now)
            .fetch_all(&mut *tx)
            .await?;

            let mut rows = Vec::with_capacity(raw.len());
            for row in raw {
                let body: sqlx::types::Json<serde_json::Value> = row.try_get("message_body")?;
                let delivery = sqlx::FromRow::from_row(&row)?;
                rows.push((body, delivery));
            }
            rows
        };

        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|(body, delivery)| DueDelivery { delivery, body: body.0 })
            .collect())
    }

    /// Marks a delivery as successfully completed.
    ///
    /// A zero-row update means the task was cancelled while dispatching;
    /// the result is silently discarded.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_delivered(&self, delivery_id: DeliveryId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET state = 'delivered', updated_at = $2
            WHERE id = $1 AND state = 'dispatching'
            "#,
        )
        .bind(delivery_id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Reschedules a failed delivery for a later attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_retrying(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET state = 'retrying', attempt = $2, next_attempt_at = $3,
                last_error = $4, updated_at = $5
            WHERE id = $1 AND state = 'dispatching'
            "#,
        )
        .bind(delivery_id)
        .bind(attempt)
        .bind(next_attempt_at)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks a delivery as permanently failed after the retry ceiling.
    ///
    /// Terminal state; the failure is reported through logs and metrics,
    /// never to the publisher.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        delivery_id: DeliveryId,
        attempt: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET state = 'failed', attempt = $2, last_error = $3, updated_at = $4
            WHERE id = $1 AND state = 'dispatching'
            "#,
        )
        .bind(delivery_id)
        .bind(attempt)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds a delivery by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, delivery_id: DeliveryId) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = $1",
        ))
        .bind(delivery_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(delivery)
    }

    /// Lists the deliveries of a message, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_message(&self, message_id: MessageId) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            r#"
            SELECT {DELIVERY_COLUMNS} FROM deliveries
            WHERE message_id = $1
            ORDER BY created_at ASC
            "#,
        ))
        .bind(message_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Counts deliveries in a given state.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_state(&self, state: DeliveryState) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deliveries WHERE state = $1")
                .bind(state)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}
