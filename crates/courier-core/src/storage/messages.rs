//! Repository for message records and the lease/ack state machine.
//!
//! The lease grant and the acknowledgement are the two compare-and-swap
//! operations the whole broker contract rests on. Both are implemented as
//! conditional row updates so that concurrent receivers racing for the same
//! message serialize on that one row and nothing else: `FOR UPDATE SKIP
//! LOCKED` hands each worker a different candidate, and an ack succeeds
//! only while the presented token is still the message's current token.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{AckToken, Message, MessageId, MessageState, Queue, QueueId, QueueUseCase},
};

const MESSAGE_COLUMNS: &str = "id, queue_id, topic_id, subscriber_snapshot, body, state, \
                               attempt, visible_at, ack_token, created_at";

/// Repository for message database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Persists a new message.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or constraints are violated.
    pub async fn create(&self, message: &Message) -> Result<MessageId> {
        let subscriber_snapshot = match &message.destination {
            crate::models::Destination::Queued { .. } => None,
            crate::models::Destination::Published { subscribers, .. } => {
                Some(sqlx::types::Json(subscribers.clone()))
            },
        };

        let id = sqlx::query_scalar(
            r#"
            INSERT INTO messages (
                id, queue_id, topic_id, subscriber_snapshot, body, state,
                attempt, visible_at, ack_token, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(message.id)
        .bind(message.destination.queue_id())
        .bind(message.destination.topic_id())
        .bind(subscriber_snapshot)
        .bind(sqlx::types::Json(message.body.clone()))
        .bind(message.state)
        .bind(message.attempt)
        .bind(message.visible_at)
        .bind(message.ack_token)
        .bind(message.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(MessageId(id))
    }

    /// Grants a lease on the next eligible message of a queue.
    ///
    /// Selects the oldest message (by `created_at`, insertion order breaking
    /// ties) that is pending or expired in-flight with `visible_at <= now`.
    /// The selected message has its attempt counter incremented exactly
    /// once; a message that would exceed the queue's `max_attempts` is
    /// dead-lettered instead and selection continues with the next
    /// candidate. On success the message is in-flight with a freshly minted
    /// ack token (invalidating any prior token) and a lease expiring at
    /// `now + visibility_timeout`.
    ///
    /// For `fifo` queues only the head of the queue is considered; a
    /// leased, unexpired head yields an empty result.
    ///
    /// Returns `None` when no message is eligible. That is a normal empty
    /// receive, not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn lease_next(&self, queue: &Queue, now: DateTime<Utc>) -> Result<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        loop {
            // Candidate selection. SKIP LOCKED keeps concurrent receivers
            // from serializing on the same row: each sees the next
            // unclaimed candidate or nothing.
            let candidate: Option<(MessageId, i32, DateTime<Utc>)> = match queue.use_case {
                QueueUseCase::GeneralPurpose => {
                    sqlx::query_as(
                        r#"
                        SELECT id, attempt, visible_at FROM messages
                        WHERE queue_id = $1
                          AND state IN ('pending', 'in_flight')
                          AND visible_at <= $2
                        ORDER BY created_at ASC, seq ASC
                        LIMIT 1
                        FOR UPDATE SKIP LOCKED
                        "#,
                    )
                    .bind(queue.id)
                    .bind(now)
                    .fetch_optional(&mut *tx)
                    .await?
                },
                // Strict ordering considers the head regardless of
                // eligibility; an ineligible head blocks the queue. Plain
                // FOR UPDATE here: skipping a locked head would hand out
                // the second message out of order.
                QueueUseCase::Fifo => {
                    sqlx::query_as(
                        r#"
                        SELECT id, attempt, visible_at FROM messages
                        WHERE queue_id = $1
                          AND state IN ('pending', 'in_flight')
                        ORDER BY created_at ASC, seq ASC
                        LIMIT 1
                        FOR UPDATE
                        "#,
                    )
                    .bind(queue.id)
                    .fetch_optional(&mut *tx)
                    .await?
                },
            };

            let Some((message_id, attempt, visible_at)) = candidate else {
                tx.commit().await?;
                return Ok(None);
            };

            if queue.use_case == QueueUseCase::Fifo && visible_at > now {
                // Head is leased and unexpired (or delayed): blocked.
                tx.commit().await?;
                return Ok(None);
            }

            if attempt + 1 > queue.max_attempts {
                sqlx::query(
                    r#"
                    UPDATE messages
                    SET state = 'dead', ack_token = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(message_id)
                .execute(&mut *tx)
                .await?;

                tracing::warn!(
                    message_id = %message_id,
                    queue_id = %queue.id,
                    attempts = attempt,
                    "message exhausted delivery attempts, dead-lettered"
                );
                continue;
            }

            let token = AckToken::mint();
            let lease_expires = now + queue.visibility_timeout();

            let message = sqlx::query_as::<_, Message>(&format!(
                r#"
                UPDATE messages
                SET state = 'in_flight',
                    attempt = attempt + 1,
                    ack_token = $1,
                    visible_at = $2
                WHERE id = $3
                RETURNING {MESSAGE_COLUMNS}
                "#,
            ))
            .bind(token)
            .bind(lease_expires)
            .bind(message_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(Some(message));
        }
    }

    /// Acknowledges a message by its current lease token.
    ///
    /// The update is conditional on the presented token still being the
    /// message's current token. Returns `false` when no row matched —
    /// the token was already consumed, superseded by a re-grant, or never
    /// existed. The caller maps that to `InvalidAckToken`; message state is
    /// untouched either way, so repeated acks are harmless.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn ack(&self, token: AckToken) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET state = 'acked', ack_token = NULL
            WHERE ack_token = $1 AND state = 'in_flight'
            "#,
        )
        .bind(token)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns long-expired in-flight messages to pending.
    ///
    /// Lease expiry is detected lazily at receive time, so this sweep is
    /// not required for correctness. It exists for observability: state
    /// counts reflect reality without waiting for the next receive. The
    /// attempt counter is not touched — it increments on lease grants only.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET state = 'pending', ack_token = NULL
            WHERE state = 'in_flight' AND visible_at <= $1
            "#,
        )
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Finds a message by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, message_id: MessageId) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1",
        ))
        .bind(message_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(message)
    }

    /// Live depth of a queue: messages pending or in-flight.
    ///
    /// Terminal messages awaiting garbage collection do not count against
    /// a configured depth bound.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn live_depth(&self, queue_id: QueueId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE queue_id = $1 AND state IN ('pending', 'in_flight')
            "#,
        )
        .bind(queue_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }

    /// Counts a queue's messages in a given state.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_state(&self, queue_id: QueueId, state: MessageState) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE queue_id = $1 AND state = $2",
        )
        .bind(queue_id)
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
