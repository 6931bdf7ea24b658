//! Repository for queue configuration.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Queue, QueueId},
};

/// Repository for queue database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates a new queue.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the name is already taken.
    pub async fn create(&self, queue: &Queue) -> Result<QueueId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO queues (
                id, name, use_case, visibility_timeout_seconds, max_attempts,
                max_depth, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(queue.id)
        .bind(&queue.name)
        .bind(queue.use_case)
        .bind(queue.visibility_timeout_seconds)
        .bind(queue.max_attempts)
        .bind(queue.max_depth)
        .bind(queue.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(QueueId(id))
    }

    /// Finds a queue by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, queue_id: QueueId) -> Result<Option<Queue>> {
        let queue = sqlx::query_as::<_, Queue>(
            r#"
            SELECT id, name, use_case, visibility_timeout_seconds, max_attempts,
                   max_depth, created_at
            FROM queues
            WHERE id = $1
            "#,
        )
        .bind(queue_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(queue)
    }

    /// Lists all queues, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list(&self) -> Result<Vec<Queue>> {
        let queues = sqlx::query_as::<_, Queue>(
            r#"
            SELECT id, name, use_case, visibility_timeout_seconds, max_attempts,
                   max_depth, created_at
            FROM queues
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(queues)
    }

    /// Deletes a queue. Owned messages are purged by cascade.
    ///
    /// Returns whether a row was removed, so the caller can distinguish a
    /// successful delete from an unknown ID.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, queue_id: QueueId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queues WHERE id = $1")
            .bind(queue_id)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
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
