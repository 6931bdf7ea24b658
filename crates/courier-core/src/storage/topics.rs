//! Repository for topic configuration.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Topic, TopicId},
};

/// Repository for topic database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates a new topic.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the name is already taken.
    pub async fn create(&self, topic: &Topic) -> Result<TopicId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO topics (id, name, created_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(topic.id)
        .bind(&topic.name)
        .bind(topic.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(TopicId(id))
    }

    /// Finds a topic by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, topic_id: TopicId) -> Result<Option<Topic>> {
        let topic = sqlx::query_as::<_, Topic>(
            "SELECT id, name, created_at FROM topics WHERE id = $1",
        )
        .bind(topic_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(topic)
    }

    /// Lists all topics, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list(&self) -> Result<Vec<Topic>> {
        let topics = sqlx::query_as::<_, Topic>(
            "SELECT id, name, created_at FROM topics ORDER BY created_at ASC",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(topics)
    }

    /// Deletes a topic.
    ///
    /// Subscriptions and published messages are removed by cascade, which
    /// also cancels deliveries that have not yet reached a dispatch worker.
    /// A worker already dispatching finds its row gone when it reports the
    /// result, and the result is discarded.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, topic_id: TopicId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM topics WHERE id = $1")
            .bind(topic_id)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
