//! Repository for the subscription registry.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Subscription, SubscriptionId, TopicId},
};

/// Repository for subscription database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates a new subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, subscription: &Subscription) -> Result<SubscriptionId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO subscriptions (id, topic_id, name, webhook_url, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.topic_id)
        .bind(&subscription.name)
        .bind(&subscription.webhook_url)
        .bind(subscription.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(SubscriptionId(id))
    }

    /// Lists the subscriptions of a topic, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_by_topic(&self, topic_id: TopicId) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, topic_id, name, webhook_url, created_at
            FROM subscriptions
            WHERE topic_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(topic_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Deletes a subscription scoped to its owning topic.
    ///
    /// Stops future fan-out only. Deliveries created at publish time are
    /// intentionally left alone: they belong to the snapshot of the
    /// messages already published.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(
        &self,
        topic_id: TopicId,
        subscription_id: SubscriptionId,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1 AND topic_id = $2")
            .bind(subscription_id)
            .bind(topic_id)
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
