//! Dispatch engine for webhook fan-out.
//!
//! A pool of async workers claims due delivery tasks from storage and
//! pushes payloads to subscriber endpoints. Each worker handles the
//! complete lifecycle of the tasks it claims:
//!
//! 1. **Claim** — due tasks transition to dispatching
//! 2. **Dispatch** — HTTP POST with the bounded configured timeout
//! 3. **Classify** — 2xx is delivered; anything else is a failure
//! 4. **Reschedule** — capped exponential backoff until the retry ceiling,
//!    then terminal failure reported via log and counter only
//!
//! Per-task independence is structural: one slow or failing endpoint only
//! occupies the single worker slot its task is claimed by, and never
//! delays tasks for other subscriptions. Permanent failures are never
//! surfaced to the publisher — publish returned long ago.

use std::{sync::Arc, time::Duration};

use courier_core::{models::DueDelivery, Clock};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DispatchClient, DispatchRequest},
    error::{DeliveryError, Result},
    retry::{RetryContext, RetryDecision, RetryPolicy},
    storage::DeliveryStorage,
    worker_pool::WorkerPool,
};

/// Configuration for the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of concurrent dispatch workers.
    pub worker_count: usize,

    /// Maximum tasks to claim per worker batch.
    pub batch_size: usize,

    /// How often idle workers poll for due tasks.
    pub poll_interval: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Retry policy applied to every delivery task.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers during graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for dispatch engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Number of active dispatch workers.
    pub active_workers: usize,
    /// Delivery tasks processed since startup.
    pub tasks_processed: u64,
    /// Successful deliveries.
    pub delivered: u64,
    /// Failed attempts that were rescheduled.
    pub retries_scheduled: u64,
    /// Tasks that reached the terminal failed state.
    pub permanent_failures: u64,
    /// Tasks currently being dispatched.
    pub in_flight: u64,
}

/// Dispatch engine coordinating webhook delivery workers.
pub struct Dispatcher {
    storage: Arc<dyn DeliveryStorage>,
    config: DispatchConfig,
    client: Arc<DispatchClient>,
    stats: Arc<RwLock<DispatchStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a dispatch engine over the given storage and clock.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be initialized.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Arc::new(DispatchClient::new(config.client_config.clone())?);

        Ok(Self {
            storage,
            config,
            client,
            stats: Arc::new(RwLock::new(DispatchStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
        })
    }

    /// Starts the configured worker pool.
    ///
    /// Returns immediately after spawning workers. Use `shutdown` to stop
    /// gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the worker pool fails to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting dispatch engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.storage.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        worker_pool.spawn_workers().await?;
        self.worker_pool = Some(worker_pool);

        info!("dispatch engine started");
        Ok(())
    }

    /// Gracefully shuts down the dispatch engine.
    ///
    /// Signals all workers to stop claiming and waits for in-flight
    /// dispatches to complete within the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers do not finish in time.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down dispatch engine");

        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        } else {
            info!("dispatch engine was never started, nothing to stop");
        }
        Ok(())
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> DispatchStats {
        self.stats.read().await.clone()
    }

    /// Claims and processes exactly one batch of due tasks synchronously.
    ///
    /// Deterministic alternative to `start` for tests and controlled batch
    /// processing: no background workers, returns when the batch is done.
    ///
    /// # Errors
    ///
    /// Returns error if claiming fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let worker = DispatchWorker::new(
            0,
            self.storage.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        worker.process_batch().await
    }
}

/// Individual worker that executes webhook dispatches.
pub struct DispatchWorker {
    id: usize,
    storage: Arc<dyn DeliveryStorage>,
    config: DispatchConfig,
    client: Arc<DispatchClient>,
    stats: Arc<RwLock<DispatchStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DispatchWorker {
    /// Creates a new dispatch worker.
    pub fn new(
        id: usize,
        storage: Arc<dyn DeliveryStorage>,
        config: DispatchConfig,
        client: Arc<DispatchClient>,
        stats: Arc<RwLock<DispatchStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, storage, config, client, stats, cancellation_token, clock }
    }

    /// Main worker loop: claims and processes tasks until cancelled.
    ///
    /// # Errors
    ///
    /// Batch errors are logged and retried; this returns `Ok` on
    /// cancellation.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "dispatch worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "dispatch worker received shutdown signal");
                break;
            }

            match self.process_batch().await {
                Ok(processed) => {
                    if processed == 0 {
                        tokio::select! {
                            () = self.clock.sleep(self.config.poll_interval) => {},
                            () = self.cancellation_token.cancelled() => break,
                        }
                    }
                },
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        error = %error,
                        "worker batch processing failed"
                    );
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "dispatch worker stopped");
        Ok(())
    }

    /// Claims and processes one batch of due delivery tasks.
    ///
    /// # Errors
    ///
    /// Returns error if claiming fails. Individual dispatch failures are
    /// absorbed into the retry schedule.
    pub async fn process_batch(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let due = self
            .storage
            .claim_due(self.config.batch_size, now)
            .await
            .map_err(|e| DeliveryError::storage(format!("failed to claim due deliveries: {e}")))?;
        let batch_size = due.len();

        debug!(worker_id = self.id, batch_size, "processing delivery batch");

        for task in due {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            self.dispatch_task(task).await;
        }

        Ok(batch_size)
    }

    /// Executes one delivery task end to end.
    ///
    /// Every outcome lands in storage; nothing propagates to the caller.
    async fn dispatch_task(&self, task: DueDelivery) {
        let delivery = task.delivery;
        let attempt = u32::try_from(delivery.attempt).unwrap_or(u32::MAX).saturating_add(1);

        {
            let mut stats = self.stats.write().await;
            stats.in_flight += 1;
        }

        let request = DispatchRequest {
            delivery_id: delivery.id,
            message_id: delivery.message_id,
            subscription_id: delivery.subscription_id,
            url: delivery.url.clone(),
            body: task.body,
            attempt,
        };

        let outcome = self.client.dispatch(request).await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight -= 1;
            stats.tasks_processed += 1;
        }

        match outcome {
            Ok(response) if response.is_success => {
                let now = self.clock.now_utc();
                if let Err(error) = self.storage.mark_delivered(delivery.id, now).await {
                    warn!(
                        worker_id = self.id,
                        delivery_id = %delivery.id,
                        error = %error,
                        "failed to record delivered state"
                    );
                }

                {
                    let mut stats = self.stats.write().await;
                    stats.delivered += 1;
                }

                info!(
                    worker_id = self.id,
                    delivery_id = %delivery.id,
                    message_id = %delivery.message_id,
                    status_code = response.status_code,
                    duration_ms = response.duration.as_millis(),
                    attempt,
                    "webhook delivered"
                );
            },
            Ok(response) => {
                // The endpoint answered, but not with 2xx. Rate limits keep
                // their Retry-After guidance; other statuses classify by
                // class.
                let error = match response.status_code {
                    429 => DeliveryError::rate_limited(
                        crate::client::extract_retry_after_seconds(&response.headers)
                            .unwrap_or(60),
                    ),
                    400..=499 => {
                        DeliveryError::client_error(response.status_code, response.body.clone())
                    },
                    _ => DeliveryError::server_error(response.status_code, response.body.clone()),
                };
                self.handle_failure(&delivery, attempt, error).await;
            },
            Err(error) => {
                self.handle_failure(&delivery, attempt, error).await;
            },
        }
    }

    /// Applies the retry policy to a failed attempt.
    async fn handle_failure(
        &self,
        delivery: &courier_core::models::Delivery,
        attempt: u32,
        error: DeliveryError,
    ) {
        let now = self.clock.now_utc();
        let attempt_i32 = i32::try_from(attempt).unwrap_or(i32::MAX);
        let context =
            RetryContext::new(attempt, error.clone(), now, self.config.retry_policy.clone());

        match context.decide() {
            RetryDecision::Retry { next_attempt_at } => {
                if let Err(storage_error) = self
                    .storage
                    .mark_retrying(
                        delivery.id,
                        attempt_i32,
                        next_attempt_at,
                        error.to_string(),
                        now,
                    )
                    .await
                {
                    warn!(
                        worker_id = self.id,
                        delivery_id = %delivery.id,
                        error = %storage_error,
                        "failed to record retry schedule"
                    );
                }

                {
                    let mut stats = self.stats.write().await;
                    stats.retries_scheduled += 1;
                }

                warn!(
                    worker_id = self.id,
                    delivery_id = %delivery.id,
                    message_id = %delivery.message_id,
                    attempt,
                    next_attempt_at = %next_attempt_at,
                    error = %error,
                    "dispatch failed, retry scheduled"
                );
            },
            RetryDecision::GiveUp { reason } => {
                if let Err(storage_error) = self
                    .storage
                    .mark_failed(delivery.id, attempt_i32, error.to_string(), now)
                    .await
                {
                    warn!(
                        worker_id = self.id,
                        delivery_id = %delivery.id,
                        error = %storage_error,
                        "failed to record terminal failure"
                    );
                }

                {
                    let mut stats = self.stats.write().await;
                    stats.permanent_failures += 1;
                }

                error!(
                    worker_id = self.id,
                    delivery_id = %delivery.id,
                    message_id = %delivery.message_id,
                    subscription_id = %delivery.subscription_id,
                    attempt,
                    reason = %reason,
                    error = %error,
                    "delivery permanently failed"
                );
            },
        }
    }
}
