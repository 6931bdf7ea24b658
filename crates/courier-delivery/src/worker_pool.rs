//! Worker pool management with structured concurrency.
//!
//! Provides lifecycle management and graceful shutdown for supervised
//! dispatch worker tasks. The pool bounds outbound concurrency: a burst of
//! publishes queues delivery tasks in storage instead of opening an
//! unbounded number of connections.

use std::{sync::Arc, time::Duration};

use courier_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::DispatchClient,
    error::{DeliveryError, Result},
    storage::DeliveryStorage,
    worker::{DispatchConfig, DispatchStats, DispatchWorker},
};

/// Supervised pool of dispatch workers.
pub struct WorkerPool {
    storage: Arc<dyn DeliveryStorage>,
    config: DispatchConfig,
    client: Arc<DispatchClient>,
    stats: Arc<RwLock<DispatchStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Creates a new worker pool with the given configuration.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        config: DispatchConfig,
        client: Arc<DispatchClient>,
        stats: Arc<RwLock<DispatchStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            config,
            client,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
            clock,
        }
    }

    /// Spawns all configured workers and begins processing.
    ///
    /// Workers run until cancellation is requested. Returns immediately
    /// after spawning.
    ///
    /// # Errors
    ///
    /// Currently never fails; the signature allows future validation.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        info!(worker_count = self.config.worker_count, "spawning dispatch workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = DispatchWorker::new(
                worker_id,
                self.storage.clone(),
                self.config.clone(),
                self.client.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "dispatch worker terminated with error");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        info!(spawned_workers = self.worker_handles.len(), "all dispatch workers spawned");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Signals cancellation and waits for in-flight dispatches to finish
    /// within the timeout.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` when the timeout is exceeded, or
    /// `WorkerPanic` if a worker task panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let shutdown_future = async {
            let mut first_panic: Option<DeliveryError> = None;

            for (worker_id, handle) in
                std::mem::take(&mut self.worker_handles).into_iter().enumerate()
            {
                match handle.await {
                    Ok(worker_result) => {
                        if let Err(error) = worker_result {
                            warn!(
                                worker_id,
                                error = %error,
                                "worker completed with error during shutdown"
                            );
                        }
                    },
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked during shutdown"
                        );
                        first_panic.get_or_insert(DeliveryError::WorkerPanic {
                            worker_id,
                            message: join_error.to_string(),
                        });
                    },
                }
            }

            {
                let mut stats = self.stats.write().await;
                stats.active_workers = 0;
            }

            first_panic
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(Some(panic_error)) => Err(panic_error),
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout_seconds: timeout.as_secs() })
            },
        }
    }

    /// Whether any worker task has not yet finished.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
            warn!(
                active_workers = active_count,
                "WorkerPool dropped with active workers; cancelling to prevent orphaned tasks"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{storage::memory::MemoryStorage, TestClock};

    use super::*;
    use crate::storage::MemoryDeliveryStorage;

    fn test_pool(worker_count: usize) -> (WorkerPool, Arc<RwLock<DispatchStats>>) {
        let config = DispatchConfig { worker_count, ..Default::default() };
        let storage: Arc<dyn DeliveryStorage> =
            Arc::new(MemoryDeliveryStorage::new(Arc::new(MemoryStorage::new())));
        let client = Arc::new(DispatchClient::new(config.client_config.clone()).unwrap());
        let stats = Arc::new(RwLock::new(DispatchStats::default()));

        let pool = WorkerPool::new(
            storage,
            config,
            client,
            stats.clone(),
            CancellationToken::new(),
            Arc::new(TestClock::new()),
        );
        (pool, stats)
    }

    #[tokio::test]
    async fn pool_spawns_configured_number_of_workers() {
        let (mut pool, stats) = test_pool(5);

        pool.spawn_workers().await.unwrap();

        assert_eq!(pool.worker_handles.len(), 5);
        assert_eq!(stats.read().await.active_workers, 5);

        pool.shutdown_graceful(Duration::from_secs(3)).await.unwrap();
        assert_eq!(stats.read().await.active_workers, 0);
    }

    #[tokio::test]
    async fn shutdown_completes_quickly_when_idle() {
        let (mut pool, _stats) = test_pool(2);
        pool.spawn_workers().await.unwrap();

        tokio::task::yield_now().await;

        let shutdown_start = std::time::Instant::now();
        pool.shutdown_graceful(Duration::from_secs(3)).await.unwrap();
        assert!(shutdown_start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn shutdown_of_unstarted_pool_is_trivial() {
        let (pool, _stats) = test_pool(2);
        assert!(!pool.has_active_workers());
        pool.shutdown_graceful(Duration::from_millis(10)).await.unwrap();
    }
}
