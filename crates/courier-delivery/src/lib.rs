//! Webhook dispatch engine for topic fan-out.
//!
//! Executes the delivery tasks the topic engine schedules: a supervised
//! worker pool claims due tasks from storage, pushes payloads to
//! subscriber endpoints with a bounded timeout, and walks each task
//! through its state machine:
//!
//! ```text
//! scheduled -> dispatching -> delivered
//!                  |        -> retrying -> dispatching
//!                  +--------> failed
//! ```
//!
//! Failures retry on a capped exponential backoff until a fixed ceiling;
//! the terminal failure is reported through logs and counters only — the
//! publisher already got its answer when publish returned.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod retry;
pub mod storage;
pub mod worker;
pub mod worker_pool;

pub use client::{ClientConfig, DispatchClient};
pub use error::{DeliveryError, Result};
pub use retry::{RetryContext, RetryDecision, RetryPolicy};
pub use storage::{DeliveryStorage, MemoryDeliveryStorage, PostgresDeliveryStorage};
pub use worker::{DispatchConfig, DispatchStats, Dispatcher};

/// Default number of concurrent dispatch workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default batch size for claiming due tasks.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Default outbound request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
