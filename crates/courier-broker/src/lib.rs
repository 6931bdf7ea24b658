//! Queue and topic engines for the Courier broker.
//!
//! This crate owns the delivery semantics clients rely on:
//!
//! 1. **Queues** — at-least-once point-to-point delivery. `send` makes a
//!    message visible after an optional delay, `receive` grants a
//!    time-bounded exclusive lease with a single-use ack token, and
//!    unacked leases expire back into eligibility until the attempt
//!    ceiling dead-letters the message.
//! 2. **Topics** — publish/subscribe fan-out. `publish` snapshots the
//!    active subscriptions and persists one delivery task per webhook
//!    target; dispatch runs asynchronously in `courier-delivery`.
//!
//! Both engines operate through the [`storage::BrokerStorage`] seam, which
//! carries the compare-and-swap contract on message records. PostgreSQL
//! and the embedded memory backend implement it with identical observable
//! semantics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod queue;
pub mod storage;
pub mod topic;

pub use queue::{CreateQueue, QueueEngine};
pub use storage::{BrokerStorage, MemoryBrokerStorage, PostgresBrokerStorage};
pub use topic::TopicEngine;

/// Default lease duration granted by `receive`, in seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: i32 = 30;

/// Default lease grants permitted before a message is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
