//! Core domain models, error taxonomy, clock abstraction, and storage
//! layer for the Courier message-delivery broker.
//!
//! Provides strongly-typed domain primitives (messages, queues, topics,
//! subscriptions, delivery tasks), the lease/ack-token state machine
//! contract, and two storage backends honoring it: PostgreSQL repositories
//! and an embedded in-memory store. All other crates depend on these
//! foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    AckToken, Delivery, DeliveryId, DeliveryState, Destination, DueDelivery, Message, MessageId,
    MessageState, Queue, QueueId, QueueUseCase, Subscription, SubscriptionId, Topic, TopicId,
};
pub use time::{Clock, RealClock, TestClock};
