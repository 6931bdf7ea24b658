//! Request handlers for the REST surface.

pub mod health;
pub mod queues;
pub mod topics;

pub use health::{health_check, readiness_check};
