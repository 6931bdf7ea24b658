//! REST surface for the Courier broker.
//!
//! Exposes queue and topic CRUD plus the messaging operations (send,
//! receive, ack, publish, subscribe) over axum, with figment-based service
//! configuration. Authorization policy lives outside this layer; the
//! engines trust that identifiers reaching them were already vetted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, serve, AppState};
