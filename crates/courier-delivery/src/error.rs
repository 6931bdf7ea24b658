//! Error types for webhook dispatch operations.
//!
//! Every failure mode of an outbound call is represented here with enough
//! context for retry decisions: network failures, timeouts, HTTP error
//! classes, and rate limits. The dispatcher treats any non-2xx response or
//! connection failure as a delivery failure; this module decides which of
//! those are worth retrying.

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook dispatch operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_seconds: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx).
        status_code: u16,
        /// Response body content.
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx).
        status_code: u16,
        /// Response body content.
        body: String,
    },

    /// Rate limit exceeded with retry guidance.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// Storage operation failed during dispatch.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message.
        message: String,
    },

    /// Invalid delivery configuration, e.g. an unparseable target URL.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Identifier of the panicked worker.
        worker_id: usize,
        /// Join error description.
        message: String,
    },

    /// Graceful shutdown did not complete within the timeout.
    #[error("shutdown timed out after {timeout_seconds}s")]
    ShutdownTimeout {
        /// Configured shutdown timeout in seconds.
        timeout_seconds: u64,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with retry guidance.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this failure is worth another attempt.
    ///
    /// Network failures, timeouts, 5xx responses, and rate limits are
    /// transient. Client errors and configuration problems will not
    /// improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::Storage { .. } => true,

            Self::ClientError { .. }
            | Self::Configuration { .. }
            | Self::WorkerPanic { .. }
            | Self::ShutdownTimeout { .. } => false,
        }
    }

    /// Suggested retry delay in seconds, when the endpoint provided one.
    ///
    /// `Some` only for rate limits carrying a Retry-After value; `None`
    /// means the standard backoff schedule applies.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(30).is_retryable());
        assert!(DeliveryError::server_error(500, "internal server error").is_retryable());
        assert!(DeliveryError::rate_limited(60).is_retryable());
        assert!(DeliveryError::storage("connection lost").is_retryable());

        assert!(!DeliveryError::client_error(404, "not found").is_retryable());
        assert!(!DeliveryError::configuration("invalid URL").is_retryable());
        assert!(!DeliveryError::ShutdownTimeout { timeout_seconds: 30 }.is_retryable());
    }

    #[test]
    fn rate_limit_retry_after_extracted() {
        assert_eq!(DeliveryError::rate_limited(120).retry_after_seconds(), Some(120));
        assert_eq!(DeliveryError::timeout(30).retry_after_seconds(), None);
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
        assert_eq!(
            DeliveryError::client_error(404, "missing").to_string(),
            "client error: HTTP 404"
        );
    }
}
