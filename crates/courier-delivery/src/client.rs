//! HTTP client for webhook dispatch with bounded timeouts.
//!
//! Handles request construction, response processing, and error
//! categorization for the retry logic. The per-request timeout comes from
//! configuration; callers cannot override it per dispatch.

use std::{collections::HashMap, time::Duration};

use reqwest::{header::HeaderMap, Response};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use courier_core::models::{DeliveryId, MessageId, SubscriptionId};

use crate::error::{DeliveryError, Result};

/// Configuration for the webhook dispatch client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout applied to every outbound request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Courier-Dispatch/0.1".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// HTTP client optimized for webhook dispatch.
///
/// Uses connection pooling and a bounded timeout to push payloads to many
/// endpoints concurrently. HTTP responses are returned as data; only
/// transport failures surface as errors.
#[derive(Debug, Clone)]
pub struct DispatchClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// Request context for one webhook dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Delivery task being executed.
    pub delivery_id: DeliveryId,
    /// Message being delivered.
    pub message_id: MessageId,
    /// Target subscription.
    pub subscription_id: SubscriptionId,
    /// Destination URL, snapshotted at publish time.
    pub url: String,
    /// Message payload, posted as JSON.
    pub body: serde_json::Value,
    /// Attempt number for this dispatch (1-based).
    pub attempt: u32,
}

/// Response from one webhook dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body, truncated for storage.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the endpoint accepted the delivery (2xx).
    pub is_success: bool,
}

impl DispatchClient {
    /// Creates a new dispatch client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a dispatch client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Pushes a message payload to a webhook endpoint.
    ///
    /// Any HTTP response, success or not, comes back as a
    /// [`DispatchResponse`]; the caller classifies non-2xx statuses.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the bounded timeout elapses and `Network`
    /// for connection-level failures.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse> {
        let url: reqwest::Url = request
            .url
            .parse()
            .map_err(|e| DeliveryError::configuration(format!("invalid webhook URL: {e}")))?;

        let start_time = std::time::Instant::now();

        let span = info_span!(
            "webhook_dispatch",
            delivery_id = %request.delivery_id,
            message_id = %request.message_id,
            url = %request.url,
            attempt = request.attempt
        );

        async move {
            tracing::debug!("starting webhook dispatch");

            let http_request = self
                .client
                .post(url)
                .json(&request.body)
                .header("X-Courier-Message-Id", request.message_id.to_string())
                .header("X-Courier-Delivery-Id", request.delivery_id.to_string())
                .header("X-Courier-Subscription-Id", request.subscription_id.to_string())
                .header("X-Courier-Attempt", request.attempt.to_string());

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let dispatch_response = Self::parse_response(response, duration).await;

            match dispatch_response.status_code {
                200..=299 => tracing::debug!(
                    status = dispatch_response.status_code,
                    duration_ms = duration.as_millis(),
                    "endpoint accepted delivery"
                ),
                status => tracing::warn!(
                    status,
                    duration_ms = duration.as_millis(),
                    "endpoint rejected delivery"
                ),
            }

            Ok(dispatch_response)
        }
        .instrument(span)
        .await
    }

    /// Parses an HTTP response into a dispatch response.
    async fn parse_response(response: Response, duration: Duration) -> DispatchResponse {
        // 1KB is plenty for diagnostics; endpoints occasionally echo large
        // payloads back.
        const MAX_STORED_BODY: usize = 1024;

        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();
        let headers = extract_headers(response.headers());

        let body = match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_STORED_BODY => {
                format!("{}... (truncated)", String::from_utf8_lossy(&bytes[..MAX_STORED_BODY]))
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("[failed to read response body: {e}]"),
        };

        DispatchResponse { status_code, headers, body, duration, is_success }
    }
}

/// Extracts headers from a reqwest HeaderMap into a standard HashMap.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for (key, value) in header_map {
        if let Ok(value_str) = value.to_str() {
            headers.insert(key.to_string(), value_str.to_string());
        }
    }

    headers
}

/// Extracts a Retry-After delay from response headers.
///
/// Supports the seconds format and the HTTP-date format. An unparseable
/// value falls back to 60 seconds.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
) -> Option<u64> {
    const DEFAULT_RETRY_AFTER: u64 = 60;

    let retry_after = headers.get("retry-after").or_else(|| headers.get("Retry-After"))?;

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let now = chrono::Utc::now();
        let retry_time = date_time.with_timezone(&chrono::Utc);

        if retry_time > now {
            if let Ok(delay) = retry_time.signed_duration_since(now).to_std() {
                return Some(delay.as_secs());
            }
        }
    }

    Some(DEFAULT_RETRY_AFTER)
}
