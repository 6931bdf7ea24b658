//! Core domain models and strongly-typed identifiers.
//!
//! Defines messages, queues, topics, subscriptions, and delivery tasks,
//! together with newtype ID wrappers for compile-time type safety. Includes
//! database serialization traits and the state machines the broker and
//! dispatcher operate on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed message identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. A message keeps its
/// ID through every state transition from creation to acknowledgement or
/// dead-lettering.
///
/// # Example
///
/// ```
/// use courier_core::models::MessageId;
/// let message_id = MessageId::new();
/// println!("tracking message: {}", message_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for MessageId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for MessageId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for MessageId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed queue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(pub Uuid);

impl QueueId {
    /// Creates a new random queue ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for QueueId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for QueueId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for QueueId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for QueueId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed topic identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId(pub Uuid);

impl TopicId {
    /// Creates a new random topic ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TopicId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TopicId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for TopicId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TopicId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for TopicId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery-task identifier.
///
/// Each fan-out of a published message to one subscription is tracked as a
/// delivery task with its own retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for DeliveryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

impl sqlx::postgres::PgHasArrayType for DeliveryId {
    fn array_type_info() -> PgTypeInfo {
        <Uuid as sqlx::postgres::PgHasArrayType>::array_type_info()
    }
}

/// Single-use credential proving ownership of a message lease.
///
/// A fresh token is minted on every lease grant, which atomically
/// invalidates the previous one. Acknowledgement succeeds only with the
/// token of the current lease, so a consumer whose lease expired and was
/// re-granted elsewhere can no longer acknowledge the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckToken(pub Uuid);

impl AckToken {
    /// Mints a new unique ack token.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AckToken {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for AckToken {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AckToken {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for AckToken {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Message lifecycle status.
///
/// A message is in exactly one of these states at any instant. Transitions
/// are strictly controlled by the lease/ack compare-and-swap contract:
///
/// ```text
/// pending -> in_flight -> acked
///         ^      |
///         |      +-> in_flight (lease expired, re-granted)
///         |      +-> dead      (attempts exhausted)
///         +------+   (reaper returns long-expired leases)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Waiting for a lease.
    ///
    /// The message becomes eligible for `receive` once `visible_at` has
    /// elapsed.
    Pending,

    /// Leased to a consumer.
    ///
    /// `ack_token` holds the credential of the current lease and
    /// `visible_at` holds the lease expiry. An expired in-flight message is
    /// eligible for redelivery.
    InFlight,

    /// Acknowledged by the lease holder.
    ///
    /// Terminal success state. The record is eligible for garbage
    /// collection and is never redelivered.
    Acked,

    /// Dead-lettered after exhausting delivery attempts.
    ///
    /// Terminal failure state. The message is never returned by `receive`
    /// again.
    Dead,
}

impl MessageState {
    /// Returns true for states that permit no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Acked | Self::Dead)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InFlight => write!(f, "in_flight"),
            Self::Acked => write!(f, "acked"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl sqlx::Type<PgDb> for MessageState {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for MessageState {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "acked" => Ok(Self::Acked),
            "dead" => Ok(Self::Dead),
            _ => Err(format!("invalid message state: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for MessageState {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Queue behaviour hint affecting message selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueUseCase {
    /// Oldest-eligible-first selection without head-of-line blocking.
    #[default]
    GeneralPurpose,
    /// Strict head-of-line ordering: a leased, unexpired head blocks the
    /// queue until acknowledged or expired.
    Fifo,
}

impl fmt::Display for QueueUseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeneralPurpose => write!(f, "general_purpose"),
            Self::Fifo => write!(f, "fifo"),
        }
    }
}

impl sqlx::Type<PgDb> for QueueUseCase {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for QueueUseCase {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "general_purpose" => Ok(Self::GeneralPurpose),
            "fifo" => Ok(Self::Fifo),
            _ => Err(format!("invalid queue use case: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for QueueUseCase {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Where a message is routed.
///
/// Modeled as a tagged variant rather than a class hierarchy: a message is
/// either owned by exactly one queue, or published to a topic together with
/// a snapshot of the subscriptions that were active at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    /// Point-to-point: the message is leased and acknowledged.
    Queued {
        /// Owning queue.
        queue_id: QueueId,
    },
    /// Fan-out: one delivery task exists per snapshotted subscription.
    Published {
        /// Publish target.
        topic_id: TopicId,
        /// Subscriptions active at publish time. Subscriptions created
        /// later never receive this message.
        subscribers: Vec<SubscriptionId>,
    },
}

impl Destination {
    /// Owning queue, if this is a queued message.
    pub fn queue_id(&self) -> Option<QueueId> {
        match self {
            Self::Queued { queue_id } => Some(*queue_id),
            Self::Published { .. } => None,
        }
    }

    /// Publish target, if this is a published message.
    pub fn topic_id(&self) -> Option<TopicId> {
        match self {
            Self::Queued { .. } => None,
            Self::Published { topic_id, .. } => Some(*topic_id),
        }
    }
}

/// A message record.
///
/// Invariants maintained by the storage layer:
/// - `ack_token` is `Some` if and only if `state` is [`MessageState::InFlight`].
/// - `attempt` increments exactly once per lease grant, never on re-reads.
/// - At most one valid ack token exists per message at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,

    /// Owning container and fan-out snapshot.
    pub destination: Destination,

    /// Opaque payload. Any JSON value the producer supplied.
    pub body: serde_json::Value,

    /// Current lifecycle state.
    pub state: MessageState,

    /// Delivery attempt counter. Zero until the first lease grant.
    pub attempt: i32,

    /// For pending messages: when the message becomes eligible for a lease.
    /// For in-flight messages: when the current lease expires.
    pub visible_at: DateTime<Utc>,

    /// Credential of the current lease. `Some` iff state is in_flight.
    pub ack_token: Option<AckToken>,

    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a pending queued message.
    ///
    /// `visible_at` in the future implements delayed delivery: the message
    /// is not observable to `receive` until it elapses.
    pub fn queued(
        queue_id: QueueId,
        body: serde_json::Value,
        visible_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            destination: Destination::Queued { queue_id },
            body,
            state: MessageState::Pending,
            attempt: 0,
            visible_at,
            ack_token: None,
            created_at: now,
        }
    }

    /// Creates a published message carrying its fan-out snapshot.
    pub fn published(
        topic_id: TopicId,
        subscribers: Vec<SubscriptionId>,
        body: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            destination: Destination::Published { topic_id, subscribers },
            body,
            state: MessageState::Pending,
            attempt: 0,
            visible_at: now,
            ack_token: None,
            created_at: now,
        }
    }

    /// Whether the message is eligible for a lease at `now`.
    ///
    /// Covers both never-leased pending messages and in-flight messages
    /// whose lease has expired without an ack.
    pub fn lease_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, MessageState::Pending | MessageState::InFlight)
            && self.visible_at <= now
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Message {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let queue_id: Option<QueueId> = row.try_get("queue_id")?;
        let topic_id: Option<TopicId> = row.try_get("topic_id")?;

        let destination = match (queue_id, topic_id) {
            (Some(queue_id), None) => Destination::Queued { queue_id },
            (None, Some(topic_id)) => {
                let snapshot: sqlx::types::Json<Vec<SubscriptionId>> =
                    row.try_get("subscriber_snapshot")?;
                Destination::Published { topic_id, subscribers: snapshot.0 }
            },
            _ => {
                return Err(sqlx::Error::Decode(
                    "message row must carry exactly one of queue_id, topic_id".into(),
                ))
            },
        };

        Ok(Self {
            id: row.try_get("id")?,
            destination,
            body: row.try_get("body")?,
            state: row.try_get("state")?,
            attempt: row.try_get("attempt")?,
            visible_at: row.try_get("visible_at")?,
            ack_token: row.try_get("ack_token")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Queue configuration and identity.
///
/// A queue exclusively owns its messages; deleting the queue purges them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Queue {
    /// Unique identifier for this queue.
    pub id: QueueId,

    /// Human-readable name, unique within the account.
    pub name: String,

    /// Selection-order hint.
    pub use_case: QueueUseCase,

    /// Default lease duration granted by `receive`, in seconds.
    pub visibility_timeout_seconds: i32,

    /// Lease grants permitted before a message is dead-lettered.
    pub max_attempts: i32,

    /// Optional bound on live depth (pending + in-flight). `send` fails
    /// with `CapacityExceeded` when the bound is reached.
    pub max_depth: Option<i32>,

    /// When this queue was created.
    pub created_at: DateTime<Utc>,
}

impl Queue {
    /// Lease duration as a [`chrono::Duration`].
    pub fn visibility_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.visibility_timeout_seconds))
    }
}

/// Topic identity.
///
/// A topic exclusively owns its subscriptions and is the publish target for
/// fanned-out messages.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    /// Unique identifier for this topic.
    pub id: TopicId,

    /// Human-readable name, unique within the account.
    pub name: String,

    /// When this topic was created.
    pub created_at: DateTime<Utc>,
}

/// Subscription to a topic.
///
/// Lifecycle is independent of message lifecycle: deleting a subscription
/// stops future fan-out but leaves already-created deliveries untouched.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Owning topic.
    pub topic_id: TopicId,

    /// Human-readable name.
    pub name: String,

    /// Push target. A subscription without a webhook URL accumulates no
    /// deliveries.
    pub webhook_url: Option<String>,

    /// When this subscription was created.
    pub created_at: DateTime<Utc>,
}

/// Delivery task lifecycle status.
///
/// ```text
/// scheduled -> dispatching -> delivered
///                  |        -> retrying -> dispatching
///                  +--------> failed     (retry ceiling reached)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Created at publish time, waiting for a dispatch worker.
    Scheduled,
    /// Claimed by a worker; an outbound call is in progress.
    Dispatching,
    /// Terminal success: the endpoint returned 2xx.
    Delivered,
    /// A previous attempt failed; waiting for the backoff delay.
    Retrying,
    /// Terminal failure after the retry ceiling. Reported via logs and
    /// metrics, never raised to the publisher.
    Failed,
}

impl DeliveryState {
    /// Returns true for states that permit no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Delivered => write!(f, "delivered"),
            Self::Retrying => write!(f, "retrying"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryState {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryState {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "dispatching" => Ok(Self::Dispatching),
            "delivered" => Ok(Self::Delivered),
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery state: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryState {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// One fan-out of a published message to one subscription.
///
/// The target URL is snapshotted at publish time so a subscriber's failure
/// or reconfiguration never affects another subscriber's delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    /// Unique identifier for this delivery task.
    pub id: DeliveryId,

    /// Message being delivered.
    pub message_id: MessageId,

    /// Target subscription. Deliberately not a foreign key: deleting the
    /// subscription must not cancel deliveries that belong to a
    /// publish-time snapshot.
    pub subscription_id: SubscriptionId,

    /// Webhook URL snapshotted at publish time.
    pub url: String,

    /// Current task state.
    pub state: DeliveryState,

    /// Completed outbound attempts. Incremented after each failure.
    pub attempt: i32,

    /// When the task next becomes due for dispatch.
    pub next_attempt_at: DateTime<Utc>,

    /// Error description of the most recent failed attempt.
    pub last_error: Option<String>,

    /// When this delivery task was created.
    pub created_at: DateTime<Utc>,

    /// When this delivery task last changed state.
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Creates a scheduled delivery task due immediately.
    pub fn scheduled(
        message_id: MessageId,
        subscription_id: SubscriptionId,
        url: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            message_id,
            subscription_id,
            url,
            state: DeliveryState::Scheduled,
            attempt: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A claimed delivery task joined with the payload it carries.
///
/// Returned by the claim query so dispatch workers do not need a second
/// round trip for the message body.
#[derive(Debug, Clone)]
pub struct DueDelivery {
    /// The claimed task, already transitioned to `dispatching`.
    pub delivery: Delivery,
    /// Body of the published message.
    pub body: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_state_display_format() {
        assert_eq!(MessageState::Pending.to_string(), "pending");
        assert_eq!(MessageState::InFlight.to_string(), "in_flight");
        assert_eq!(MessageState::Acked.to_string(), "acked");
        assert_eq!(MessageState::Dead.to_string(), "dead");
    }

    #[test]
    fn terminal_states_identified() {
        assert!(!MessageState::Pending.is_terminal());
        assert!(!MessageState::InFlight.is_terminal());
        assert!(MessageState::Acked.is_terminal());
        assert!(MessageState::Dead.is_terminal());

        assert!(DeliveryState::Delivered.is_terminal());
        assert!(DeliveryState::Failed.is_terminal());
        assert!(!DeliveryState::Retrying.is_terminal());
        assert!(!DeliveryState::Dispatching.is_terminal());
    }

    #[test]
    fn queued_message_respects_delay() {
        let now = Utc::now();
        let visible_at = now + chrono::Duration::seconds(10);
        let message =
            Message::queued(QueueId::new(), serde_json::json!({"k": "v"}), visible_at, now);

        assert!(!message.lease_eligible(now));
        assert!(message.lease_eligible(now + chrono::Duration::seconds(10)));
        assert_eq!(message.attempt, 0);
        assert!(message.ack_token.is_none());
    }

    #[test]
    fn published_message_carries_snapshot() {
        let now = Utc::now();
        let subs = vec![SubscriptionId::new(), SubscriptionId::new()];
        let message =
            Message::published(TopicId::new(), subs.clone(), serde_json::json!("x"), now);

        match message.destination {
            Destination::Published { subscribers, .. } => assert_eq!(subscribers, subs),
            Destination::Queued { .. } => panic!("expected published destination"),
        }
    }

    #[test]
    fn terminal_message_never_lease_eligible() {
        let now = Utc::now();
        let mut message = Message::queued(QueueId::new(), serde_json::json!(1), now, now);
        message.state = MessageState::Dead;
        assert!(!message.lease_eligible(now));
        message.state = MessageState::Acked;
        assert!(!message.lease_eligible(now));
    }
}
