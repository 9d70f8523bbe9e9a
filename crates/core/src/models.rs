//! Outbox/inbox row types.
//!
//! These map directly onto the `outbox_messages`/`inbox_messages` tables
//! (see `outboxkit-store`'s migrations). A row's `payload` and `headers`
//! are immutable after creation; every other field changes only through a
//! repository transition method.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::MessageId;

/// Status of an outbox row: `PENDING -> PROCESSING -> PUBLISHED|FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

/// Status of an inbox row: `PENDING -> PROCESSING -> PROCESSED|FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "inbox_status", rename_all = "lowercase")]
pub enum InboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

/// A durable record of the intent to notify another service of a domain
/// event, written in the same transaction as the business state that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub message_id: MessageId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub destination_service: String,
    pub destination_topic: Option<String>,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    #[sqlx(json)]
    pub headers: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processes_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    /// Deserialize `headers` into a string map, defaulting to empty when
    /// absent or malformed (headers are advisory, not load-bearing).
    pub fn headers_map(&self) -> HashMap<String, String> {
        serde_json::from_value(self.headers.clone()).unwrap_or_default()
    }
}

/// A durable record of a received inbound event, deduplicated on
/// `message_id` by a hard database UNIQUE constraint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InboxRow {
    pub id: i64,
    pub message_id: MessageId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub source_service: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    #[sqlx(json)]
    pub headers: serde_json::Value,
    pub status: InboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processes_at: Option<DateTime<Utc>>,
}

impl InboxRow {
    pub fn headers_map(&self) -> HashMap<String, String> {
        serde_json::from_value(self.headers.clone()).unwrap_or_default()
    }
}

/// Fields required to append a new outbox row. `message_id` is generated
/// by the producer when not supplied.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub message_id: Option<MessageId>,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub destination_service: String,
    pub destination_topic: Option<String>,
    pub payload: serde_json::Value,
    pub headers: HashMap<String, String>,
}

/// Fields required to admit a new inbox row.
#[derive(Debug, Clone)]
pub struct NewInboxMessage {
    pub message_id: MessageId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub source_service: String,
    pub payload: serde_json::Value,
    pub headers: HashMap<String, String>,
}
