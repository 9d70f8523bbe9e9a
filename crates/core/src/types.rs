//! Type-safe identifiers shared by the outbox and inbox tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Externally visible, globally unique message identifier.
///
/// Always a UUID v7: its lexical order tracks creation time, which makes
/// `ORDER BY message_id` a reasonable secondary index alongside
/// `created_at`/`received_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Generate a new message id (UUID v7).
    pub fn new() -> Self {
        MessageId(Uuid::now_v7())
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
    fn from(id: Uuid) -> Self {
        MessageId(id)
    }
}

impl From<MessageId> for Uuid {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_distinct() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn v7_ids_sort_by_creation_order() {
        let first = MessageId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = MessageId::new();
        assert!(first.0 < second.0);
    }

    #[test]
    fn round_trips_through_uuid() {
        let uuid = Uuid::now_v7();
        let id = MessageId::from(uuid);
        assert_eq!(Uuid::from(id), uuid);
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = MessageId::from(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
