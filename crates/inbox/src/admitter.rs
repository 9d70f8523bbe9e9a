//! Inbox Admitter (C5, §4.4): idempotent admission of inbound events.

use outboxkit_core::NewInboxMessage;
use outboxkit_store::{AdmitOutcome, InboxStore};
use sqlx::PgPool;

use crate::error::AdmitError;

#[derive(Clone)]
pub struct InboxAdmitter {
    store: InboxStore,
}

impl InboxAdmitter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            store: InboxStore::new(pool),
        }
    }

    /// Single operation: admit or detect-duplicate, keyed on
    /// `message_id`'s database UNIQUE constraint — not a prior read.
    pub async fn admit(&self, new: NewInboxMessage) -> Result<AdmitOutcome, AdmitError> {
        self.store.admit(new).await.map_err(AdmitError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxkit_core::MessageId;
    use std::collections::HashMap;

    fn sample(message_id: MessageId) -> NewInboxMessage {
        NewInboxMessage {
            message_id,
            aggregate_type: "order".into(),
            aggregate_id: "o-1".into(),
            event_type: "order.shipped".into(),
            source_service: "shipping".into(),
            payload: serde_json::json!({}),
            headers: HashMap::new(),
        }
    }

    #[sqlx::test(migrations = "../store/migrations")]
    async fn duplicate_message_id_is_dropped_not_re_executed(pool: PgPool) {
        let admitter = InboxAdmitter::new(pool);
        let id = MessageId::new();

        let first = admitter.admit(sample(id)).await.unwrap();
        assert!(matches!(first, AdmitOutcome::Created(_)));

        let second = admitter.admit(sample(id)).await.unwrap();
        assert!(matches!(second, AdmitOutcome::Duplicate));
    }
}
