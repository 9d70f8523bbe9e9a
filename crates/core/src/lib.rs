//! outboxkit-core — shared domain types for the outbox/inbox pattern.
//!
//! Pure data: no I/O. Row structs, status enums and the identifier type
//! are defined here so every other crate in the workspace depends on the
//! same definitions instead of redeclaring them.

pub mod error;
pub mod models;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use models::{InboxRow, InboxStatus, NewInboxMessage, NewOutboxMessage, OutboxRow, OutboxStatus};
pub use types::MessageId;
