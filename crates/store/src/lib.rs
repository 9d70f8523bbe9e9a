//! Postgres-backed repositories for the outbox and inbox tables.
//!
//! Each repository method is exactly one SQL statement (or one short
//! claim transaction) — no ORM, no query builder beyond `sqlx::query*`.
//! Row-affected counts double as the claim-miss signal the relay and
//! dispatcher crates build their retry loops on.

pub mod inbox;
pub mod outbox;
pub mod retention;

pub use inbox::{AdmitOutcome, InboxStore};
pub use outbox::OutboxStore;
pub use retention::{cleanup, RetentionReport, RetentionScope};
