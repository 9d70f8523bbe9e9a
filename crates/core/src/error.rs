//! Shared error types for the outbox/inbox domain.

use thiserror::Error;

/// Errors raised while writing to or reading from the message store.
///
/// Claim-miss (another worker already owns a row) and duplicate admission
/// are not modeled here: they're expected outcomes, not errors, so
/// callers see them as `Option<Row>`/`AdmitOutcome` return values instead.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
