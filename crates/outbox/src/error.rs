use outboxkit_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("business transaction failed: {0}")]
    Business(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
