use outboxkit_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
