use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("missing required identifier: {0}")]
    MissingIdentifier(&'static str),
    #[error("{0} is not a valid UUID")]
    InvalidMessageId(String),
    #[error("admission failed: {0}")]
    Internal(#[from] outboxkit_inbox::AdmitError),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            IngressError::MissingIdentifier(_) | IngressError::InvalidMessageId(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            IngressError::Internal(err) => {
                tracing::error!(error = %err, "inbox admission failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
