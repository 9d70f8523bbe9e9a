//! Inbound webhook route (§6 "Inbound webhook contract"): adapts an HTTP
//! notification into an `InboxAdmitter::admit` call.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use outboxkit_config::HeaderNames;
use outboxkit_core::MessageId;
use outboxkit_inbox::InboxAdmitter;
use outboxkit_store::AdmitOutcome;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::IngressError;

#[derive(Clone)]
pub struct AppState {
    pub admitter: InboxAdmitter,
    pub headers: Arc<HeaderNames>,
}

/// Body fields accepted as a fallback when the corresponding header is
/// absent (§6: "may fall back to body fields").
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: Option<String>,
    pub message_id: Option<String>,
    pub source_service: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct AdmittedResponse {
    status: &'static str,
    message_id: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<WebhookBody>,
) -> Result<Response, IngressError> {
    let message_id = header_or_body(&headers, &state.headers.message_id, body.message_id.as_deref())
        .ok_or(IngressError::MissingIdentifier("message_id"))?;
    let message_id = uuid::Uuid::parse_str(&message_id)
        .map(MessageId::from)
        .map_err(|_| IngressError::InvalidMessageId(message_id))?;

    let source_service =
        header_or_body(&headers, &state.headers.source_service, body.source_service.as_deref())
            .ok_or(IngressError::MissingIdentifier("source_service"))?;

    let event_type = header_or_body(&headers, &state.headers.event_type, body.event_type.as_deref())
        .ok_or(IngressError::MissingIdentifier("event_type"))?;

    let captured_headers = capture_custom_headers(&headers, &state.headers);

    let new = outboxkit_core::NewInboxMessage {
        message_id,
        aggregate_type: body.aggregate_type,
        aggregate_id: body.aggregate_id,
        event_type,
        source_service,
        payload: body.payload,
        headers: captured_headers,
    };

    match state.admitter.admit(new).await? {
        AdmitOutcome::Created(row) => Ok((
            axum::http::StatusCode::ACCEPTED,
            Json(AdmittedResponse {
                status: "admitted",
                message_id: row.message_id.to_string(),
            }),
        )
            .into_response()),
        AdmitOutcome::Duplicate => Ok((
            axum::http::StatusCode::OK,
            Json(AdmittedResponse {
                status: "already_processed",
                message_id: message_id.to_string(),
            }),
        )
            .into_response()),
    }
}

fn header_or_body(headers: &HeaderMap, header_name: &str, body_value: Option<&str>) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| body_value.map(str::to_string))
}

/// Headers whose name starts with the configured prefix, excluding the
/// three reserved identifier headers, are captured verbatim.
fn capture_custom_headers(headers: &HeaderMap, names: &HeaderNames) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            if !name.to_ascii_lowercase().starts_with(&names.custom_prefix.to_ascii_lowercase()) {
                return None;
            }
            if name.eq_ignore_ascii_case(&names.message_id)
                || name.eq_ignore_ascii_case(&names.source_service)
                || name.eq_ignore_ascii_case(&names.event_type)
            {
                return None;
            }
            value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_headers_are_captured_excluding_reserved_names() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Message-Id", "m1".parse().unwrap());
        headers.insert("X-Trace-Id", "abc".parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());

        let names = HeaderNames::default();
        let captured = capture_custom_headers(&headers, &names);

        assert_eq!(captured.get("X-Trace-Id").map(String::as_str), Some("abc"));
        assert!(!captured.contains_key("X-Message-Id"));
        assert!(!captured.contains_key("Content-Type"));
    }

    #[test]
    fn header_or_body_prefers_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Event-Type", "order.shipped".parse().unwrap());

        let resolved = header_or_body(&headers, "X-Event-Type", Some("fallback"));
        assert_eq!(resolved.as_deref(), Some("order.shipped"));
    }

    #[test]
    fn header_or_body_falls_back_to_body_when_header_absent() {
        let headers = HeaderMap::new();
        let resolved = header_or_body(&headers, "X-Event-Type", Some("fallback"));
        assert_eq!(resolved.as_deref(), Some("fallback"));
    }
}
