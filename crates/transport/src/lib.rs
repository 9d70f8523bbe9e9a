//! Pluggable outbound transport for the outbox relay (§4.3).
//!
//! `Transport` is the one seam the relay depends on: `HttpTransport` is the
//! reference implementation over `reqwest`, but anything implementing the
//! trait (an in-memory stub, a message-broker client) plugs in unchanged.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use outboxkit_core::OutboxRow;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

const DEFAULT_TOPIC: &str = "events";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no base URL configured for destination service {0:?}")]
    UnknownDestination(String),
    #[error("request to {destination} failed: {source}")]
    Request {
        destination: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{destination} responded with non-success status {status}")]
    NonSuccess { destination: String, status: u16 },
}

/// Contract: `publish` reports failure by returning `Err`, never by a
/// silent success — the relay's state machine trusts this return value
/// completely (spec §4.3).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, row: &OutboxRow) -> Result<(), TransportError>;
    async fn healthy(&self) -> bool;
}

/// Reference `Transport`: one POST per row, to
/// `<service-base>/<destination_topic-or-"events">`, per the wire format
/// in §6.
pub struct HttpTransport {
    client: reqwest::Client,
    service_urls: HashMap<String, String>,
    source_service: String,
}

impl HttpTransport {
    pub fn new(service_urls: HashMap<String, String>, source_service: impl Into<String>) -> Self {
        Self::with_timeout(service_urls, source_service, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        service_urls: HashMap<String, String>,
        source_service: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder with static config never fails");

        Self {
            client,
            service_urls,
            source_service: source_service.into(),
        }
    }

    fn target_url(&self, row: &OutboxRow) -> Result<String, TransportError> {
        let base = self
            .service_urls
            .get(&row.destination_service)
            .ok_or_else(|| TransportError::UnknownDestination(row.destination_service.clone()))?;
        let topic = row.destination_topic.as_deref().unwrap_or(DEFAULT_TOPIC);
        Ok(format!("{}/{}", base.trim_end_matches('/'), topic))
    }

    /// Reserved headers always win; custom headers never shadow them.
    fn build_headers(&self, row: &OutboxRow) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Message-Id", header_value(&row.message_id.to_string()));
        headers.insert("X-Source-Service", header_value(&self.source_service));
        headers.insert("X-Event-Type", header_value(&row.event_type));

        for (name, value) in row.headers_map() {
            if headers.contains_key(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }

        headers
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn publish(&self, row: &OutboxRow) -> Result<(), TransportError> {
        let url = self.target_url(row)?;
        let headers = self.build_headers(row);

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&row.payload)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                destination: row.destination_service.clone(),
                source,
            })?;

        let status = response.status();
        tracing::debug!(message_id = %row.message_id, destination = %row.destination_service, %status, "outbound publish attempt");

        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::NonSuccess {
                destination: row.destination_service.clone(),
                status: status.as_u16(),
            })
        }
    }

    async fn healthy(&self) -> bool {
        !self.service_urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxkit_core::{MessageId, OutboxStatus};
    use chrono::Utc;

    fn row(dest: &str, topic: Option<&str>, headers: serde_json::Value) -> OutboxRow {
        OutboxRow {
            id: 1,
            message_id: MessageId::new(),
            aggregate_type: "order".into(),
            aggregate_id: "o-1".into(),
            event_type: "order.created".into(),
            destination_service: dest.into(),
            destination_topic: topic.map(Into::into),
            payload: serde_json::json!({"k": 1}),
            headers,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            processes_at: None,
            published_at: None,
        }
    }

    #[test]
    fn target_url_defaults_topic_to_events() {
        let mut urls = HashMap::new();
        urls.insert("svc-a".to_string(), "http://svc-a.local".to_string());
        let transport = HttpTransport::new(urls, "my-service");

        let url = transport.target_url(&row("svc-a", None, serde_json::Value::Null)).unwrap();
        assert_eq!(url, "http://svc-a.local/events");
    }

    #[test]
    fn target_url_uses_custom_topic_and_trims_trailing_slash() {
        let mut urls = HashMap::new();
        urls.insert("svc-a".to_string(), "http://svc-a.local/".to_string());
        let transport = HttpTransport::new(urls, "my-service");

        let url = transport
            .target_url(&row("svc-a", Some("orders"), serde_json::Value::Null))
            .unwrap();
        assert_eq!(url, "http://svc-a.local/orders");
    }

    #[test]
    fn unknown_destination_is_an_error() {
        let transport = HttpTransport::new(HashMap::new(), "my-service");
        let err = transport.target_url(&row("svc-missing", None, serde_json::Value::Null));
        assert!(matches!(err, Err(TransportError::UnknownDestination(_))));
    }

    #[test]
    fn custom_headers_never_override_reserved_names() {
        let transport = HttpTransport::new(HashMap::new(), "my-service");
        let custom = serde_json::json!({"X-Event-Type": "spoofed", "X-Trace-Id": "abc"});
        let headers = transport.build_headers(&row("svc-a", None, custom));

        assert_eq!(headers.get("X-Event-Type").unwrap(), "order.created");
        assert_eq!(headers.get("X-Trace-Id").unwrap(), "abc");
        assert_eq!(headers.get("X-Source-Service").unwrap(), "my-service");
    }
}
