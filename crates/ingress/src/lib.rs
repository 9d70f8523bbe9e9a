//! Axum webhook ingress adapting inbound HTTP notifications into Inbox
//! Admitter calls (§6).

pub mod error;
pub mod webhook;

pub use error::IngressError;
pub use webhook::{routes, AppState};
