//! Outbox Producer + Relay (C3/C4).

pub mod error;
pub mod producer;
pub mod relay;

pub use error::{ProducerError, RelayError};
pub use producer::OutboxProducer;
pub use relay::{BatchStats, OutboxRelay, RelayConfig, RetryStats};
