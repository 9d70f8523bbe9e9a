//! Inbox Admitter + Dispatcher + Handler Registry (C5/C6/C8).

pub mod admitter;
pub mod dispatcher;
pub mod error;
pub mod registry;

pub use admitter::InboxAdmitter;
pub use dispatcher::{DispatchStats, DispatcherConfig, InboxDispatcher, RetryStats};
pub use error::{AdmitError, DispatcherError, HandlerError};
pub use registry::{EventHandler, HandlerRegistry};
