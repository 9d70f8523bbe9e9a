//! Handler Registry (C8, §4.6): in-memory `event_type -> handler` map,
//! built once at startup and safe for concurrent readers on the hot path.
//!
//! `arc_swap::ArcSwap` gives publish-style immutable replacement: readers
//! load a snapshot `Arc` with no lock, writers (runtime `register` calls)
//! build a whole new map and swap the pointer. The per-lookup cost is one
//! atomic load plus a hash lookup, no contention with concurrent readers.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use outboxkit_core::InboxRow;

use crate::error::HandlerError;

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> &str;
    async fn handle(&self, row: &InboxRow) -> Result<(), HandlerError>;
}

pub struct HandlerRegistry {
    handlers: ArcSwap<HashMap<String, Arc<dyn EventHandler>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Builds a registry from a fixed set of handlers at startup.
    pub fn from_handlers(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let map: HashMap<String, Arc<dyn EventHandler>> = handlers
            .into_iter()
            .map(|h| (h.event_type().to_string(), h))
            .collect();
        Self {
            handlers: ArcSwap::from_pointee(map),
        }
    }

    /// Registers (or replaces) a handler for `event_type`. Builds a new
    /// map and swaps the pointer rather than mutating the existing one in
    /// place, so concurrent readers never observe a half-built map.
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut next = (**self.handlers.load()).clone();
        next.insert(handler.event_type().to_string(), handler);
        self.handlers.store(Arc::new(next));
    }

    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.load().get(event_type).cloned()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.load().contains_key(event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler(&'static str);

    #[async_trait]
    impl EventHandler for EchoHandler {
        fn event_type(&self) -> &str {
            self.0
        }

        async fn handle(&self, _row: &InboxRow) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_event_type_is_absent() {
        let registry = HandlerRegistry::new();
        assert!(!registry.contains("order.shipped"));
    }

    #[test]
    fn register_then_lookup_finds_the_handler() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(EchoHandler("order.shipped")));
        assert!(registry.contains("order.shipped"));
        assert!(registry.get("order.shipped").is_some());
        assert!(registry.get("order.cancelled").is_none());
    }

    #[test]
    fn from_handlers_builds_the_initial_map() {
        let registry = HandlerRegistry::from_handlers(vec![
            Arc::new(EchoHandler("a")),
            Arc::new(EchoHandler("b")),
        ]);
        assert!(registry.contains("a"));
        assert!(registry.contains("b"));
        assert!(!registry.contains("c"));
    }
}
