//! Inbox Dispatcher (C6, §4.5): claims PENDING/FAILED rows and dispatches
//! each to its registered handler, claim + handle + mark inside a single
//! transaction — the dispatcher, unlike the outbox relay, may hold a
//! transaction across the handler call because handlers run in-process.
//!
//! An event type with no registered handler is reported as `no_handler`
//! and the row is left untouched in PENDING: the registry is checked
//! *before* the row is ever claimed.

use std::sync::Arc;

use outboxkit_store::InboxStore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::DispatcherError;
use crate::registry::HandlerRegistry;

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub max_retries: i32,
    pub max_concurrency: usize,
    /// Batch size substituted whenever a caller passes `limit <= 0`
    /// (§8 Boundary: "`limit = 0` is rejected or coerced to the
    /// configured default (≥ 1)").
    pub default_limit: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_retries: 5, max_concurrency: 16, default_limit: 50 }
    }
}

fn coerce_limit(limit: i64, default_limit: i64) -> i64 {
    if limit <= 0 { default_limit } else { limit }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub no_handler: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryStats {
    pub retried: u64,
    pub failed: u64,
    pub no_handler: u64,
}

pub struct InboxDispatcher {
    store: InboxStore,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
}

enum Outcome {
    Processed,
    Failed,
    Skipped,
    NoHandler,
}

impl InboxDispatcher {
    pub fn new(store: InboxStore, registry: Arc<HandlerRegistry>, config: DispatcherConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub async fn process_all(&self, limit: i64) -> Result<DispatchStats, DispatcherError> {
        let limit = coerce_limit(limit, self.config.default_limit);
        let candidates = self
            .store
            .select_pending_candidates(self.config.max_retries, limit)
            .await?;
        self.dispatch_batch(candidates, false).await
    }

    /// FAILED rows under the retry ceiling; resolved to `RetryStats`
    /// (`retried` replaces `processed` in the vocabulary). A row that
    /// cannot be re-claimed because another retry already owns it
    /// (`Outcome::Skipped`) counts as `failed`, per §4.5/§4.2.
    pub async fn retry_failed(&self, limit: i64) -> Result<RetryStats, DispatcherError> {
        let limit = coerce_limit(limit, self.config.default_limit);
        let candidates = self
            .store
            .select_failed_candidates(self.config.max_retries, limit)
            .await?;
        let stats = self.dispatch_batch(candidates, true).await?;
        Ok(RetryStats {
            retried: stats.processed,
            failed: stats.failed + stats.skipped,
            no_handler: stats.no_handler,
        })
    }

    async fn dispatch_batch(
        &self,
        candidates: Vec<(i64, String)>,
        from_failed: bool,
    ) -> Result<DispatchStats, DispatcherError> {
        let mut stats = DispatchStats::default();

        for chunk in candidates.chunks(self.config.max_concurrency.max(1)) {
            let mut tasks = JoinSet::new();

            for (id, event_type) in chunk.iter().cloned() {
                let Some(handler) = self.registry.get(&event_type) else {
                    tasks.spawn(async move { Ok::<_, DispatcherError>(Outcome::NoHandler) });
                    continue;
                };

                let store = self.store.clone();
                tasks.spawn(async move {
                    let claimed = if from_failed {
                        store.begin_claim_reset_failed(id).await?
                    } else {
                        store.begin_claim(id).await?
                    };

                    let Some((tx, row)) = claimed else {
                        return Ok(Outcome::Skipped);
                    };

                    match handler.handle(&row).await {
                        Ok(()) => {
                            store.commit_processed(tx, id).await?;
                            Ok(Outcome::Processed)
                        }
                        Err(err) => {
                            warn!(
                                message_id = %row.message_id,
                                event_type = %row.event_type,
                                error = %err,
                                "inbox handler failed"
                            );
                            store.commit_failed(tx, id, &err.to_string()).await?;
                            Ok(Outcome::Failed)
                        }
                    }
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined.expect("dispatcher task panicked")? {
                    Outcome::Processed => stats.processed += 1,
                    Outcome::Failed => stats.failed += 1,
                    Outcome::Skipped => stats.skipped += 1,
                    Outcome::NoHandler => stats.no_handler += 1,
                }
            }
        }
        Ok(stats)
    }

    pub async fn sweep_visibility_timeout(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, DispatcherError> {
        self.store
            .sweep_visibility_timeout(older_than)
            .await
            .map_err(DispatcherError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use outboxkit_core::{InboxRow, InboxStatus, MessageId, NewInboxMessage};
    use outboxkit_store::AdmitOutcome;
    use sqlx::PgPool;
    use std::collections::HashMap;

    use crate::error::HandlerError;
    use crate::registry::EventHandler;

    struct Echo;

    #[async_trait]
    impl EventHandler for Echo {
        fn event_type(&self) -> &str {
            "order.shipped"
        }

        async fn handle(&self, _row: &InboxRow) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl EventHandler for AlwaysFails {
        fn event_type(&self) -> &str {
            "order.cancelled"
        }

        async fn handle(&self, _row: &InboxRow) -> Result<(), HandlerError> {
            Err(HandlerError::Failed("handler exploded".into()))
        }
    }

    fn sample(event_type: &str) -> NewInboxMessage {
        NewInboxMessage {
            message_id: MessageId::new(),
            aggregate_type: "order".into(),
            aggregate_id: "o-1".into(),
            event_type: event_type.into(),
            source_service: "shipping".into(),
            payload: serde_json::json!({}),
            headers: HashMap::new(),
        }
    }

    #[sqlx::test(migrations = "../store/migrations")]
    async fn unknown_event_type_is_reported_and_left_pending(pool: PgPool) {
        let store = InboxStore::new(pool);
        let AdmitOutcome::Created(row) = store.admit(sample("UNKNOWN")).await.unwrap() else {
            panic!("expected a fresh row");
        };

        let registry = Arc::new(HandlerRegistry::new());
        let dispatcher = InboxDispatcher::new(store.clone(), registry, DispatcherConfig::default());

        let stats = dispatcher.process_all(10).await.unwrap();
        assert_eq!(stats, DispatchStats { processed: 0, failed: 0, skipped: 0, no_handler: 1 });

        let refreshed = store.find(row.id).await.unwrap();
        assert_eq!(refreshed.status, InboxStatus::Pending);
    }

    #[sqlx::test(migrations = "../store/migrations")]
    async fn registering_a_handler_unblocks_the_row(pool: PgPool) {
        let store = InboxStore::new(pool);
        store.admit(sample("order.shipped")).await.unwrap();

        let registry = Arc::new(HandlerRegistry::new());
        let dispatcher = InboxDispatcher::new(store, registry.clone(), DispatcherConfig::default());

        let before = dispatcher.process_all(10).await.unwrap();
        assert_eq!(before.no_handler, 1);

        registry.register(Arc::new(Echo));
        let after = dispatcher.process_all(10).await.unwrap();
        assert_eq!(after, DispatchStats { processed: 1, failed: 0, skipped: 0, no_handler: 0 });
    }

    #[sqlx::test(migrations = "../store/migrations")]
    async fn handler_failure_marks_row_failed_and_retry_reclaims_it(pool: PgPool) {
        let store = InboxStore::new(pool);
        store.admit(sample("order.cancelled")).await.unwrap();

        let registry = Arc::new(HandlerRegistry::from_handlers(vec![Arc::new(AlwaysFails)]));
        let dispatcher = InboxDispatcher::new(store, registry, DispatcherConfig::default());

        let first = dispatcher.process_all(10).await.unwrap();
        assert_eq!(first, DispatchStats { processed: 0, failed: 1, skipped: 0, no_handler: 0 });

        let retried = dispatcher.retry_failed(10).await.unwrap();
        assert_eq!(retried, RetryStats { retried: 0, failed: 1, no_handler: 0 });
    }

    #[sqlx::test(migrations = "../store/migrations")]
    async fn zero_limit_is_coerced_to_the_configured_default(pool: PgPool) {
        let store = InboxStore::new(pool);
        store.admit(sample("order.shipped")).await.unwrap();

        let registry = Arc::new(HandlerRegistry::from_handlers(vec![Arc::new(Echo)]));
        let dispatcher = InboxDispatcher::new(store, registry, DispatcherConfig::default());

        // limit=0 must not turn into `SELECT ... LIMIT 0` and silently
        // process nothing.
        let stats = dispatcher.process_all(0).await.unwrap();
        assert_eq!(stats, DispatchStats { processed: 1, failed: 0, skipped: 0, no_handler: 0 });
    }
}
