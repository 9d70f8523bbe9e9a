//! Outbox Relay (§4.2): claims PENDING rows, publishes them through a
//! `Transport`, and folds the outcome back into their status. Rows within
//! a single pass are processed concurrently with a bounded `JoinSet`,
//! mirroring the teacher's per-job-task batch pattern; each row's outcome
//! is written back through its own short claim/mark transaction rather
//! than a single monolithic one.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use outboxkit_store::OutboxStore;
use outboxkit_transport::Transport;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::RelayError;

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub max_retries: i32,
    pub visibility_timeout: ChronoDuration,
    pub max_concurrency: usize,
    /// Batch size substituted whenever a caller passes `limit <= 0`
    /// (§8 Boundary: "`limit = 0` is rejected or coerced to the
    /// configured default (≥ 1)").
    pub default_limit: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            visibility_timeout: ChronoDuration::seconds(120),
            max_concurrency: 16,
            default_limit: 50,
        }
    }
}

/// Coerces a non-positive `limit` to `default_limit` rather than letting
/// it reach `SELECT ... LIMIT 0`, which would silently no-op the batch.
fn coerce_limit(limit: i64, default_limit: i64) -> i64 {
    if limit <= 0 { default_limit } else { limit }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryStats {
    pub retried: u64,
    pub failed: u64,
}

pub struct OutboxRelay {
    store: OutboxStore,
    transport: Arc<dyn Transport>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(store: OutboxStore, transport: Arc<dyn Transport>, config: RelayConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Claim protocol + publish step + batch selection for every
    /// destination in one pass (§4.2).
    pub async fn process_all(&self, limit: i64) -> Result<BatchStats, RelayError> {
        let limit = coerce_limit(limit, self.config.default_limit);
        let ids = self
            .store
            .select_pending_ids(None, self.config.max_retries, limit)
            .await?;
        self.claim_and_publish(ids).await
    }

    pub async fn process_for_destination(
        &self,
        destination: &str,
        limit: i64,
    ) -> Result<BatchStats, RelayError> {
        let limit = coerce_limit(limit, self.config.default_limit);
        let ids = self
            .store
            .select_pending_ids(Some(destination), self.config.max_retries, limit)
            .await?;
        self.claim_and_publish(ids).await
    }

    /// FAILED rows under the retry ceiling are reset to PENDING and run
    /// back through the claim protocol (§8, scenario S2).
    pub async fn retry_failed(&self, limit: i64) -> Result<RetryStats, RelayError> {
        let limit = coerce_limit(limit, self.config.default_limit);
        let ids = self.store.select_failed_ids(self.config.max_retries, limit).await?;

        let mut stats = RetryStats::default();
        for chunk in ids.chunks(self.config.max_concurrency.max(1)) {
            let mut tasks = JoinSet::new();
            for &id in chunk {
                let store = self.store.clone();
                let transport = Arc::clone(&self.transport);
                tasks.spawn(async move {
                    let Some(row) = store.claim_reset_failed(id).await? else {
                        return Ok::<_, RelayError>(None);
                    };
                    let outcome = publish_and_mark(&store, &transport, &row).await;
                    Ok(Some(outcome))
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined.expect("relay task panicked") {
                    Ok(Some(true)) => stats.retried += 1,
                    Ok(Some(false)) => stats.failed += 1,
                    // Another retry already claimed this row first — §4.2:
                    // "A FAILED row that cannot be re-claimed ... counts
                    // under failed."
                    Ok(None) => stats.failed += 1,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(stats)
    }

    /// Visibility-timeout pass (§4.2/§9): rows stuck in PROCESSING are
    /// reset to PENDING without touching `retry_count`.
    pub async fn sweep_visibility_timeout(&self) -> Result<u64, RelayError> {
        let threshold = Utc::now() - self.config.visibility_timeout;
        self.store.sweep_visibility_timeout(threshold).await.map_err(RelayError::from)
    }

    async fn claim_and_publish(&self, ids: Vec<i64>) -> Result<BatchStats, RelayError> {
        let mut stats = BatchStats::default();
        for chunk in ids.chunks(self.config.max_concurrency.max(1)) {
            let mut tasks = JoinSet::new();
            for &id in chunk {
                let store = self.store.clone();
                let transport = Arc::clone(&self.transport);
                tasks.spawn(async move {
                    let Some(row) = store.claim(id).await? else {
                        return Ok::<_, RelayError>(None);
                    };
                    let ok = publish_and_mark(&store, &transport, &row).await;
                    Ok(Some(ok))
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined.expect("relay task panicked") {
                    Ok(Some(true)) => stats.processed += 1,
                    Ok(Some(false)) => stats.failed += 1,
                    Ok(None) => stats.skipped += 1,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(stats)
    }
}

/// Publishes a claimed row and writes the outcome back. Transport errors
/// are folded into `FAILED` + `retry_count++`, never surfaced as the
/// batch's own `Err` — only a database error does that.
async fn publish_and_mark(
    store: &OutboxStore,
    transport: &Arc<dyn Transport>,
    row: &outboxkit_core::OutboxRow,
) -> bool {
    let message_id = row.message_id.to_string();
    match transport.publish(row).await {
        Ok(()) => match store.mark_published(row.id).await {
            Ok(_) => true,
            Err(err) => {
                warn!(%message_id, destination = %row.destination_service, event_type = %row.event_type, error = %err, "failed to record successful publish");
                false
            }
        },
        Err(err) => {
            warn!(%message_id, destination = %row.destination_service, event_type = %row.event_type, error = %err, "outbox publish failed");
            let _ = store.mark_failed(row.id, &err.to_string()).await;
            false
        }
    }
}
