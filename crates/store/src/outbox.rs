//! Repository for `outbox_messages`.
//!
//! Every transition is a single `UPDATE ... WHERE id = ? AND status = ?`;
//! the number of affected rows is the claim-miss signal used throughout
//! `outboxkit-outbox`; the caller never needs to re-read the row just to
//! find out someone else got there first.

use chrono::{DateTime, Utc};
use outboxkit_core::{MessageId, NewOutboxMessage, OutboxRow, OutboxStatus, StoreError, StoreResult};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Clone)]
pub struct OutboxStore {
    pool: PgPool,
}

impl OutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a PENDING row inside the caller's transaction. This is the
    /// non-transaction-opening primitive behind `OutboxProducer::append`.
    pub async fn insert_in<'t>(
        &self,
        tx: &mut Transaction<'t, Postgres>,
        new: NewOutboxMessage,
    ) -> StoreResult<OutboxRow> {
        let message_id = new.message_id.unwrap_or_default();
        let headers = serde_json::to_value(&new.headers).unwrap_or(serde_json::Value::Null);

        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            INSERT INTO outbox_messages
                (message_id, aggregate_type, aggregate_id, event_type,
                 destination_service, destination_topic, payload, headers, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(&new.aggregate_type)
        .bind(&new.aggregate_id)
        .bind(&new.event_type)
        .bind(&new.destination_service)
        .bind(&new.destination_topic)
        .bind(&new.payload)
        .bind(&headers)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    /// Convenience wrapper for callers with no surrounding transaction:
    /// opens one just for this insert.
    pub async fn insert(&self, new: NewOutboxMessage) -> StoreResult<OutboxRow> {
        let mut tx = self.pool.begin().await?;
        let row = self.insert_in(&mut tx, new).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Candidate ids for a batch pass. `ORDER BY created_at` is a
    /// preference, not a guarantee: the claim step below uses
    /// `SKIP LOCKED`, so a busy row is simply skipped by this worker.
    pub async fn select_pending_ids(
        &self,
        destination: Option<&str>,
        max_retries: i32,
        limit: i64,
    ) -> StoreResult<Vec<i64>> {
        let ids: Vec<(i64,)> = match destination {
            Some(dest) => {
                sqlx::query_as(
                    r#"
                    SELECT id FROM outbox_messages
                    WHERE status = 'pending' AND retry_count < $1 AND destination_service = $2
                    ORDER BY created_at ASC
                    LIMIT $3
                    "#,
                )
                .bind(max_retries)
                .bind(dest)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id FROM outbox_messages
                    WHERE status = 'pending' AND retry_count < $1
                    ORDER BY created_at ASC
                    LIMIT $2
                    "#,
                )
                .bind(max_retries)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Candidate ids for `retryFailed`: FAILED rows under the retry ceiling.
    pub async fn select_failed_ids(&self, max_retries: i32, limit: i64) -> StoreResult<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM outbox_messages
            WHERE status = 'failed' AND retry_count < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Claim protocol (§4.2): short transaction, re-select under
    /// `FOR UPDATE SKIP LOCKED`, transition to PROCESSING, commit. Returns
    /// `None` when another worker already owns the row or it already moved
    /// on — a claim-miss, not an error.
    pub async fn claim(&self, id: i64) -> StoreResult<Option<OutboxRow>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, OutboxRow>(
            "SELECT * FROM outbox_messages WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(_) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox_messages
            SET status = 'processing', processes_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row))
    }

    /// Same claim protocol starting from FAILED instead of PENDING, used
    /// by `retryFailed` after the row has been reset.
    pub async fn claim_reset_failed(&self, id: i64) -> StoreResult<Option<OutboxRow>> {
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            "UPDATE outbox_messages SET status = 'pending' WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if reset.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let candidate = sqlx::query_as::<_, OutboxRow>(
            "SELECT * FROM outbox_messages WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(_) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox_messages
            SET status = 'processing', processes_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row))
    }

    /// Publish succeeded: PROCESSING -> PUBLISHED.
    pub async fn mark_published(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'published', published_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Publish failed: PROCESSING -> FAILED, `retry_count += 1`.
    pub async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'failed', retry_count = retry_count + 1, last_error = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Visibility-timeout sweep (§4.2/§9): rows stuck in PROCESSING past
    /// the threshold are reset to PENDING without incrementing
    /// `retry_count` — the prior worker crashed, this is not an attempt.
    pub async fn sweep_visibility_timeout(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'pending', processes_at = NULL
            WHERE status = 'processing' AND processes_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_pending(&self) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Delete PUBLISHED rows older than `older_than` (§4.7). Never touches
    /// FAILED rows.
    pub async fn cleanup_published(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE status = 'published' AND published_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find(&self, id: i64) -> StoreResult<OutboxRow> {
        sqlx::query_as::<_, OutboxRow>("SELECT * FROM outbox_messages WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)
    }

    pub async fn find_by_message_id(&self, message_id: MessageId) -> StoreResult<OutboxRow> {
        sqlx::query_as::<_, OutboxRow>("SELECT * FROM outbox_messages WHERE message_id = $1")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample(dest: &str) -> NewOutboxMessage {
        NewOutboxMessage {
            message_id: None,
            aggregate_type: "order".into(),
            aggregate_id: "o-1".into(),
            event_type: "order.created".into(),
            destination_service: dest.into(),
            destination_topic: None,
            payload: serde_json::json!({"k": 1}),
            headers: HashMap::new(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn insert_creates_pending_row(pool: PgPool) {
        let store = OutboxStore::new(pool);
        let row = store.insert(sample("svc-a")).await.unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn claim_is_exclusive_and_idempotent_on_miss(pool: PgPool) {
        let store = OutboxStore::new(pool);
        let row = store.insert(sample("svc-a")).await.unwrap();

        let claimed = store.claim(row.id).await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(claimed.unwrap().status, OutboxStatus::Processing);

        // Second claim attempt on an already-PROCESSING row is a miss.
        let second = store.claim(row.id).await.unwrap();
        assert!(second.is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn mark_published_requires_processing_state(pool: PgPool) {
        let store = OutboxStore::new(pool);
        let row = store.insert(sample("svc-a")).await.unwrap();

        // Not yet claimed: marking published is a no-op.
        assert!(!store.mark_published(row.id).await.unwrap());

        store.claim(row.id).await.unwrap();
        assert!(store.mark_published(row.id).await.unwrap());

        let refreshed = store.find(row.id).await.unwrap();
        assert_eq!(refreshed.status, OutboxStatus::Published);
        assert!(refreshed.published_at.is_some());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn mark_failed_increments_retry_count(pool: PgPool) {
        let store = OutboxStore::new(pool);
        let row = store.insert(sample("svc-a")).await.unwrap();
        store.claim(row.id).await.unwrap();

        assert!(store.mark_failed(row.id, "boom").await.unwrap());
        let refreshed = store.find(row.id).await.unwrap();
        assert_eq!(refreshed.status, OutboxStatus::Failed);
        assert_eq!(refreshed.retry_count, 1);
        assert_eq!(refreshed.last_error.as_deref(), Some("boom"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn visibility_timeout_resets_without_incrementing_retry(pool: PgPool) {
        let store = OutboxStore::new(pool);
        let row = store.insert(sample("svc-a")).await.unwrap();
        store.claim(row.id).await.unwrap();

        let future_threshold = Utc::now() + chrono::Duration::seconds(60);
        let swept = store.sweep_visibility_timeout(future_threshold).await.unwrap();
        assert_eq!(swept, 1);

        let refreshed = store.find(row.id).await.unwrap();
        assert_eq!(refreshed.status, OutboxStatus::Pending);
        assert_eq!(refreshed.retry_count, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn cleanup_only_deletes_published(pool: PgPool) {
        let store = OutboxStore::new(pool);
        let published = store.insert(sample("svc-a")).await.unwrap();
        store.claim(published.id).await.unwrap();
        store.mark_published(published.id).await.unwrap();

        let failed = store.insert(sample("svc-a")).await.unwrap();
        store.claim(failed.id).await.unwrap();
        store.mark_failed(failed.id, "nope").await.unwrap();

        let deleted = store
            .cleanup_published(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.find(failed.id).await.is_ok());
    }
}
