//! Repository for `inbox_messages`.
//!
//! Admission is the one operation this table adds over the outbox: the
//! `message_id` UNIQUE constraint is the sole deduplication authority, so
//! `admit` distinguishes a fresh insert from a conflict instead of doing a
//! read-then-write existence check that would race under concurrent
//! redelivery.

use chrono::{DateTime, Utc};
use outboxkit_core::{InboxRow, InboxStatus, NewInboxMessage, StoreError, StoreResult};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Clone)]
pub struct InboxStore {
    pool: PgPool,
}

/// Outcome of `admit`: a fresh row, or the identity of the row already
/// occupying that `message_id`.
pub enum AdmitOutcome {
    Created(InboxRow),
    Duplicate,
}

impl InboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert-or-detect-duplicate on `message_id`. Relies on the table's
    /// UNIQUE constraint rather than a prior SELECT: two concurrent
    /// admitters racing on the same id can't both "see" it missing.
    pub async fn admit(&self, new: NewInboxMessage) -> StoreResult<AdmitOutcome> {
        let headers = serde_json::to_value(&new.headers).unwrap_or(serde_json::Value::Null);

        let result = sqlx::query_as::<_, InboxRow>(
            r#"
            INSERT INTO inbox_messages
                (message_id, aggregate_type, aggregate_id, event_type,
                 source_service, payload, headers, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING *
            "#,
        )
        .bind(new.message_id)
        .bind(&new.aggregate_type)
        .bind(&new.aggregate_id)
        .bind(&new.event_type)
        .bind(&new.source_service)
        .bind(&new.payload)
        .bind(&headers)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(AdmitOutcome::Created(row)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(AdmitOutcome::Duplicate)
            }
            Err(err) => Err(StoreError::from(err)),
        }
    }

    pub async fn select_pending_ids(&self, max_retries: i32, limit: i64) -> StoreResult<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM inbox_messages
            WHERE status = 'pending' AND retry_count < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Candidate ids with their `event_type`, so the dispatcher can check
    /// the handler registry *before* claiming the row — an unregistered
    /// event type must be left untouched in PENDING, not claimed and
    /// released (§4.5).
    pub async fn select_pending_candidates(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> StoreResult<Vec<(i64, String)>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, event_type FROM inbox_messages
            WHERE status = 'pending' AND retry_count < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn select_failed_candidates(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> StoreResult<Vec<(i64, String)>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT id, event_type FROM inbox_messages
            WHERE status = 'failed' AND retry_count < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn select_failed_ids(&self, max_retries: i32, limit: i64) -> StoreResult<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM inbox_messages
            WHERE status = 'failed' AND retry_count < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    pub async fn claim(&self, id: i64) -> StoreResult<Option<InboxRow>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, InboxRow>(
            "SELECT * FROM inbox_messages WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(_) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let row = sqlx::query_as::<_, InboxRow>(
            r#"
            UPDATE inbox_messages
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

    pub async fn claim_reset_failed(&self, id: i64) -> StoreResult<Option<InboxRow>> {
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            "UPDATE inbox_messages SET status = 'pending' WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if reset.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let candidate = sqlx::query_as::<_, InboxRow>(
            "SELECT * FROM inbox_messages WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(_) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let row = sqlx::query_as::<_, InboxRow>(
            r#"
            UPDATE inbox_messages
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

    /// Claims `id` and leaves the transaction open instead of committing:
    /// the dispatcher invokes its handler and writes the final status
    /// inside this same transaction (§4.5 — unlike the outbox relay, the
    /// inbox dispatcher may hold a transaction across the handler call
    /// because handlers are in-process and fast).
    pub async fn begin_claim(&self, id: i64) -> StoreResult<Option<(Transaction<'static, Postgres>, InboxRow)>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, InboxRow>(
            "SELECT * FROM inbox_messages WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if candidate.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, InboxRow>(
            r#"
            UPDATE inbox_messages
            SET status = 'processing', processes_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(Some((tx, row)))
    }

    /// As `begin_claim`, but starting from FAILED (reset to PENDING first).
    pub async fn begin_claim_reset_failed(
        &self,
        id: i64,
    ) -> StoreResult<Option<(Transaction<'static, Postgres>, InboxRow)>> {
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            "UPDATE inbox_messages SET status = 'pending' WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if reset.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let candidate = sqlx::query_as::<_, InboxRow>(
            "SELECT * FROM inbox_messages WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if candidate.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, InboxRow>(
            r#"
            UPDATE inbox_messages
            SET status = 'processing', processes_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(Some((tx, row)))
    }

    /// Writes the terminal PROCESSED status inside the dispatcher's own
    /// transaction, committing it.
    pub async fn commit_processed(
        &self,
        mut tx: Transaction<'static, Postgres>,
        id: i64,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE inbox_messages SET status = 'processed' WHERE id = $1 AND status = 'processing'")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Writes FAILED + `retry_count += 1` inside the dispatcher's own
    /// transaction, committing it.
    pub async fn commit_failed(
        &self,
        mut tx: Transaction<'static, Postgres>,
        id: i64,
        error: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'failed', retry_count = retry_count + 1, last_error = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_processed(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE inbox_messages SET status = 'processed' WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_messages
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

    pub async fn sweep_visibility_timeout(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET status = 'pending', processes_at = NULL
            WHERE status = 'processing' AND processes_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn cleanup_processed(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM inbox_messages WHERE status = 'processed' AND processes_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find(&self, id: i64) -> StoreResult<InboxRow> {
        sqlx::query_as::<_, InboxRow>("SELECT * FROM inbox_messages WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxkit_core::MessageId;
    use std::collections::HashMap;

    fn sample(message_id: MessageId) -> NewInboxMessage {
        NewInboxMessage {
            message_id,
            aggregate_type: "order".into(),
            aggregate_id: "o-1".into(),
            event_type: "order.shipped".into(),
            source_service: "shipping".into(),
            payload: serde_json::json!({"k": 1}),
            headers: HashMap::new(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn admit_creates_pending_row(pool: PgPool) {
        let store = InboxStore::new(pool);
        let outcome = store.admit(sample(MessageId::new())).await.unwrap();
        match outcome {
            AdmitOutcome::Created(row) => assert_eq!(row.status, InboxStatus::Pending),
            AdmitOutcome::Duplicate => panic!("expected a fresh row"),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn admit_detects_duplicate_message_id(pool: PgPool) {
        let store = InboxStore::new(pool);
        let id = MessageId::new();
        store.admit(sample(id)).await.unwrap();

        let second = store.admit(sample(id)).await.unwrap();
        assert!(matches!(second, AdmitOutcome::Duplicate));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn claim_then_process_then_mark_processed(pool: PgPool) {
        let store = InboxStore::new(pool);
        let AdmitOutcome::Created(row) = store.admit(sample(MessageId::new())).await.unwrap()
        else {
            panic!("expected a fresh row");
        };

        let claimed = store.claim(row.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, InboxStatus::Processing);

        assert!(store.mark_processed(row.id).await.unwrap());
        let refreshed = store.find(row.id).await.unwrap();
        assert_eq!(refreshed.status, InboxStatus::Processed);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn failed_then_retry_reclaims_the_row(pool: PgPool) {
        let store = InboxStore::new(pool);
        let AdmitOutcome::Created(row) = store.admit(sample(MessageId::new())).await.unwrap()
        else {
            panic!("expected a fresh row");
        };

        store.claim(row.id).await.unwrap();
        store.mark_failed(row.id, "handler panicked").await.unwrap();

        let reclaimed = store.claim_reset_failed(row.id).await.unwrap().unwrap();
        assert_eq!(reclaimed.status, InboxStatus::Processing);
        assert_eq!(reclaimed.retry_count, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn cleanup_measures_retention_from_processed_time_not_received_time(pool: PgPool) {
        let store = InboxStore::new(pool);
        let AdmitOutcome::Created(row) = store.admit(sample(MessageId::new())).await.unwrap()
        else {
            panic!("expected a fresh row");
        };
        store.claim(row.id).await.unwrap();
        store.mark_processed(row.id).await.unwrap();

        // received_at is long in the past relative to this cutoff, but the
        // row was only just processed: it must not be swept yet.
        let not_yet = store
            .cleanup_processed(Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(not_yet, 0);
        assert!(store.find(row.id).await.is_ok());

        let swept = store
            .cleanup_processed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(swept, 1);
    }
}
