//! Transactional Outbox Producer API (§4.1): appending an outbox row in
//! the same database transaction as the business write that caused it.

use std::future::Future;

use outboxkit_core::{NewOutboxMessage, OutboxRow};
use outboxkit_store::OutboxStore;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::ProducerError;

#[derive(Clone)]
pub struct OutboxProducer {
    store: OutboxStore,
}

impl OutboxProducer {
    pub fn new(pool: PgPool) -> Self {
        Self {
            store: OutboxStore::new(pool),
        }
    }

    /// Opens its own single-statement transaction. For callers with no
    /// surrounding unit of work — most callers should prefer
    /// `execute_and_append` so the outbox row lands atomically with the
    /// business write.
    pub async fn append(&self, new: NewOutboxMessage) -> Result<OutboxRow, ProducerError> {
        self.store.insert(new).await.map_err(ProducerError::from)
    }

    /// Does not open a transaction: runs in whatever transactional context
    /// the caller already holds.
    pub async fn append_in<'t>(
        &self,
        tx: &mut Transaction<'t, Postgres>,
        new: NewOutboxMessage,
    ) -> Result<OutboxRow, ProducerError> {
        self.store.insert_in(tx, new).await.map_err(ProducerError::from)
    }

    /// Runs `biz` and appends `new` inside one transaction. Any error
    /// before `commit()` drops the transaction — rollback on `Drop`.
    pub async fn execute_and_append<F, Fut, T>(
        &self,
        new: NewOutboxMessage,
        biz: F,
    ) -> Result<T, ProducerError>
    where
        F: FnOnce(&mut Transaction<'_, Postgres>) -> Fut + Send,
        Fut: Future<Output = Result<T, ProducerError>> + Send,
        T: Send,
    {
        let mut tx = self.store.pool().begin().await?;
        let result = biz(&mut tx).await?;
        self.store.insert_in(&mut tx, new).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// As `execute_and_append`, appending every message in `news` inside
    /// the same transaction.
    pub async fn execute_and_append_many<F, Fut, T>(
        &self,
        news: Vec<NewOutboxMessage>,
        biz: F,
    ) -> Result<T, ProducerError>
    where
        F: FnOnce(&mut Transaction<'_, Postgres>) -> Fut + Send,
        Fut: Future<Output = Result<T, ProducerError>> + Send,
        T: Send,
    {
        let mut tx = self.store.pool().begin().await?;
        let result = biz(&mut tx).await?;
        for new in news {
            self.store.insert_in(&mut tx, new).await?;
        }
        tx.commit().await?;
        Ok(result)
    }
}
