//! Shared retention sweep over both tables (§4.7). FAILED rows are never
//! touched here; only terminal-success rows age out.

use chrono::{Duration, Utc};

use crate::inbox::InboxStore;
use crate::outbox::OutboxStore;
use outboxkit_core::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionScope {
    Outbox,
    Inbox,
    Both,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub outbox_deleted: u64,
    pub inbox_deleted: u64,
}

impl RetentionReport {
    pub fn total(&self) -> u64 {
        self.outbox_deleted + self.inbox_deleted
    }
}

/// Delete PUBLISHED/PROCESSED rows older than `retention_days`.
pub async fn cleanup(
    outbox: &OutboxStore,
    inbox: &InboxStore,
    scope: RetentionScope,
    retention_days: i64,
) -> StoreResult<RetentionReport> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let mut report = RetentionReport::default();

    if matches!(scope, RetentionScope::Outbox | RetentionScope::Both) {
        report.outbox_deleted = outbox.cleanup_published(cutoff).await?;
    }
    if matches!(scope, RetentionScope::Inbox | RetentionScope::Both) {
        report.inbox_deleted = inbox.cleanup_processed(cutoff).await?;
    }

    Ok(report)
}
