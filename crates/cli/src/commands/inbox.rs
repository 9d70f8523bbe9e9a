use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use outboxkit_config::Config;
use outboxkit_inbox::{DispatcherConfig, HandlerRegistry, InboxDispatcher};
use outboxkit_store::InboxStore;
use sqlx::PgPool;

#[derive(Args)]
pub struct InboxArgs {
    #[command(subcommand)]
    pub command: InboxCommand,
}

#[derive(Subcommand)]
pub enum InboxCommand {
    /// Dispatch PENDING rows to registered handlers (or retry FAILED rows
    /// with --retry).
    Process {
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        retry: bool,
    },
    /// Reset PROCESSING rows stuck past the visibility timeout back to
    /// PENDING (§4.2); does not touch `retry_count`.
    Sweep,
}

/// The generic `outboxkit` binary ships with an empty `HandlerRegistry` —
/// handlers are application code, not configuration (§6 `inbox.handlers`
/// names which ones to wire up, but the construction itself belongs to
/// the embedding application's own binary built against these library
/// crates). This command is useful for draining retries/cleanup and for
/// exercising ingress end-to-end; every row without a real handler
/// registered surfaces as `no_handler`.
pub async fn run(pool: PgPool, config: &Config, args: InboxCommand) -> Result<()> {
    let store = InboxStore::new(pool);
    let registry = Arc::new(HandlerRegistry::new());
    let dispatcher_config = DispatcherConfig {
        max_retries: config.processing.max_retries,
        default_limit: config.processing.batch_size,
        ..DispatcherConfig::default()
    };
    let dispatcher = InboxDispatcher::new(store, registry, dispatcher_config);

    match args {
        InboxCommand::Sweep => {
            let threshold = chrono::Utc::now()
                - chrono::Duration::seconds(config.processing.visibility_timeout_secs);
            let reset = dispatcher.sweep_visibility_timeout(threshold).await?;
            println!("Reset: {reset}");
        }
        InboxCommand::Process { limit, retry } => {
            let limit = limit.unwrap_or(config.processing.batch_size);

            if retry {
                let stats = dispatcher.retry_failed(limit).await?;
                println!(
                    "Retried: {}, Failed: {}, No handler: {}",
                    stats.retried, stats.failed, stats.no_handler
                );
            } else {
                let stats = dispatcher.process_all(limit).await?;
                println!(
                    "Processed: {}, Failed: {}, No handler: {}",
                    stats.processed, stats.failed, stats.no_handler
                );
            }
        }
    }

    Ok(())
}
