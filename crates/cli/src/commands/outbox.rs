use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use outboxkit_config::Config;
use outboxkit_outbox::{OutboxRelay, RelayConfig};
use outboxkit_store::OutboxStore;
use outboxkit_transport::HttpTransport;
use sqlx::PgPool;

#[derive(Args)]
pub struct OutboxArgs {
    #[command(subcommand)]
    pub command: OutboxCommand,
}

#[derive(Subcommand)]
pub enum OutboxCommand {
    /// Publish PENDING rows (or retry FAILED rows with --retry).
    Process {
        /// Restrict the batch to a single destination service.
        #[arg(long)]
        destination: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        /// Re-run FAILED rows under the retry ceiling instead of PENDING ones.
        #[arg(long)]
        retry: bool,
    },
    /// Reset PROCESSING rows stuck past the visibility timeout back to
    /// PENDING (§4.2). Run this ahead of `process` on every invocation that
    /// might follow a crashed worker; it does not touch `retry_count`.
    Sweep,
}

pub async fn run(pool: PgPool, config: &Config, args: OutboxCommand) -> Result<()> {
    let store = OutboxStore::new(pool);
    let transport = Arc::new(HttpTransport::new(config.services.clone(), config.service_name.clone()));
    let relay_config = RelayConfig {
        max_retries: config.processing.max_retries,
        visibility_timeout: chrono::Duration::seconds(config.processing.visibility_timeout_secs),
        default_limit: config.processing.batch_size,
        ..RelayConfig::default()
    };
    let relay = OutboxRelay::new(store, transport, relay_config);

    match args {
        OutboxCommand::Sweep => {
            let reset = relay.sweep_visibility_timeout().await?;
            println!("Reset: {reset}");
        }
        OutboxCommand::Process { destination, limit, retry } => {
            let limit = limit.unwrap_or(config.processing.batch_size);

            if retry {
                let stats = relay.retry_failed(limit).await?;
                println!("Retried: {}, Failed: {}", stats.retried, stats.failed);
            } else if let Some(destination) = destination.as_deref() {
                let stats = relay.process_for_destination(destination, limit).await?;
                println!(
                    "Published: {}, Failed: {}, Skipped: {}",
                    stats.processed, stats.failed, stats.skipped
                );
            } else {
                let stats = relay.process_all(limit).await?;
                println!(
                    "Published: {}, Failed: {}, Skipped: {}",
                    stats.processed, stats.failed, stats.skipped
                );
            }
        }
    }

    Ok(())
}
