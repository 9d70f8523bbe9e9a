//! `outboxkit` — thin CLI over the outbox/inbox library crates: batch
//! invocations meant to be wired up by external scheduling (cron,
//! Kubernetes CronJob), not a long-running daemon (§6, §9 — scheduling of
//! periodic invocations is explicitly out of scope).

mod commands;
mod error;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{inbox, messages, outbox};
use error::ExitCode;
use outboxkit_config::Config;

#[derive(Parser)]
#[command(name = "outboxkit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Transactional Outbox/Inbox relay and dispatcher", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Outbox Relay operations (C4).
    Outbox(outbox::OutboxArgs),
    /// Inbox Dispatcher operations (C6).
    Inbox(inbox::InboxArgs),
    /// Shared retention/cleanup sweep (C7).
    Messages(messages::MessagesArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    outboxkit_shared::init_env();
    let _guard = outboxkit_shared::init_tracing("cli");

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = match outboxkit_shared::init_db(&config).await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect to database");
            std::process::exit(ExitCode::InfrastructureFailure.as_i32());
        }
    };

    if let Err(err) = outboxkit_shared::run_migrations(&pool).await {
        tracing::error!(error = %err, "failed to run migrations");
        std::process::exit(ExitCode::InfrastructureFailure.as_i32());
    }

    let result = match cli.command {
        Commands::Outbox(args) => outbox::run(pool, &config, args.command).await,
        Commands::Inbox(args) => inbox::run(pool, &config, args.command).await,
        Commands::Messages(args) => messages::run(pool, args.command).await,
    };

    match result {
        Ok(()) => std::process::exit(ExitCode::Success.as_i32()),
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            std::process::exit(ExitCode::InfrastructureFailure.as_i32());
        }
    }
}
