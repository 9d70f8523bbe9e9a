use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use outboxkit_store::{InboxStore, OutboxStore, RetentionScope};
use sqlx::PgPool;

#[derive(Args)]
pub struct MessagesArgs {
    #[command(subcommand)]
    pub command: MessagesCommand,
}

#[derive(Subcommand)]
pub enum MessagesCommand {
    /// Delete terminal-success rows past the retention window (§4.7).
    /// FAILED rows are never deleted by this command.
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long, value_enum, default_value_t = ScopeArg::Both)]
        scope: ScopeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ScopeArg {
    Outbox,
    Inbox,
    Both,
}

impl From<ScopeArg> for RetentionScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Outbox => RetentionScope::Outbox,
            ScopeArg::Inbox => RetentionScope::Inbox,
            ScopeArg::Both => RetentionScope::Both,
        }
    }
}

pub async fn run(pool: PgPool, args: MessagesCommand) -> Result<()> {
    let outbox = OutboxStore::new(pool.clone());
    let inbox = InboxStore::new(pool);

    let MessagesCommand::Cleanup { days, scope } = args;
    let report = outboxkit_store::cleanup(&outbox, &inbox, scope.into(), days).await?;

    println!(
        "Deleted outbox: {}, inbox: {} (total {})",
        report.outbox_deleted,
        report.inbox_deleted,
        report.total()
    );

    Ok(())
}
