//! `outboxkit-ingress` — standalone HTTP server exposing the inbound
//! webhook route (§6). Embedding applications that want the ingress
//! endpoint as part of a larger axum app should depend on this crate as a
//! library and mount `ingress::routes(state)` themselves instead of
//! running this binary.

use std::sync::Arc;

use anyhow::Result;
use outboxkit_config::Config;
use outboxkit_inbox::InboxAdmitter;
use outboxkit_ingress::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    outboxkit_shared::init_env();
    let _guard = outboxkit_shared::init_tracing("ingress");

    let config = Config::from_env()?;
    let pool = outboxkit_shared::init_db(&config).await?;
    outboxkit_shared::run_migrations(&pool).await?;

    let admitter = InboxAdmitter::new(pool);
    let state = AppState {
        admitter,
        headers: Arc::new(config.headers.clone()),
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "ingress listening");

    axum::serve(listener, outboxkit_ingress::routes(state)).await?;

    Ok(())
}
