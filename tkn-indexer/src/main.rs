//! tkn-indexer
//!
//! Token chain indexer service: discovers token chains on the base ledger,
//! keeps their replay state durable, and serves the query API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tkn_indexer::api::app_router;
use tkn_indexer::{ChainManager, Config, Store};
use tkn_ledger::RpcClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tkn_indexer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("node RPC: {}", config.rpc_url);
    if let Some(ws_url) = &config.ws_url {
        tracing::info!("confirmation feed: {ws_url}");
    }

    let node = Arc::new(RpcClient::new(config.rpc_url.clone()));
    let store = Store::new(&config.db_path);
    let manager = ChainManager::new(node, store).await?;

    // an unreachable node at startup is fatal; later failures are retried
    manager
        .scan()
        .await
        .context("initial ledger scan failed")?;
    manager.spawn_loops(&config);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!("query API listening on {}", config.listen);
    axum::serve(listener, app_router(manager).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("shutdown signal received");
}
