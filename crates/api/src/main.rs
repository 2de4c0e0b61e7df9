use std::sync::Arc;

use anyhow::Context;

use hookguard_api::app::{build_app, services};
use hookguard_core::ReliabilityConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hookguard_observability::init();

    let config = ReliabilityConfig::from_env().context("invalid HOOKGUARD_* configuration")?;
    let bind_addr = config.bind_addr.clone();

    let services = Arc::new(services::build_services(config).await);
    let scheduler = services::background_jobs(&services).start();

    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        store = services.store.backend(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    scheduler.shutdown().await;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
