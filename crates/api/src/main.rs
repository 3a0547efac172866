use std::sync::Arc;

use anyhow::Context;
use stockledger_infra::config::InventoryConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = InventoryConfig::from_env();
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let services = Arc::new(stockledger_api::app::services::build_services(&config));
    let app = stockledger_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        max_append_attempts = config.max_append_attempts,
        dead_stock_window_days = config.dead_stock_window_days,
        sweep_interval_secs = config.sweep_interval.map(|d| d.as_secs()),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    services.shutdown();
    tracing::info!("shutdown complete");
    Ok(())
}
