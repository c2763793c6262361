use anyhow::Result;
use tracing_subscriber::EnvFilter;

use driftpage_common::Config;
use driftpage_server::{build_state, routes};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting driftpage gateway");

    let config = Config::from_env();
    config.log_redacted();

    let prewarm = config.prefetch_prewarm;
    let addr = format!("{}:{}", config.web_host, config.web_port);
    let state = build_state(config);

    if prewarm > 0 && state.config.has_llm_credentials() {
        let prefetcher = state.prefetcher.clone();
        tokio::spawn(async move {
            prefetcher.prewarm(prewarm).await;
        });
    }

    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}
