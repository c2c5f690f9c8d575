use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

mod config;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let app_config = config::load()?;

    let transport: Arc<dyn rcc_provider_core::HttpTransport> = Arc::new(
        rcc_core::WreqTransport::new(rcc_core::TransportConfig::default())
            .context("building upstream http client")?,
    );
    let tokens: Arc<dyn rcc_provider_impl::TokenStore> =
        Arc::new(rcc_provider_impl::MemoryTokenStore::new());

    let runtime = rcc_core::bootstrap(app_config.router, transport, tokens).await?;
    for warning in &runtime.warnings {
        tracing::warn!(%warning, "assembly");
    }
    if std::env::var("RCC_TRACE").is_ok_and(|v| v == "1") {
        runtime
            .events
            .add_sink(Arc::new(rcc_provider_core::TerminalEventSink::new()));
    }

    let app = rcc_router::api_router(runtime.manager.clone());
    let bind = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "listening");

    let manager = runtime.manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    if let Err(err) = manager.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!(error = %err, "drain incomplete");
    }
    runtime.registry.stop_all().await;
    Ok(())
}
