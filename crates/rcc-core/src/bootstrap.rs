//! Wires a validated configuration into a running router core.

use std::sync::Arc;

use anyhow::Context;

use rcc_provider_core::{AdapterRegistry, EventHub, HttpTransport, RouterConfig};
use rcc_provider_impl::{TokenStore, build_registry};

use crate::assemble::assemble;
use crate::manager::SchedulerManager;

pub struct Runtime {
    pub manager: Arc<SchedulerManager>,
    pub registry: Arc<AdapterRegistry>,
    pub events: EventHub,
    pub warnings: Vec<String>,
}

pub async fn bootstrap(
    config: RouterConfig,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenStore>,
) -> anyhow::Result<Runtime> {
    let config = config.normalized();
    let events = EventHub::new(256);

    let registry = Arc::new(
        build_registry(&config, transport, tokens)
            .map_err(|err| anyhow::anyhow!(err.to_string()))
            .context("adapter registry construction failed")?,
    );
    registry
        .start_all()
        .await
        .map_err(|err| anyhow::anyhow!(err.to_string()))
        .context("adapter startup failed")?;

    let output = assemble(&config, &registry, &events);
    let manager = Arc::new(SchedulerManager::new(events.clone()));
    manager.initialize(output.pools, &config).await;

    Ok(Runtime {
        manager,
        registry,
        events,
        warnings: output.warnings,
    })
}
