//! Configuration file loading for the binary.
//!
//! One JSON document: a `server` block for the listen address plus the router
//! configuration itself (providers, virtual models, scheduler, overrides).
//! The path comes from `RCC_CONFIG`, defaulting to `./rcc.json`. Unknown
//! fields are tolerated everywhere for forward compatibility.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use rcc_common::ServerConfig;
use rcc_provider_core::RouterConfig;

const CONFIG_ENV: &str = "RCC_CONFIG";
const DEFAULT_PATH: &str = "rcc.json";

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(flatten)]
    pub router: RouterConfig,
}

pub fn load() -> Result<AppConfig> {
    let path = PathBuf::from(std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_PATH.to_string()));
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading configuration file {}", path.display()))?;
    let config: AppConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let router = config.router.normalized();
    router
        .validate()
        .map_err(|err| anyhow::anyhow!(err.to_string()))
        .context("configuration rejected")?;
    Ok(AppConfig {
        server: config.server,
        router,
    })
}
