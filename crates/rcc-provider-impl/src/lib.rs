//! Concrete provider adapters.
//!
//! Each adapter translates the canonical chat shape to one upstream wire
//! format, normalises upstream failures into `AdapterError`, and performs IO
//! exclusively through the injected `HttpTransport`.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use rcc_provider_core::{
    AdapterRegistry, ConfigError, HttpTransport, ProviderConfig, ProviderKind, RouterConfig,
};

pub mod auth;
pub mod oauth;
pub mod providers;

pub use oauth::{MemoryTokenStore, OAuthToken, TokenStore};

#[derive(Debug)]
pub enum BuildError {
    Config(ConfigError),
    Adapter { provider: String, reason: String },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Config(err) => write!(f, "{err}"),
            BuildError::Adapter { provider, reason } => {
                write!(f, "provider {provider:?} rejected its configuration: {reason}")
            }
        }
    }
}

impl Error for BuildError {}

impl From<ConfigError> for BuildError {
    fn from(err: ConfigError) -> Self {
        BuildError::Config(err)
    }
}

/// Instantiate one adapter per configured provider.
///
/// Fails fast: a bad endpoint, missing keys, or an adapter rejecting its own
/// configuration aborts registry construction entirely.
pub fn build_registry(
    config: &RouterConfig,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenStore>,
) -> Result<AdapterRegistry, BuildError> {
    config.validate()?;
    let mut registry = AdapterRegistry::new();
    for provider in config.providers.values() {
        let adapter = build_adapter(provider, transport.clone(), tokens.clone())?;
        registry.register(adapter);
    }
    Ok(registry)
}

fn build_adapter(
    config: &ProviderConfig,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenStore>,
) -> Result<Arc<dyn rcc_provider_core::ProviderAdapter>, BuildError> {
    let reject = |reason: String| BuildError::Adapter {
        provider: config.id.clone(),
        reason,
    };
    let adapter: Arc<dyn rcc_provider_core::ProviderAdapter> = match config.kind {
        ProviderKind::OpenAI => Arc::new(
            providers::openai::OpenAiAdapter::from_config(config, transport).map_err(reject)?,
        ),
        ProviderKind::Anthropic => Arc::new(
            providers::anthropic::AnthropicAdapter::from_config(config, transport)
                .map_err(reject)?,
        ),
        ProviderKind::Qwen => Arc::new(
            providers::qwen::QwenAdapter::from_config(config, transport, tokens)
                .map_err(reject)?,
        ),
        ProviderKind::IFlow => Arc::new(
            providers::iflow::IFlowAdapter::from_config(config, transport, tokens)
                .map_err(reject)?,
        ),
        ProviderKind::Gemini => Arc::new(
            providers::gemini::GeminiAdapter::from_config(config, transport).map_err(reject)?,
        ),
    };
    Ok(adapter)
}

#[cfg(test)]
pub(crate) mod test_support;
