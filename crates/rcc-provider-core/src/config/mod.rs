mod provider;
mod routing;

use std::error::Error;
use std::fmt;

pub use provider::{AuthConfig, AuthMethod, ModelConfig, ProviderConfig, ProviderKind};
pub use routing::{
    ErrorActionConfig, ErrorOverride, SchedulerConfig, SelectionStrategy, TargetRef,
    VirtualModelConfig,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The validated configuration document consumed by assembly.
///
/// Keys of the `providers` / `virtualModels` maps are the canonical ids; the
/// embedded `id` fields are filled from the keys by [`RouterConfig::normalized`]
/// so the rest of the code never has to carry the map context around.
/// Unknown fields anywhere in the document are tolerated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
    #[serde(default)]
    pub virtual_models: IndexMap<String, VirtualModelConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub error_overrides: Vec<ErrorOverride>,
}

impl RouterConfig {
    pub fn normalized(mut self) -> Self {
        for (id, provider) in self.providers.iter_mut() {
            provider.id = id.clone();
        }
        for (id, vm) in self.virtual_models.iter_mut() {
            vm.id = id.clone();
        }
        self
    }

    /// Provider-level checks the registry relies on. Target-level referential
    /// integrity is assembly's job and is reported as warnings there.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, provider) in &self.providers {
            if !(provider.endpoint.starts_with("http://")
                || provider.endpoint.starts_with("https://"))
            {
                return Err(ConfigError::BadEndpoint {
                    provider: id.clone(),
                    endpoint: provider.endpoint.clone(),
                });
            }
            if provider.auth.method == AuthMethod::ApiKey && provider.auth.keys.is_empty() {
                return Err(ConfigError::MissingKeys {
                    provider: id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    BadEndpoint { provider: String, endpoint: String },
    MissingKeys { provider: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BadEndpoint { provider, endpoint } => {
                write!(f, "provider {provider:?}: endpoint {endpoint:?} is not an http(s) URL")
            }
            ConfigError::MissingKeys { provider } => {
                write!(f, "provider {provider:?}: api-key auth requires at least one key")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "providers": {
            "qwen-main": {
                "type": "qwen",
                "endpoint": "https://dashscope.example.com",
                "models": {"qwen-max": {"contextLength": 32768, "supportsFunctions": false}},
                "auth": {"kind": "oauth2-device", "keys": ["default"]}
            },
            "oai": {
                "type": "openai",
                "endpoint": "https://api.openai.com",
                "models": {"gpt-4o": {"contextLength": 128000, "supportsFunctions": true}},
                "auth": {"kind": "apiKey", "keys": ["sk-a", "sk-b"]}
            }
        },
        "virtualModels": {
            "vm-default": {
                "enabled": true,
                "priority": 5,
                "targets": [
                    {"providerId": "oai", "modelId": "gpt-4o", "keyIndex": 1, "weight": 3},
                    {"providerId": "qwen-main", "modelId": "qwen-max"}
                ]
            }
        },
        "scheduler": {"defaultTimeout": 30000, "maxFailoverHops": 3},
        "futureKnob": {"ignored": true}
    }"#;

    #[test]
    fn document_parses_with_defaults_and_unknown_fields() {
        let cfg: RouterConfig = serde_json::from_str(SAMPLE).unwrap();
        let cfg = cfg.normalized();
        assert_eq!(cfg.providers.len(), 2);
        assert_eq!(cfg.providers["oai"].id, "oai");

        let vm = &cfg.virtual_models["vm-default"];
        assert_eq!(vm.id, "vm-default");
        assert_eq!(vm.targets[0].key_index, 1);
        assert_eq!(vm.targets[0].weight, 3);
        // Defaults: keyIndex 0, weight 1, enabled true.
        assert_eq!(vm.targets[1].key_index, 0);
        assert_eq!(vm.targets[1].weight, 1);
        assert!(vm.targets[1].enabled);

        assert_eq!(cfg.scheduler.max_failover_hops, 3);
        assert_eq!(cfg.scheduler.max_concurrent_requests, 64);
        cfg.validate().unwrap();
    }

    #[test]
    fn error_overrides_parse_with_inline_action_tags() {
        let raw = r#"{
            "errorOverrides": [
                {"adapterType": "openai", "httpStatus": 529,
                 "action": "blacklistTemporary", "durationMs": 15000},
                {"adapterType": "gemini", "httpStatus": 500, "action": "surface"},
                {"adapterType": "qwen", "httpStatus": 500,
                 "action": "retry", "delayMs": 250, "maxAttempts": 2}
            ]
        }"#;
        let cfg: RouterConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.error_overrides.len(), 3);
        assert_eq!(
            cfg.error_overrides[0].action,
            ErrorActionConfig::BlacklistTemporary { duration_ms: 15000 }
        );
        assert_eq!(cfg.error_overrides[1].action, ErrorActionConfig::Surface);
        assert_eq!(
            cfg.error_overrides[2].action,
            ErrorActionConfig::Retry {
                delay_ms: 250,
                max_attempts: 2
            }
        );
    }

    #[test]
    fn api_key_provider_without_keys_is_rejected() {
        let raw = r#"{
            "providers": {
                "p": {
                    "type": "openai",
                    "endpoint": "https://api.example.com",
                    "auth": {"kind": "apiKey", "keys": []}
                }
            }
        }"#;
        let cfg: RouterConfig = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingKeys { .. })
        ));
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let raw = r#"{
            "providers": {
                "p": {
                    "type": "gemini",
                    "endpoint": "ftp://nope",
                    "auth": {"kind": "apiKey", "keys": ["k"]}
                }
            }
        }"#;
        let cfg: RouterConfig = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BadEndpoint { .. })
        ));
    }
}
