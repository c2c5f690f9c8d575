use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Closed set of upstream API families; picks the adapter at registry build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Qwen,
    IFlow,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Qwen => "qwen",
            ProviderKind::IFlow => "iflow",
            ProviderKind::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "apiKey", alias = "api-key", alias = "api_key")]
    ApiKey,
    #[serde(rename = "oauth2-device", alias = "oauth2_device")]
    OAuth2Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(rename = "kind")]
    pub method: AuthMethod,
    /// API keys, or opaque account labels for OAuth providers.
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_code_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl AuthConfig {
    /// Number of credential slots a target's `keyIndex` may address. OAuth
    /// providers without explicit account labels get a single slot.
    pub fn key_slots(&self) -> usize {
        if self.keys.is_empty() && self.method == AuthMethod::OAuth2Device {
            1
        } else {
            self.keys.len()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(default)]
    pub context_length: u64,
    #[serde(default)]
    pub supports_functions: bool,
}

/// One upstream provider entry of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Filled from the map key by `RouterConfig::normalized`.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub endpoint: String,
    #[serde(default)]
    pub models: IndexMap<String, ModelConfig>,
    pub auth: AuthConfig,
}

impl ProviderConfig {
    pub fn declares_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }
}
