use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// One concrete `(provider, model, credential)` target of a virtual model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub provider_id: String,
    pub model_id: String,
    #[serde(default)]
    pub key_index: usize,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualModelConfig {
    /// Filled from the map key by `RouterConfig::normalized`.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher wins when the front door has to break ties between models.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub targets: Vec<TargetRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    RoundRobin,
    #[default]
    Weighted,
    LeastLoaded,
    PriorityFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Total per-request budget across all attempts, in milliseconds.
    #[serde(rename = "defaultTimeout", alias = "defaultTimeoutMs")]
    pub default_timeout_ms: u64,
    pub max_concurrent_requests: usize,
    pub max_failover_hops: u32,
    pub selection_strategy: SelectionStrategy,
    /// Exponential back-off base/cap for in-pipeline retries, milliseconds.
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_concurrent_requests: 64,
            max_failover_hops: 3,
            selection_strategy: SelectionStrategy::default(),
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Classifier override entry: `(adapterType, httpStatus) → action`. The
/// action tag and its parameters sit inline beside the match keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOverride {
    pub adapter_type: ProviderKind,
    pub http_status: u16,
    #[serde(flatten)]
    pub action: ErrorActionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ErrorActionConfig {
    #[serde(rename_all = "camelCase")]
    Retry {
        #[serde(default)]
        delay_ms: u64,
        #[serde(default = "default_one")]
        max_attempts: u32,
    },
    #[serde(rename_all = "camelCase")]
    Failover {
        #[serde(default)]
        destroy_current: bool,
    },
    #[serde(rename_all = "camelCase")]
    BlacklistTemporary { duration_ms: u64 },
    BlacklistPermanent,
    Maintenance,
    Surface,
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}
