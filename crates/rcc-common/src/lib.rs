use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// One attempt against one pipeline, as recorded by the scheduler.
///
/// The trail accumulates across retries and failover hops and is attached to
/// the terminal error (and to metrics/trace events) so callers can see what
/// the router actually tried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub pipeline_id: String,
    pub started_at: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<SystemTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl AttemptRecord {
    pub fn begin(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            started_at: SystemTime::now(),
            ended_at: None,
            error_kind: None,
            http_status: None,
        }
    }

    pub fn succeed(mut self) -> Self {
        self.ended_at = Some(SystemTime::now());
        self
    }

    pub fn fail(mut self, error_kind: impl Into<String>, http_status: Option<u16>) -> Self {
        self.ended_at = Some(SystemTime::now());
        self.error_kind = Some(error_kind.into());
        self.http_status = http_status;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteErrorKind {
    UnknownVirtualModel,
    NoTargetAvailable,
    Overloaded,
    Upstream {
        error_kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
    },
    Cancelled,
    DeadlineExceeded,
    ConfigurationError,
}

impl RouteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteErrorKind::UnknownVirtualModel => "unknown_virtual_model",
            RouteErrorKind::NoTargetAvailable => "no_target_available",
            RouteErrorKind::Overloaded => "overloaded",
            RouteErrorKind::Upstream { .. } => "upstream_error",
            RouteErrorKind::Cancelled => "cancelled",
            RouteErrorKind::DeadlineExceeded => "deadline_exceeded",
            RouteErrorKind::ConfigurationError => "configuration_error",
        }
    }
}

/// Terminal routing failure returned to the front door.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct RouteError {
    pub kind: RouteErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptRecord>,
}

impl RouteError {
    pub fn new(kind: RouteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<AttemptRecord>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn unknown_virtual_model(id: &str) -> Self {
        Self::new(
            RouteErrorKind::UnknownVirtualModel,
            format!("no scheduler for virtual model {id:?}"),
        )
    }

    pub fn overloaded(virtual_model: &str, limit: usize) -> Self {
        Self::new(
            RouteErrorKind::Overloaded,
            format!("virtual model {virtual_model:?} is at its concurrency limit ({limit})"),
        )
    }

    pub fn no_target(virtual_model: &str) -> Self {
        Self::new(
            RouteErrorKind::NoTargetAvailable,
            format!("no available pipeline for virtual model {virtual_model:?}"),
        )
    }

    pub fn deadline_exceeded(virtual_model: &str) -> Self {
        Self::new(
            RouteErrorKind::DeadlineExceeded,
            format!("request budget exhausted for virtual model {virtual_model:?}"),
        )
    }
}

/// Listen address for the front door binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5506
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn new_trace_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_record_keeps_failure_details() {
        let rec = AttemptRecord::begin("vm::p::m::0").fail("rate_limited", Some(429));
        assert_eq!(rec.error_kind.as_deref(), Some("rate_limited"));
        assert_eq!(rec.http_status, Some(429));
        assert!(rec.ended_at.is_some());
    }

    #[test]
    fn server_config_defaults_apply_for_empty_document() {
        let cfg: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }
}
