use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    Start,
    End,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePosition {
    Start,
    Middle,
    End,
}

/// Structured debug event envelope.
///
/// Consumers subscribe through the hub; nothing in the core retains events
/// after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub session_id: String,
    pub module_id: String,
    pub operation_id: String,
    pub timestamp: SystemTime,
    #[serde(rename = "type")]
    pub event_type: TraceEventType,
    pub position: TracePosition,
    pub data: JsonValue,
}

impl TraceEvent {
    pub fn new(
        session_id: impl Into<String>,
        module_id: impl Into<String>,
        operation_id: impl Into<String>,
        event_type: TraceEventType,
        position: TracePosition,
        data: JsonValue,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            module_id: module_id.into(),
            operation_id: operation_id.into(),
            timestamp: SystemTime::now(),
            event_type,
            position,
            data,
        }
    }
}
