//! Structured lifecycle events for every attempt.
//!
//! Emission is fire-and-forget through the hub; the scheduler never blocks on
//! a slow consumer and owns no buffering.

use std::time::Duration;

use rcc_provider_core::{EventHub, TraceEvent, TraceEventType, TracePosition};

use crate::context::RequestContext;

const MODULE_ID: &str = "virtual-model-scheduler";

#[derive(Clone)]
pub struct PipelineTracker {
    session_id: String,
    hub: EventHub,
}

impl PipelineTracker {
    pub fn new(session_id: impl Into<String>, hub: EventHub) -> Self {
        Self {
            session_id: session_id.into(),
            hub,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn attempt_start(&self, ctx: &RequestContext, pipeline_id: &str, attempt: u32) {
        self.hub.emit(TraceEvent::new(
            self.session_id.clone(),
            MODULE_ID,
            "attempt",
            TraceEventType::Start,
            if attempt == 1 {
                TracePosition::Start
            } else {
                TracePosition::Middle
            },
            serde_json::json!({
                "requestId": ctx.request_id,
                "virtualModel": ctx.virtual_model,
                "pipelineId": pipeline_id,
                "attempt": attempt,
            }),
        ));
    }

    pub fn attempt_end(
        &self,
        ctx: &RequestContext,
        pipeline_id: &str,
        attempt: u32,
        duration: Duration,
    ) {
        self.hub.emit(TraceEvent::new(
            self.session_id.clone(),
            MODULE_ID,
            "attempt",
            TraceEventType::End,
            TracePosition::End,
            serde_json::json!({
                "requestId": ctx.request_id,
                "virtualModel": ctx.virtual_model,
                "pipelineId": pipeline_id,
                "attempt": attempt,
                "success": true,
                "durationMs": duration.as_millis() as u64,
            }),
        ));
    }

    pub fn attempt_error(
        &self,
        ctx: &RequestContext,
        pipeline_id: &str,
        attempt: u32,
        error_kind: &str,
        http_status: Option<u16>,
    ) {
        self.hub.emit(TraceEvent::new(
            self.session_id.clone(),
            MODULE_ID,
            "attempt",
            TraceEventType::Error,
            TracePosition::Middle,
            serde_json::json!({
                "requestId": ctx.request_id,
                "virtualModel": ctx.virtual_model,
                "pipelineId": pipeline_id,
                "attempt": attempt,
                "errorKind": error_kind,
                "httpStatus": http_status,
            }),
        ));
    }

    /// Terminal failure that never reached a pipeline (admission, budget,
    /// empty pool).
    pub fn request_rejected(&self, ctx: &RequestContext, reason: &str) {
        self.hub.emit(TraceEvent::new(
            self.session_id.clone(),
            MODULE_ID,
            "request",
            TraceEventType::Error,
            TracePosition::End,
            serde_json::json!({
                "requestId": ctx.request_id,
                "virtualModel": ctx.virtual_model,
                "errorKind": reason,
            }),
        ));
    }
}
