//! One executable path: fixed adapter, fixed model, fixed credential index.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::time::Instant;

use rcc_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse};
use rcc_provider_core::{
    AdapterResult, AuthState, CallContext, ProviderAdapter, ProviderKind,
};

use crate::context::RequestContext;
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};

const DEGRADED_AFTER_CONSECUTIVE_ERRORS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineHealth {
    Healthy,
    Degraded(String),
    Unavailable(String),
}

/// The smallest unit of scheduling and blacklisting.
///
/// Identity is the deterministic `{vm}::{provider}::{model}::{keyIndex}`
/// string; `index` is the stable position inside the owning pool.
pub struct Pipeline {
    id: String,
    index: usize,
    virtual_model: String,
    provider: String,
    model: String,
    key_index: usize,
    weight: u32,
    adapter: Arc<dyn ProviderAdapter>,
    in_flight: AtomicUsize,
    consecutive_errors: AtomicU32,
    metrics: PipelineMetrics,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        virtual_model: &str,
        provider: &str,
        model: &str,
        key_index: usize,
        weight: u32,
        index: usize,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            id: format!("{virtual_model}::{provider}::{model}::{key_index}"),
            index,
            virtual_model: virtual_model.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            key_index,
            weight: weight.max(1),
            adapter,
            in_flight: AtomicUsize::new(0),
            consecutive_errors: AtomicU32::new(0),
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn adapter_kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn uses_oauth(&self) -> bool {
        !matches!(self.adapter.auth_status().state, AuthState::Static)
    }

    pub fn call_context(&self, ctx: &RequestContext, attempt_no: u32) -> CallContext {
        CallContext {
            request_id: ctx.request_id.clone(),
            trace_id: ctx.trace_id.clone(),
            virtual_model: self.virtual_model.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            key_index: self.key_index,
            attempt_no,
        }
    }

    /// Context for out-of-band calls (auth refresh, health probes).
    pub fn internal_context(&self, operation: &str) -> CallContext {
        CallContext {
            request_id: format!("{operation}:{}", self.id),
            trace_id: None,
            virtual_model: self.virtual_model.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            key_index: self.key_index,
            attempt_no: 0,
        }
    }

    /// Pin the request to this pipeline's model and credential, call the
    /// adapter, and annotate any failure with the pipeline id.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        attempt_no: u32,
        req: &ChatCompletionRequest,
    ) -> AdapterResult<ChatCompletionResponse> {
        let call_ctx = self.call_context(ctx, attempt_no);
        let mut req = req.clone();
        req.model = self.model.clone();

        let _busy = BusyGuard::enter(&self.in_flight);
        let started = Instant::now();
        match self.adapter.execute(&call_ctx, req).await {
            Ok(resp) => {
                self.metrics.record_success(started.elapsed());
                self.consecutive_errors.store(0, Ordering::Relaxed);
                Ok(resp)
            }
            Err(mut err) => {
                self.metrics.record_failure(err.kind, started.elapsed());
                self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                err.pipeline_id = Some(self.id.clone());
                Err(err)
            }
        }
    }

    /// Composite of adapter health and the local error streak. Pool-level
    /// availability (blacklists, maintenance) is layered on by the pool.
    pub async fn health(&self) -> PipelineHealth {
        let ctx = self.internal_context("health");
        if let Err(err) = self.adapter.health_check(&ctx).await {
            return PipelineHealth::Unavailable(err.to_string());
        }
        let streak = self.consecutive_errors.load(Ordering::Relaxed);
        if streak >= DEGRADED_AFTER_CONSECUTIVE_ERRORS {
            return PipelineHealth::Degraded(format!("{streak} consecutive errors"));
        }
        PipelineHealth::Healthy
    }

    pub fn metrics_snapshot(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }
}

struct BusyGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> BusyGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
