//! The single root of runtime state: one scheduler per virtual model.
//!
//! The `virtualModelId → scheduler` map is written only at initialisation and
//! at configuration reload, both of which swap the whole map under the init
//! lock; `route` reads it lock-free through `arc-swap`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use rcc_common::{RouteError, RouteErrorKind};
use rcc_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse};
use rcc_provider_core::{AdapterRegistry, EventHub, RouterConfig};

use crate::assemble::assemble;
use crate::classify::ErrorClassifier;
use crate::context::RequestContext;
use crate::metrics::SchedulerMetricsSnapshot;
use crate::pool::PipelinePool;
use crate::scheduler::{SchedulerLimits, VirtualModelScheduler};
use crate::tracker::PipelineTracker;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualModelMapping {
    pub virtual_model_id: String,
    pub scheduler_id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStateSnapshot {
    pub pipeline_id: String,
    pub state: String,
    pub metrics: crate::metrics::PipelineMetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualModelSnapshot {
    pub scheduler: SchedulerMetricsSnapshot,
    pub in_flight: usize,
    pub pipelines: Vec<PipelineStateSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub per_vm: BTreeMap<String, VirtualModelSnapshot>,
    pub overall: OverallSnapshot,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub in_flight: usize,
}

pub struct SchedulerManager {
    schedulers: ArcSwap<HashMap<String, Arc<VirtualModelScheduler>>>,
    events: EventHub,
    session_id: String,
    /// Serialises initialize/reload/shutdown; `route` never takes it.
    lifecycle: Mutex<LifecycleState>,
    draining: std::sync::atomic::AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    New,
    Initialized,
    Draining,
}

impl SchedulerManager {
    pub fn new(events: EventHub) -> Self {
        Self {
            schedulers: ArcSwap::from_pointee(HashMap::new()),
            events,
            session_id: rcc_common::new_trace_id(),
            lifecycle: Mutex::new(LifecycleState::New),
            draining: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// One-shot construction of schedulers from assembled pools. A second
    /// call is an idempotent no-op.
    pub async fn initialize(
        &self,
        pools: HashMap<String, Arc<PipelinePool>>,
        config: &RouterConfig,
    ) {
        let mut lifecycle = self.lifecycle.lock().await;
        if *lifecycle != LifecycleState::New {
            return;
        }
        self.install(pools, config);
        *lifecycle = LifecycleState::Initialized;
    }

    /// Wholesale swap of the scheduler map from a fresh configuration
    /// snapshot. Replacing the pools clears every blacklist, including
    /// permanent ones.
    pub async fn reload(&self, config: &RouterConfig, registry: &AdapterRegistry) -> Vec<String> {
        let lifecycle = self.lifecycle.lock().await;
        if *lifecycle == LifecycleState::Draining {
            return vec!["manager is shutting down; reload ignored".to_string()];
        }
        let output = assemble(config, registry, &self.events);
        self.install(output.pools, config);
        output.warnings
    }

    fn install(&self, pools: HashMap<String, Arc<PipelinePool>>, config: &RouterConfig) {
        let classifier = Arc::new(ErrorClassifier::new(
            &config.error_overrides,
            &config.scheduler,
        ));
        let limits = SchedulerLimits::from(&config.scheduler);
        let mut schedulers = HashMap::new();
        for (vm_id, pool) in pools {
            pool.start();
            let tracker = PipelineTracker::new(self.session_id.clone(), self.events.clone());
            let scheduler =
                VirtualModelScheduler::new(pool, limits, classifier.clone(), tracker);
            schedulers.insert(vm_id, Arc::new(scheduler));
        }
        self.schedulers.store(Arc::new(schedulers));
    }

    /// Route one canonical chat request to the scheduler owning
    /// `virtual_model_id`.
    pub async fn route(
        &self,
        ctx: RequestContext,
        virtual_model_id: &str,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, RouteError> {
        if self.draining.load(std::sync::atomic::Ordering::Acquire) {
            return Err(RouteError::new(
                RouteErrorKind::Overloaded,
                "router is shutting down",
            ));
        }
        let scheduler = {
            let map = self.schedulers.load();
            map.get(virtual_model_id).cloned()
        };
        let Some(scheduler) = scheduler else {
            return Err(RouteError::unknown_virtual_model(virtual_model_id));
        };
        scheduler.handle(&ctx, req).await
    }

    /// Read-only introspection of the routing table.
    pub fn mappings(&self) -> Vec<VirtualModelMapping> {
        let map = self.schedulers.load();
        let mut out: Vec<VirtualModelMapping> = map
            .values()
            .map(|scheduler| VirtualModelMapping {
                virtual_model_id: scheduler.virtual_model().to_string(),
                scheduler_id: scheduler.scheduler_id().to_string(),
                enabled: true,
            })
            .collect();
        out.sort_by(|a, b| a.virtual_model_id.cmp(&b.virtual_model_id));
        out
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let map = self.schedulers.load_full();
        let mut per_vm = BTreeMap::new();
        let mut overall = OverallSnapshot::default();
        for (vm_id, scheduler) in map.iter() {
            let scheduler_snapshot = scheduler.metrics_snapshot();
            overall.successes += scheduler_snapshot.successes;
            overall.failures += scheduler_snapshot.failures.values().sum::<u64>();
            overall.in_flight += scheduler.in_flight();

            let pool = scheduler.pool();
            let mut pipelines = Vec::with_capacity(pool.len());
            for (index, pipeline) in pool.pipelines().iter().enumerate() {
                let state = pool
                    .availability_of(index)
                    .await
                    .map(|a| a.label().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                pipelines.push(PipelineStateSnapshot {
                    pipeline_id: pipeline.id().to_string(),
                    state,
                    metrics: pipeline.metrics_snapshot(),
                });
            }
            per_vm.insert(
                vm_id.clone(),
                VirtualModelSnapshot {
                    scheduler: scheduler_snapshot,
                    in_flight: scheduler.in_flight(),
                    pipelines,
                },
            );
        }
        MetricsSnapshot { per_vm, overall }
    }

    /// Drain: stop taking new work, wait for in-flight requests to finish or
    /// the deadline to pass, then report. Callers force-cancel by dropping
    /// their request futures.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RouteError> {
        self.draining
            .store(true, std::sync::atomic::Ordering::Release);
        {
            let mut lifecycle = self.lifecycle.lock().await;
            *lifecycle = LifecycleState::Draining;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let outstanding: usize = {
                let map = self.schedulers.load();
                map.values().map(|s| s.in_flight()).sum()
            };
            if outstanding == 0 {
                self.schedulers.store(Arc::new(HashMap::new()));
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.schedulers.store(Arc::new(HashMap::new()));
                return Err(RouteError::new(
                    RouteErrorKind::DeadlineExceeded,
                    format!("shutdown deadline passed with {outstanding} requests in flight"),
                ));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
