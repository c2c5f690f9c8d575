//! Per-virtual-model dispatcher: admission, selection, execution, the retry
//! loop, and failover.
//!
//! The loop reads the classifier's verdict like a table: `Retry` stays on the
//! same pipeline, everything except `Surface` consumes a failover hop, and the
//! global deadline always wins over any individual back-off.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::time::Instant;

use rcc_common::{AttemptRecord, RouteError, RouteErrorKind};
use rcc_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse};
use rcc_provider_core::{AdapterError, AdapterErrorKind, SchedulerConfig, SelectionStrategy};

use crate::classify::{ClassifyInput, ErrorClassifier, RecoveryAction};
use crate::context::RequestContext;
use crate::metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
use crate::pipeline::Pipeline;
use crate::pool::PipelinePool;
use crate::recovery::RecoveryCoordinator;
use crate::tracker::PipelineTracker;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerLimits {
    pub max_concurrent_requests: usize,
    pub request_timeout: std::time::Duration,
    pub max_failover_hops: u32,
    pub selection_strategy: SelectionStrategy,
}

impl From<&SchedulerConfig> for SchedulerLimits {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            max_concurrent_requests: cfg.max_concurrent_requests,
            request_timeout: cfg.request_timeout(),
            max_failover_hops: cfg.max_failover_hops,
            selection_strategy: cfg.selection_strategy,
        }
    }
}

pub struct VirtualModelScheduler {
    virtual_model: String,
    scheduler_id: String,
    pool: Arc<PipelinePool>,
    limits: SchedulerLimits,
    classifier: Arc<ErrorClassifier>,
    coordinator: RecoveryCoordinator,
    tracker: PipelineTracker,
    in_flight: AtomicUsize,
    metrics: SchedulerMetrics,
}

impl VirtualModelScheduler {
    pub fn new(
        pool: Arc<PipelinePool>,
        limits: SchedulerLimits,
        classifier: Arc<ErrorClassifier>,
        tracker: PipelineTracker,
    ) -> Self {
        Self {
            virtual_model: pool.virtual_model().to_string(),
            scheduler_id: format!("sched-{}", uuid::Uuid::new_v4()),
            pool,
            limits,
            classifier,
            coordinator: RecoveryCoordinator::new(),
            tracker,
            in_flight: AtomicUsize::new(0),
            metrics: SchedulerMetrics::new(),
        }
    }

    pub fn virtual_model(&self) -> &str {
        &self.virtual_model
    }

    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    pub fn pool(&self) -> &Arc<PipelinePool> {
        &self.pool
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn tracker(&self) -> &PipelineTracker {
        &self.tracker
    }

    pub fn metrics_snapshot(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn handle(
        &self,
        ctx: &RequestContext,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, RouteError> {
        // Admission control.
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, self.limits.max_concurrent_requests)
        else {
            self.tracker.request_rejected(ctx, "overloaded");
            return Err(self.terminal(RouteError::overloaded(
                &self.virtual_model,
                self.limits.max_concurrent_requests,
            )));
        };

        // Total budget across all attempts; an earlier caller deadline wins.
        let started = Instant::now();
        let own_deadline = started + self.limits.request_timeout;
        let deadline = match ctx.deadline {
            Some(caller) if caller < own_deadline => caller,
            _ => own_deadline,
        };
        if Instant::now() >= deadline {
            self.tracker.request_rejected(ctx, "deadline_exceeded");
            return Err(self.terminal(RouteError::deadline_exceeded(&self.virtual_model)));
        }

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut excluded: HashSet<usize> = HashSet::new();
        let mut last_error: Option<AdapterError> = None;
        let mut hops: u32 = 0;

        'hops: while hops < self.limits.max_failover_hops {
            let Some(pipeline) = self.pool.select(&excluded).await else {
                // No hop is consumed by an empty pool; fail fast.
                self.tracker.request_rejected(ctx, "no_target_available");
                return Err(self.terminal(
                    RouteError::no_target(&self.virtual_model).with_attempts(attempts),
                ));
            };

            let mut retry_count: u32 = 0;
            let mut auth_retry_used = false;

            loop {
                let now = Instant::now();
                if now >= deadline {
                    return Err(self.terminal(
                        RouteError::deadline_exceeded(&self.virtual_model).with_attempts(attempts),
                    ));
                }
                let remaining = deadline - now;

                let attempt_no = attempts.len() as u32 + 1;
                let record = AttemptRecord::begin(pipeline.id());
                self.tracker.attempt_start(ctx, pipeline.id(), attempt_no);
                let attempt_started = Instant::now();

                let outcome =
                    tokio::time::timeout(remaining, pipeline.execute(ctx, attempt_no, req)).await;

                match outcome {
                    // Global budget exhausted mid-call; the adapter future is
                    // dropped, which cancels the upstream IO.
                    Err(_) => {
                        attempts.push(record.fail(AdapterErrorKind::Timeout.as_str(), None));
                        self.tracker.attempt_error(
                            ctx,
                            pipeline.id(),
                            attempt_no,
                            AdapterErrorKind::Timeout.as_str(),
                            None,
                        );
                        return Err(self.terminal(
                            RouteError::deadline_exceeded(&self.virtual_model)
                                .with_attempts(attempts),
                        ));
                    }

                    Ok(Ok(response)) => {
                        attempts.push(record.succeed());
                        self.tracker.attempt_end(
                            ctx,
                            pipeline.id(),
                            attempt_no,
                            attempt_started.elapsed(),
                        );
                        self.metrics.record_success(started.elapsed());
                        return Ok(response);
                    }

                    Ok(Err(error)) => {
                        attempts.push(record.fail(error.kind.as_str(), error.http_status));
                        self.tracker.attempt_error(
                            ctx,
                            pipeline.id(),
                            attempt_no,
                            error.kind.as_str(),
                            error.http_status,
                        );

                        // Cancellation propagates unchanged; never retried.
                        if error.kind == AdapterErrorKind::Cancelled {
                            return Err(self.terminal(
                                RouteError::new(RouteErrorKind::Cancelled, error.to_string())
                                    .with_attempts(attempts),
                            ));
                        }

                        let action = self.classifier.classify(ClassifyInput {
                            error: &error,
                            adapter_kind: pipeline.adapter_kind(),
                            oauth: pipeline.uses_oauth(),
                            auth_retry_used,
                            retry_count,
                        });
                        self.coordinator
                            .apply(&self.pool, &pipeline, error.kind, &action, &mut excluded)
                            .await;

                        match action {
                            RecoveryAction::Retry { delay, .. } => {
                                if error.kind == AdapterErrorKind::AuthExpired {
                                    auth_retry_used = true;
                                    if !self.forced_refresh(&pipeline, &mut excluded).await {
                                        last_error = Some(error);
                                        hops += 1;
                                        continue 'hops;
                                    }
                                }
                                if !delay.is_zero() {
                                    if Instant::now() + delay >= deadline {
                                        return Err(self.terminal(
                                            RouteError::deadline_exceeded(&self.virtual_model)
                                                .with_attempts(attempts),
                                        ));
                                    }
                                    tokio::time::sleep(delay).await;
                                }
                                retry_count += 1;
                                last_error = Some(error);
                                // Same pipeline, no hop consumed.
                            }

                            RecoveryAction::Surface => {
                                return Err(self.terminal(
                                    upstream_error(&error).with_attempts(attempts),
                                ));
                            }

                            _ => {
                                last_error = Some(error);
                                hops += 1;
                                continue 'hops;
                            }
                        }
                    }
                }
            }
        }

        // Failover budget exhausted: surface the last upstream failure.
        let err = match &last_error {
            Some(error) => upstream_error(error),
            None => RouteError::no_target(&self.virtual_model),
        };
        Err(self.terminal(err.with_attempts(attempts)))
    }

    /// Forced token refresh before an auth retry. On failure the pipeline
    /// goes to maintenance and the request moves on.
    async fn forced_refresh(
        &self,
        pipeline: &Arc<Pipeline>,
        excluded: &mut HashSet<usize>,
    ) -> bool {
        let refresh_ctx = pipeline.internal_context("auth-retry");
        match pipeline.adapter().refresh_auth(&refresh_ctx).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    pipeline = pipeline.id(),
                    error = %err,
                    "forced token refresh failed"
                );
                self.coordinator
                    .apply(
                        &self.pool,
                        pipeline,
                        AdapterErrorKind::AuthExpired,
                        &RecoveryAction::Maintenance,
                        excluded,
                    )
                    .await;
                false
            }
        }
    }

    fn terminal(&self, err: RouteError) -> RouteError {
        self.metrics.record_failure(&err.kind);
        err
    }
}

fn upstream_error(error: &AdapterError) -> RouteError {
    RouteError::new(
        RouteErrorKind::Upstream {
            error_kind: error.kind.as_str().to_string(),
            http_status: error.http_status,
        },
        error.to_string(),
    )
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    /// Increment unless the cap is reached. The guard's drop runs on every
    /// terminal path, cancellation included, so the counter always returns
    /// to zero when no requests are outstanding.
    fn acquire(counter: &'a AtomicUsize, limit: usize) -> Option<Self> {
        loop {
            let current = counter.load(Ordering::Acquire);
            if current >= limit {
                return None;
            }
            if counter
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(Self { counter });
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
