//! Ordered, weighted collection of pipelines for one virtual model.
//!
//! Availability bits live behind a read-write lock: selection takes the read
//! lock, blacklisting/reinstatement the write lock. Pipeline order is fixed at
//! assembly; selection strategies index into it and must stay stable.

mod reinstate;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use rcc_provider_core::{
    EventHub, SelectionStrategy, TraceEvent, TraceEventType, TracePosition,
};

use crate::pipeline::Pipeline;

pub(crate) use reinstate::ReinstateQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableKind {
    RateLimit,
    Timeout,
    UpstreamError,
    AuthInvalid,
    FailoverCooldown,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    TemporarilyBlacklisted {
        until: Instant,
        reason: UnavailableKind,
    },
    PermanentlyBlacklisted {
        reason: UnavailableKind,
    },
    Maintenance {
        since: Instant,
    },
}

impl Availability {
    /// Selectable right now. An elapsed temporary window counts as available
    /// even before the reinstatement timer has flipped the state.
    fn is_selectable(&self, now: Instant) -> bool {
        match self {
            Availability::Available => true,
            Availability::TemporarilyBlacklisted { until, .. } => *until <= now,
            Availability::PermanentlyBlacklisted { .. } | Availability::Maintenance { .. } => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::TemporarilyBlacklisted { .. } => "temporarily_blacklisted",
            Availability::PermanentlyBlacklisted { .. } => "permanently_blacklisted",
            Availability::Maintenance { .. } => "maintenance",
        }
    }
}

pub struct PipelinePool {
    virtual_model: String,
    pipelines: Vec<Arc<Pipeline>>,
    availability: Arc<RwLock<Vec<Availability>>>,
    strategy: SelectionStrategy,
    rr_cursor: AtomicUsize,
    /// Smooth weighted round-robin state, one slot per pipeline.
    current_weights: Mutex<Vec<i64>>,
    queue: Arc<ReinstateQueue>,
    events: EventHub,
}

impl PipelinePool {
    pub fn new(
        virtual_model: impl Into<String>,
        pipelines: Vec<Arc<Pipeline>>,
        strategy: SelectionStrategy,
        events: EventHub,
    ) -> Self {
        let len = pipelines.len();
        Self {
            virtual_model: virtual_model.into(),
            pipelines,
            availability: Arc::new(RwLock::new(vec![Availability::Available; len])),
            strategy,
            rr_cursor: AtomicUsize::new(0),
            current_weights: Mutex::new(vec![0; len]),
            queue: Arc::new(ReinstateQueue::new()),
            events,
        }
    }

    /// Spawn the reinstatement timer. Assembly leaves pools inert so that
    /// re-running it for validation has no side effects; the scheduler manager
    /// calls this when it takes ownership.
    pub fn start(&self) {
        let ids: Vec<String> = self.pipelines.iter().map(|p| p.id().to_string()).collect();
        self.queue.clone().spawn_recover_task(
            self.virtual_model.clone(),
            self.availability.clone(),
            self.events.clone(),
            ids,
        );
    }

    pub fn virtual_model(&self) -> &str {
        &self.virtual_model
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn pipelines(&self) -> &[Arc<Pipeline>] {
        &self.pipelines
    }

    pub fn pipeline(&self, index: usize) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(index)
    }

    pub async fn availability_of(&self, index: usize) -> Option<Availability> {
        self.availability.read().await.get(index).copied()
    }

    /// Point-in-time snapshot of currently selectable pipelines. Callers must
    /// not retain it across awaits.
    pub async fn available_pipelines(&self) -> Vec<Arc<Pipeline>> {
        let now = Instant::now();
        let availability = self.availability.read().await;
        self.pipelines
            .iter()
            .zip(availability.iter())
            .filter(|(_, state)| state.is_selectable(now))
            .map(|(pipeline, _)| pipeline.clone())
            .collect()
    }

    /// Select one pipeline by the pool strategy, skipping `excluded` indices
    /// (failover exclusions local to one request). Never returns a pipeline
    /// that is not selectable at the moment of the availability read.
    pub async fn select(&self, excluded: &HashSet<usize>) -> Option<Arc<Pipeline>> {
        let now = Instant::now();
        let candidates: Vec<usize> = {
            let availability = self.availability.read().await;
            availability
                .iter()
                .enumerate()
                .filter(|(index, state)| !excluded.contains(index) && state.is_selectable(now))
                .map(|(index, _)| index)
                .collect()
        };
        if candidates.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            SelectionStrategy::PriorityFirst => candidates[0],
            SelectionStrategy::RoundRobin => {
                let cursor = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                candidates[cursor % candidates.len()]
            }
            SelectionStrategy::LeastLoaded => candidates
                .iter()
                .copied()
                .min_by_key(|index| (self.pipelines[*index].in_flight(), *index))
                .unwrap_or(candidates[0]),
            SelectionStrategy::Weighted => self.select_weighted(&candidates),
        };
        Some(self.pipelines[chosen].clone())
    }

    /// Smooth weighted round-robin: deterministic stride, ties resolved by
    /// lowest index.
    fn select_weighted(&self, candidates: &[usize]) -> usize {
        let mut weights = match self.current_weights.lock() {
            Ok(guard) => guard,
            Err(_) => return candidates[0],
        };
        let mut total: i64 = 0;
        for &index in candidates {
            let weight = i64::from(self.pipelines[index].weight());
            weights[index] += weight;
            total += weight;
        }
        let mut best = candidates[0];
        for &index in candidates {
            if weights[index] > weights[best] {
                best = index;
            }
        }
        weights[best] -= total;
        best
    }

    /// Blacklist one pipeline. `until = None` is permanent. Idempotent:
    /// re-blacklisting only ever extends the window, never shortens it, and a
    /// permanent blacklist is terminal until configuration reload replaces the
    /// pool.
    pub async fn mark_unavailable(
        &self,
        index: usize,
        until: Option<Instant>,
        reason: UnavailableKind,
    ) {
        let mut availability = self.availability.write().await;
        let Some(state) = availability.get_mut(index) else {
            return;
        };
        match (*state, until) {
            (Availability::PermanentlyBlacklisted { .. }, _) => return,
            (Availability::Maintenance { .. }, Some(_)) => return,
            (_, None) => {
                *state = Availability::PermanentlyBlacklisted { reason };
            }
            (Availability::TemporarilyBlacklisted { until: old, .. }, Some(new)) => {
                if new <= old {
                    return;
                }
                *state = Availability::TemporarilyBlacklisted { until: new, reason };
                self.queue.push(new, index).await;
            }
            (_, Some(new)) => {
                *state = Availability::TemporarilyBlacklisted { until: new, reason };
                self.queue.push(new, index).await;
            }
        }
        drop(availability);
        self.emit_state_event(index, "blacklist", TraceEventType::Start, reason, until);
    }

    /// Soft-unavailable: waiting on reauthentication. Cleared by
    /// [`PipelinePool::reinstate`] when a refresh succeeds.
    pub async fn mark_maintenance(&self, index: usize) {
        let mut availability = self.availability.write().await;
        let Some(state) = availability.get_mut(index) else {
            return;
        };
        if matches!(*state, Availability::PermanentlyBlacklisted { .. }) {
            return;
        }
        *state = Availability::Maintenance {
            since: Instant::now(),
        };
        drop(availability);
        self.emit_state_event(
            index,
            "maintenance",
            TraceEventType::Start,
            UnavailableKind::Maintenance,
            None,
        );
    }

    /// Return a pipeline to rotation (maintenance recovery). Permanent
    /// blacklists stay.
    pub async fn reinstate(&self, index: usize) {
        let mut availability = self.availability.write().await;
        let Some(state) = availability.get_mut(index) else {
            return;
        };
        if matches!(*state, Availability::PermanentlyBlacklisted { .. }) {
            return;
        }
        let was = state.label();
        *state = Availability::Available;
        drop(availability);
        if was != "available" {
            self.emit_state_event(
                index,
                "reinstate",
                TraceEventType::End,
                UnavailableKind::Maintenance,
                None,
            );
        }
    }

    fn emit_state_event(
        &self,
        index: usize,
        operation: &str,
        event_type: TraceEventType,
        reason: UnavailableKind,
        until: Option<Instant>,
    ) {
        let pipeline_id = self
            .pipelines
            .get(index)
            .map(|p| p.id().to_string())
            .unwrap_or_default();
        let until_ms = until.map(|t| t.saturating_duration_since(Instant::now()).as_millis() as u64);
        self.events.emit(TraceEvent::new(
            self.virtual_model.clone(),
            "pipeline-pool",
            operation,
            event_type,
            TracePosition::Middle,
            serde_json::json!({
                "pipelineId": pipeline_id,
                "reason": reason,
                "remainingMs": until_ms,
                "at": SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            }),
        ));
    }
}

/// Convenience used by the recovery coordinator for failover cooldowns.
pub const FAILOVER_COOLDOWN: Duration = Duration::from_secs(30);
