//! Lock-free running counters and a log-bucketed latency histogram.
//!
//! Writers touch atomics only; readers produce serialisable snapshots for the
//! metrics surface.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use rcc_common::RouteErrorKind;
use rcc_provider_core::AdapterErrorKind;

const BUCKET_BOUNDS_MS: [u64; 14] = [
    1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000,
];

pub struct LatencyHistogram {
    // One overflow bucket past the last bound.
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    count: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let slot = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Upper bucket bound containing the q-quantile, in milliseconds.
    pub fn quantile_ms(&self, q: f64) -> u64 {
        let total = self.count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let rank = ((total as f64) * q).ceil() as u64;
        let mut seen = 0u64;
        for (slot, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= rank {
                return BUCKET_BOUNDS_MS
                    .get(slot)
                    .copied()
                    .unwrap_or(*BUCKET_BOUNDS_MS.last().unwrap());
            }
        }
        *BUCKET_BOUNDS_MS.last().unwrap()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count.load(Ordering::Relaxed),
            p50_ms: self.quantile_ms(0.50),
            p95_ms: self.quantile_ms(0.95),
            p99_ms: self.quantile_ms(0.99),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Per-pipeline counters.
pub struct PipelineMetrics {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: [AtomicU64; AdapterErrorKind::ALL.len()],
    latency: LatencyHistogram,
    last_success_unix: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: std::array::from_fn(|_| AtomicU64::new(0)),
            latency: LatencyHistogram::new(),
            last_success_unix: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_success_unix.store(now, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: AdapterErrorKind, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures[kind.slot()].fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        let mut failures = BTreeMap::new();
        for kind in AdapterErrorKind::ALL {
            let count = self.failures[kind.slot()].load(Ordering::Relaxed);
            if count > 0 {
                failures.insert(kind.as_str().to_string(), count);
            }
        }
        let last = self.last_success_unix.load(Ordering::Relaxed);
        PipelineMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures,
            latency: self.latency.snapshot(),
            last_success_unix: if last == 0 { None } else { Some(last) },
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: BTreeMap<String, u64>,
    pub latency: LatencySnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_unix: Option<u64>,
}

/// Per-scheduler counters. Failure counts key off the terminal error kind.
pub struct SchedulerMetrics {
    successes: AtomicU64,
    failures: Mutex<BTreeMap<&'static str, u64>>,
    latency: LatencyHistogram,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            failures: Mutex::new(BTreeMap::new()),
            latency: LatencyHistogram::new(),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    pub fn record_failure(&self, kind: &RouteErrorKind) {
        if let Ok(mut failures) = self.failures.lock() {
            *failures.entry(kind_label(kind)).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        let failures = self
            .failures
            .lock()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();
        SchedulerMetricsSnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            failures,
            latency: self.latency.snapshot(),
        }
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_label(kind: &RouteErrorKind) -> &'static str {
    match kind {
        RouteErrorKind::UnknownVirtualModel => "unknown_virtual_model",
        RouteErrorKind::NoTargetAvailable => "no_target_available",
        RouteErrorKind::Overloaded => "overloaded",
        RouteErrorKind::Upstream { .. } => "upstream_error",
        RouteErrorKind::Cancelled => "cancelled",
        RouteErrorKind::DeadlineExceeded => "deadline_exceeded",
        RouteErrorKind::ConfigurationError => "configuration_error",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerMetricsSnapshot {
    pub successes: u64,
    pub failures: BTreeMap<String, u64>,
    pub latency: LatencySnapshot,
}
