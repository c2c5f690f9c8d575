//! Monotonic reinstatement timer for temporarily blacklisted pipelines.
//!
//! One task per pool sleeps until the earliest `until` deadline, then flips
//! every due entry back to `Available`. Entries are never reordered ahead of
//! their deadline, so a pipeline blacklisted until `T` stays out of rotation
//! for the whole `[mark, T)` window.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{Instant, sleep_until};

use rcc_provider_core::{EventHub, TraceEvent, TraceEventType, TracePosition};

use super::Availability;

#[derive(Debug)]
pub(crate) struct ReinstateQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, usize)>>>,
    notify: Notify,
}

impl ReinstateQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, until: Instant, index: usize) {
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((until, index)));
        }
        // Always notify: the background task re-computes the next deadline.
        self.notify.notify_one();
    }

    pub fn spawn_recover_task(
        self: Arc<Self>,
        virtual_model: String,
        availability: Arc<RwLock<Vec<Availability>>>,
        events: EventHub,
        pipeline_ids: Vec<String>,
    ) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((t, index))| (*t, *index))
                };

                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some((deadline, _)) => {
                        tokio::select! {
                            _ = sleep_until(deadline) => {}
                            _ = self.notify.notified() => continue,
                        }
                    }
                }

                let now = Instant::now();
                let mut due: Vec<usize> = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((t, index))) = heap.peek().copied()
                        && t <= now
                    {
                        heap.pop();
                        due.push(index);
                    }
                }
                if due.is_empty() {
                    continue;
                }

                // Recover due pipelines, guarding against stale queue entries
                // from extended windows.
                let mut guard = availability.write().await;
                for index in due {
                    let should_recover = match guard.get(index) {
                        Some(Availability::TemporarilyBlacklisted { until, .. }) => *until <= now,
                        _ => false,
                    };
                    if should_recover {
                        guard[index] = Availability::Available;
                        events.emit(TraceEvent::new(
                            virtual_model.clone(),
                            "pipeline-pool",
                            "blacklist",
                            TraceEventType::End,
                            TracePosition::Middle,
                            serde_json::json!({
                                "pipelineId": pipeline_ids.get(index),
                            }),
                        ));
                    }
                }
            }
        });
    }
}
