use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use super::types::TraceEvent;

pub trait EventSink: Send + Sync {
    fn write<'a>(&'a self, event: &'a TraceEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Fan-out point for trace events.
///
/// `emit` never blocks the caller: the broadcast channel drops history for
/// lagging subscribers, and sink writes run on detached tasks.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<TraceEvent>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.inner.tx.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut sinks) = self.inner.sinks.write() {
            sinks.push(sink);
        }
    }

    pub fn emit(&self, event: TraceEvent) {
        let _ = self.inner.tx.send(event.clone());
        let sinks = match self.inner.sinks.read() {
            Ok(sinks) => sinks.clone(),
            Err(_) => return,
        };
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move {
                sink.write(&event).await;
            });
        }
    }
}
