use std::future::Future;
use std::pin::Pin;

use super::{EventSink, TraceEvent};

/// Best-effort terminal sink: one JSON line per event on stderr.
pub struct TerminalEventSink;

impl TerminalEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for TerminalEventSink {
    fn write<'a>(&'a self, event: &'a TraceEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            // Never panic in a sink.
            match serde_json::to_string(event) {
                Ok(line) => eprintln!("{line}"),
                Err(err) => eprintln!("{{\"event\":\"event_serialize_error\",\"error\":\"{err}\"}}"),
            }
        })
    }
}
