use tokio::time::Instant;

/// Per-request envelope created at admission and shared read-only with the
/// pipeline layer while the request is in flight. The attempt trail lives in
/// the scheduler, which is the only writer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub trace_id: Option<String>,
    pub virtual_model: String,
    /// Caller-supplied deadline; the scheduler tightens it to its own budget.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(virtual_model: impl Into<String>) -> Self {
        Self {
            request_id: rcc_common::new_request_id(),
            trace_id: None,
            virtual_model: virtual_model.into(),
            deadline: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
