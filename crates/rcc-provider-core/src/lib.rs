//! Core provider abstractions for the router.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Adapters perform upstream IO through the [`HttpTransport`] seam so
//! the whole provider layer is exercisable without a network.

pub mod adapter;
pub mod config;
pub mod errors;
pub mod events;
pub mod headers;
pub mod registry;
pub mod transport;

pub use adapter::{
    AuthState, AuthStatus, CallContext, Capabilities, ChunkStream, ProviderAdapter,
};
pub use config::{
    AuthConfig, AuthMethod, ConfigError, ErrorActionConfig, ErrorOverride, ModelConfig,
    ProviderConfig, ProviderKind, RouterConfig, SchedulerConfig, SelectionStrategy, TargetRef,
    VirtualModelConfig,
};
pub use errors::{AdapterError, AdapterErrorKind, AdapterResult};
pub use events::{EventHub, EventSink, TerminalEventSink, TraceEvent, TraceEventType, TracePosition};
pub use headers::{Headers, header_get, header_set};
pub use registry::AdapterRegistry;
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError, TransportErrorKind,
};
