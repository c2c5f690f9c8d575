//! Router core: pipeline assembly, per-virtual-model scheduling, and the
//! error-recovery engine.
//!
//! Construction order mirrors the data flow: adapters (from
//! `rcc-provider-impl`) are grouped into [`Pipeline`]s, pipelines into
//! [`PipelinePool`]s by the assembler, and the [`SchedulerManager`] owns one
//! [`VirtualModelScheduler`] per pool.

pub mod assemble;
pub mod bootstrap;
pub mod classify;
pub mod context;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod recovery;
pub mod scheduler;
pub mod tracker;
pub mod transport;

pub use assemble::{AssemblyOutput, assemble};
pub use bootstrap::{Runtime, bootstrap};
pub use classify::{ClassifyInput, ErrorClassifier, RecoveryAction};
pub use context::RequestContext;
pub use manager::{SchedulerManager, VirtualModelMapping};
pub use pipeline::{Pipeline, PipelineHealth};
pub use pool::{Availability, PipelinePool, UnavailableKind};
pub use recovery::RecoveryCoordinator;
pub use scheduler::{SchedulerLimits, VirtualModelScheduler};
pub use tracker::PipelineTracker;
pub use transport::{TransportConfig, WreqTransport};
