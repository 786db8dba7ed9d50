//! Observability: runtime telemetry (metrics) and sink abstractions.
//!
//! Structured logs are emitted through `tracing` at the call sites; this module
//! only owns the counter side.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EventOps, EventReport, EventState, FormulaSummary};
pub use sink::{
    CacheLookupOutcome, MetricsEvent, MetricsSink, PrefetchOutcome, SelectionPath,
    TransactionOutcome, metrics_report, metrics_reset_all, with_metrics_sink,
};
