//! Queue metrics.
use std::time;

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "async_queue")]
pub(crate) struct Queue {
    /// Number of operations submitted to any queue.
    pub(crate) enqueued: vise::Counter,
    /// Number of operations which settled with a value.
    pub(crate) succeeded: vise::Counter,
    /// Number of operations which settled with an error.
    pub(crate) failed: vise::Counter,
    /// Number of operations which panicked.
    pub(crate) panicked: vise::Counter,
    /// Number of child scopes created for dispatched entries.
    pub(crate) child_scopes: vise::Counter,
    /// Time from dispatching an entry to settling it, including the child drain.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(crate) settle_latency: vise::Histogram<time::Duration>,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<Queue> = vise::Global::new();
