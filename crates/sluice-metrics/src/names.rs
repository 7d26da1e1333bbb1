//! Published metric names. These are wire-stable: dashboards and alarms
//! key on them.

/// Number of live workers in the pool.
pub const WORKER_COUNT: &str = "WorkerCount";

/// Worker utilization percentage.
///
/// Two producers publish under this name: each worker reports its own
/// messages-per-second proxy every utilization window, and the pool
/// reporter publishes `active / total × 100`. The engine's current value
/// is whichever producer landed last; the 1-minute average blends both
/// streams.
pub const WORKER_UTILIZATION: &str = "WorkerUtilization";

/// Approximate count of visible messages on the queue.
pub const QUEUE_DEPTH: &str = "QueueDepth";

/// Approximate count of received-but-not-deleted messages.
pub const IN_FLIGHT_MESSAGES: &str = "InFlightMessages";

/// Per-message processing duration, recorded in milliseconds.
pub const PROCESSING_TIME: &str = "ProcessingTime";

/// Name of the counter for a given error kind, e.g.
/// `error_metric("poll_error")` → `"Error_poll_error"`.
pub fn error_metric(kind: &str) -> String {
    format!("Error_{kind}")
}
