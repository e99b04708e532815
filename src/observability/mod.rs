//! Logging and metrics for the request lifecycle.
//!
//! `logging` installs the global `tracing` subscriber once at startup.
//! `metrics` records per-request counters and latency keyed by route kind,
//! plus the number of open SSE sessions. Nothing is exported until
//! `init_metrics` installs the Prometheus recorder; before that every
//! recording call is a no-op.
//!
//! Request IDs are attached to log events by the `TraceLayer` span, not here.

pub mod logging;
pub mod metrics;
