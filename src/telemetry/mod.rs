//! Telemetry for the pool.
//!
//! Counters and a latency histogram, readable through
//! [`Pool::metrics`](crate::Pool::metrics).

pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot, RetireReason};
