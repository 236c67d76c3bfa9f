//! Sinks for unexpected failures.
//!
//! The pool never owns a logger: it is handed an `Arc<dyn Logger>` through
//! [`Config`](crate::Config) and calls it from worker, dispatcher and
//! submitter threads. Lifecycle diagnostics go through `tracing` instead.

use std::fmt;

/// Receives panic reports and failed background submissions.
///
/// Called concurrently from arbitrary pool threads. Implementations must
/// not panic.
pub trait Logger: Send + Sync {
    /// Record one formatted line.
    fn log(&self, args: fmt::Arguments<'_>);
}

/// Discards everything. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _args: fmt::Arguments<'_>) {}
}

/// Writes each record to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, args: fmt::Arguments<'_>) {
        eprintln!("[elastic-pool] {}", args);
    }
}

/// Forwards each record as a `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "elastic_pool", "{}", args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_stock_loggers_are_object_safe() {
        let sinks: Vec<Arc<dyn Logger>> = vec![
            Arc::new(NopLogger),
            Arc::new(StderrLogger),
            Arc::new(TracingLogger),
        ];

        for sink in &sinks {
            sink.log(format_args!("task {} failed", 7));
        }
    }
}
