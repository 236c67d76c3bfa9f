//! elastic-pool - bounded concurrency with self-retiring workers
//!
//! Callers submit [`Task`]s to a [`Pool`]; at most `max_workers` of them run
//! at the same time. Worker threads are spawned on demand, reused for as
//! long as work keeps arriving, and retire on their own once they have been
//! idle for the configured timeout, so a burst does not pin threads forever.
//!
//! # Quick Start
//!
//! ```no_run
//! use elastic_pool::prelude::*;
//! use std::time::Duration;
//!
//! let config = Config::builder()
//!     .max_workers(8)
//!     .idle_timeout(Duration::from_secs(30))
//!     .logger(StderrLogger)
//!     .build()?;
//!
//! let pool = Pool::new(config)?;
//! pool.start()?;
//!
//! for n in 0..100u32 {
//!     pool.submit(
//!         Task::new(n)
//!             .handler(|n| if n % 7 == 0 { Err("unlucky".into()) } else { Ok(()) })
//!             .retry_if(|_, attempt| attempt < 2)
//!             .on_complete(|n, outcome| {
//!                 if let Err(err) = outcome {
//!                     eprintln!("task {n}: {err}");
//!                 }
//!             }),
//!     )?;
//! }
//!
//! // Waits for every worker to finish its current task and retire.
//! pool.close();
//! # Ok::<(), elastic_pool::Error>(())
//! ```
//!
//! # Guarantees
//!
//! - **Bounded**: never more than `max_workers` handlers run concurrently.
//! - **Backpressure**: [`Pool::submit`] blocks until the dispatcher accepts
//!   the task; nothing is queued without bound and nothing is dropped.
//! - **Isolation**: a panicking handler or callback is caught at the worker
//!   boundary, logged, and reported as [`TaskError::HandlerFault`].
//! - **Exactly-once callbacks**: every accepted task's callback runs once,
//!   after its retries, even when the task is abandoned on close.
//! - **Drain**: [`Pool::close`] returns only after every worker retired.

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod logger;
pub mod prelude;
pub mod telemetry;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder, ErrorHook};
pub use error::{BoxError, Error, Result, TaskError};
pub use executor::{PanicInfo, Pool, Task, TaskId};
pub use logger::{Logger, NopLogger, StderrLogger, TracingLogger};
pub use telemetry::{MetricsSnapshot, RetireReason};
