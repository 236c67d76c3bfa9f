//! Task execution infrastructure.
//!
//! This module provides the pool, its dispatcher, the self-retiring
//! workers, and the panic isolation shared by all of them.

pub mod panic_handler;
pub mod pool;
pub mod task;
pub mod worker;

pub use panic_handler::{PanicInfo, PanicSite};
pub use pool::Pool;
pub use task::{Task, TaskId};
pub use worker::WorkerId;

pub(crate) use task::{ExecContext, Job};
