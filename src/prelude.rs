pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{BoxError, Error, Result, TaskError};
pub use crate::executor::{Pool, Task, TaskId};
pub use crate::logger::{Logger, NopLogger, StderrLogger, TracingLogger};
pub use crate::telemetry::MetricsSnapshot;
