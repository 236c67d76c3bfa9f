use crate::executor::panic_handler::PanicInfo;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type handlers return. Anything `Send + Sync` that implements
/// `std::error::Error` converts into it with `?` or `.into()`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pool-level errors, returned synchronously to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pool is closed")]
    PoolClosed,

    #[error("pool not started")]
    NotStarted,

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

/// Final outcome of a single task, handed to its callback and to the
/// pool-wide error hook.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("handler is missing")]
    HandlerMissing,

    #[error("handler panicked: {0}")]
    HandlerFault(PanicInfo),

    #[error("handler failed: {0}")]
    Failed(#[source] BoxError),

    #[error("pool closed before the task reached a worker")]
    Abandoned,
}

impl TaskError {
    pub fn is_fault(&self) -> bool {
        matches!(self, TaskError::HandlerFault(_))
    }

    /// The handler's own error, if that is what ended the task.
    pub fn as_failure(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            TaskError::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_keeps_source() {
        let err = TaskError::Failed("disk full".into());

        assert_eq!(err.to_string(), "handler failed: disk full");
        assert_eq!(err.as_failure().map(|e| e.to_string()).as_deref(), Some("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_fault_classification() {
        assert!(!TaskError::HandlerMissing.is_fault());
        assert!(!TaskError::Abandoned.is_fault());
        assert!(TaskError::Abandoned.as_failure().is_none());
    }

    #[test]
    fn test_config_helper() {
        let err = Error::config("max_workers must be > 0");
        assert_eq!(err.to_string(), "config error: max_workers must be > 0");
    }
}
