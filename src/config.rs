use crate::error::{Error, Result, TaskError};
use crate::executor::TaskId;
use crate::logger::{Logger, NopLogger};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Pool-wide hook fired for every task that ends in an error.
pub type ErrorHook = Arc<dyn Fn(TaskId, &TaskError) + Send + Sync + 'static>;

#[derive(Clone)]
pub struct Config {
    /// Upper bound on live workers. `None` means one per logical core.
    pub max_workers: Option<usize>,
    /// How long a worker may sit without a task before it retires.
    pub idle_timeout: Duration,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub logger: Arc<dyn Logger>,
    pub on_error: Option<ErrorHook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "elastic-pool".to_string(),
            stack_size: None,
            logger: Arc::new(NopLogger),
            on_error: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_workers", &self.max_workers)
            .field("idle_timeout", &self.idle_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("stack_size", &self.stack_size)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(Error::config("max_workers must be > 0"));
        }

        if self.idle_timeout.is_zero() {
            return Err(Error::config("idle_timeout must be > 0"));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(Error::config("thread_name_prefix must not contain NUL"));
        }

        Ok(())
    }

    pub fn worker_limit(&self) -> usize {
        self.max_workers.unwrap_or_else(num_cpus::get)
    }

    /// Period of the idle check: half the idle timeout, never below 1ms.
    pub fn idle_check_interval(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(1))
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = Some(n);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn logger<L: Logger + 'static>(mut self, logger: L) -> Self {
        self.config.logger = Arc::new(logger);
        self
    }

    pub fn shared_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.config.logger = logger;
        self
    }

    /// Install a hook that sees every failed task, including abandoned
    /// ones, before the task's own callback runs.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(TaskId, &TaskError) + Send + Sync + 'static,
    {
        self.config.on_error = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
