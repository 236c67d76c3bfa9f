//! Task representation and the execution contract.
//!
//! A [`Task`] bundles a message with the closures that act on it. Once
//! submitted it is type-erased into a [`Job`] so a single pool can carry
//! tasks of any message type.

use super::panic_handler::{PanicHandler, PanicSite};
use crate::config::ErrorHook;
use crate::error::{BoxError, TaskError};
use crate::telemetry::Metrics;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Handler<M> = Box<dyn FnMut(&M) -> Result<(), BoxError> + Send + 'static>;
type RetryPredicate<M> = Box<dyn FnMut(&M, u32) -> bool + Send + 'static>;
type Callback<M> = Box<dyn FnOnce(M, Result<(), TaskError>) + Send + 'static>;

/// A unit of work: a message plus the handler that processes it.
///
/// The retry predicate receives the zero-based index of the attempt that
/// just failed. It has no built-in cap: a predicate that always answers
/// `true` paired with a handler that always fails keeps one worker busy
/// forever.
///
/// ```
/// use elastic_pool::Task;
///
/// let task = Task::new(3u32)
///     .handler(|n| if *n > 2 { Ok(()) } else { Err("too small".into()) })
///     .retry_if(|_, attempt| attempt < 2)
///     .on_complete(|n, outcome| println!("{n}: {outcome:?}"));
/// # drop(task);
/// ```
pub struct Task<M> {
    id: TaskId,
    message: M,
    handler: Option<Handler<M>>,
    retry: Option<RetryPredicate<M>>,
    callback: Option<Callback<M>>,
}

impl<M: Send + 'static> Task<M> {
    /// A task with no handler yet. Submitting it as-is completes with
    /// [`TaskError::HandlerMissing`].
    pub fn new(message: M) -> Self {
        Task {
            id: TaskId::next(),
            message,
            handler: None,
            retry: None,
            callback: None,
        }
    }

    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: FnMut(&M) -> Result<(), BoxError> + Send + 'static,
    {
        self.handler = Some(Box::new(f));
        self
    }

    pub fn retry_if<F>(mut self, f: F) -> Self
    where
        F: FnMut(&M, u32) -> bool + Send + 'static,
    {
        self.retry = Some(Box::new(f));
        self
    }

    /// Runs exactly once with the message and the final outcome.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(M, Result<(), TaskError>) + Send + 'static,
    {
        self.callback = Some(Box::new(f));
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub(crate) fn into_job(self) -> Job {
        Box::new(self)
    }

    fn attempt(
        id: TaskId,
        message: &M,
        mut handler: Handler<M>,
        mut retry: Option<RetryPredicate<M>>,
        ctx: &ExecContext,
    ) -> Result<(), TaskError> {
        let mut attempt: u32 = 0;

        loop {
            let err = match ctx.panics.execute(PanicSite::Handler(id), || handler(message)) {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => TaskError::Failed(err),
                Err(info) => TaskError::HandlerFault(info),
            };

            let again = match retry.as_mut() {
                Some(predicate) => ctx
                    .panics
                    .execute(PanicSite::RetryPredicate(id), || predicate(message, attempt))
                    .unwrap_or(false),
                None => false,
            };

            if !again {
                return Err(err);
            }

            ctx.metrics.record_retry();
            attempt = attempt.saturating_add(1);
            tracing::trace!(task = %id, attempt, error = %err, "retrying task");
        }
    }
}

impl<M> fmt::Debug for Task<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("handler", &self.handler.is_some())
            .field("retry", &self.retry.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// State every worker and the dispatcher need to finish a task.
pub(crate) struct ExecContext {
    pub(crate) panics: PanicHandler,
    pub(crate) metrics: Metrics,
    pub(crate) on_error: Option<ErrorHook>,
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("panics", &self.panics)
            .field("metrics", &self.metrics)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl ExecContext {
    fn finish<M>(
        &self,
        id: TaskId,
        message: M,
        callback: Option<Callback<M>>,
        outcome: Result<(), TaskError>,
    ) {
        if let (Err(err), Some(hook)) = (&outcome, &self.on_error) {
            let _ = self.panics.execute(PanicSite::ErrorHook(id), || hook(id, err));
        }

        if let Some(callback) = callback {
            let _ = self
                .panics
                .execute(PanicSite::Callback(id), move || callback(message, outcome));
        }
    }
}

/// Type-erased task as carried through the pool's channels.
pub(crate) trait Runnable: Send {
    fn id(&self) -> TaskId;

    /// Run the handler with retries, then report the outcome.
    fn run(self: Box<Self>, ctx: &ExecContext);

    /// Report [`TaskError::Abandoned`] without touching the handler.
    fn abandon(self: Box<Self>, ctx: &ExecContext);
}

pub(crate) type Job = Box<dyn Runnable>;

impl<M: Send + 'static> Runnable for Task<M> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn run(self: Box<Self>, ctx: &ExecContext) {
        let Task {
            id,
            message,
            handler,
            retry,
            callback,
        } = *self;

        let start = Instant::now();
        let outcome = match handler {
            Some(handler) => Self::attempt(id, &message, handler, retry, ctx),
            None => Err(TaskError::HandlerMissing),
        };
        ctx.metrics.record_outcome(start.elapsed(), &outcome);

        ctx.finish(id, message, callback, outcome);
    }

    fn abandon(self: Box<Self>, ctx: &ExecContext) {
        let Task {
            id,
            message,
            callback,
            ..
        } = *self;

        ctx.metrics.record_abandoned();
        tracing::debug!(task = %id, "task abandoned on close");

        ctx.finish(id, message, callback, Err(TaskError::Abandoned));
    }
}
