use super::task::TaskId;
use crate::logger::Logger;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

static INSTALL_HOOK: Once = Once::new();

thread_local! {
    // depth of nested `PanicHandler::execute` calls on this thread
    static CATCHING: Cell<usize> = const { Cell::new(0) };
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chain a hook in front of whatever is installed so panics caught by a
/// [`PanicHandler`] keep the stack of the panic site, not the catch site.
fn install_trace_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CATCHING.try_with(Cell::get).unwrap_or(0) > 0 {
                let trace = Backtrace::force_capture();
                let _ = PANIC_TRACE.try_with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

struct CatchGuard;

impl CatchGuard {
    fn enter() -> Self {
        CATCHING.with(|depth| depth.set(depth.get() + 1));
        CatchGuard
    }
}

impl Drop for CatchGuard {
    fn drop(&mut self) {
        CATCHING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Where a caught panic originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicSite {
    Handler(TaskId),
    RetryPredicate(TaskId),
    Callback(TaskId),
    ErrorHook(TaskId),
}

impl fmt::Display for PanicSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanicSite::Handler(id) => write!(f, "handler of task {}", id),
            PanicSite::RetryPredicate(id) => write!(f, "retry predicate of task {}", id),
            PanicSite::Callback(id) => write!(f, "callback of task {}", id),
            PanicSite::ErrorHook(id) => write!(f, "error hook for task {}", id),
        }
    }
}

/// Catches panics at the worker boundary and turns them into values.
///
/// Every caught panic produces exactly one logger record.
pub struct PanicHandler {
    logger: Arc<dyn Logger>,
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        install_trace_hook();
        Self {
            logger,
            panic_count: AtomicUsize::new(0),
        }
    }

    pub fn execute<F, R>(&self, site: PanicSite, f: F) -> Result<R, PanicInfo>
    where
        F: FnOnce() -> R,
    {
        let outcome = {
            let _guard = CatchGuard::enter();
            catch_unwind(AssertUnwindSafe(f))
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(payload) => {
                self.panic_count.fetch_add(1, Ordering::Relaxed);

                let info = PanicInfo::from_payload(payload);
                // the hook is missing if someone replaced it after us
                let backtrace = PANIC_TRACE
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_else(Backtrace::force_capture);

                self.logger
                    .log(format_args!("{} panicked: {}\n{}", site, info, backtrace));

                Err(info)
            }
        }
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }
}

impl fmt::Debug for PanicHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicHandler")
            .field("panic_count", &self.panic_count())
            .finish_non_exhaustive()
    }
}

/// The recovered panic payload, rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicInfo {
    pub message: String,
    pub thread: Option<String>,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self {
            message,
            thread: std::thread::current().name().map(str::to_owned),
        }
    }
}

impl fmt::Display for PanicInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread {
            Some(thread) => write!(f, "{} (thread '{}')", self.message, thread),
            None => f.write_str(&self.message),
        }
    }
}
