use super::task::{ExecContext, Job, Task};
use super::panic_handler::PanicHandler;
use super::worker::{
    mark_pool_thread, on_pool_thread, Capacity, CapacityToken, PoolId, Worker, WorkerId,
};
use crate::logger::Logger;
use crate::config::Config;
use crate::error::{BoxError, Error, Result};
use crate::telemetry::{Metrics, MetricsSnapshot};
use crossbeam_channel::{bounded, Receiver, Select, SendError, Sender};
use parking_lot::Mutex;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A bounded pool of elastic worker threads.
///
/// At most `max_workers` tasks run at once. Workers are spawned on demand,
/// reused across tasks, and retire on their own after sitting idle for the
/// configured timeout.
///
/// ```no_run
/// use elastic_pool::{Config, Pool, Task};
///
/// let pool = Pool::new(Config::builder().max_workers(4).build()?)?;
/// pool.start()?;
///
/// pool.submit(
///     Task::new("payload")
///         .handler(|msg| {
///             println!("{msg}");
///             Ok(())
///         })
///         .on_complete(|_, outcome| assert!(outcome.is_ok())),
/// )?;
///
/// pool.close();
/// # Ok::<(), elastic_pool::Error>(())
/// ```
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

pub struct Pool {
    id: PoolId,
    config: Config,
    max_workers: usize,
    ctx: Arc<ExecContext>,
    lifecycle: Mutex<Lifecycle>,
}

enum Lifecycle {
    Created,
    Running(Running),
    Closing(Arc<Capacity>),
    Closed,
}

struct Running {
    admission: Sender<Job>,
    cancel: Sender<()>,
    capacity: Arc<Capacity>,
    dispatcher: JoinHandle<()>,
}

impl Pool {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let ctx = ExecContext {
            panics: PanicHandler::new(config.logger.clone()),
            metrics: Metrics::new(),
            on_error: config.on_error.clone(),
        };

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            max_workers: config.worker_limit(),
            config,
            ctx: Arc::new(ctx),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Fill the capacity budget and launch the dispatcher.
    ///
    /// Starting a running pool does nothing; starting a closed one fails.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Closing(_) | Lifecycle::Closed => return Err(Error::PoolClosed),
        }

        let capacity = Capacity::new(self.max_workers);
        let (admission, admission_rx) = bounded(0);
        let (handoff, handoff_rx) = bounded(0);
        let (cancel, cancel_rx) = bounded(0);

        let dispatcher = Dispatcher {
            pool: self.id,
            admission: admission_rx,
            handoff,
            handoff_rx,
            cancel: cancel_rx,
            capacity: capacity.clone(),
            ctx: self.ctx.clone(),
            idle_timeout: self.config.idle_timeout,
            idle_check: self.config.idle_check_interval(),
            thread_name_prefix: self.config.thread_name_prefix.clone(),
            stack_size: self.config.stack_size,
            next_worker: Cell::new(0),
        };

        let handle = thread::Builder::new()
            .name(format!("{}-dispatcher", self.config.thread_name_prefix))
            .spawn(move || dispatcher.run())?;

        *lifecycle = Lifecycle::Running(Running {
            admission,
            cancel,
            capacity,
            dispatcher: handle,
        });

        tracing::debug!(
            max_workers = self.max_workers,
            idle_timeout = ?self.config.idle_timeout,
            "pool started"
        );
        Ok(())
    }

    /// Hand a task to the dispatcher, blocking until it is accepted.
    pub fn submit<M: Send + 'static>(&self, task: Task<M>) -> Result<()> {
        let admission = self.admission()?;
        admission
            .send(task.into_job())
            .map_err(|_| Error::PoolClosed)
    }

    /// Submit from a short-lived background thread. Failures go to the
    /// configured logger instead of the caller.
    pub fn submit_async<M: Send + 'static>(&self, task: Task<M>) {
        let id = task.id();
        let logger = self.config.logger.clone();

        let admission = match self.admission() {
            Ok(admission) => admission,
            Err(err) => {
                logger.log(format_args!("async submit of task {} failed: {}", id, err));
                return;
            }
        };

        let job = task.into_job();
        let spawned = thread::Builder::new()
            .name(format!("{}-submit", self.config.thread_name_prefix))
            .spawn(move || {
                if let Err(SendError(_job)) = admission.send(job) {
                    logger.log(format_args!(
                        "async submit of task {} failed: {}",
                        id,
                        Error::PoolClosed
                    ));
                }
            });

        if let Err(err) = spawned {
            self.config
                .logger
                .log(format_args!("async submit of task {} failed: {}", id, err));
        }
    }

    /// Submit a closure with no message.
    pub fn go<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.submit(Task::new(()).handler(move |_| f()))
    }

    pub fn go_async<F>(&self, mut f: F)
    where
        F: FnMut() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.submit_async(Task::new(()).handler(move |_| f()))
    }

    /// Stop accepting work, cancel idle workers and wait for every worker
    /// to retire.
    ///
    /// Running tasks finish first. Tasks the dispatcher still holds are
    /// completed with [`TaskError::Abandoned`](crate::TaskError::Abandoned).
    ///
    /// On one of the pool's own threads (a handler or callback closing the
    /// pool, or dropping its last handle) the calling worker still holds a
    /// slot, so the drain continues on a detached thread and this returns
    /// without waiting.
    pub fn close(&self) {
        let running = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                Lifecycle::Running(running) => {
                    *lifecycle = Lifecycle::Closing(running.capacity.clone());
                    running
                }
                Lifecycle::Closing(capacity) => {
                    *lifecycle = Lifecycle::Closing(capacity);
                    return;
                }
                Lifecycle::Created | Lifecycle::Closed => return,
            }
        };

        let Running {
            admission,
            cancel,
            capacity,
            dispatcher,
        } = running;

        drop(admission);
        drop(cancel);

        if on_pool_thread(self.id) {
            self.drain_detached(dispatcher, capacity);
            return;
        }

        drain(dispatcher, &capacity, self.config.logger.as_ref());

        *self.lifecycle.lock() = Lifecycle::Closed;
        tracing::debug!("pool closed");
    }

    fn drain_detached(&self, dispatcher: JoinHandle<()>, capacity: Arc<Capacity>) {
        let logger = self.config.logger.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-drain", self.config.thread_name_prefix))
            .spawn(move || {
                drain(dispatcher, &capacity, logger.as_ref());
                tracing::debug!("pool closed");
            });

        if let Err(err) = spawned {
            // the dispatcher and workers still wind down on their own
            self.config
                .logger
                .log(format_args!("failed to spawn drain thread: {}", err));
        }
    }

    /// Number of live workers. Approximate while tasks are being submitted.
    pub fn size(&self) -> usize {
        match &*self.lifecycle.lock() {
            Lifecycle::Running(running) => running.capacity.in_use(),
            Lifecycle::Closing(capacity) => capacity.in_use(),
            Lifecycle::Created | Lifecycle::Closed => 0,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            *self.lifecycle.lock(),
            Lifecycle::Closing(_) | Lifecycle::Closed
        )
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn admission(&self) -> Result<Sender<Job>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running(running) => Ok(running.admission.clone()),
            Lifecycle::Created => Err(Error::NotStarted),
            Lifecycle::Closing(_) | Lifecycle::Closed => Err(Error::PoolClosed),
        }
    }
}

/// Join the dispatcher, then wait for every capacity token to come home.
fn drain(dispatcher: JoinHandle<()>, capacity: &Capacity, logger: &dyn Logger) {
    if dispatcher.join().is_err() {
        tracing::error!("dispatcher thread panicked");
        logger.log(format_args!("dispatcher thread panicked"));
    }
    capacity.reclaim_all();
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_workers", &self.max_workers)
            .field("size", &self.size())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sole reader of the admission channel and sole writer of the handoff
/// channel.
struct Dispatcher {
    pool: PoolId,
    admission: Receiver<Job>,
    handoff: Sender<Job>,
    // kept so the handoff channel never disconnects while workers come and go
    handoff_rx: Receiver<Job>,
    cancel: Receiver<()>,
    capacity: Arc<Capacity>,
    ctx: Arc<ExecContext>,
    idle_timeout: Duration,
    idle_check: Duration,
    thread_name_prefix: String,
    stack_size: Option<usize>,
    next_worker: Cell<WorkerId>,
}

impl Dispatcher {
    fn run(self) {
        mark_pool_thread(self.pool);

        while let Ok(job) = self.admission.recv() {
            self.ctx.metrics.record_submitted();

            let spawned = match self.capacity.try_acquire() {
                Some(token) => self.spawn_worker(token),
                None => false,
            };
            self.forward(job, !spawned);
        }

        tracing::debug!("dispatcher stopped");
    }

    /// Wait for any idle worker to take `job`, or abandon it on close.
    ///
    /// With `watch_capacity` set, a slot freed by a retiring worker while
    /// the pool looked saturated gets a fresh worker, once.
    fn forward(&self, job: Job, mut watch_capacity: bool) {
        loop {
            let mut sel = Select::new();
            let handoff = sel.send(&self.handoff);
            let cancel = sel.recv(&self.cancel);
            if watch_capacity {
                sel.recv(self.capacity.available());
            }

            let oper = sel.select();
            let index = oper.index();

            if index == handoff {
                if let Err(SendError(job)) = oper.send(&self.handoff, job) {
                    job.abandon(&self.ctx);
                }
                return;
            }

            if index == cancel {
                let _ = oper.recv(&self.cancel);
                job.abandon(&self.ctx);
                return;
            }

            // a worker retired while every slot looked busy
            if oper.recv(self.capacity.available()).is_ok() {
                self.spawn_worker(self.capacity.claim());
            }
            watch_capacity = false;
        }
    }

    fn spawn_worker(&self, token: CapacityToken) -> bool {
        let id = self.next_worker.get();
        self.next_worker.set(id.wrapping_add(1));

        let worker = Worker {
            id,
            pool: self.pool,
            handoff: self.handoff_rx.clone(),
            cancel: self.cancel.clone(),
            idle_timeout: self.idle_timeout,
            idle_check: self.idle_check,
            ctx: self.ctx.clone(),
            token,
        };

        let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name_prefix, id));
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        match worker.spawn(builder) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(worker = id, error = %err, "failed to spawn worker");
                self.ctx
                    .panics
                    .logger()
                    .log(format_args!("failed to spawn worker {}: {}", id, err));
                false
            }
        }
    }
}
