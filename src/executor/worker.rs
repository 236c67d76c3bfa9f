// worker thread stuff
use super::task::{ExecContext, Job};
use crate::telemetry::RetireReason;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::cell::Cell;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type WorkerId = usize;

/// Identifies one pool among all pools in the process.
pub(crate) type PoolId = u64;

thread_local! {
    static OWNING_POOL: Cell<Option<PoolId>> = const { Cell::new(None) };
}

/// Tag the current thread as belonging to `pool`.
pub(crate) fn mark_pool_thread(pool: PoolId) {
    OWNING_POOL.with(|owner| owner.set(Some(pool)));
}

/// Whether the current thread is a worker or dispatcher of `pool`.
pub(crate) fn on_pool_thread(pool: PoolId) -> bool {
    OWNING_POOL.with(|owner| owner.get() == Some(pool))
}

/// The pool's admission budget: exactly `max` tokens exist, each one
/// either buffered here or held by a live worker.
#[derive(Debug)]
pub(crate) struct Capacity {
    max: usize,
    release: Sender<()>,
    available: Receiver<()>,
    reclaimed: AtomicUsize,
}

impl Capacity {
    pub(crate) fn new(max: usize) -> Arc<Self> {
        let (release, available) = bounded(max);
        for _ in 0..max {
            let _ = release.try_send(());
        }

        Arc::new(Self {
            max,
            release,
            available,
            reclaimed: AtomicUsize::new(0),
        })
    }

    pub(crate) fn try_acquire(&self) -> Option<CapacityToken> {
        self.available.try_recv().ok().map(|()| self.claim())
    }

    /// Wrap a token already received from [`Capacity::available`].
    pub(crate) fn claim(&self) -> CapacityToken {
        CapacityToken {
            release: self.release.clone(),
        }
    }

    pub(crate) fn available(&self) -> &Receiver<()> {
        &self.available
    }

    pub(crate) fn in_use(&self) -> usize {
        let idle = self.available.len() + self.reclaimed.load(Ordering::Acquire);
        self.max.saturating_sub(idle)
    }

    /// Block until every token is back, keeping them out of circulation.
    pub(crate) fn reclaim_all(&self) {
        while self.reclaimed.load(Ordering::Acquire) < self.max {
            if self.available.recv().is_err() {
                break;
            }
            self.reclaimed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// One unit of capacity. Dropping it hands the slot back.
#[derive(Debug)]
pub(crate) struct CapacityToken {
    release: Sender<()>,
}

impl Drop for CapacityToken {
    fn drop(&mut self) {
        // never full: the buffer holds `max` and at most `max` tokens exist
        let _ = self.release.try_send(());
    }
}

enum WorkerState {
    Idle,
    Executing(Job),
    Retiring(RetireReason),
    Terminated(RetireReason),
}

pub(crate) struct Worker {
    pub(crate) id: WorkerId,
    pub(crate) pool: PoolId,
    pub(crate) handoff: Receiver<Job>,
    pub(crate) cancel: Receiver<()>,
    pub(crate) idle_timeout: Duration,
    pub(crate) idle_check: Duration,
    pub(crate) ctx: Arc<ExecContext>,
    pub(crate) token: CapacityToken,
}

impl Worker {
    pub(crate) fn spawn(self, builder: thread::Builder) -> io::Result<JoinHandle<RetireReason>> {
        builder.spawn(move || self.run())
    }

    // main loop
    pub(crate) fn run(self) -> RetireReason {
        mark_pool_thread(self.pool);
        self.ctx.metrics.record_worker_spawned();
        tracing::debug!(worker = self.id, "worker started");

        let ticker = tick(self.idle_check);
        let mut last_activity = Instant::now();
        let mut state = WorkerState::Idle;

        loop {
            state = match state {
                WorkerState::Idle => self.wait(&ticker, last_activity),
                WorkerState::Executing(job) => {
                    let task = job.id();
                    job.run(&self.ctx);
                    last_activity = Instant::now();
                    tracing::trace!(worker = self.id, %task, "task finished");
                    WorkerState::Idle
                }
                WorkerState::Retiring(reason) => {
                    self.ctx.metrics.record_worker_retired(reason);
                    tracing::debug!(worker = self.id, ?reason, "worker retiring");
                    WorkerState::Terminated(reason)
                }
                WorkerState::Terminated(reason) => {
                    drop(self.token);
                    return reason;
                }
            };
        }
    }

    fn wait(&self, ticker: &Receiver<Instant>, last_activity: Instant) -> WorkerState {
        select! {
            recv(self.handoff) -> job => match job {
                Ok(job) => WorkerState::Executing(job),
                Err(_) => WorkerState::Retiring(RetireReason::Shutdown),
            },
            recv(ticker) -> _ => {
                if last_activity.elapsed() > self.idle_timeout {
                    WorkerState::Retiring(RetireReason::Idle)
                } else {
                    WorkerState::Idle
                }
            },
            recv(self.cancel) -> _ => WorkerState::Retiring(RetireReason::Shutdown),
        }
    }
}
