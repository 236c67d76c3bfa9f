use crossbeam_channel::{bounded, unbounded, Receiver};
use elastic_pool::prelude::*;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl Logger for CaptureLogger {
    fn log(&self, args: fmt::Arguments<'_>) {
        self.lines.lock().push(args.to_string());
    }
}

fn started_pool(max_workers: usize, idle_timeout: Duration) -> Pool {
    let config = Config::builder()
        .max_workers(max_workers)
        .idle_timeout(idle_timeout)
        .build()
        .unwrap();
    let pool = Pool::new(config).unwrap();
    pool.start().unwrap();
    pool
}

fn wait_for(rx: &Receiver<()>, count: usize) {
    for _ in 0..count {
        rx.recv_timeout(Duration::from_secs(10))
            .expect("task did not complete in time");
    }
}

#[test]
fn test_never_exceeds_max_workers() {
    let pool = started_pool(3, Duration::from_secs(60));
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = unbounded();

    for _ in 0..30 {
        let current = current.clone();
        let peak = peak.clone();
        let done = done_tx.clone();
        pool.submit(
            Task::new(())
                .handler(move |_| {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .on_complete(move |_, _| {
                    let _ = done.send(());
                }),
        )
        .unwrap();

        assert!(pool.size() <= 3);
    }

    wait_for(&done_rx, 30);
    pool.close();

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency was {}", peak);
    assert_eq!(pool.metrics().tasks_succeeded, 30);
    assert!(pool.metrics().workers_spawned <= 30);
}

#[test]
fn test_callback_fires_exactly_once_per_task() {
    let pool = started_pool(4, Duration::from_secs(60));
    let counts: Arc<Vec<AtomicUsize>> = Arc::new((0..50).map(|_| AtomicUsize::new(0)).collect());

    for i in 0..50usize {
        let counts = counts.clone();
        pool.submit(
            Task::new(i)
                .handler(|i| if i % 5 == 0 { Err("multiple of five".into()) } else { Ok(()) })
                .retry_if(|_, attempt| attempt < 1)
                .on_complete(move |i, _| {
                    counts[i].fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    }

    // abandoned tasks report too, so close alone settles every callback
    pool.close();

    for (i, count) in counts.iter().enumerate() {
        assert_eq!(count.load(Ordering::SeqCst), 1, "task {} callback count", i);
    }
}

#[test]
fn test_retry_runs_until_predicate_declines() {
    let pool = started_pool(2, Duration::from_secs(60));
    let attempts = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = bounded(1);

    let counter = attempts.clone();
    pool.submit(
        Task::new("always fails")
            .handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("permanent".into())
            })
            .retry_if(|_, attempt| attempt < 3)
            .on_complete(move |_, outcome| {
                let _ = tx.send(outcome.map_err(|e| e.to_string()));
            }),
    )
    .unwrap();

    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome, Err("handler failed: permanent".to_string()));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(pool.metrics().retries, 3);
    pool.close();
}

#[test]
fn test_panicking_handler_does_not_kill_worker() {
    let logger = Arc::new(CaptureLogger::default());
    let config = Config::builder()
        .max_workers(1)
        .shared_logger(logger.clone())
        .build()
        .unwrap();
    let pool = Pool::new(config).unwrap();
    pool.start().unwrap();
    let (tx, rx) = bounded(2);

    let fault_tx = tx.clone();
    pool.submit(
        Task::new("boom")
            .handler(|msg| panic!("{}", msg))
            .on_complete(move |_, outcome| {
                let _ = fault_tx.send(matches!(outcome, Err(TaskError::HandlerFault(_))));
            }),
    )
    .unwrap();

    pool.submit(
        Task::new("fine")
            .handler(|_| Ok(()))
            .on_complete(move |_, outcome| {
                let _ = tx.send(outcome.is_ok());
            }),
    )
    .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

    // both tasks ran on the single worker
    assert_eq!(pool.metrics().workers_spawned, 1);

    let lines = logger.lines.lock().clone();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("boom"));
    // message line followed by the stack of the panicking handler
    assert!(lines[0].lines().count() > 1);
    pool.close();
}

#[test]
fn test_close_drains_in_flight_work() {
    let pool = started_pool(2, Duration::from_secs(60));
    let running = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let reported = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let running = running.clone();
        let completed = completed.clone();
        let reported = reported.clone();
        pool.submit(
            Task::new(())
                .handler(move |_| {
                    running.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(500));
                    running.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .on_complete(move |_, _| {
                    reported.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    }

    pool.close();

    assert_eq!(running.load(Ordering::SeqCst), 0);
    assert_eq!(reported.load(Ordering::SeqCst), 10);
    assert!(completed.load(Ordering::SeqCst) >= 8);

    let snapshot = pool.metrics();
    assert_eq!(snapshot.tasks_finished(), 10);
    assert_eq!(snapshot.live_workers, 0);
    assert_eq!(pool.size(), 0);
}

#[test]
fn test_idle_workers_retire_without_close() {
    let pool = started_pool(2, Duration::from_secs(1));
    let (tx, rx) = bounded(1);

    pool.go(move || {
        let _ = tx.send(());
        Ok(())
    })
    .unwrap();
    wait_for(&rx, 1);
    let finished = Instant::now();

    thread::sleep(Duration::from_millis(300));
    assert_eq!(pool.size(), 1);

    while pool.size() > 0 && finished.elapsed() < Duration::from_secs(3) {
        thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(pool.size(), 0);
    assert!(finished.elapsed() < Duration::from_millis(2500));
    assert_eq!(pool.metrics().workers_retired_idle, 1);
    pool.close();
}

#[test]
fn test_submit_after_close_is_rejected() {
    let pool = started_pool(2, Duration::from_secs(60));
    pool.close();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let result = pool.submit(Task::new(()).handler(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    assert!(matches!(result, Err(Error::PoolClosed)));
    assert!(matches!(pool.go(|| Ok(())), Err(Error::PoolClosed)));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_handler_reaches_callback() {
    let pool = started_pool(1, Duration::from_secs(60));
    let (tx, rx) = bounded(1);

    pool.submit(Task::new(7u8).on_complete(move |msg, outcome| {
        let _ = tx.send((msg, matches!(outcome, Err(TaskError::HandlerMissing))));
    }))
    .unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (7, true));
    pool.close();
}

#[test]
fn test_error_hook_sees_every_failure() {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let config = Config::builder()
        .max_workers(2)
        .on_error(move |id, err| sink.lock().push((id, err.to_string())))
        .build()
        .unwrap();
    let pool = Pool::new(config).unwrap();
    pool.start().unwrap();
    let (tx, rx) = unbounded();

    let mut failing = Vec::new();
    for n in 0..6u32 {
        let done = tx.clone();
        let task = Task::new(n)
            .handler(|n| if n % 2 == 0 { Ok(()) } else { Err(format!("odd {}", n).into()) })
            .on_complete(move |_, _| {
                let _ = done.send(());
            });
        if n % 2 == 1 {
            failing.push(task.id());
        }
        pool.submit(task).unwrap();
    }

    wait_for(&rx, 6);
    pool.close();

    let mut seen: Vec<TaskId> = failures.lock().iter().map(|(id, _)| *id).collect();
    seen.sort();
    assert_eq!(seen, failing);
    assert!(failures.lock().iter().all(|(_, msg)| msg.starts_with("handler failed: odd")));
}

#[test]
fn test_submit_async_delivers() {
    let pool = started_pool(2, Duration::from_secs(60));
    let (tx, rx) = unbounded();

    for _ in 0..5 {
        let done = tx.clone();
        pool.submit_async(Task::new(()).handler(|_| Ok(())).on_complete(move |_, outcome| {
            let _ = done.send(outcome.is_ok());
        }));
    }

    for _ in 0..5 {
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
    pool.close();
}

#[test]
fn test_go_async_runs_closure() {
    let pool = started_pool(1, Duration::from_secs(60));
    let (tx, rx) = bounded(1);

    pool.go_async(move || {
        let _ = tx.send(());
        Ok(())
    });

    wait_for(&rx, 1);
    pool.close();
}

#[test]
fn test_default_worker_limit_is_core_count() {
    let pool = Pool::new(Config::default()).unwrap();

    assert_eq!(pool.max_workers(), num_cpus::get());
    assert_eq!(pool.size(), 0);
}
