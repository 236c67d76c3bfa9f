//! Bursty workload: watch workers spawn during bursts and retire in between.
//!
//! Run with `RUST_LOG=elastic_pool=debug cargo run --example bursty_workload`.

use elastic_pool::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::builder()
        .max_workers(4)
        .idle_timeout(Duration::from_millis(500))
        .logger(TracingLogger)
        .on_error(|id, err| eprintln!("task {} failed: {}", id, err))
        .build()?;

    let pool = Pool::new(config)?;
    pool.start()?;

    let flaky_attempts = Arc::new(AtomicUsize::new(0));

    for burst in 0..3 {
        println!("=== burst {} ===", burst);

        for job in 0..12u32 {
            let attempts = flaky_attempts.clone();
            pool.submit(
                Task::new((burst, job))
                    .handler(move |&(_, job)| {
                        thread::sleep(Duration::from_millis(50));
                        if job == 7 && attempts.fetch_add(1, Ordering::Relaxed) % 3 != 2 {
                            return Err("transient failure".into());
                        }
                        if job == 11 {
                            panic!("job 11 always panics");
                        }
                        Ok(())
                    })
                    .retry_if(|_, attempt| attempt < 3),
            )?;
            println!("  submitted {:>2}, live workers: {}", job, pool.size());
        }

        thread::sleep(Duration::from_millis(1200));
        println!("  after idle gap, live workers: {}", pool.size());
    }

    pool.close();

    let snapshot = pool.metrics();
    println!("\n=== Metrics ===");
    println!("Tasks succeeded: {}", snapshot.tasks_succeeded);
    println!("Tasks failed: {}", snapshot.tasks_failed);
    println!("Tasks panicked: {}", snapshot.tasks_panicked);
    println!("Retries: {}", snapshot.retries);
    println!("Workers spawned: {}", snapshot.workers_spawned);
    println!("Workers retired idle: {}", snapshot.workers_retired_idle);
    println!("p99 latency: {:?}", Duration::from_nanos(snapshot.p99_latency_ns));

    Ok(())
}
