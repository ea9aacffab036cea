//! Bounded worker pool.
//!
//! A producer feeds jobs into a bounded channel; N workers share the
//! receiving end and run one job at a time each. On shutdown the producer
//! stops queueing and workers stop taking new jobs once their current one
//! returns.
//!
//! # Features
//!
//! - Configurable number of workers, with one queued job per worker
//! - Graceful shutdown with broadcast channel
//! - A panicking job is counted as failed and the worker keeps going
//! - Pool statistics tracking

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use super::shutdown::{ShutdownHandle, ShutdownSignal};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: 1 }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers }
    }
}

/// How a job ended, as far as pool statistics are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// Statistics about one pool run.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Jobs handed to the pool.
    pub jobs_submitted: u64,
    /// Total number of jobs completed successfully.
    pub jobs_completed: u64,
    /// Total number of jobs that failed.
    pub jobs_failed: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Jobs never started because of shutdown.
    pub fn jobs_skipped(&self) -> u64 {
        self.jobs_submitted.saturating_sub(self.total_processed())
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
#[derive(Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedPoolStats {
    fn record(&self, outcome: JobOutcome, duration: Duration) {
        match outcome {
            JobOutcome::Completed => self.jobs_completed.fetch_add(1, Ordering::SeqCst),
            JobOutcome::Failed => self.jobs_failed.fetch_add(1, Ordering::SeqCst),
        };
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize, submitted: u64) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            jobs_submitted: submitted,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// Runs jobs on a fixed number of tokio workers.
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self { config }
    }

    /// Processes `jobs` with `handler` and returns once every started job
    /// has finished. Jobs not started before shutdown are dropped.
    pub async fn run<T, F, Fut>(&self, jobs: Vec<T>, shutdown: &ShutdownHandle, handler: F) -> PoolStats
    where
        T: Send + 'static,
        F: Fn(T, ShutdownSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let num_workers = self.config.num_workers.max(1);
        let submitted = jobs.len() as u64;

        let (tx, rx) = mpsc::channel::<T>(num_workers);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);
        let stats = Arc::new(SharedPoolStats::default());

        info!(workers = num_workers, jobs = submitted, "Starting worker pool");

        let mut worker_handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{i}"),
                rx: Arc::clone(&rx),
                handler: Arc::clone(&handler),
                shutdown: shutdown.signal(),
                stats: Arc::clone(&stats),
            };
            worker_handles.push(tokio::spawn(worker.run()));
        }
        drop(rx);

        let mut producer_signal = shutdown.signal();
        for job in jobs {
            tokio::select! {
                biased;
                _ = producer_signal.triggered() => {
                    info!("Shutdown requested, not queueing remaining jobs");
                    break;
                }
                sent = tx.send(job) => {
                    if sent.is_err() {
                        error!("All workers exited, not queueing remaining jobs");
                        break;
                    }
                }
            }
        }
        drop(tx);

        for handle in worker_handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }

        let stats = stats.to_pool_stats(num_workers, submitted);
        info!(
            completed = stats.jobs_completed,
            failed = stats.jobs_failed,
            skipped = stats.jobs_skipped(),
            "Worker pool finished"
        );
        stats
    }
}

struct Worker<T, F> {
    id: String,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    handler: Arc<F>,
    shutdown: ShutdownSignal,
    stats: Arc<SharedPoolStats>,
}

impl<T, F, Fut> Worker<T, F>
where
    T: Send + 'static,
    F: Fn(T, ShutdownSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    async fn run(mut self) {
        debug!(worker_id = %self.id, "Worker started");
        loop {
            if self.shutdown.is_triggered() {
                debug!(worker_id = %self.id, "Worker stopping on shutdown");
                break;
            }

            let job = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.triggered() => None,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = job else {
                break;
            };

            let start = Instant::now();
            let future = (self.handler)(job, self.shutdown.clone());
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(worker_id = %self.id, "Job panicked");
                    JobOutcome::Failed
                }
            };
            self.stats.record(outcome, start.elapsed());
        }
        debug!(worker_id = %self.id, "Worker exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pool_stats() {
        let stats = PoolStats {
            num_workers: 2,
            jobs_submitted: 10,
            jobs_completed: 6,
            jobs_failed: 2,
            average_job_duration: Duration::from_millis(5),
        };
        assert_eq!(stats.total_processed(), 8);
        assert_eq!(stats.jobs_skipped(), 2);
        assert!((stats.success_rate() - 75.0).abs() < 1e-9);
        assert_eq!(PoolStats::default().success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_runs_every_job() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let stats = pool
            .run((0..20).collect(), &ShutdownHandle::new(), move |n: u32, _signal| {
                let seen = Arc::clone(&seen_in);
                async move {
                    seen.lock().await.push(n);
                    if n % 5 == 0 {
                        JobOutcome::Failed
                    } else {
                        JobOutcome::Completed
                    }
                }
            })
            .await;

        let mut seen = seen.lock().await.clone();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert_eq!(stats.jobs_completed, 16);
        assert_eq!(stats.jobs_failed, 4);
        assert_eq!(stats.jobs_skipped(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (running_in, peak_in) = (Arc::clone(&running), Arc::clone(&peak));
        pool.run((0..8).collect(), &ShutdownHandle::new(), move |_: u32, _signal| {
            let running = Arc::clone(&running_in);
            let peak = Arc::clone(&peak_in);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                JobOutcome::Completed
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_skips_queued_jobs() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1));
        let shutdown = ShutdownHandle::new();
        let trigger = shutdown.clone();
        let stats = pool
            .run((0..10).collect(), &shutdown, move |n: u32, _signal| {
                let trigger = trigger.clone();
                async move {
                    if n == 1 {
                        trigger.trigger();
                    }
                    JobOutcome::Completed
                }
            })
            .await;
        assert!(stats.jobs_completed >= 2);
        assert!(stats.jobs_completed < 10);
        assert_eq!(stats.jobs_skipped(), 10 - stats.jobs_completed);
    }

    #[tokio::test]
    async fn test_panicking_job_counts_as_failure() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1));
        let stats = pool
            .run(vec![1u32, 2, 3], &ShutdownHandle::new(), |n, _signal| async move {
                if n == 2 {
                    panic!("job exploded");
                }
                JobOutcome::Completed
            })
            .await;
        assert_eq!(stats.jobs_completed, 2);
        assert_eq!(stats.jobs_failed, 1);
    }
}
