//! Periodic trigger for due retries.
//!
//! Each tick runs every registered job once, one after another, and each job
//! processes one bounded batch to completion. Only one scheduler instance may
//! run against a given store: fetching due items does not claim them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::WebhookResult;

/// Counts from one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Items fetched as due.
    pub fetched: usize,
    pub succeeded: usize,
    /// Failed and rescheduled.
    pub retried: usize,
    /// Moved to a dead-letter queue.
    pub dead_lettered: usize,
    /// Could not be processed; left in their persisted state for the next tick.
    pub errored: usize,
}

/// A batch job driven by the scheduler.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// Processes up to `batch_size` due items.
    async fn run_once(&self, batch_size: usize) -> WebhookResult<BatchReport>;
}

/// Runs jobs on a fixed interval until shut down.
pub struct RetryScheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    interval: Duration,
    batch_size: usize,
}

impl RetryScheduler {
    pub fn new(interval: Duration, batch_size: usize) -> Self {
        Self {
            jobs: Vec::new(),
            interval,
            batch_size,
        }
    }

    /// Registers a job.
    pub fn with_job(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Runs every job once. A failing job does not stop the others.
    pub async fn tick(&self) -> Vec<(String, WebhookResult<BatchReport>)> {
        let mut results = Vec::with_capacity(self.jobs.len());

        for job in &self.jobs {
            let result = job.run_once(self.batch_size).await;
            match &result {
                Ok(report) if report.fetched > 0 => {
                    tracing::info!(
                        job = job.name(),
                        fetched = report.fetched,
                        succeeded = report.succeeded,
                        retried = report.retried,
                        dead_lettered = report.dead_lettered,
                        errored = report.errored,
                        "Processed retry batch"
                    );
                }
                Ok(_) => {
                    tracing::debug!(job = job.name(), "No due items");
                }
                Err(e) => {
                    tracing::error!(job = job.name(), error = %e, "Retry batch failed");
                }
            }
            results.push((job.name().to_string(), result));
        }

        results
    }

    /// Ticks until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A shutdown during a tick drops the in-flight batch; items being
    /// attempted keep their persisted state and are picked up again later.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            jobs = ?self.job_names(),
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Retry scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.tick() => {}
                        _ = wait_for_shutdown(&mut shutdown) => {
                            tracing::warn!("Shutdown requested mid-batch, abandoning in-flight work");
                            break;
                        }
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        tracing::info!("Retry scheduler stopped");
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("jobs", &self.job_names())
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebhookError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        name: &'static str,
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingJob {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &str {
            self.name
        }

        async fn run_once(&self, batch_size: usize) -> WebhookResult<BatchReport> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WebhookError::Internal("store down".into()));
            }
            Ok(BatchReport {
                fetched: batch_size,
                succeeded: batch_size,
                ..Default::default()
            })
        }
    }

    struct HangingJob;

    #[async_trait]
    impl ScheduledJob for HangingJob {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn run_once(&self, _batch_size: usize) -> WebhookResult<BatchReport> {
            std::future::pending::<()>().await;
            Ok(BatchReport::default())
        }
    }

    #[tokio::test]
    async fn test_tick_runs_every_job_despite_failures() {
        let failing = CountingJob::new("failing", true);
        let healthy = CountingJob::new("healthy", false);
        let scheduler = RetryScheduler::new(Duration::from_secs(30), 10)
            .with_job(failing.clone())
            .with_job(healthy.clone());

        let results = scheduler.tick().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].1.as_ref().unwrap().succeeded, 10);
        assert_eq!(healthy.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let job = CountingJob::new("counting", false);
        let scheduler = Arc::new(RetryScheduler::new(Duration::from_secs(30), 5).with_job(job.clone()));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(rx).await })
        };

        // First tick fires immediately, then every 30s.
        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();

        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_hung_batch() {
        let scheduler = Arc::new(RetryScheduler::new(Duration::from_secs(30), 5).with_job(Arc::new(HangingJob)));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(rx).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("scheduler should stop")
            .unwrap();
    }
}
