//! Periodic job scheduling on top of the [`WorkerPool`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::pool::{Job, WorkerPool};
use crate::error::RelayError;

/// Runs jobs at fixed intervals by enqueueing them into a [`WorkerPool`].
///
/// Every schedule owns one ticking task. Enqueueing is cancellable, so
/// [`stop`](Self::stop) returns promptly even while a loop is blocked on a
/// full pool queue.
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    schedules: AtomicUsize,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("loops", &self.tasks.len())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler feeding `pool`.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            schedules: AtomicUsize::new(0),
        }
    }

    /// Enqueues `job` every `every`, starting one interval from now.
    ///
    /// Missed ticks are skipped. Ignored once the scheduler is stopped.
    pub fn schedule(&self, every: Duration, job: Arc<dyn Job>) {
        if self.shutdown.is_cancelled() {
            tracing::warn!(job = job.name(), "scheduler stopped, ignoring schedule");
            return;
        }
        let every = every.max(Duration::from_millis(1));
        let schedule_id = self.schedules.fetch_add(1, Ordering::Relaxed) + 1;
        let name = job.name().to_string();
        tracing::info!(schedule_id, job = %name, interval_ms = every.as_millis(), "job scheduled");

        let pool = Arc::clone(&self.pool);
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match pool.enqueue_with_cancel(Arc::clone(&job), &shutdown).await {
                    Ok(()) => {}
                    Err(RelayError::EnqueueCancelled) => break,
                    Err(err) => {
                        tracing::warn!(schedule_id, job = %name, error = %err, "scheduled enqueue failed, stopping schedule");
                        break;
                    }
                }
            }
            tracing::debug!(schedule_id, job = %name, "schedule loop exited");
        });
    }

    /// Cancels every schedule and waits for the loops to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// [`stop`](Self::stop) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ShutdownTimeout`] if the loops do not exit in time.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RelayError> {
        time::timeout(timeout, self.stop())
            .await
            .map_err(|_| RelayError::ShutdownTimeout {
                component: "scheduler",
                timeout,
            })?;
        tracing::info!("scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::worker::pool::JobFn;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Arc<dyn Job> {
        let counter = Arc::clone(counter);
        JobFn::arc("tick", move |_cancel: CancellationToken| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn runs_repeatedly() {
        let pool = Arc::new(WorkerPool::new(2, 10));
        pool.start().await;
        let scheduler = Scheduler::new(Arc::clone(&pool));
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(10), counting_job(&runs));
        time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        pool.stop().await;

        assert!(runs.load(Ordering::SeqCst) >= 2, "ran {} times", runs.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_returns_while_blocked_on_full_queue() {
        // Never started, so the queue fills after one job.
        let pool = Arc::new(WorkerPool::new(1, 1));
        let scheduler = Scheduler::new(Arc::clone(&pool));
        let runs = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(5), counting_job(&runs));
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.queued(), 1);

        let stopped = time::timeout(Duration::from_secs(2), scheduler.stop()).await;
        assert!(stopped.is_ok(), "scheduler stop blocked");
    }

    #[tokio::test(start_paused = true)]
    async fn independent_schedules_both_run() {
        let pool = Arc::new(WorkerPool::new(2, 10));
        pool.start().await;
        let scheduler = Scheduler::new(Arc::clone(&pool));
        let fast = Arc::new(AtomicUsize::new(0));
        let slow = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(5), counting_job(&fast));
        scheduler.schedule(Duration::from_millis(20), counting_job(&slow));
        time::sleep(Duration::from_millis(120)).await;
        tokio_test::assert_ok!(scheduler.shutdown(Duration::from_secs(1)).await);
        pool.stop().await;

        assert!(fast.load(Ordering::SeqCst) >= 2);
        assert!(slow.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_after_stop_is_ignored() {
        let pool = Arc::new(WorkerPool::new(1, 1));
        let scheduler = Scheduler::new(Arc::clone(&pool));
        scheduler.stop().await;

        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_millis(1), counting_job(&runs));
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.queued(), 0);
    }
}
