//! Bounded worker pool.
//!
//! A fixed number of workers drain one shared bounded queue. [`WorkerPool::enqueue`]
//! waits while the queue is full, so backpressure reaches producers.
//!
//! ## Stop semantics
//! - [`WorkerPool::stop`] closes the queue: later enqueues fail with
//!   [`RelayError::PoolStopped`].
//! - Jobs accepted before the signal still run; workers drain the queue and
//!   then exit. Running jobs see their cancellation token fire.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;

/// Unit of work run by a [`WorkerPool`].
#[async_trait]
pub trait Job: Send + Sync {
    /// Runs the job. `cancel` fires when the pool is stopping.
    ///
    /// # Errors
    ///
    /// Errors are logged by the worker; they never stop it.
    async fn process(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "job"
    }
}

/// Closure-backed [`Job`].
///
/// Wraps a closure that creates a new future per run.
pub struct JobFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> fmt::Debug for JobFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFn").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<F> JobFn<F> {
    /// Creates a named closure job.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the job and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Job for JobFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        (self.f)(cancel).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

type JobQueue = Arc<Mutex<mpsc::Receiver<Arc<dyn Job>>>>;

/// Fixed-size pool of workers draining one bounded queue.
pub struct WorkerPool {
    workers: usize,
    sender: mpsc::Sender<Arc<dyn Job>>,
    queue: JobQueue,
    shutdown: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("capacity", &self.sender.max_capacity())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool of `workers` workers and a queue of `queue_capacity`
    /// jobs. Both values are clamped to at least 1.
    #[must_use]
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            workers: workers.max(1),
            sender,
            queue: Arc::new(Mutex::new(receiver)),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the workers. A second call is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("worker pool already started");
            return;
        }
        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.workers {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&self.queue),
                self.shutdown.clone(),
            )));
        }
        tracing::info!(workers = self.workers, "worker pool started");
    }

    /// Queues `job`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PoolStopped`] if the pool stops before the job
    /// is accepted.
    pub async fn enqueue(&self, job: Arc<dyn Job>) -> Result<(), RelayError> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::PoolStopped);
        }
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(RelayError::PoolStopped),
            sent = self.sender.send(job) => sent.map_err(|_| RelayError::PoolStopped),
        }
    }

    /// Queues `job`, giving up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EnqueueCancelled`] if `cancel` fires first and
    /// [`RelayError::PoolStopped`] if the pool stops first.
    pub async fn enqueue_with_cancel(
        &self,
        job: Arc<dyn Job>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RelayError::EnqueueCancelled),
            result = self.enqueue(job) => result,
        }
    }

    /// Number of jobs waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Returns `true` once [`stop`](Self::stop) has been signalled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops accepting jobs, then waits until the workers have run every
    /// accepted job and exited.
    ///
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        let joined = handles.len();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "worker task panicked");
            }
        }
        // Never started: nothing drains, so refuse further sends.
        self.queue.lock().await.close();
        if joined > 0 {
            tracing::info!("worker pool stopped");
        }
    }

    /// [`stop`](Self::stop) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ShutdownTimeout`] if running jobs outlast
    /// `timeout`; they keep running.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RelayError> {
        time::timeout(timeout, self.stop())
            .await
            .map_err(|_| RelayError::ShutdownTimeout {
                component: "worker pool",
                timeout,
            })
    }
}

async fn worker_loop(worker_id: usize, queue: JobQueue, shutdown: CancellationToken) {
    loop {
        let job = {
            let mut receiver = queue.lock().await;
            let received = tokio::select! {
                biased;
                job = receiver.recv() => Some(job),
                () = shutdown.cancelled() => None,
            };
            match received {
                Some(job) => job,
                None => {
                    // Closing keeps buffered jobs; recv yields None once they are gone.
                    receiver.close();
                    receiver.recv().await
                }
            }
        };
        let Some(job) = job else {
            break;
        };

        tracing::trace!(worker_id, job = job.name(), "job started");
        if let Err(err) = job.process(shutdown.child_token()).await {
            tracing::error!(worker_id, job = job.name(), error = %err, "job failed");
        }
    }
    tracing::debug!(worker_id, "worker exited");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Arc<dyn Job> {
        let counter = Arc::clone(counter);
        JobFn::arc("count", move |_cancel: CancellationToken| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        })
    }

    async fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
        time::timeout(deadline, async {
            while !check() {
                time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn all_jobs_complete() {
        let pool = WorkerPool::new(4, 16);
        pool.start().await;
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            tokio_test::assert_ok!(pool.enqueue(counting_job(&done)).await);
        }
        pool.stop().await;
        assert_eq!(done.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_runs_every_accepted_job() {
        let pool = WorkerPool::new(2, 16);
        pool.start().await;
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&done);
            let job = JobFn::arc("sleepy", move |_cancel: CancellationToken| {
                let counter = Arc::clone(&counter);
                async move {
                    time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            });
            tokio_test::assert_ok!(pool.enqueue(job).await);
        }

        pool.stop().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
        let late = pool.enqueue(counting_job(&done)).await;
        assert!(matches!(late, Err(RelayError::PoolStopped)));
    }

    #[tokio::test]
    async fn stop_waits_for_running_job() {
        let pool = WorkerPool::new(1, 1);
        pool.start().await;
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let job = JobFn::arc("slow", move |_cancel: CancellationToken| {
            let (s, f) = (Arc::clone(&s), Arc::clone(&f));
            async move {
                s.store(true, Ordering::SeqCst);
                time::sleep(Duration::from_millis(100)).await;
                f.store(true, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        });

        tokio_test::assert_ok!(pool.enqueue(job).await);
        assert!(wait_until(Duration::from_secs(2), || started.load(Ordering::SeqCst)).await);
        pool.stop().await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 4);
        pool.start().await;
        let done = Arc::new(AtomicUsize::new(0));

        let failing = JobFn::arc("failing", |_cancel: CancellationToken| async {
            Err::<(), _>(anyhow::anyhow!("boom"))
        });
        tokio_test::assert_ok!(pool.enqueue(failing).await);
        tokio_test::assert_ok!(pool.enqueue(counting_job(&done)).await);

        assert!(wait_until(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 1).await);
        pool.stop().await;
    }

    #[tokio::test]
    async fn enqueue_after_stop_fails() {
        let pool = WorkerPool::new(2, 2);
        pool.start().await;
        pool.stop().await;
        pool.stop().await;

        let done = Arc::new(AtomicUsize::new(0));
        let result = pool.enqueue(counting_job(&done)).await;
        assert!(matches!(result, Err(RelayError::PoolStopped)));
    }

    #[tokio::test]
    async fn enqueue_with_cancel_unblocks_full_queue() {
        // Not started, so the single slot stays occupied.
        let pool = WorkerPool::new(1, 0);
        let done = Arc::new(AtomicUsize::new(0));
        tokio_test::assert_ok!(pool.enqueue(counting_job(&done)).await);
        assert_eq!(pool.queued(), 1);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = pool.enqueue_with_cancel(counting_job(&done), &cancel).await;
        assert!(matches!(result, Err(RelayError::EnqueueCancelled)));
    }

    #[tokio::test]
    async fn blocked_enqueue_returns_when_pool_stops() {
        let pool = Arc::new(WorkerPool::new(1, 1));
        let done = Arc::new(AtomicUsize::new(0));
        tokio_test::assert_ok!(pool.enqueue(counting_job(&done)).await);

        let blocked = {
            let pool = Arc::clone(&pool);
            let job = counting_job(&done);
            tokio::spawn(async move { pool.enqueue(job).await })
        };
        time::sleep(Duration::from_millis(20)).await;
        pool.stop().await;

        let Ok(Ok(result)) = time::timeout(Duration::from_secs(1), blocked).await else {
            panic!("blocked enqueue did not return");
        };
        assert!(matches!(result, Err(RelayError::PoolStopped)));
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn jobs_see_cancellation_on_stop() {
        let pool = WorkerPool::new(1, 1);
        pool.start().await;
        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);
        let job = JobFn::arc("waits", move |cancel: CancellationToken| {
            let seen = Arc::clone(&seen);
            async move {
                cancel.cancelled().await;
                seen.store(true, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        });
        tokio_test::assert_ok!(pool.enqueue(job).await);
        time::sleep(Duration::from_millis(20)).await;

        tokio_test::assert_ok!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(observed.load(Ordering::SeqCst));
    }
}
