//! Per-identifier one-shot timers.
//!
//! [`TimerTracker`] runs an action once at a future instant keyed by a domain
//! identifier (a gamble id, an expedition id, a reset slot).
//!
//! ## Invariants
//! - At most one live timer per identifier. Arming again cancels the previous
//!   timer under the same lock acquisition that inserts the new one.
//! - A timer only fires if it is still the registered timer for its id, so a
//!   replaced or stopped timer never runs its action.
//! - Nothing fires once [`TimerTracker::shutdown`] has begun.
//! - Actions run inside tracked tasks; shutdown waits for them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::RelayError;

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
}

type TimerMap<K> = Arc<Mutex<HashMap<K, ArmedTimer>>>;

/// Registry of cancellable one-shot timers keyed by `K`.
pub struct TimerTracker<K> {
    name: &'static str,
    timers: TimerMap<K>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    generation: AtomicU64,
}

impl<K> fmt::Debug for TimerTracker<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.timers.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("TimerTracker")
            .field("name", &self.name)
            .field("pending", &pending)
            .field("running", &self.tasks.len())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<K> TimerTracker<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Creates an empty tracker; `name` appears in logs and errors.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            timers: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Arms a timer running `action` at `at`.
    ///
    /// An instant in the past runs the action immediately.
    pub fn schedule_at<F, Fut>(&self, id: K, at: DateTime<Utc>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.schedule_after(id, delay, action);
    }

    /// Arms a timer running `action` after `delay`.
    ///
    /// A zero delay stops any timer for `id` and runs the action immediately.
    pub fn schedule_after<F, Fut>(&self, id: K, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            tracing::warn!(timer = self.name, %id, "tracker shut down, ignoring timer");
            return;
        }
        if delay.is_zero() {
            self.stop_timer(&id);
            tracing::info!(timer = self.name, %id, "deadline already passed, executing now");
            self.execute(action);
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = timers.insert(
                id.clone(),
                ArmedTimer {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.cancel.cancel();
            }
        }
        tracing::debug!(timer = self.name, %id, delay_ms = delay.as_millis(), "timer armed");

        let timers = Arc::clone(&self.timers);
        let shutdown = self.shutdown.clone();
        let name = self.name;
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = shutdown.cancelled() => return,
                () = time::sleep(delay) => {}
            }
            if shutdown.is_cancelled() || !remove_own(&timers, &id, generation) {
                return;
            }
            tracing::debug!(timer = name, %id, "timer fired");
            action().await;
        });
    }

    /// Runs `action` now in a tracked task.
    pub fn execute<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            tracing::warn!(timer = self.name, "tracker shut down, not executing");
            return;
        }
        self.tasks.spawn(async move { action().await });
    }

    /// Cancels the timer for `id`. Returns `true` if one was pending.
    pub fn stop_timer(&self, id: &K) -> bool {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a timer is armed for `id`.
    #[must_use]
    pub fn is_pending(&self, id: &K) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every armed timer and waits for running actions.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ShutdownTimeout`] if actions are still running
    /// after `timeout`; they are not aborted.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RelayError> {
        self.shutdown.cancel();
        let cancelled: Vec<(K, ArmedTimer)> = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, timer) in cancelled {
            timer.cancel.cancel();
            tracing::info!(timer = self.name, %id, "cancelled pending timer");
        }

        self.tasks.close();
        if time::timeout(timeout, self.tasks.wait()).await.is_err() {
            tracing::warn!(timer = self.name, "shutdown timed out, actions still running");
            return Err(RelayError::ShutdownTimeout {
                component: self.name,
                timeout,
            });
        }
        tracing::info!(timer = self.name, "timers shut down");
        Ok(())
    }
}

/// Removes the entry for `id` if it still belongs to `generation`.
fn remove_own<K: Eq + Hash>(timers: &TimerMap<K>, id: &K, generation: u64) -> bool {
    let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
    match timers.get(id) {
        Some(timer) if timer.generation == generation => {
            timers.remove(id);
            true
        }
        _ => false,
    }
}
