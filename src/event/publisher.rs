//! At-least-once publishing on top of a [`Bus`].
//!
//! [`ResilientPublisher::publish_with_retry`] makes exactly one synchronous
//! delivery attempt and never reports failure to the caller. Failed events go
//! to a bounded retry queue drained by one background task with exponential
//! backoff. Events that exhaust their retries, or that cannot be queued at
//! all, are written to the [`DeadLetterSink`].
//!
//! ```text
//! publish_with_retry ──► Bus ──ok──► done
//!        │ err
//!        ▼
//!   retry queue ──► retry task ──► Bus (after base * 2^(attempt-1))
//!        │ full                          │ err, attempt == max
//!        ▼                               ▼
//!   dead letter (attempts = 0)      dead letter (attempts = max)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::{Bus, Event, EventHandler, EventType};
use crate::error::RelayError;
use crate::persistence::DeadLetterSink;

/// Retry policy of a [`ResilientPublisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Retries after the first failed attempt before dead-lettering.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Capacity of the retry queue.
    pub queue_capacity: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            queue_capacity: 1000,
        }
    }
}

impl RetrySettings {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

#[derive(Debug)]
struct RetryEntry {
    event: Event,
    attempt: u32,
    last_error: String,
}

/// State shared between the publisher handle and its retry task.
#[derive(Debug)]
struct Delivery {
    bus: Arc<dyn Bus>,
    sink: Arc<DeadLetterSink>,
    settings: RetrySettings,
    dead_lettered: AtomicU64,
}

impl Delivery {
    async fn dead_letter(&self, event: &Event, attempts: u32, last_error: &str) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            event_type = %event.event_type,
            attempts,
            error = last_error,
            "event delivery failed permanently, writing to dead letter"
        );
        if let Err(err) = self.sink.write(event, attempts, last_error).await {
            tracing::error!(
                event_type = %event.event_type,
                error = %err,
                "failed to write dead-letter record"
            );
        }
    }

    /// Runs one retry. `final_attempt` is set once shutdown has begun.
    async fn retry(&self, entry: RetryEntry, final_attempt: bool, queue: &mpsc::Sender<RetryEntry>) {
        let RetryEntry { event, attempt, .. } = entry;
        let last_error = match self.bus.publish(&event).await {
            Ok(()) => {
                tracing::info!(event_type = %event.event_type, attempt, "event delivered after retry");
                return;
            }
            Err(err) => err.to_string(),
        };

        if attempt >= self.settings.max_retries || final_attempt {
            self.dead_letter(&event, attempt, &last_error).await;
            return;
        }

        tracing::warn!(
            event_type = %event.event_type,
            attempt,
            max_retries = self.settings.max_retries,
            error = %last_error,
            "retry failed, re-queueing event"
        );
        let next = RetryEntry {
            event,
            attempt: attempt + 1,
            last_error,
        };
        if let Err(err) = queue.try_send(next) {
            let RetryEntry {
                event, last_error, ..
            } = err.into_inner();
            self.dead_letter(&event, attempt, &last_error).await;
        }
    }
}

/// Publisher wrapping a [`Bus`] with background retry and dead-lettering.
///
/// Must be created inside a Tokio runtime; the retry task is spawned by
/// [`new`](Self::new) and stopped by [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct ResilientPublisher {
    delivery: Arc<Delivery>,
    queue: mpsc::Sender<RetryEntry>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ResilientPublisher {
    /// Wraps `bus` and starts the retry task.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, sink: Arc<DeadLetterSink>, settings: RetrySettings) -> Self {
        let (queue, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let delivery = Arc::new(Delivery {
            bus,
            sink,
            settings,
            dead_lettered: AtomicU64::new(0),
        });
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(retry_loop(
            Arc::clone(&delivery),
            rx,
            queue.clone(),
            shutdown.clone(),
        ));
        tracing::info!(
            max_retries = settings.max_retries,
            base_delay_ms = settings.base_delay.as_millis(),
            queue_capacity = settings.queue_capacity,
            "resilient publisher started"
        );
        Self {
            delivery,
            queue,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Publishes `event`, retrying failures in the background.
    ///
    /// Makes one delivery attempt on the caller's task and never fails.
    /// A full retry queue sends the event straight to the dead-letter sink
    /// with `attempts = 0`.
    pub async fn publish_with_retry(&self, event: Event) {
        let last_error = match self.delivery.bus.publish(&event).await {
            Ok(()) => return,
            Err(err) => err.to_string(),
        };

        if self.delivery.settings.max_retries == 0 || self.shutdown.is_cancelled() {
            self.delivery.dead_letter(&event, 0, &last_error).await;
            return;
        }

        tracing::warn!(event_type = %event.event_type, error = %last_error, "publish failed, queueing for retry");
        let entry = RetryEntry {
            event,
            attempt: 1,
            last_error,
        };
        if let Err(err) = self.queue.try_send(entry) {
            let entry = err.into_inner();
            tracing::warn!(event_type = %entry.event.event_type, "retry queue unavailable");
            self.delivery
                .dead_letter(&entry.event, 0, &entry.last_error)
                .await;
        }
    }

    /// Subscribes `handler` on the wrapped bus.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.delivery.bus.subscribe(event_type, handler);
    }

    /// The wrapped bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.delivery.bus
    }

    /// Retry policy in effect.
    #[must_use]
    pub fn settings(&self) -> RetrySettings {
        self.delivery.settings
    }

    /// Number of events written to the dead-letter sink so far.
    #[must_use]
    pub fn dead_lettered(&self) -> u64 {
        self.delivery.dead_lettered.load(Ordering::Relaxed)
    }

    /// Stops the retry task after one final attempt for every queued event.
    ///
    /// Events still failing are dead-lettered. A second call returns at once.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ShutdownTimeout`] if draining takes longer than
    /// `timeout`; the task keeps running detached in that case.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RelayError> {
        self.shutdown.cancel();
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        match time::timeout(timeout, worker).await {
            Ok(Ok(())) => {
                tracing::info!("resilient publisher stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(RelayError::Internal(format!("retry task failed: {err}"))),
            Err(_) => Err(RelayError::ShutdownTimeout {
                component: "resilient publisher",
                timeout,
            }),
        }
    }
}

impl Drop for ResilientPublisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn retry_loop(
    delivery: Arc<Delivery>,
    mut rx: mpsc::Receiver<RetryEntry>,
    queue: mpsc::Sender<RetryEntry>,
    shutdown: CancellationToken,
) {
    loop {
        let entry = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            entry = rx.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };

        let delay = delivery.settings.backoff(entry.attempt);
        tracing::debug!(
            event_type = %entry.event.event_type,
            attempt = entry.attempt,
            delay_ms = delay.as_millis(),
            "waiting before retry"
        );
        let interrupted = tokio::select! {
            () = shutdown.cancelled() => true,
            () = time::sleep(delay) => false,
        };
        delivery.retry(entry, interrupted, &queue).await;
    }

    rx.close();
    let mut drained = 0_usize;
    while let Some(entry) = rx.recv().await {
        drained += 1;
        delivery.retry(entry, true, &queue).await;
    }
    tracing::debug!(drained, "retry queue drained");
}
