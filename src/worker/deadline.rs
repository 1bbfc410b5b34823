//! Deadline-driven workers.
//!
//! A [`DeadlineWorker`] listens for a trigger event (for example
//! `gamble.started`), arms a timer for the entity's deadline and, when it
//! fires, runs the domain action and publishes the completion event it
//! returns.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::timer::TimerTracker;
use crate::error::RelayError;
use crate::event::payloads::{ExpeditionStartedPayloadV1, GambleStartedPayloadV1};
use crate::event::{Bus, Event, EventType, PayloadKind, ResilientPublisher, handler_fn};

/// A payload naming an entity and the instant it must be acted on.
pub trait HasDeadline {
    /// Entity identifier; one timer is kept per id.
    fn entity_id(&self) -> Uuid;
    /// When the action is due.
    fn deadline(&self) -> DateTime<Utc>;
}

impl HasDeadline for GambleStartedPayloadV1 {
    fn entity_id(&self) -> Uuid {
        self.gamble_id
    }

    fn deadline(&self) -> DateTime<Utc> {
        self.join_deadline
    }
}

impl HasDeadline for ExpeditionStartedPayloadV1 {
    fn entity_id(&self) -> Uuid {
        self.expedition_id
    }

    fn deadline(&self) -> DateTime<Utc> {
        self.join_deadline
    }
}

/// Domain side of a [`DeadlineWorker`].
#[async_trait]
pub trait DeadlineAction: Send + Sync + 'static {
    /// Trigger payload carrying the entity id and deadline.
    type Payload: PayloadKind + HasDeadline;

    /// Worker name used in logs.
    fn name(&self) -> &'static str;

    /// Event type that arms a timer.
    fn trigger(&self) -> EventType;

    /// Entities already waiting for their deadline, re-armed on start.
    ///
    /// # Errors
    ///
    /// A failure is logged and leaves the worker running without them.
    async fn pending(&self) -> anyhow::Result<Vec<Self::Payload>> {
        Ok(Vec::new())
    }

    /// Acts on the entity whose deadline passed.
    ///
    /// Returns the completion event to publish, if any.
    ///
    /// # Errors
    ///
    /// Errors are logged; the entity is not retried.
    async fn execute(&self, id: Uuid) -> anyhow::Result<Option<Event>>;
}

/// Timer-tracked worker running a [`DeadlineAction`] at each entity deadline.
pub struct DeadlineWorker<A> {
    action: Arc<A>,
    timers: TimerTracker<Uuid>,
    publisher: Option<Arc<ResilientPublisher>>,
}

impl<A: DeadlineAction> fmt::Debug for DeadlineWorker<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineWorker")
            .field("name", &self.action.name())
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl<A: DeadlineAction> DeadlineWorker<A> {
    /// Creates a worker; completion events go through `publisher` when set.
    #[must_use]
    pub fn new(action: A, publisher: Option<Arc<ResilientPublisher>>) -> Arc<Self> {
        let name = action.name();
        Arc::new(Self {
            action: Arc::new(action),
            timers: TimerTracker::new(name),
            publisher,
        })
    }

    /// Subscribes to the trigger event on `bus`.
    pub fn subscribe(self: &Arc<Self>, bus: &dyn Bus) {
        let worker = Arc::clone(self);
        bus.subscribe(
            self.action.trigger(),
            handler_fn(move |event| {
                let worker = Arc::clone(&worker);
                async move {
                    worker.on_trigger(&event);
                    Ok(())
                }
            }),
        );
    }

    /// Re-arms timers for entities that were pending before start.
    pub async fn start(&self) {
        match self.action.pending().await {
            Ok(pending) => {
                if !pending.is_empty() {
                    tracing::info!(worker = self.action.name(), count = pending.len(), "re-arming pending deadlines");
                }
                for payload in &pending {
                    self.arm(payload);
                }
            }
            Err(err) => {
                tracing::error!(worker = self.action.name(), error = %err, "failed to load pending deadlines on startup");
            }
        }
    }

    /// Number of armed deadlines.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.pending()
    }

    /// Cancels armed deadlines and waits for running actions.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ShutdownTimeout`] if actions outlast `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RelayError> {
        tracing::info!(worker = self.action.name(), "shutting down deadline worker");
        self.timers.shutdown(timeout).await
    }

    fn on_trigger(&self, event: &Event) {
        match event.payload_as::<A::Payload>() {
            Ok(payload) if payload.entity_id().is_nil() => {
                tracing::warn!(
                    worker = self.action.name(),
                    event_type = %event.event_type,
                    "ignoring trigger without an entity id"
                );
            }
            Ok(payload) => self.arm(&payload),
            Err(err) => {
                tracing::warn!(
                    worker = self.action.name(),
                    event_type = %event.event_type,
                    error = %err,
                    "ignoring trigger with malformed payload"
                );
            }
        }
    }

    fn arm(&self, payload: &A::Payload) {
        let id = payload.entity_id();
        let deadline = payload.deadline();
        tracing::info!(worker = self.action.name(), %id, %deadline, "scheduling deadline execution");

        let action = Arc::clone(&self.action);
        let publisher = self.publisher.clone();
        self.timers
            .schedule_at(id, deadline, move || run_action(action, publisher, id));
    }
}

async fn run_action<A: DeadlineAction>(
    action: Arc<A>,
    publisher: Option<Arc<ResilientPublisher>>,
    id: Uuid,
) {
    tracing::info!(worker = action.name(), %id, "executing deadline action");
    match action.execute(id).await {
        Ok(Some(event)) => match publisher {
            Some(publisher) => publisher.publish_with_retry(event).await,
            None => tracing::debug!(worker = action.name(), %id, "no publisher, completion event dropped"),
        },
        Ok(None) => {}
        Err(err) => {
            tracing::error!(worker = action.name(), %id, error = %err, "deadline action failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    use serde_json::json;
    use tokio::time;

    use super::*;
    use crate::event::{EventHandler, MemoryBus, RetrySettings};
    use crate::persistence::DeadLetterSink;

    #[derive(Debug, Default)]
    struct GambleResolver {
        executed: Mutex<Vec<Uuid>>,
        boot_pending: Vec<GambleStartedPayloadV1>,
    }

    #[async_trait]
    impl DeadlineAction for Arc<GambleResolver> {
        type Payload = GambleStartedPayloadV1;

        fn name(&self) -> &'static str {
            "gamble"
        }

        fn trigger(&self) -> EventType {
            EventType::GAMBLE_STARTED
        }

        async fn pending(&self) -> anyhow::Result<Vec<Self::Payload>> {
            Ok(self.boot_pending.clone())
        }

        async fn execute(&self, id: Uuid) -> anyhow::Result<Option<Event>> {
            self.executed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(id);
            Ok(Some(Event::gamble_completed(&id.to_string(), "winner", 100, 3)))
        }
    }

    fn executed(resolver: &GambleResolver) -> Vec<Uuid> {
        resolver
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn counter_handler(counter: &Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        let counter = Arc::clone(counter);
        handler_fn(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        })
    }

    fn publisher(bus: &Arc<MemoryBus>, dir: &tempfile::TempDir) -> Arc<ResilientPublisher> {
        let Ok(sink) = DeadLetterSink::open(dir.path().join("dead.jsonl")) else {
            panic!("open sink");
        };
        let bus: Arc<MemoryBus> = Arc::clone(bus);
        Arc::new(ResilientPublisher::new(bus, Arc::new(sink), RetrySettings::default()))
    }

    #[tokio::test]
    async fn trigger_arms_timer_and_publishes_completion() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let bus = Arc::new(MemoryBus::new());
        let completed = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::GAMBLE_COMPLETED, counter_handler(&completed));

        let resolver = Arc::new(GambleResolver::default());
        let worker = DeadlineWorker::new(Arc::clone(&resolver), Some(publisher(&bus, &dir)));
        worker.subscribe(bus.as_ref());

        let id = Uuid::new_v4();
        let started = Event::gamble_started(id, Utc::now() + chrono::Duration::milliseconds(30));
        tokio_test::assert_ok!(bus.publish(&started).await);
        assert_eq!(worker.pending(), 1);

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(executed(&resolver), vec![id]);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(worker.pending(), 0);
        tokio_test::assert_ok!(worker.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn malformed_trigger_is_skipped() {
        let bus = Arc::new(MemoryBus::new());
        let resolver = Arc::new(GambleResolver::default());
        let worker = DeadlineWorker::new(Arc::clone(&resolver), None);
        worker.subscribe(bus.as_ref());

        let bad = Event::new(EventType::GAMBLE_STARTED, json!({"gamble_id": "not-a-uuid"}));
        tokio_test::assert_ok!(bus.publish(&bad).await);
        assert_eq!(worker.pending(), 0);
    }

    #[tokio::test]
    async fn trigger_without_id_is_skipped() {
        let bus = Arc::new(MemoryBus::new());
        let resolver = Arc::new(GambleResolver::default());
        let worker = DeadlineWorker::new(Arc::clone(&resolver), None);
        worker.subscribe(bus.as_ref());

        let partial = Event::new(EventType::GAMBLE_STARTED, json!({"join_deadline": Utc::now()}));
        tokio_test::assert_ok!(bus.publish(&partial).await);
        assert_eq!(worker.pending(), 0);
        assert!(executed(&resolver).is_empty());
    }

    #[tokio::test]
    async fn generic_json_trigger_is_accepted() {
        let bus = Arc::new(MemoryBus::new());
        let resolver = Arc::new(GambleResolver::default());
        let worker = DeadlineWorker::new(Arc::clone(&resolver), None);
        worker.subscribe(bus.as_ref());

        let id = Uuid::new_v4();
        let deadline = Utc::now() + chrono::Duration::hours(1);
        let raw = Event::new(
            EventType::GAMBLE_STARTED,
            json!({"gamble_id": id, "join_deadline": deadline}),
        );
        tokio_test::assert_ok!(bus.publish(&raw).await);
        assert_eq!(worker.pending(), 1);

        tokio_test::assert_ok!(worker.shutdown(Duration::from_secs(1)).await);
        assert_eq!(worker.pending(), 0);
        assert!(executed(&resolver).is_empty());
    }

    #[tokio::test]
    async fn start_executes_overdue_entities() {
        let overdue = Uuid::new_v4();
        let later = Uuid::new_v4();
        let resolver = Arc::new(GambleResolver {
            executed: Mutex::new(Vec::new()),
            boot_pending: vec![
                GambleStartedPayloadV1 {
                    gamble_id: overdue,
                    join_deadline: Utc::now() - chrono::Duration::minutes(1),
                },
                GambleStartedPayloadV1 {
                    gamble_id: later,
                    join_deadline: Utc::now() + chrono::Duration::hours(1),
                },
            ],
        });
        let worker = DeadlineWorker::new(Arc::clone(&resolver), None);

        worker.start().await;
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(executed(&resolver), vec![overdue]);
        assert_eq!(worker.pending(), 1);
        tokio_test::assert_ok!(worker.shutdown(Duration::from_secs(1)).await);
    }
}
