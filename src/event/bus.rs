//! In-process publish/subscribe router.
//!
//! [`MemoryBus`] keeps, per [`EventType`], the ordered list of subscribed
//! [`EventHandler`]s. Publishing runs every handler for the event's type on
//! the caller's task, in subscription order. Failures are collected into one
//! aggregate [`RelayError::HandlersFailed`] so that a failing handler never
//! prevents the remaining handlers from running.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::{Event, EventType};
use crate::error::RelayError;

/// Receives events of the types it is subscribed to.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Any error is reported back to the publisher as part of the aggregate
    /// bus error.
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Publish/subscribe contract shared by the bus and its wrappers.
#[async_trait]
pub trait Bus: Send + Sync + fmt::Debug {
    /// Delivers `event` to every handler subscribed to its type.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HandlersFailed`] if at least one handler failed.
    async fn publish(&self, event: &Event) -> Result<(), RelayError>;

    /// Appends `handler` to the handlers of `event_type`.
    fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>);
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Wraps an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}

type HandlerList = Vec<Arc<dyn EventHandler>>;

/// In-memory [`Bus`] implementation.
///
/// # Concurrency
///
/// - The subscription map sits behind a read-write lock.
/// - `publish` clones the handler list out of the lock, so handlers never run
///   while the lock is held and may themselves subscribe or publish.
#[derive(Default)]
pub struct MemoryBus {
    handlers: RwLock<HashMap<EventType, HandlerList>>,
}

impl MemoryBus {
    /// Creates a bus without subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of handlers subscribed to `event_type`.
    #[must_use]
    pub fn handler_count(&self, event_type: &EventType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut types: Vec<_> = map.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        types.sort_unstable();
        f.debug_struct("MemoryBus").field("handlers", &types).finish()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, event: &Event) -> Result<(), RelayError> {
        let handlers = {
            let map = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match map.get(&event.event_type) {
                Some(list) => list.clone(),
                None => return Ok(()),
            }
        };

        let mut causes = Vec::new();
        for handler in &handlers {
            if let Err(err) = handler.handle(event).await {
                tracing::warn!(event_type = %event.event_type, error = %err, "event handler failed");
                causes.push(format!("{err:#}"));
            }
        }

        if causes.is_empty() {
            Ok(())
        } else {
            Err(RelayError::HandlersFailed {
                failed: causes.len(),
                event_type: event.event_type.clone(),
                causes,
            })
        }
    }

    fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(handler);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn counting_handler(counter: &Arc<AtomicUsize>, fail: bool) -> Arc<dyn EventHandler> {
        let counter = Arc::clone(counter);
        handler_fn(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail {
                    anyhow::bail!("handler refused event");
                }
                Ok::<_, anyhow::Error>(())
            }
        })
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        let result = bus.publish(&Event::new(EventType::from("nobody"), json!({}))).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn failing_handlers_are_aggregated_and_all_run() {
        let bus = MemoryBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ty = EventType::from("quest.completed");
        bus.subscribe(ty.clone(), counting_handler(&calls, false));
        bus.subscribe(ty.clone(), counting_handler(&calls, true));
        bus.subscribe(ty.clone(), counting_handler(&calls, true));
        bus.subscribe(ty.clone(), counting_handler(&calls, false));

        let result = bus.publish(&Event::new(ty.clone(), json!({"id": 1}))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let Err(RelayError::HandlersFailed {
            failed,
            event_type,
            causes,
        }) = result
        else {
            panic!("expected aggregate error");
        };
        assert_eq!(failed, 2);
        assert_eq!(event_type, ty);
        assert_eq!(causes.len(), 2);
    }

    #[tokio::test]
    async fn handlers_run_in_subscription_order() {
        let bus = MemoryBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let ty = EventType::from("ordered");
        for n in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(
                ty.clone(),
                handler_fn(move |_event| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap_or_else(PoisonError::into_inner).push(n);
                        Ok::<_, anyhow::Error>(())
                    }
                }),
            );
        }

        tokio_test::assert_ok!(bus.publish(&Event::new(ty, json!(null))).await);
        let seen = order.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn other_types_are_not_delivered() {
        let bus = MemoryBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::from("a"), counting_handler(&calls, false));

        tokio_test::assert_ok!(bus.publish(&Event::new(EventType::from("b"), json!({}))).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(&EventType::from("a")), 1);
        assert_eq!(bus.handler_count(&EventType::from("b")), 0);
    }

    #[tokio::test]
    async fn concurrent_subscribe_and_publish() {
        let bus = Arc::new(MemoryBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let ty = EventType::from("busy");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let bus = Arc::clone(&bus);
            let calls = Arc::clone(&calls);
            let ty = ty.clone();
            tasks.push(tokio::spawn(async move {
                bus.subscribe(ty.clone(), counting_handler(&calls, false));
                let _ = bus.publish(&Event::new(ty, json!({}))).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        assert_eq!(bus.handler_count(&ty), 8);
        assert!(calls.load(Ordering::SeqCst) >= 8);
    }
}
