//! Broadcast hub fanning stream events out to connected clients.
//!
//! One loop task owns every registry mutation. Registrations, removals and
//! broadcasts reach it over channels, so callers never touch the client map
//! directly.
//!
//! ## Delivery policy
//! - `broadcast` never blocks: a full hub channel drops the event for everyone
//!   and counts it in [`BroadcastHub::dropped_events`].
//! - A full client buffer misses that event only; other clients are unaffected.
//! - A client whose receiver was dropped is pruned on the next fan-out.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::filter::EventFilter;
use super::message::HubEvent;
use crate::error::RelayError;
use crate::worker::{Job, JobFn};

/// Channel bounds of a [`BroadcastHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Capacity of the hub-wide broadcast channel.
    pub broadcast_buffer: usize,
    /// Capacity of every client channel.
    pub client_buffer: usize,
    /// Capacity of the registration channel.
    pub registration_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            broadcast_buffer: 100,
            client_buffer: 50,
            registration_buffer: 10,
        }
    }
}

#[derive(Debug)]
struct ClientSlot {
    sender: mpsc::Sender<HubEvent>,
    filter: EventFilter,
}

type Registry = Arc<RwLock<HashMap<Uuid, ClientSlot>>>;

struct HubInbox {
    register: mpsc::Receiver<(Uuid, ClientSlot)>,
    unregister: mpsc::UnboundedReceiver<Uuid>,
    broadcast: mpsc::Receiver<HubEvent>,
}

/// A registered stream consumer.
///
/// Dropping the client closes its receiver; the hub prunes it lazily.
#[derive(Debug)]
pub struct Client {
    id: Uuid,
    filter: EventFilter,
    events: mpsc::Receiver<HubEvent>,
}

impl Client {
    /// Client identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The filter this client registered with.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Waits for the next event. `None` once the hub closed the channel.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.events.recv().await
    }

    /// Takes a buffered event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] when nothing is buffered and
    /// [`TryRecvError::Disconnected`] once the channel is closed.
    pub fn try_recv(&mut self) -> Result<HubEvent, TryRecvError> {
        self.events.try_recv()
    }
}

/// Fan-out point between the event bus and streaming clients.
pub struct BroadcastHub {
    settings: HubSettings,
    clients: Registry,
    register_tx: mpsc::Sender<(Uuid, ClientSlot)>,
    unregister_tx: mpsc::UnboundedSender<Uuid>,
    broadcast_tx: mpsc::Sender<HubEvent>,
    inbox: Mutex<Option<HubInbox>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    dropped: AtomicU64,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("settings", &self.settings)
            .field("clients", &self.client_count())
            .field("dropped", &self.dropped_events())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}

impl BroadcastHub {
    /// Creates an unstarted hub. Every buffer is clamped to at least 1.
    #[must_use]
    pub fn new(settings: HubSettings) -> Self {
        let settings = HubSettings {
            broadcast_buffer: settings.broadcast_buffer.max(1),
            client_buffer: settings.client_buffer.max(1),
            registration_buffer: settings.registration_buffer.max(1),
        };
        let (register_tx, register) = mpsc::channel(settings.registration_buffer);
        let (unregister_tx, unregister) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast) = mpsc::channel(settings.broadcast_buffer);
        Self {
            settings,
            clients: Arc::new(RwLock::new(HashMap::new())),
            register_tx,
            unregister_tx,
            broadcast_tx,
            inbox: Mutex::new(Some(HubInbox {
                register,
                unregister,
                broadcast,
            })),
            worker: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Effective channel bounds.
    #[must_use]
    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Spawns the hub loop. Calling it again, or after stop, does nothing.
    pub async fn start(&self) {
        let Some(inbox) = self.inbox.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        if self.shutdown.is_cancelled() {
            return;
        }
        let clients = Arc::clone(&self.clients);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(run_hub(inbox, clients, shutdown));
        *self.worker.lock().await = Some(handle);
        tracing::info!(
            broadcast_buffer = self.settings.broadcast_buffer,
            client_buffer = self.settings.client_buffer,
            "broadcast hub started"
        );
    }

    /// Registers a client receiving the types accepted by `filter`.
    ///
    /// Waits while the registration channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubStopped`] once the hub is stopping.
    pub async fn register(&self, filter: EventFilter) -> Result<Client, RelayError> {
        if self.shutdown.is_cancelled() {
            return Err(RelayError::HubStopped);
        }
        let id = Uuid::new_v4();
        let (sender, events) = mpsc::channel(self.settings.client_buffer);
        let slot = ClientSlot {
            sender,
            filter: filter.clone(),
        };
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(RelayError::HubStopped),
            sent = self.register_tx.send((id, slot)) => {
                sent.map_err(|_| RelayError::HubStopped)?;
            }
        }
        tracing::debug!(client_id = %id, filters = ?filter.types(), "client registration queued");
        Ok(Client { id, filter, events })
    }

    /// Requests removal of client `id`. A no-op once the hub is stopped.
    pub fn unregister(&self, id: Uuid) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.unregister_tx.send(id).is_err() {
            tracing::debug!(client_id = %id, "hub loop gone, unregister ignored");
        }
    }

    /// Queues `payload` under `event_type` for every matching client.
    ///
    /// Returns `false` if the event was dropped: hub stopped, broadcast
    /// channel full, or payload not serializable.
    pub fn broadcast<T: Serialize + ?Sized>(&self, event_type: &str, payload: &T) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(event_type, error = %err, "failed to encode stream payload");
                return false;
            }
        };
        self.send(HubEvent::new(event_type, payload))
    }

    /// Queues a prepared event; see [`broadcast`](Self::broadcast).
    pub fn send(&self, event: HubEvent) -> bool {
        match self.broadcast_tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event_type = %event.event_type, "broadcast channel full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Number of registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Events shed because the broadcast channel was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns `true` once stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the loop and closes every client channel. Safe to call twice.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::error!(error = %err, "hub loop panicked");
        }
        // Never started: dropping the inbox closes queued registrations.
        drop(self.inbox.lock().unwrap_or_else(PoisonError::into_inner).take());

        let closed = {
            let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
            let closed = clients.len();
            clients.clear();
            closed
        };
        if closed > 0 {
            tracing::info!(clients = closed, "closed client channels");
        }
    }

    /// [`stop`](Self::stop) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ShutdownTimeout`] if the loop does not exit in time.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RelayError> {
        time::timeout(timeout, self.stop())
            .await
            .map_err(|_| RelayError::ShutdownTimeout {
                component: "broadcast hub",
                timeout,
            })?;
        tracing::info!("broadcast hub stopped");
        Ok(())
    }
}

/// Periodic job logging client and drop counters of `hub`.
pub fn stats_job(hub: &Arc<BroadcastHub>) -> Arc<dyn Job> {
    let hub = Arc::clone(hub);
    JobFn::arc("hub-stats", move |_cancel: CancellationToken| {
        let hub = Arc::clone(&hub);
        async move {
            tracing::info!(
                clients = hub.client_count(),
                dropped_events = hub.dropped_events(),
                "broadcast hub statistics"
            );
            Ok::<_, anyhow::Error>(())
        }
    })
}

async fn run_hub(mut inbox: HubInbox, clients: Registry, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            Some((id, slot)) = inbox.register.recv() => {
                clients.write().unwrap_or_else(PoisonError::into_inner).insert(id, slot);
                tracing::info!(client_id = %id, "stream client registered");
            }
            Some(id) = inbox.unregister.recv() => {
                let removed = clients.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
                if removed.is_some() {
                    tracing::info!(client_id = %id, "stream client unregistered");
                }
            }
            Some(event) = inbox.broadcast.recv() => fan_out(&clients, &event),
            else => break,
        }
    }
    tracing::debug!("hub loop exited");
}

fn fan_out(clients: &Registry, event: &HubEvent) {
    let mut clients = clients.write().unwrap_or_else(PoisonError::into_inner);
    let mut gone = Vec::new();
    for (id, slot) in clients.iter() {
        if !slot.filter.matches(&event.event_type) {
            continue;
        }
        match slot.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(client_id = %id, event_type = %event.event_type, "client buffer full, event skipped");
            }
            Err(TrySendError::Closed(_)) => gone.push(*id),
        }
    }
    for id in gone {
        clients.remove(&id);
        tracing::debug!(client_id = %id, "pruned disconnected client");
    }
}
