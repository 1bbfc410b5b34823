//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::event::ResilientPublisher;
use crate::sse::BroadcastHub;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Publisher used for injected events.
    pub publisher: Arc<ResilientPublisher>,
    /// Hub feeding the event stream.
    pub hub: Arc<BroadcastHub>,
    /// Interval between keepalive frames on idle streams.
    pub keepalive: Duration,
}
