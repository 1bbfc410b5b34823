//! `GET /events`: server-sent event stream backed by the [`BroadcastHub`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use utoipa::IntoParams;
use uuid::Uuid;

use super::filter::EventFilter;
use super::hub::{BroadcastHub, Client};
use super::message::{HubEvent, format_sse_message};
use crate::app_state::AppState;
use crate::error::RelayError;

/// Query string of the stream endpoint.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StreamQuery {
    /// Comma-separated stream types to receive. Absent or empty means all.
    #[serde(default)]
    pub types: Option<String>,
}

/// `GET /events`: subscribe to the live event stream.
///
/// # Errors
///
/// Returns [`RelayError::HubStopped`] (503) while the service shuts down.
#[utoipa::path(
    get,
    path = "/events",
    tag = "Stream",
    summary = "Live event stream",
    description = "Server-sent events. The first frame is `connected`; keepalive frames follow when idle.",
    params(StreamQuery),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = String),
        (status = 503, description = "Hub is shutting down"),
    )
)]
pub async fn events_stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, RelayError> {
    let filter = query
        .types
        .as_deref()
        .map_or_else(EventFilter::all, EventFilter::parse);
    let client = state.hub.register(filter).await?;
    let connected = format_sse_message(&HubEvent::connected(
        client.id(),
        &client.filter().types(),
    ))?;
    tracing::info!(client_id = %client.id(), filters = ?client.filter().types(), "stream client connected");

    let frames = stream::once(async move { Ok::<_, Infallible>(connected) })
        .chain(client_frames(client, Arc::clone(&state.hub), state.keepalive));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

/// Stream routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(events_stream_handler))
}

/// Unregisters the client when the response body is dropped.
#[derive(Debug)]
struct Disconnect {
    hub: Arc<BroadcastHub>,
    id: Uuid,
}

impl Drop for Disconnect {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
        tracing::info!(client_id = %self.id, "stream client disconnected");
    }
}

struct StreamState {
    client: Client,
    keepalive: Interval,
    _disconnect: Disconnect,
}

/// Forwarded events interleaved with keepalives, one frame per chunk.
///
/// Ends when the hub closes the client channel.
fn client_frames(
    client: Client,
    hub: Arc<BroadcastHub>,
    keepalive: Duration,
) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
    let keepalive = keepalive.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let state = StreamState {
        _disconnect: Disconnect {
            hub,
            id: client.id(),
        },
        client,
        keepalive: ticker,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let event = tokio::select! {
                event = state.client.recv() => {
                    let Some(event) = event else {
                        tracing::debug!(client_id = %state.client.id(), "client channel closed");
                        return None;
                    };
                    event
                }
                _ = state.keepalive.tick() => HubEvent::keepalive(),
            };
            match format_sse_message(&event) {
                Ok(frame) => return Some((Ok(frame), state)),
                Err(err) => {
                    tracing::warn!(event_type = %event.event_type, error = %err, "failed to format stream event");
                }
            }
        }
    })
}
