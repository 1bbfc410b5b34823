//! Event injection: hands external events to the resilient publisher.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{InjectEventRequest, InjectEventResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, RelayError};
use crate::event::{Event, EventType};

/// `POST /events`: publish an event through the resilient publisher.
///
/// The first delivery attempt runs before the response is sent; failures
/// are retried in the background and dead-lettered when exhausted.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when the event type is blank.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Inject an event",
    description = "Publishes `{type, payload, metadata}` on the in-process bus with retry and dead-letter fallback.",
    request_body = InjectEventRequest,
    responses(
        (status = 202, description = "Event accepted", body = InjectEventResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
pub async fn inject_event(
    State(state): State<AppState>,
    Json(req): Json<InjectEventRequest>,
) -> Result<impl IntoResponse, RelayError> {
    let event_type = req.event_type.trim();
    if event_type.is_empty() {
        return Err(RelayError::InvalidRequest(
            "event type must not be empty".to_string(),
        ));
    }

    let request_id = Uuid::new_v4();
    let mut event = Event::new(EventType::from(event_type), req.payload);
    event.metadata = req.metadata;
    let event = event.with_metadata("request_id", request_id.to_string());
    tracing::info!(%request_id, event_type, "injecting event");

    state.publisher.publish_with_retry(event).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(InjectEventResponse {
            request_id,
            event_type: event_type.to_string(),
            status: "accepted".to_string(),
        }),
    ))
}

/// Event routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/events", post(inject_event))
}
