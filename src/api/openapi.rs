//! OpenAPI document for the HTTP surface.

use utoipa::OpenApi;

use super::dto::{InjectEventRequest, InjectEventResponse};
use super::handlers::{events, system};
use crate::error::{ErrorBody, ErrorResponse};
use crate::sse::handler as stream;

/// Generated OpenAPI description.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "engagement-relay",
        description = "Event delivery core: event injection, live event stream and health."
    ),
    paths(
        system::health_handler,
        events::inject_event,
        stream::events_stream_handler,
    ),
    components(schemas(
        system::HealthResponse,
        InjectEventRequest,
        InjectEventResponse,
        ErrorResponse,
        ErrorBody,
    )),
    tags(
        (name = "System", description = "Health and status"),
        (name = "Events", description = "Event injection"),
        (name = "Stream", description = "Server-sent event stream"),
    )
)]
pub struct ApiDoc;

/// Swagger UI at `/swagger-ui` serving `/api-docs/openapi.json`.
#[cfg(feature = "swagger-ui")]
pub fn swagger_router<S>() -> axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}
