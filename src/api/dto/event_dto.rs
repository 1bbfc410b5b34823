//! DTOs for event injection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

/// Request body for `POST /api/v1/events`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InjectEventRequest {
    /// Bus event type, e.g. `gamble.completed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload; omitted or `null` means no payload.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
    /// Optional free-form metadata.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Map<String, Value>>,
}

/// Response body for `POST /api/v1/events` (202 Accepted).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InjectEventResponse {
    /// Request correlation id, echoed into the event metadata.
    pub request_id: Uuid,
    /// The accepted event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Always `"accepted"`; delivery continues in the background on failure.
    pub status: String,
}
