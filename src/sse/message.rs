//! Server-sent event frames and stream payloads.
//!
//! Every frame on the wire is
//!
//! ```text
//! id: <uuid>
//! event: <type>
//! data: <json of the whole HubEvent>
//!
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::payloads::{ProgressionVotingOptionV1, TimeoutPayloadV1};

/// Stream type of job level up notifications.
pub const STREAM_JOB_LEVEL_UP: &str = "job.level_up";
/// Stream type announcing an open progression vote.
pub const STREAM_VOTING_STARTED: &str = "progression.voting_started";
/// Stream type of a finished progression cycle.
pub const STREAM_CYCLE_COMPLETED: &str = "progression.cycle_completed";
/// Stream type sent once every node is unlocked.
pub const STREAM_ALL_UNLOCKED: &str = "progression.all_unlocked";
/// Stream type of a resolved gamble.
pub const STREAM_GAMBLE_COMPLETED: &str = "gamble.completed";
/// Stream type of an expedition opening.
pub const STREAM_EXPEDITION_STARTED: &str = "expedition.started";
/// Stream type of one expedition turn.
pub const STREAM_EXPEDITION_TURN: &str = "expedition.turn";
/// Stream type of a finished expedition.
pub const STREAM_EXPEDITION_COMPLETED: &str = "expedition.completed";
/// Stream type of an applied timeout.
pub const STREAM_TIMEOUT_APPLIED: &str = "timeout.applied";
/// Stream type of a cleared timeout.
pub const STREAM_TIMEOUT_CLEARED: &str = "timeout.cleared";
/// Stream type shared by all subscription lifecycle events.
pub const STREAM_SUBSCRIPTION: &str = "subscription";
/// Reserved type of keepalive pings.
pub const STREAM_KEEPALIVE: &str = "keepalive";
/// Type of the first frame sent on every connection.
pub const STREAM_CONNECTED: &str = "connected";

/// One event as delivered to stream clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    /// Fresh identifier (empty for keepalives).
    pub id: String,
    /// Stream event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Event data.
    pub payload: Value,
}

impl HubEvent {
    /// Creates an event with a fresh id and the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Utc::now().timestamp(),
            payload,
        }
    }

    /// Keepalive ping: empty id and a null payload.
    #[must_use]
    pub fn keepalive() -> Self {
        Self {
            id: String::new(),
            event_type: STREAM_KEEPALIVE.to_string(),
            timestamp: Utc::now().timestamp(),
            payload: Value::Null,
        }
    }

    /// First frame of a connection, carrying the client id and its filters.
    #[must_use]
    pub fn connected(client_id: Uuid, filters: &[&str]) -> Self {
        Self {
            id: client_id.to_string(),
            event_type: STREAM_CONNECTED.to_string(),
            timestamp: Utc::now().timestamp(),
            payload: serde_json::json!({
                "client_id": client_id,
                "filters": filters,
            }),
        }
    }
}

/// Formats `event` as one SSE frame.
///
/// # Errors
///
/// Returns the serialization error if the payload cannot be encoded.
pub fn format_sse_message(event: &HubEvent) -> Result<String, serde_json::Error> {
    let data = serde_json::to_string(event)?;
    Ok(format!(
        "id: {}\nevent: {}\ndata: {data}\n\n",
        event.id, event.event_type
    ))
}

/// Stream payload of `job.level_up`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLevelUpStream {
    /// User id.
    pub user_id: String,
    /// Job key.
    pub job_key: String,
    /// Level before.
    pub old_level: i32,
    /// Level after.
    pub new_level: i32,
    /// Activity that caused the level up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// Stream payload of `progression.voting_started`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VotingStartedStream {
    /// Selected node, set when auto-selected.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_key: String,
    /// Selected level, set when auto-selected.
    pub target_level: i32,
    /// Whether only one option was available.
    pub auto_selected: bool,
    /// Options open for voting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ProgressionVotingOptionV1>,
    /// Node unlocked by the previous cycle.
    pub previous_unlock: String,
}

/// Stream payload of `expedition.started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpeditionStartedStream {
    /// Expedition id.
    pub expedition_id: String,
    /// Join deadline as `YYYY-MM-DD HH:MM:SS` (UTC).
    pub join_deadline: String,
}

/// Stream payload of the timeout events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutStream {
    /// Chat platform.
    pub platform: String,
    /// Affected user.
    pub username: String,
    /// `"applied"` or `"cleared"`.
    pub action: String,
    /// Timeout length in seconds.
    pub duration_seconds: i64,
    /// Optional reason.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl From<TimeoutPayloadV1> for TimeoutStream {
    fn from(p: TimeoutPayloadV1) -> Self {
        Self {
            platform: p.platform,
            username: p.username,
            action: p.action,
            duration_seconds: p.duration_seconds,
            reason: p.reason,
        }
    }
}

/// Stream payload shared by the subscription lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStream {
    /// User id.
    pub user_id: String,
    /// Platform of the subscription.
    pub platform: String,
    /// Tier name.
    pub tier_name: String,
    /// Originating bus type, e.g. `subscription.renewed`.
    pub event_type: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}
