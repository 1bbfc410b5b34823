//! The event envelope carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EventType;
use super::payloads::{
    EngagementPayloadV1, GambleCompletedPayloadV1, GambleStartedPayloadV1, JobLevelUpPayloadV1,
    Payload, PayloadKind, ProgressionCycleCompletedPayloadV1, ProgressionNodeInfo,
    ResetCompletePayloadV1, SubscriptionPayloadV1, TimeoutPayloadV1,
};
use crate::error::RelayError;

/// Schema version stamped on every event created by this crate.
pub const EVENT_SCHEMA_VERSION: &str = "1.0";

/// Immutable event published on the bus.
///
/// Events have no identity of their own; subscribers only read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Payload schema version (e.g. `"1.0"`).
    pub version: String,
    /// Routing key.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Event data.
    #[serde(default)]
    pub payload: Payload,
    /// Free-form metadata (source, session ids, ...).
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl Event {
    /// Creates an event of the current schema version without metadata.
    #[must_use]
    pub fn new(event_type: EventType, payload: impl Into<Payload>) -> Self {
        Self {
            version: EVENT_SCHEMA_VERSION.to_string(),
            event_type,
            payload: payload.into(),
            metadata: None,
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Returns a metadata value, if present.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// Returns a metadata value as a string slice, if it is a string.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata_value(key).and_then(Value::as_str)
    }

    /// Resolves the payload into `T` (typed match first, JSON decode second).
    ///
    /// # Errors
    ///
    /// See [`Payload::resolve`].
    pub fn payload_as<T: PayloadKind>(&self) -> Result<T, RelayError> {
        self.payload.resolve(&self.event_type)
    }

    /// Engagement event for a user activity.
    #[must_use]
    pub fn engagement(user_id: i64, platform_id: i64, activity_type: &str, user_id_str: &str) -> Self {
        Self::new(
            EventType::ENGAGEMENT,
            EngagementPayloadV1 {
                user_id,
                user_id_str: user_id_str.to_string(),
                platform_id,
                activity_type: activity_type.to_string(),
                timestamp: Utc::now().timestamp(),
            },
        )
    }

    /// Progression cycle completion for the unlocked node.
    #[must_use]
    pub fn progression_cycle_completed(node: ProgressionNodeInfo) -> Self {
        Self::new(
            EventType::PROGRESSION_CYCLE_COMPLETED,
            ProgressionCycleCompletedPayloadV1 {
                unlocked_node: node,
            },
        )
    }

    /// Job level up; `source` is mirrored into metadata.
    #[must_use]
    pub fn job_level_up(user_id: &str, job_key: &str, old_level: i32, new_level: i32, source: &str) -> Self {
        Self::new(
            EventType::JOB_LEVEL_UP,
            JobLevelUpPayloadV1 {
                user_id: user_id.to_string(),
                job_key: job_key.to_string(),
                old_level,
                new_level,
                source: source.to_string(),
            },
        )
        .with_metadata("source", source)
    }

    /// Reset completion of the given type (daily or weekly).
    #[must_use]
    pub fn reset_complete(
        event_type: EventType,
        reset_time: DateTime<Utc>,
        records_affected: i64,
    ) -> Self {
        Self::new(
            event_type,
            ResetCompletePayloadV1 {
                reset_time,
                records_affected,
            },
        )
    }

    /// A gamble opened and resolves at `join_deadline`.
    #[must_use]
    pub fn gamble_started(gamble_id: uuid::Uuid, join_deadline: DateTime<Utc>) -> Self {
        Self::new(
            EventType::GAMBLE_STARTED,
            GambleStartedPayloadV1 {
                gamble_id,
                join_deadline,
            },
        )
    }

    /// A gamble was resolved.
    #[must_use]
    pub fn gamble_completed(
        gamble_id: &str,
        winner_id: &str,
        total_value: i64,
        participant_count: i32,
    ) -> Self {
        Self::new(
            EventType::GAMBLE_COMPLETED,
            GambleCompletedPayloadV1 {
                gamble_id: gamble_id.to_string(),
                winner_id: winner_id.to_string(),
                total_value,
                participant_count,
                timestamp: Utc::now().timestamp(),
            },
        )
    }

    /// A timeout was applied.
    #[must_use]
    pub fn timeout_applied(platform: &str, username: &str, duration_seconds: i64, reason: &str) -> Self {
        Self::new(
            EventType::TIMEOUT_APPLIED,
            TimeoutPayloadV1 {
                platform: platform.to_string(),
                username: username.to_string(),
                action: "applied".to_string(),
                duration_seconds,
                reason: reason.to_string(),
                timestamp: Utc::now().timestamp(),
            },
        )
    }

    /// A timeout was cleared.
    #[must_use]
    pub fn timeout_cleared(platform: &str, username: &str) -> Self {
        Self::new(
            EventType::TIMEOUT_CLEARED,
            TimeoutPayloadV1 {
                platform: platform.to_string(),
                username: username.to_string(),
                action: "cleared".to_string(),
                duration_seconds: 0,
                reason: String::new(),
                timestamp: Utc::now().timestamp(),
            },
        )
    }

    /// A subscription lifecycle event of the given type.
    #[must_use]
    pub fn subscription(event_type: EventType, user_id: &str, platform: &str, tier_name: &str) -> Self {
        Self::new(
            event_type,
            SubscriptionPayloadV1 {
                user_id: user_id.to_string(),
                platform: platform.to_string(),
                tier_name: tier_name.to_string(),
                timestamp: Utc::now().timestamp(),
            },
        )
    }
}
