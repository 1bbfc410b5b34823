//! Versioned payload structs and the two-tier payload representation.
//!
//! Some producers hand the bus an already-typed payload, others hand over
//! generic JSON (for example when an event crosses a process boundary).
//! [`Payload`] models both, and [`Payload::resolve`] returns the requested
//! shape by exact typed match first and structural decode second.
//!
//! Every payload struct defaults missing fields to their zero value, so the
//! structural decode accepts partial JSON from loosely typed producers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::EventType;
use crate::error::RelayError;

/// Payload of engagement events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementPayloadV1 {
    /// Internal numeric user id.
    pub user_id: i64,
    /// UUID form of the user id, when known.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id_str: String,
    /// Platform-side user id.
    pub platform_id: i64,
    /// Kind of activity (`"message"`, `"command"`, ...).
    pub activity_type: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Basic description of a progression node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionNodeInfo {
    /// Stable node key.
    pub node_key: String,
    /// Display name.
    pub display_name: String,
    /// Description text.
    pub description: String,
}

/// Payload of `progression.cycle.completed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionCycleCompletedPayloadV1 {
    /// The node that was unlocked.
    pub unlocked_node: ProgressionNodeInfo,
}

/// Payload of `progression.target.set`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionTargetSetPayloadV1 {
    /// Target node key.
    pub node_key: String,
    /// Target level.
    pub target_level: i32,
    /// Whether the target was chosen without a vote.
    pub auto_selected: bool,
    /// Voting session id.
    pub session_id: i64,
}

/// One option of a progression vote.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionVotingOptionV1 {
    /// Node key.
    pub node_key: String,
    /// Display name.
    pub display_name: String,
    /// Description text.
    pub description: String,
    /// `"Short"`, `"Medium"` or `"Long"`.
    pub unlock_duration: String,
}

/// Payload of `progression.voting_started`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionVotingStartedPayloadV1 {
    /// Options open for voting.
    pub options: Vec<ProgressionVotingOptionV1>,
    /// Node unlocked by the previous cycle.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub previous_unlock: String,
}

/// Payload of `progression.all_unlocked`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionAllUnlockedPayloadV1 {
    /// Announcement text.
    pub message: String,
}

/// Payload of `job.level_up`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobLevelUpPayloadV1 {
    /// User id.
    pub user_id: String,
    /// Job key.
    pub job_key: String,
    /// Level before the award.
    pub old_level: i32,
    /// Level after the award.
    pub new_level: i32,
    /// Activity that caused the level up.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// Payload of `job.xp_critical`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobXpCriticalPayloadV1 {
    /// User id.
    pub user_id: String,
    /// Job key.
    pub job_key: String,
    /// XP before the bonus.
    pub base_xp: i64,
    /// Bonus XP granted.
    pub bonus_xp: i64,
    /// Applied multiplier.
    pub multiplier: f64,
    /// Activity that caused the award.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// Payload of the daily and weekly reset completion events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetCompletePayloadV1 {
    /// When the reset ran.
    pub reset_time: DateTime<Utc>,
    /// Rows touched by the reset.
    pub records_affected: i64,
}

/// Payload of `gamble.started`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GambleStartedPayloadV1 {
    /// Gamble id.
    pub gamble_id: Uuid,
    /// Moment joining closes and the gamble resolves.
    pub join_deadline: DateTime<Utc>,
}

/// Payload of `gamble.completed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GambleCompletedPayloadV1 {
    /// Gamble id.
    pub gamble_id: String,
    /// Winning user id.
    pub winner_id: String,
    /// Total value of the pot.
    pub total_value: i64,
    /// Number of participants.
    pub participant_count: i32,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Payload of `slots.completed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotsCompletedPayloadV1 {
    /// User id.
    pub user_id: String,
    /// Display name of the player.
    pub username: String,
    /// Amount wagered.
    pub bet_amount: i64,
    /// Symbol on the first reel.
    pub reel1: String,
    /// Symbol on the second reel.
    pub reel2: String,
    /// Symbol on the third reel.
    pub reel3: String,
    /// Amount paid out.
    pub payout_amount: i64,
    /// Payout relative to the bet.
    pub payout_multiplier: f64,
    /// What the spin hit (`"jackpot"`, `"triple"`, ...).
    pub trigger_type: String,
    /// Whether the spin paid out.
    pub is_win: bool,
    /// Whether the spin missed a jackpot by one reel.
    pub is_near_miss: bool,
}

/// Payload of the timeout events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPayloadV1 {
    /// Chat platform.
    pub platform: String,
    /// Affected user.
    pub username: String,
    /// `"applied"` or `"cleared"`.
    pub action: String,
    /// Timeout length in seconds.
    pub duration_seconds: i64,
    /// Optional reason.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Payload of the subscription lifecycle events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionPayloadV1 {
    /// User id.
    pub user_id: String,
    /// Platform of the subscription.
    pub platform: String,
    /// Tier name.
    pub tier_name: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Payload of `expedition.started`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpeditionStartedPayloadV1 {
    /// Expedition id.
    pub expedition_id: Uuid,
    /// Moment recruiting closes.
    pub join_deadline: DateTime<Utc>,
}

/// Payload of `expedition.turn`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpeditionTurnPayloadV1 {
    /// Expedition id.
    pub expedition_id: String,
    /// Turn number, starting at 1.
    pub turn_number: i32,
    /// Narrative text of the turn.
    pub narrative: String,
    /// Party fatigue after the turn.
    pub fatigue: i32,
    /// Purse after the turn.
    pub purse: i64,
}

/// Payload of `expedition.completed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpeditionCompletedPayloadV1 {
    /// Expedition id.
    pub expedition_id: String,
    /// Number of turns played.
    pub total_turns: i32,
    /// Whether the party won.
    pub won: bool,
    /// Whether every member was knocked out.
    pub all_ko: bool,
}

/// Already-typed payloads handed over by in-process producers.
///
/// Serializes as the inner struct, without a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedPayload {
    /// See [`EngagementPayloadV1`].
    Engagement(EngagementPayloadV1),
    /// See [`ProgressionCycleCompletedPayloadV1`].
    ProgressionCycleCompleted(ProgressionCycleCompletedPayloadV1),
    /// See [`ProgressionTargetSetPayloadV1`].
    ProgressionTargetSet(ProgressionTargetSetPayloadV1),
    /// See [`ProgressionVotingStartedPayloadV1`].
    ProgressionVotingStarted(ProgressionVotingStartedPayloadV1),
    /// See [`ProgressionAllUnlockedPayloadV1`].
    ProgressionAllUnlocked(ProgressionAllUnlockedPayloadV1),
    /// See [`JobLevelUpPayloadV1`].
    JobLevelUp(JobLevelUpPayloadV1),
    /// See [`JobXpCriticalPayloadV1`].
    JobXpCritical(JobXpCriticalPayloadV1),
    /// See [`ResetCompletePayloadV1`].
    ResetComplete(ResetCompletePayloadV1),
    /// See [`GambleStartedPayloadV1`].
    GambleStarted(GambleStartedPayloadV1),
    /// See [`GambleCompletedPayloadV1`].
    GambleCompleted(GambleCompletedPayloadV1),
    /// See [`SlotsCompletedPayloadV1`].
    SlotsCompleted(SlotsCompletedPayloadV1),
    /// See [`TimeoutPayloadV1`].
    Timeout(TimeoutPayloadV1),
    /// See [`SubscriptionPayloadV1`].
    Subscription(SubscriptionPayloadV1),
    /// See [`ExpeditionStartedPayloadV1`].
    ExpeditionStarted(ExpeditionStartedPayloadV1),
    /// See [`ExpeditionTurnPayloadV1`].
    ExpeditionTurn(ExpeditionTurnPayloadV1),
    /// See [`ExpeditionCompletedPayloadV1`].
    ExpeditionCompleted(ExpeditionCompletedPayloadV1),
}

/// Event payload: typed, generic JSON, or absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// A typed payload from an in-process producer.
    Typed(TypedPayload),
    /// Generic decoded data.
    Json(serde_json::Value),
    /// No payload.
    #[default]
    Empty,
}

/// A payload shape that [`Payload::resolve`] can produce.
pub trait PayloadKind: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Returns the value if `typed` is exactly this shape.
    fn from_typed(typed: &TypedPayload) -> Option<&Self>;
}

macro_rules! payload_kinds {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl PayloadKind for $ty {
                fn from_typed(typed: &TypedPayload) -> Option<&Self> {
                    match typed {
                        TypedPayload::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Payload {
                fn from(inner: $ty) -> Self {
                    Self::Typed(TypedPayload::$variant(inner))
                }
            }
        )+
    };
}

payload_kinds! {
    Engagement => EngagementPayloadV1,
    ProgressionCycleCompleted => ProgressionCycleCompletedPayloadV1,
    ProgressionTargetSet => ProgressionTargetSetPayloadV1,
    ProgressionVotingStarted => ProgressionVotingStartedPayloadV1,
    ProgressionAllUnlocked => ProgressionAllUnlockedPayloadV1,
    JobLevelUp => JobLevelUpPayloadV1,
    JobXpCritical => JobXpCriticalPayloadV1,
    ResetComplete => ResetCompletePayloadV1,
    GambleStarted => GambleStartedPayloadV1,
    GambleCompleted => GambleCompletedPayloadV1,
    SlotsCompleted => SlotsCompletedPayloadV1,
    Timeout => TimeoutPayloadV1,
    Subscription => SubscriptionPayloadV1,
    ExpeditionStarted => ExpeditionStartedPayloadV1,
    ExpeditionTurn => ExpeditionTurnPayloadV1,
    ExpeditionCompleted => ExpeditionCompletedPayloadV1,
}

impl Payload {
    /// Resolves the payload into `T`.
    ///
    /// An exact typed match wins; otherwise the payload is decoded
    /// structurally from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PayloadMissing`] for [`Payload::Empty`] and
    /// [`RelayError::PayloadDecode`] when the JSON does not fit `T`.
    pub fn resolve<T: PayloadKind>(&self, event_type: &EventType) -> Result<T, RelayError> {
        match self {
            Self::Typed(typed) => match T::from_typed(typed) {
                Some(value) => Ok(value.clone()),
                None => Ok(serde_json::from_value(serde_json::to_value(typed)?)?),
            },
            Self::Json(value) => Ok(T::deserialize(value)?),
            Self::Empty => Err(RelayError::PayloadMissing(event_type.clone())),
        }
    }

    /// Returns the payload as JSON (`null` when empty).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PayloadDecode`] if a typed payload fails to
    /// serialize.
    pub fn to_json(&self) -> Result<serde_json::Value, RelayError> {
        match self {
            Self::Typed(typed) => Ok(serde_json::to_value(typed)?),
            Self::Json(value) => Ok(value.clone()),
            Self::Empty => Ok(serde_json::Value::Null),
        }
    }

    /// Returns `true` if there is no payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        if value.is_null() {
            Self::Empty
        } else {
            Self::Json(value)
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Typed(typed) => typed.serialize(serializer),
            Self::Json(value) => value.serialize(serializer),
            Self::Empty => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timeout() -> TimeoutPayloadV1 {
        TimeoutPayloadV1 {
            platform: "twitch".to_string(),
            username: "viewer".to_string(),
            action: "applied".to_string(),
            duration_seconds: 60,
            reason: String::new(),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn exact_typed_match_wins() {
        let payload = Payload::from(timeout());
        let resolved = payload.resolve::<TimeoutPayloadV1>(&EventType::TIMEOUT_APPLIED);
        let Ok(resolved) = resolved else {
            panic!("typed payload should resolve");
        };
        assert_eq!(resolved, timeout());
    }

    #[test]
    fn generic_json_falls_back_to_structural_decode() {
        let payload = Payload::from(json!({
            "platform": "discord",
            "username": "someone",
            "action": "cleared"
        }));
        let resolved = payload.resolve::<TimeoutPayloadV1>(&EventType::TIMEOUT_CLEARED);
        let Ok(resolved) = resolved else {
            panic!("json payload should decode");
        };
        assert_eq!(resolved.platform, "discord");
        assert_eq!(resolved.duration_seconds, 0);
    }

    #[test]
    fn mismatched_typed_payload_decodes_structurally() {
        let payload = Payload::from(ExpeditionTurnPayloadV1 {
            expedition_id: "exp-1".to_string(),
            turn_number: 3,
            narrative: String::new(),
            fatigue: 0,
            purse: 0,
        });
        let resolved =
            payload.resolve::<ExpeditionCompletedPayloadV1>(&EventType::EXPEDITION_TURN);
        let Ok(resolved) = resolved else {
            panic!("shared fields should decode");
        };
        assert_eq!(resolved.expedition_id, "exp-1");
        assert_eq!(resolved.total_turns, 0);
    }

    #[test]
    fn partial_json_fills_zero_values() {
        let payload = Payload::from(json!({"winner_id": "u1"}));
        let resolved = payload.resolve::<GambleCompletedPayloadV1>(&EventType::GAMBLE_COMPLETED);
        let Ok(resolved) = resolved else {
            panic!("partial json should decode");
        };
        assert_eq!(resolved.winner_id, "u1");
        assert!(resolved.gamble_id.is_empty());
        assert_eq!(resolved.timestamp, 0);
    }

    #[test]
    fn wrongly_typed_field_is_still_an_error() {
        let payload = Payload::from(json!({"winner_id": 12}));
        let resolved = payload.resolve::<GambleCompletedPayloadV1>(&EventType::GAMBLE_COMPLETED);
        assert!(matches!(resolved, Err(RelayError::PayloadDecode(_))));
    }

    #[test]
    fn non_object_json_is_an_error() {
        let payload = Payload::from(json!("text"));
        let resolved = payload.resolve::<SubscriptionPayloadV1>(&EventType::SUBSCRIPTION_RENEWED);
        assert!(resolved.is_err());
    }

    #[test]
    fn empty_payload_is_an_error() {
        let resolved = Payload::Empty.resolve::<TimeoutPayloadV1>(&EventType::TIMEOUT_APPLIED);
        assert!(matches!(resolved, Err(RelayError::PayloadMissing(_))));
    }

    #[test]
    fn typed_payload_serializes_without_tag() {
        let json = Payload::from(timeout()).to_json().ok();
        let Some(json) = json else {
            panic!("serialization failed");
        };
        assert_eq!(json["username"], "viewer");
        assert!(json.get("Timeout").is_none());
    }

    #[test]
    fn null_deserializes_to_empty() {
        let payload: Result<Payload, _> = serde_json::from_str("null");
        assert!(matches!(payload, Ok(Payload::Empty)));
    }
}
