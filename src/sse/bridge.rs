//! Bus subscriber rebroadcasting push-relevant events to the hub.
//!
//! Bus payloads are resolved typed-first, then structurally; anything that
//! does not fit is logged and skipped so a bad producer never fails the bus.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::hub::BroadcastHub;
use super::message::{
    ExpeditionStartedStream, JobLevelUpStream, STREAM_ALL_UNLOCKED, STREAM_CYCLE_COMPLETED,
    STREAM_EXPEDITION_COMPLETED, STREAM_EXPEDITION_STARTED, STREAM_EXPEDITION_TURN,
    STREAM_GAMBLE_COMPLETED, STREAM_JOB_LEVEL_UP, STREAM_SUBSCRIPTION, STREAM_TIMEOUT_APPLIED,
    STREAM_TIMEOUT_CLEARED, STREAM_VOTING_STARTED, SubscriptionStream, TimeoutStream,
    VotingStartedStream,
};
use crate::error::RelayError;
use crate::event::payloads::{
    ExpeditionCompletedPayloadV1, ExpeditionStartedPayloadV1, ExpeditionTurnPayloadV1,
    GambleCompletedPayloadV1, JobLevelUpPayloadV1, ProgressionAllUnlockedPayloadV1,
    ProgressionCycleCompletedPayloadV1, ProgressionTargetSetPayloadV1,
    ProgressionVotingStartedPayloadV1, SubscriptionPayloadV1, TimeoutPayloadV1,
};
use crate::event::{Bus, Event, EventType, handler_fn};

const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    JobLevelUp,
    CycleCompleted,
    VotingStarted,
    TargetSet,
    AllUnlocked,
    Timeout(&'static str),
    GambleCompleted,
    ExpeditionStarted,
    ExpeditionTurn,
    ExpeditionCompleted,
    Subscription,
}

const ROUTES: [(EventType, Route); 17] = [
    (EventType::JOB_LEVEL_UP, Route::JobLevelUp),
    (EventType::PROGRESSION_CYCLE_COMPLETED, Route::CycleCompleted),
    (EventType::PROGRESSION_VOTING_STARTED, Route::VotingStarted),
    (EventType::PROGRESSION_TARGET_SET, Route::TargetSet),
    (EventType::PROGRESSION_ALL_UNLOCKED, Route::AllUnlocked),
    (EventType::TIMEOUT_APPLIED, Route::Timeout(STREAM_TIMEOUT_APPLIED)),
    (EventType::TIMEOUT_CLEARED, Route::Timeout(STREAM_TIMEOUT_CLEARED)),
    (EventType::GAMBLE_COMPLETED, Route::GambleCompleted),
    (EventType::EXPEDITION_STARTED, Route::ExpeditionStarted),
    (EventType::EXPEDITION_TURN, Route::ExpeditionTurn),
    (EventType::EXPEDITION_COMPLETED, Route::ExpeditionCompleted),
    (EventType::SUBSCRIPTION_ACTIVATED, Route::Subscription),
    (EventType::SUBSCRIPTION_RENEWED, Route::Subscription),
    (EventType::SUBSCRIPTION_UPGRADED, Route::Subscription),
    (EventType::SUBSCRIPTION_DOWNGRADED, Route::Subscription),
    (EventType::SUBSCRIPTION_EXPIRED, Route::Subscription),
    (EventType::SUBSCRIPTION_CANCELLED, Route::Subscription),
];

/// Forwards bus events to a [`BroadcastHub`] under their stream names.
#[derive(Debug)]
pub struct HubBridge {
    hub: Arc<BroadcastHub>,
}

impl HubBridge {
    /// Creates a bridge feeding `hub`.
    #[must_use]
    pub fn new(hub: Arc<BroadcastHub>) -> Arc<Self> {
        Arc::new(Self { hub })
    }

    /// Bus types this bridge listens to.
    pub fn bridged_types() -> impl Iterator<Item = EventType> {
        ROUTES.into_iter().map(|(event_type, _)| event_type)
    }

    /// Subscribes a forwarding handler for every bridged type on `bus`.
    pub fn subscribe(self: &Arc<Self>, bus: &dyn Bus) {
        for (event_type, route) in ROUTES {
            let bridge = Arc::clone(self);
            bus.subscribe(
                event_type,
                handler_fn(move |event| {
                    let bridge = Arc::clone(&bridge);
                    async move {
                        bridge.forward_as(route, &event);
                        Ok::<_, anyhow::Error>(())
                    }
                }),
            );
        }
        tracing::info!(types = ROUTES.len(), "hub bridge subscribed to event bus");
    }

    /// Forwards `event` if its type is bridged.
    ///
    /// Returns `true` if an event was queued on the hub.
    pub fn forward(&self, event: &Event) -> bool {
        ROUTES
            .iter()
            .find(|(event_type, _)| *event_type == event.event_type)
            .is_some_and(|(_, route)| self.forward_as(*route, event))
    }

    fn forward_as(&self, route: Route, event: &Event) -> bool {
        match translate(route, event) {
            Ok(Some((stream_type, payload))) => {
                let queued = self.hub.broadcast(stream_type, &payload);
                tracing::debug!(
                    event_type = %event.event_type,
                    stream_type,
                    queued,
                    "event broadcast"
                );
                queued
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %err,
                    "skipping event with unusable payload"
                );
                false
            }
        }
    }
}

/// Maps a bus event to its stream type and stream payload.
fn translate(route: Route, event: &Event) -> Result<Option<(&'static str, Value)>, RelayError> {
    let translated = match route {
        Route::JobLevelUp => {
            let p: JobLevelUpPayloadV1 = event.payload_as()?;
            let source = event
                .metadata_str("source")
                .map_or(p.source, str::to_string);
            let stream = JobLevelUpStream {
                user_id: p.user_id,
                job_key: p.job_key,
                old_level: p.old_level,
                new_level: p.new_level,
                source,
            };
            (STREAM_JOB_LEVEL_UP, serde_json::to_value(stream)?)
        }
        Route::CycleCompleted => {
            let p: ProgressionCycleCompletedPayloadV1 = event.payload_as()?;
            (STREAM_CYCLE_COMPLETED, serde_json::to_value(p)?)
        }
        Route::VotingStarted => {
            let p: ProgressionVotingStartedPayloadV1 = event.payload_as()?;
            let stream = VotingStartedStream {
                options: p.options,
                previous_unlock: p.previous_unlock,
                ..VotingStartedStream::default()
            };
            (STREAM_VOTING_STARTED, serde_json::to_value(stream)?)
        }
        Route::TargetSet => {
            let p: ProgressionTargetSetPayloadV1 = event.payload_as()?;
            if !p.auto_selected {
                return Ok(None);
            }
            let stream = VotingStartedStream {
                node_key: p.node_key,
                target_level: p.target_level,
                auto_selected: true,
                ..VotingStartedStream::default()
            };
            (STREAM_VOTING_STARTED, serde_json::to_value(stream)?)
        }
        Route::AllUnlocked => {
            let p: ProgressionAllUnlockedPayloadV1 = event.payload_as()?;
            (STREAM_ALL_UNLOCKED, serde_json::to_value(p)?)
        }
        Route::Timeout(stream_type) => {
            let p: TimeoutPayloadV1 = event.payload_as()?;
            (stream_type, serde_json::to_value(TimeoutStream::from(p))?)
        }
        Route::GambleCompleted => {
            let p: GambleCompletedPayloadV1 = event.payload_as()?;
            (STREAM_GAMBLE_COMPLETED, serde_json::to_value(p)?)
        }
        Route::ExpeditionStarted => {
            let p: ExpeditionStartedPayloadV1 = event.payload_as()?;
            let stream = ExpeditionStartedStream {
                expedition_id: p.expedition_id.to_string(),
                join_deadline: p.join_deadline.format(DEADLINE_FORMAT).to_string(),
            };
            (STREAM_EXPEDITION_STARTED, serde_json::to_value(stream)?)
        }
        Route::ExpeditionTurn => {
            let p: ExpeditionTurnPayloadV1 = event.payload_as()?;
            (STREAM_EXPEDITION_TURN, serde_json::to_value(p)?)
        }
        Route::ExpeditionCompleted => {
            let p: ExpeditionCompletedPayloadV1 = event.payload_as()?;
            (STREAM_EXPEDITION_COMPLETED, serde_json::to_value(p)?)
        }
        Route::Subscription => {
            let p: SubscriptionPayloadV1 = event.payload_as()?;
            let timestamp = if p.timestamp == 0 {
                Utc::now().timestamp()
            } else {
                p.timestamp
            };
            let stream = SubscriptionStream {
                user_id: p.user_id,
                platform: p.platform,
                tier_name: p.tier_name,
                event_type: event.event_type.to_string(),
                timestamp,
            };
            (STREAM_SUBSCRIPTION, serde_json::to_value(stream)?)
        }
    };
    Ok(Some(translated))
}
