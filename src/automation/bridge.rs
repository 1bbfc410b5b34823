//! Bus subscriber turning events into stream automation actions.
//!
//! Each routed event type maps to one named action with flat string
//! arguments. Sink failures are expected while the automation tool is
//! offline; they are logged and never fail the bus.

use std::sync::Arc;

use super::sink::{ActionArgs, ActionSink};
use crate::error::RelayError;
use crate::event::payloads::{
    GambleCompletedPayloadV1, JobLevelUpPayloadV1, ProgressionAllUnlockedPayloadV1,
    ProgressionCycleCompletedPayloadV1, ProgressionVotingStartedPayloadV1,
    SlotsCompletedPayloadV1, SubscriptionPayloadV1, TimeoutPayloadV1,
};
use crate::event::{Bus, Event, EventType, handler_fn};

/// Action run on a job level up.
pub const ACTION_JOB_LEVEL_UP: &str = "BrandishBot_JobLevelUp";
/// Action run when a progression vote opens.
pub const ACTION_VOTING_STARTED: &str = "BrandishBot_VotingStarted";
/// Action run when a progression cycle completes.
pub const ACTION_CYCLE_COMPLETED: &str = "BrandishBot_CycleCompleted";
/// Action run once every progression node is unlocked.
pub const ACTION_ALL_UNLOCKED: &str = "BrandishBot_AllUnlocked";
/// Action run when a gamble resolves.
pub const ACTION_GAMBLE_COMPLETED: &str = "BrandishBot_GambleCompleted";
/// Action run after a slots spin.
pub const ACTION_SLOTS_RESULT: &str = "BrandishBot_SlotsResult";
/// Action run when a timeout is applied or cleared.
pub const ACTION_TIMEOUT_UPDATE: &str = "BrandishBot_TimeoutUpdate";
/// Action run on any subscription lifecycle change.
pub const ACTION_SUBSCRIPTION_UPDATE: &str = "BrandishBot_SubscriptionUpdate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    JobLevelUp,
    VotingStarted,
    CycleCompleted,
    AllUnlocked,
    GambleCompleted,
    SlotsCompleted,
    Timeout,
    Subscription,
}

const ROUTES: [(EventType, Route); 14] = [
    (EventType::JOB_LEVEL_UP, Route::JobLevelUp),
    (EventType::PROGRESSION_VOTING_STARTED, Route::VotingStarted),
    (EventType::PROGRESSION_CYCLE_COMPLETED, Route::CycleCompleted),
    (EventType::PROGRESSION_ALL_UNLOCKED, Route::AllUnlocked),
    (EventType::GAMBLE_COMPLETED, Route::GambleCompleted),
    (EventType::SLOTS_COMPLETED, Route::SlotsCompleted),
    (EventType::TIMEOUT_APPLIED, Route::Timeout),
    (EventType::TIMEOUT_CLEARED, Route::Timeout),
    (EventType::SUBSCRIPTION_ACTIVATED, Route::Subscription),
    (EventType::SUBSCRIPTION_RENEWED, Route::Subscription),
    (EventType::SUBSCRIPTION_UPGRADED, Route::Subscription),
    (EventType::SUBSCRIPTION_DOWNGRADED, Route::Subscription),
    (EventType::SUBSCRIPTION_EXPIRED, Route::Subscription),
    (EventType::SUBSCRIPTION_CANCELLED, Route::Subscription),
];

/// Runs an automation action for every routed bus event.
#[derive(Debug)]
pub struct AutomationBridge {
    sink: Arc<dyn ActionSink>,
}

impl AutomationBridge {
    /// Creates a bridge running actions on `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn ActionSink>) -> Arc<Self> {
        Arc::new(Self { sink })
    }

    /// Bus types that trigger an action.
    pub fn action_types() -> impl Iterator<Item = EventType> {
        ROUTES.into_iter().map(|(event_type, _)| event_type)
    }

    /// Subscribes an action handler for every routed type on `bus`.
    pub fn subscribe(self: &Arc<Self>, bus: &dyn Bus) {
        for (event_type, route) in ROUTES {
            let bridge = Arc::clone(self);
            bus.subscribe(
                event_type,
                handler_fn(move |event| {
                    let bridge = Arc::clone(&bridge);
                    async move {
                        bridge.dispatch(route, &event).await;
                        Ok::<_, anyhow::Error>(())
                    }
                }),
            );
        }
        tracing::info!(types = ROUTES.len(), "automation bridge subscribed to event bus");
    }

    /// Returns `true` if the sink accepted the action.
    async fn dispatch(&self, route: Route, event: &Event) -> bool {
        let (action, args) = match build_action(route, event) {
            Ok(built) => built,
            Err(err) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %err,
                    "skipping automation action with unusable payload"
                );
                return false;
            }
        };
        tracing::debug!(event_type = %event.event_type, action, args = ?args, "event received");
        match self.sink.do_action(action, args).await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(action, error = %err, "automation action failed");
                false
            }
        }
    }
}

fn args<const N: usize>(pairs: [(&str, String); N]) -> ActionArgs {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Maps a bus event to its action name and arguments.
fn build_action(route: Route, event: &Event) -> Result<(&'static str, ActionArgs), RelayError> {
    let built = match route {
        Route::JobLevelUp => {
            let p: JobLevelUpPayloadV1 = event.payload_as()?;
            let source = if p.source.is_empty() {
                event.metadata_str("source").unwrap_or_default().to_string()
            } else {
                p.source
            };
            let action_args = args([
                ("user_id", p.user_id),
                ("job_key", p.job_key),
                ("old_level", p.old_level.to_string()),
                ("new_level", p.new_level.to_string()),
                ("source", source),
            ]);
            (ACTION_JOB_LEVEL_UP, action_args)
        }
        Route::VotingStarted => {
            let p: ProgressionVotingStartedPayloadV1 = event.payload_as()?;
            let mut action_args = args([
                ("previous_unlock", p.previous_unlock),
                ("options_count", p.options.len().to_string()),
            ]);
            for (i, option) in p.options.into_iter().enumerate() {
                let n = i + 1;
                let display_name = if option.display_name.is_empty() {
                    option.node_key.clone()
                } else {
                    option.display_name
                };
                action_args.insert(format!("option_{n}"), display_name);
                action_args.insert(format!("option_{n}_key"), option.node_key);
                action_args.insert(format!("option_{n}_description"), option.description);
                action_args.insert(format!("option_{n}_duration"), option.unlock_duration);
            }
            (ACTION_VOTING_STARTED, action_args)
        }
        Route::CycleCompleted => {
            let node = event
                .payload_as::<ProgressionCycleCompletedPayloadV1>()?
                .unlocked_node;
            let action_args = args([
                ("node_key", node.node_key),
                ("display_name", node.display_name),
                ("description", node.description),
            ]);
            (ACTION_CYCLE_COMPLETED, action_args)
        }
        Route::AllUnlocked => {
            let p: ProgressionAllUnlockedPayloadV1 = event.payload_as()?;
            (ACTION_ALL_UNLOCKED, args([("message", p.message)]))
        }
        Route::GambleCompleted => {
            let p: GambleCompletedPayloadV1 = event.payload_as()?;
            let has_winner = !p.winner_id.is_empty();
            let action_args = args([
                ("gamble_id", p.gamble_id),
                ("winner_id", p.winner_id),
                ("total_value", p.total_value.to_string()),
                ("participant_count", p.participant_count.to_string()),
                ("has_winner", has_winner.to_string()),
            ]);
            (ACTION_GAMBLE_COMPLETED, action_args)
        }
        Route::SlotsCompleted => {
            let p: SlotsCompletedPayloadV1 = event.payload_as()?;
            let action_args = args([
                ("user_id", p.user_id),
                ("username", p.username),
                ("bet_amount", p.bet_amount.to_string()),
                ("reel1", p.reel1),
                ("reel2", p.reel2),
                ("reel3", p.reel3),
                ("payout_amount", p.payout_amount.to_string()),
                ("payout_multiplier", format!("{:.2}", p.payout_multiplier)),
                ("trigger_type", p.trigger_type),
                ("is_win", p.is_win.to_string()),
                ("is_near_miss", p.is_near_miss.to_string()),
            ]);
            (ACTION_SLOTS_RESULT, action_args)
        }
        Route::Timeout => {
            let p: TimeoutPayloadV1 = event.payload_as()?;
            let action_args = args([
                ("platform", p.platform),
                ("username", p.username),
                ("action", p.action),
                ("duration_seconds", p.duration_seconds.to_string()),
                ("reason", p.reason),
            ]);
            (ACTION_TIMEOUT_UPDATE, action_args)
        }
        Route::Subscription => {
            let p: SubscriptionPayloadV1 = event.payload_as()?;
            let action_args = args([
                ("user_id", p.user_id),
                ("platform", p.platform),
                ("tier_name", p.tier_name),
                ("event_type", event.event_type.to_string()),
                ("timestamp", p.timestamp.to_string()),
            ]);
            (ACTION_SUBSCRIPTION_UPDATE, action_args)
        }
    };
    Ok(built)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::event::MemoryBus;
    use crate::event::payloads::ProgressionVotingOptionV1;

    #[derive(Debug, Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, ActionArgs)>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<(String, ActionArgs)> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn only_call(&self) -> (String, ActionArgs) {
            let mut calls = self.calls();
            assert_eq!(calls.len(), 1, "expected exactly one action: {calls:?}");
            let Some(call) = calls.pop() else {
                panic!("no action recorded");
            };
            call
        }
    }

    #[async_trait]
    impl ActionSink for RecordingSink {
        async fn do_action(&self, action: &str, args: ActionArgs) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((action.to_string(), args));
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct OfflineSink {
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl ActionSink for OfflineSink {
        async fn do_action(&self, _action: &str, _args: ActionArgs) -> anyhow::Result<()> {
            *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) += 1;
            anyhow::bail!("automation tool is not connected")
        }
    }

    fn wired() -> (MemoryBus, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let bus = MemoryBus::new();
        AutomationBridge::new(Arc::clone(&sink) as Arc<dyn ActionSink>).subscribe(&bus);
        (bus, sink)
    }

    fn arg<'a>(args: &'a ActionArgs, key: &str) -> &'a str {
        let Some(value) = args.get(key) else {
            panic!("missing argument {key} in {args:?}");
        };
        value
    }

    #[tokio::test]
    async fn level_up_prefers_payload_source() {
        let (bus, sink) = wired();
        let event = Event::job_level_up("u1", "miner", 4, 5, "mine").with_metadata("source", "other");
        tokio_test::assert_ok!(bus.publish(&event).await);

        let (action, args) = sink.only_call();
        assert_eq!(action, ACTION_JOB_LEVEL_UP);
        assert_eq!(arg(&args, "source"), "mine");
        assert_eq!(arg(&args, "old_level"), "4");
        assert_eq!(arg(&args, "new_level"), "5");
    }

    #[tokio::test]
    async fn level_up_falls_back_to_metadata_source() {
        let (bus, sink) = wired();
        let event = Event::new(
            EventType::JOB_LEVEL_UP,
            json!({"user_id": "u1", "job_key": "miner", "old_level": 1, "new_level": 2}),
        )
        .with_metadata("source", "quest");
        tokio_test::assert_ok!(bus.publish(&event).await);

        let (_, args) = sink.only_call();
        assert_eq!(arg(&args, "source"), "quest");
    }

    #[tokio::test]
    async fn voting_options_are_flattened() {
        let (bus, sink) = wired();
        let payload = ProgressionVotingStartedPayloadV1 {
            options: vec![
                ProgressionVotingOptionV1 {
                    node_key: "forge".to_string(),
                    display_name: "The Forge".to_string(),
                    description: "Craft better".to_string(),
                    unlock_duration: "Short".to_string(),
                },
                ProgressionVotingOptionV1 {
                    node_key: "mine".to_string(),
                    unlock_duration: "Long".to_string(),
                    ..ProgressionVotingOptionV1::default()
                },
            ],
            previous_unlock: "farm".to_string(),
        };
        let event = Event::new(EventType::PROGRESSION_VOTING_STARTED, payload);
        tokio_test::assert_ok!(bus.publish(&event).await);

        let (action, args) = sink.only_call();
        assert_eq!(action, ACTION_VOTING_STARTED);
        assert_eq!(arg(&args, "options_count"), "2");
        assert_eq!(arg(&args, "previous_unlock"), "farm");
        assert_eq!(arg(&args, "option_1"), "The Forge");
        assert_eq!(arg(&args, "option_1_description"), "Craft better");
        assert_eq!(arg(&args, "option_2"), "mine");
        assert_eq!(arg(&args, "option_2_key"), "mine");
        assert_eq!(arg(&args, "option_2_duration"), "Long");
        assert!(!args.contains_key("option_3"));
    }

    #[tokio::test]
    async fn gamble_without_winner_reports_it() {
        let (bus, sink) = wired();
        tokio_test::assert_ok!(bus.publish(&Event::gamble_completed("g1", "", 40, 3)).await);

        let (action, args) = sink.only_call();
        assert_eq!(action, ACTION_GAMBLE_COMPLETED);
        assert_eq!(arg(&args, "has_winner"), "false");
        assert_eq!(arg(&args, "total_value"), "40");
        assert_eq!(arg(&args, "participant_count"), "3");
    }

    #[tokio::test]
    async fn slots_result_formats_multiplier() {
        let (bus, sink) = wired();
        let payload = SlotsCompletedPayloadV1 {
            user_id: "u2".to_string(),
            username: "spinner".to_string(),
            bet_amount: 10,
            reel1: "cherry".to_string(),
            reel2: "cherry".to_string(),
            reel3: "cherry".to_string(),
            payout_amount: 25,
            payout_multiplier: 2.5,
            trigger_type: "triple".to_string(),
            is_win: true,
            is_near_miss: false,
        };
        tokio_test::assert_ok!(bus.publish(&Event::new(EventType::SLOTS_COMPLETED, payload)).await);

        let (action, args) = sink.only_call();
        assert_eq!(action, ACTION_SLOTS_RESULT);
        assert_eq!(arg(&args, "payout_multiplier"), "2.50");
        assert_eq!(arg(&args, "is_win"), "true");
        assert_eq!(arg(&args, "is_near_miss"), "false");
        assert_eq!(args.len(), 11);
    }

    #[tokio::test]
    async fn both_timeout_types_share_one_action() {
        let (bus, sink) = wired();
        let applied = Event::timeout_applied("twitch", "viewer", 60, "spam");
        tokio_test::assert_ok!(bus.publish(&applied).await);
        tokio_test::assert_ok!(bus.publish(&Event::timeout_cleared("twitch", "viewer")).await);

        let calls = sink.calls();
        let [(first, applied), (second, cleared)] = calls.as_slice() else {
            panic!("expected two actions: {calls:?}");
        };
        assert_eq!(first, ACTION_TIMEOUT_UPDATE);
        assert_eq!(second, ACTION_TIMEOUT_UPDATE);
        assert_eq!(arg(applied, "duration_seconds"), "60");
        assert_eq!(arg(applied, "reason"), "spam");
        assert_eq!(arg(cleared, "action"), "cleared");
    }

    #[tokio::test]
    async fn subscription_action_carries_the_event_type() {
        let (bus, sink) = wired();
        for event_type in EventType::SUBSCRIPTION_LIFECYCLE {
            let event = Event::subscription(event_type, "u9", "twitch", "gold");
            tokio_test::assert_ok!(bus.publish(&event).await);
        }

        let calls = sink.calls();
        assert_eq!(calls.len(), EventType::SUBSCRIPTION_LIFECYCLE.len());
        for ((action, args), event_type) in calls.iter().zip(EventType::SUBSCRIPTION_LIFECYCLE) {
            assert_eq!(action, ACTION_SUBSCRIPTION_UPDATE);
            assert_eq!(arg(args, "event_type"), event_type.to_string());
            assert_eq!(arg(args, "tier_name"), "gold");
        }
    }

    #[tokio::test]
    async fn offline_sink_never_fails_publish() {
        let sink = Arc::new(OfflineSink::default());
        let bus = MemoryBus::new();
        AutomationBridge::new(Arc::clone(&sink) as Arc<dyn ActionSink>).subscribe(&bus);

        let event = Event::new(EventType::PROGRESSION_ALL_UNLOCKED, json!({"message": "done"}));
        tokio_test::assert_ok!(bus.publish(&event).await);
        assert_eq!(*sink.attempts.lock().unwrap_or_else(PoisonError::into_inner), 1);
    }

    #[tokio::test]
    async fn malformed_payload_runs_no_action() {
        let (bus, sink) = wired();
        let bad = Event::new(EventType::GAMBLE_COMPLETED, json!({"winner_id": 12}));
        tokio_test::assert_ok!(bus.publish(&bad).await);
        let empty = Event::new(EventType::SLOTS_COMPLETED, serde_json::Value::Null);
        tokio_test::assert_ok!(bus.publish(&empty).await);
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn unrouted_types_are_ignored() {
        let (bus, sink) = wired();
        tokio_test::assert_ok!(bus.publish(&Event::engagement(1, 2, "message", "1")).await);
        tokio_test::assert_ok!(bus.publish(&Event::new(EventType::EXPEDITION_TURN, json!({}))).await);
        assert!(sink.calls().is_empty());
        assert_eq!(AutomationBridge::action_types().count(), 14);
    }

    #[test]
    fn partial_json_builds_every_action() {
        for (event_type, route) in ROUTES {
            let label = event_type.to_string();
            let event = Event::new(event_type, json!({"user_id": "u1"}));
            let built = build_action(route, &event);
            let Ok((action, _)) = built else {
                panic!("{label} built no action: {built:?}");
            };
            assert!(action.starts_with("BrandishBot_"), "{label}");
        }
    }
}
