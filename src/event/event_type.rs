//! Event type discriminator.
//!
//! [`EventType`] is a newtype over a string so that well-known types can be
//! declared as constants while producers remain free to publish ad-hoc types.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Routing key of an [`super::Event`].
///
/// Subscriptions on the bus and filters on the broadcast hub are keyed by
/// this value. Serialized as a plain JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// User engagement (chat activity, commands).
    pub const ENGAGEMENT: Self = Self::from_static("engagement");

    /// A progression cycle finished and a node was unlocked.
    pub const PROGRESSION_CYCLE_COMPLETED: Self = Self::from_static("progression.cycle.completed");
    /// A progression target was chosen.
    pub const PROGRESSION_TARGET_SET: Self = Self::from_static("progression.target.set");
    /// A progression vote opened.
    pub const PROGRESSION_VOTING_STARTED: Self = Self::from_static("progression.voting_started");
    /// Every progression node is unlocked.
    pub const PROGRESSION_ALL_UNLOCKED: Self = Self::from_static("progression.all_unlocked");
    /// A progression node was unlocked.
    pub const PROGRESSION_NODE_UNLOCKED: Self = Self::from_static("progression.node_unlocked");
    /// A progression node was locked again.
    pub const PROGRESSION_NODE_RELOCKED: Self = Self::from_static("progression.node_relocked");

    /// A user gained a job level.
    pub const JOB_LEVEL_UP: Self = Self::from_static("job.level_up");
    /// A job XP award rolled a critical bonus.
    pub const JOB_XP_CRITICAL: Self = Self::from_static("job.xp_critical");

    /// The daily reset ran.
    pub const DAILY_RESET_COMPLETE: Self = Self::from_static("daily_reset.complete");
    /// The weekly reset ran.
    pub const WEEKLY_RESET_COMPLETE: Self = Self::from_static("weekly_reset.complete");

    /// A timeout was applied to a user.
    pub const TIMEOUT_APPLIED: Self = Self::from_static("timeout.applied");
    /// A timeout was cleared.
    pub const TIMEOUT_CLEARED: Self = Self::from_static("timeout.cleared");

    /// A gamble opened for participants.
    pub const GAMBLE_STARTED: Self = Self::from_static("gamble.started");
    /// A gamble was resolved.
    pub const GAMBLE_COMPLETED: Self = Self::from_static("gamble.completed");

    /// A slots spin finished.
    pub const SLOTS_COMPLETED: Self = Self::from_static("slots.completed");

    /// An expedition started recruiting.
    pub const EXPEDITION_STARTED: Self = Self::from_static("expedition.started");
    /// One turn of an expedition was played.
    pub const EXPEDITION_TURN: Self = Self::from_static("expedition.turn");
    /// An expedition finished.
    pub const EXPEDITION_COMPLETED: Self = Self::from_static("expedition.completed");

    /// A subscription was activated.
    pub const SUBSCRIPTION_ACTIVATED: Self = Self::from_static("subscription.activated");
    /// A subscription was renewed.
    pub const SUBSCRIPTION_RENEWED: Self = Self::from_static("subscription.renewed");
    /// A subscription moved to a higher tier.
    pub const SUBSCRIPTION_UPGRADED: Self = Self::from_static("subscription.upgraded");
    /// A subscription moved to a lower tier.
    pub const SUBSCRIPTION_DOWNGRADED: Self = Self::from_static("subscription.downgraded");
    /// A subscription expired.
    pub const SUBSCRIPTION_EXPIRED: Self = Self::from_static("subscription.expired");
    /// A subscription was cancelled.
    pub const SUBSCRIPTION_CANCELLED: Self = Self::from_static("subscription.cancelled");

    /// All subscription lifecycle types.
    pub const SUBSCRIPTION_LIFECYCLE: [Self; 6] = [
        Self::SUBSCRIPTION_ACTIVATED,
        Self::SUBSCRIPTION_RENEWED,
        Self::SUBSCRIPTION_UPGRADED,
        Self::SUBSCRIPTION_DOWNGRADED,
        Self::SUBSCRIPTION_EXPIRED,
        Self::SUBSCRIPTION_CANCELLED,
    ];

    /// Creates an event type from a static string.
    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the type is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self(Cow::Owned(name.to_string()))
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
