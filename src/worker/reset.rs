//! Periodic reset worker with two-stage arming.
//!
//! Far from the target instant the worker arms a coarse standby timer that
//! wakes [`STANDBY_LEAD`] before the reset and recomputes. Only inside the
//! final window does it arm the real reset timer. A reset timer that fires
//! early (more than [`JITTER_TOLERANCE`] before the target, yet not just after
//! the previous reset) re-arms instead of running.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, TimeDelta, TimeZone, Utc, Weekday};

use super::timer::TimerTracker;
use crate::error::RelayError;
use crate::event::{Event, EventType, ResilientPublisher};

/// Beyond this distance from the target the worker only arms a standby timer.
pub const STANDBY_THRESHOLD: Duration = Duration::from_secs(60 * 60);
/// How long before the target a standby timer wakes.
pub const STANDBY_LEAD: Duration = Duration::from_secs(45 * 60);
/// Remaining time below which a firing reset timer counts as on time.
pub const JITTER_TOLERANCE: Duration = Duration::from_secs(10);

const TIMER_SLOT: &str = "reset";

/// When resets happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCadence {
    /// Every day at local midnight in `offset`.
    Daily {
        /// Time zone of the midnight.
        offset: FixedOffset,
    },
    /// Every week at local midnight of `weekday` in `offset`.
    Weekly {
        /// Day of the reset.
        weekday: Weekday,
        /// Time zone of the midnight.
        offset: FixedOffset,
    },
}

/// What the worker arms next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmPlan {
    /// Wake after the duration and recompute.
    Standby(Duration),
    /// Run the reset after the duration.
    Approach(Duration),
}

impl ResetCadence {
    /// Daily reset at midnight UTC+7.
    #[must_use]
    pub fn daily_utc7() -> Self {
        Self::Daily {
            offset: offset_hours(7),
        }
    }

    /// Weekly reset on Monday 00:00 UTC.
    #[must_use]
    pub fn weekly_monday_utc() -> Self {
        Self::Weekly {
            weekday: Weekday::Mon,
            offset: Utc.fix(),
        }
    }

    /// Length of one period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        match self {
            Self::Daily { .. } => Duration::from_secs(24 * 60 * 60),
            Self::Weekly { .. } => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Event type published after a reset.
    #[must_use]
    pub fn completion_type(&self) -> EventType {
        match self {
            Self::Daily { .. } => EventType::DAILY_RESET_COMPLETE,
            Self::Weekly { .. } => EventType::WEEKLY_RESET_COMPLETE,
        }
    }

    /// First reset instant strictly after `now`.
    #[must_use]
    pub fn next_reset_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Daily { offset } => {
                let today = now.with_timezone(&offset).date_naive();
                let candidate = local_midnight(today, offset);
                if candidate > now {
                    candidate
                } else {
                    candidate + TimeDelta::days(1)
                }
            }
            Self::Weekly { weekday, offset } => {
                let today = now.with_timezone(&offset).date_naive();
                let days_ahead = (7 + weekday.num_days_from_monday()
                    - today.weekday().num_days_from_monday())
                    % 7;
                let candidate =
                    local_midnight(today, offset) + TimeDelta::days(i64::from(days_ahead));
                if candidate > now {
                    candidate
                } else {
                    candidate + TimeDelta::days(7)
                }
            }
        }
    }

    /// Time from `now` to the next reset.
    #[must_use]
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Duration {
        (self.next_reset_after(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Chooses between a standby wake-up and the real reset timer.
    #[must_use]
    pub fn plan(&self, now: DateTime<Utc>) -> ArmPlan {
        let remaining = self.time_until_next(now);
        if remaining > STANDBY_THRESHOLD {
            ArmPlan::Standby(remaining.saturating_sub(STANDBY_LEAD))
        } else {
            ArmPlan::Approach(remaining)
        }
    }

    /// Whether a reset timer firing with `remaining` left came too early.
    ///
    /// Right after a reset the next one is almost a full period away, which
    /// means the timer was on time or slightly late.
    #[must_use]
    pub fn is_early(&self, remaining: Duration) -> bool {
        remaining > JITTER_TOLERANCE && remaining < self.period().saturating_sub(STANDBY_THRESHOLD)
    }
}

fn offset_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&(local - TimeDelta::seconds(i64::from(offset.local_minus_utc()))))
}

/// Domain side of a [`ResetWorker`].
#[async_trait]
pub trait ResetAction: Send + Sync + 'static {
    /// Worker name used in logs.
    fn name(&self) -> &'static str;

    /// Performs the reset and returns the number of records touched.
    ///
    /// # Errors
    ///
    /// Errors are logged and no completion event is published.
    async fn reset(&self) -> anyhow::Result<i64>;
}

struct ResetInner<A> {
    action: A,
    cadence: ResetCadence,
    publisher: Option<Arc<ResilientPublisher>>,
    timers: TimerTracker<&'static str>,
}

/// Runs a [`ResetAction`] on a [`ResetCadence`].
pub struct ResetWorker<A> {
    inner: Arc<ResetInner<A>>,
}

impl<A: ResetAction> fmt::Debug for ResetWorker<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetWorker")
            .field("name", &self.inner.action.name())
            .field("cadence", &self.inner.cadence)
            .field("timers", &self.inner.timers)
            .finish()
    }
}

impl<A: ResetAction> ResetWorker<A> {
    /// Creates a worker; completion events go through `publisher` when set.
    #[must_use]
    pub fn new(action: A, cadence: ResetCadence, publisher: Option<Arc<ResilientPublisher>>) -> Self {
        let name = action.name();
        Self {
            inner: Arc::new(ResetInner {
                action,
                cadence,
                publisher,
                timers: TimerTracker::new(name),
            }),
        }
    }

    /// Arms the first timer.
    pub fn start(&self) {
        self.inner.arm();
    }

    /// Runs the reset now, outside the schedule.
    pub async fn reset_now(&self) {
        self.inner.run_reset().await;
    }

    /// Returns `true` while a timer is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.timers.is_pending(&TIMER_SLOT)
    }

    /// Cancels the pending timer and waits for a running reset.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ShutdownTimeout`] if the reset outlasts `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), RelayError> {
        tracing::info!(worker = self.inner.action.name(), "shutting down reset worker");
        self.inner.timers.shutdown(timeout).await
    }
}

impl<A: ResetAction> ResetInner<A> {
    fn arm(self: &Arc<Self>) {
        let now = Utc::now();
        let this = Arc::clone(self);
        match self.cadence.plan(now) {
            ArmPlan::Standby(wait) => {
                self.timers
                    .schedule_after(TIMER_SLOT, wait, move || async move { this.arm() });
                tracing::info!(
                    worker = self.action.name(),
                    next_check_at = %(now + TimeDelta::from_std(wait).unwrap_or(TimeDelta::zero())),
                    "reset standby armed"
                );
            }
            ArmPlan::Approach(wait) => {
                self.timers
                    .schedule_after(TIMER_SLOT, wait, move || async move { this.fire().await });
                tracing::info!(
                    worker = self.action.name(),
                    next_reset_at = %self.cadence.next_reset_after(now),
                    "reset approach armed"
                );
            }
        }
    }

    async fn fire(self: Arc<Self>) {
        let remaining = self.cadence.time_until_next(Utc::now());
        if self.cadence.is_early(remaining) {
            tracing::debug!(
                worker = self.action.name(),
                remaining_ms = remaining.as_millis(),
                "reset timer fired early, re-arming"
            );
            self.arm();
            return;
        }
        self.run_reset().await;
        self.arm();
    }

    async fn run_reset(&self) {
        tracing::info!(worker = self.action.name(), "reset starting");
        let records_affected = match self.action.reset().await {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(worker = self.action.name(), error = %err, "reset failed");
                return;
            }
        };
        tracing::info!(worker = self.action.name(), records_affected, "reset completed");

        if let Some(publisher) = &self.publisher {
            let event = Event::reset_complete(self.cadence.completion_type(), Utc::now(), records_affected);
            publisher.publish_with_retry(event).await;
        }
    }
}
