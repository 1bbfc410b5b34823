//! Concurrency substrate: worker pool, scheduler and timer-tracked workers.
//!
//! - [`WorkerPool`] drains a bounded job queue with a fixed set of workers.
//! - [`Scheduler`] enqueues jobs into the pool at fixed intervals.
//! - [`TimerTracker`] keeps one cancellable timer per domain identifier.
//! - [`DeadlineWorker`] and [`ResetWorker`] build domain workers on top of it.

pub mod deadline;
pub mod pool;
pub mod reset;
pub mod scheduler;
pub mod timer;

pub use deadline::{DeadlineAction, DeadlineWorker, HasDeadline};
pub use pool::{Job, JobFn, WorkerPool};
pub use reset::{ArmPlan, ResetAction, ResetCadence, ResetWorker};
pub use scheduler::Scheduler;
pub use timer::TimerTracker;
