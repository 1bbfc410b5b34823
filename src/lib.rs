//! # engagement-relay
//!
//! Event delivery core of a community engagement bot. Domain features raise
//! events; this crate makes sure they reach in-process handlers and live
//! browser streams, retrying transient failures and persisting permanent
//! ones.
//!
//! ## Architecture
//!
//! ```text
//! Producers ──▶ ResilientPublisher ──▶ Bus ──▶ handlers
//!                    │  retry queue             ├──▶ AutomationBridge ──▶ ActionSink
//!                    ▼                          └──▶ HubBridge ──▶ BroadcastHub ──▶ GET /events
//!              DeadLetterSink (JSON Lines)
//!
//! WorkerPool ◀── Scheduler          TimerTracker ──▶ DeadlineWorker / ResetWorker
//! ```
//!
//! - [`event`]: event model, typed payloads, the bus and the resilient publisher.
//! - [`persistence`]: the append-only dead-letter log.
//! - [`worker`]: bounded worker pool, periodic scheduler and keyed timers.
//! - [`sse`]: broadcast hub, bus bridge and the streaming HTTP endpoint.
//! - [`automation`]: stream automation actions run for selected events.
//! - [`api`]: event injection, health and OpenAPI routes.

pub mod api;
pub mod app_state;
pub mod automation;
pub mod config;
pub mod error;
pub mod event;
pub mod persistence;
pub mod sse;
pub mod worker;
