//! Event model, in-process bus and resilient publisher.
//!
//! Producers hand an [`Event`] to the [`ResilientPublisher`], which makes one
//! synchronous delivery attempt through a [`Bus`] and retries failures in the
//! background. Subscribers implement [`EventHandler`].

pub mod bus;
pub mod event_type;
pub mod model;
pub mod payloads;
pub mod publisher;

pub use bus::{Bus, EventHandler, HandlerFn, MemoryBus, handler_fn};
pub use event_type::EventType;
pub use model::{EVENT_SCHEMA_VERSION, Event};
pub use payloads::{Payload, PayloadKind, TypedPayload};
pub use publisher::{ResilientPublisher, RetrySettings};
