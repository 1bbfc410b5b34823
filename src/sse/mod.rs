//! Server-sent event push: broadcast hub, bus bridge and HTTP stream.
//!
//! ```text
//! Bus ──▶ HubBridge ──▶ BroadcastHub ──▶ Client ──▶ GET /events
//! ```

pub mod bridge;
pub mod filter;
pub mod handler;
pub mod hub;
pub mod message;

pub use bridge::HubBridge;
pub use filter::EventFilter;
pub use hub::{BroadcastHub, Client, HubSettings, stats_job};
pub use message::{HubEvent, format_sse_message};
