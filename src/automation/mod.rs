//! Stream automation actions triggered by bus events.
//!
//! ```text
//! Bus ──▶ AutomationBridge ──▶ ActionSink (stream automation client)
//! ```
//!
//! The connection to the automation tool is behind [`ActionSink`]; the
//! bridge only decides which action to run and with which arguments.

pub mod bridge;
pub mod sink;

pub use bridge::AutomationBridge;
pub use sink::{ActionArgs, ActionSink, LogActionSink};
