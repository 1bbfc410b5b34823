//! Dead-letter record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Schema version of [`DeadLetterEntry`] lines.
pub const DEAD_LETTER_SCHEMA_VERSION: &str = "1.0";

/// One line of the dead-letter JSON Lines file.
///
/// Written once per permanently failed delivery and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Record schema version.
    pub schema_version: String,
    /// When the record was written (RFC 3339).
    pub timestamp: DateTime<Utc>,
    /// The undeliverable event, including its own version and metadata.
    pub event: Event,
    /// Retry attempts made; `0` means the event never entered the retry queue.
    pub attempts: u32,
    /// Last delivery error, empty if none.
    pub last_error: String,
}

impl DeadLetterEntry {
    /// Builds a record stamped with the current time.
    #[must_use]
    pub fn new(event: Event, attempts: u32, last_error: &str) -> Self {
        Self {
            schema_version: DEAD_LETTER_SCHEMA_VERSION.to_string(),
            timestamp: Utc::now(),
            event,
            attempts,
            last_error: last_error.to_string(),
        }
    }
}
