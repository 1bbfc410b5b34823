//! Per-client event type filter.
//!
//! Decides on the hub side which stream events a client receives.

use std::collections::BTreeSet;

/// Set of stream event types a client wants.
///
/// An empty filter accepts every type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    types: BTreeSet<String>,
}

impl EventFilter {
    /// A filter accepting every type.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter accepting only `types`. Blank entries are ignored.
    #[must_use]
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            types: types
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Parses a comma-separated list such as `job.level_up,gamble.completed`.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::only(list.split(','))
    }

    /// Returns `true` if `event_type` passes the filter.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        self.types.is_empty() || self.types.contains(event_type)
    }

    /// Returns `true` if the filter accepts every type.
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.types.is_empty()
    }

    /// The explicitly requested types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        self.types.iter().map(String::as_str).collect()
    }
}
