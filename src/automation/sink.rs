//! The action sink seam.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

/// Named string arguments of one action.
pub type ActionArgs = HashMap<String, String>;

/// Runs named actions on a stream automation tool.
#[async_trait]
pub trait ActionSink: Send + Sync + fmt::Debug {
    /// Runs `action` with `args`.
    ///
    /// # Errors
    ///
    /// Returns an error if the automation tool is unreachable or rejects the
    /// action. Callers treat failures as non-fatal.
    async fn do_action(&self, action: &str, args: ActionArgs) -> anyhow::Result<()>;
}

/// Sink that only logs the actions it is given.
///
/// Used when no automation tool is connected.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogActionSink;

#[async_trait]
impl ActionSink for LogActionSink {
    async fn do_action(&self, action: &str, args: ActionArgs) -> anyhow::Result<()> {
        tracing::info!(action, args = ?args, "automation action");
        Ok(())
    }
}
