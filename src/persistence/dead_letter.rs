//! Append-only JSON Lines sink for permanently failed events.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::models::DeadLetterEntry;
use crate::error::RelayError;
use crate::event::Event;

/// Dead-letter file writer.
///
/// All writers serialize through one mutex and every record is written with a
/// single `write_all`, so lines from concurrent writers never interleave.
#[derive(Debug)]
pub struct DeadLetterSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl DeadLetterSink {
    /// Opens (or creates) the dead-letter file in append mode.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DeadLetterIo`] if the directory or file cannot be
    /// created or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        tracing::info!(path = %path.display(), "dead-letter sink opened");
        Ok(Self {
            path,
            file: Mutex::new(Some(File::from_std(file))),
        })
    }

    /// Path of the dead-letter file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record for `event`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DeadLetterClosed`] after [`close`](Self::close),
    /// [`RelayError::DeadLetterEncode`] if the record cannot be serialized and
    /// [`RelayError::DeadLetterIo`] on write failure.
    pub async fn write(
        &self,
        event: &Event,
        attempts: u32,
        last_error: &str,
    ) -> Result<(), RelayError> {
        let entry = DeadLetterEntry::new(event.clone(), attempts, last_error);
        let mut line =
            serde_json::to_vec(&entry).map_err(|e| RelayError::DeadLetterEncode(e.to_string()))?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return Err(RelayError::DeadLetterClosed);
        };
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Flushes and releases the file handle. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DeadLetterIo`] if the final flush fails.
    pub async fn close(&self) -> Result<(), RelayError> {
        let Some(mut file) = self.file.lock().await.take() else {
            return Ok(());
        };
        file.flush().await?;
        tracing::info!(path = %self.path.display(), "dead-letter sink closed");
        Ok(())
    }
}
