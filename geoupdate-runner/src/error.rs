use std::fmt::Write as _;

use thiserror::Error;

use geoupdate_core::EditionId;
use geoupdate_sync::{LockError, WriteError};

use crate::fetch::FetchError;

/// Why a single edition's update attempt failed.
#[derive(Debug, Error)]
pub enum EditionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Write(#[from] WriteError),

    /// The worker task panicked or was cancelled.
    #[error("update task failed: {0}")]
    Task(String),
}

impl EditionError {
    /// Transient fetch errors, broken payload streams and corrupted transfers
    /// are worth another attempt. Fatal fetch errors and local I/O faults are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EditionError::Fetch(FetchError::Transient(_))
                | EditionError::Write(WriteError::Integrity { .. })
                | EditionError::Write(WriteError::Transfer { .. })
        )
    }
}

/// Error surface for a whole update run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("error preparing database directory: {0}")]
    Setup(#[from] WriteError),

    #[error("{}", describe_failures(.failures))]
    EditionsFailed {
        /// Sorted by edition identifier.
        failures: Vec<(EditionId, EditionError)>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("interrupted")]
    Interrupted,
}

fn describe_failures(failures: &[(EditionId, EditionError)]) -> String {
    let mut out = format!(
        "{} edition{} failed to update:",
        failures.len(),
        if failures.len() == 1 { "" } else { "s" }
    );
    for (edition, err) in failures {
        let _ = write!(out, "\n  {edition}: {err}");
    }
    out
}
