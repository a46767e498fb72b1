//! Error types for geoupdate-sync.

use std::path::PathBuf;

use thiserror::Error;

use geoupdate_core::EditionId;

/// Errors from writing or hashing a local database.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The downloaded payload does not hash to the announced digest.
    #[error("MD5 of new database for {edition} ({actual}) does not match expected MD5 ({expected})")]
    Integrity {
        edition: EditionId,
        expected: String,
        actual: String,
    },

    /// Reading the payload stream failed (dropped connection, read timeout,
    /// corrupt compression frame).
    #[error("error reading new database for {edition}: {source}")]
    Transfer {
        edition: EditionId,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the process lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("lock {path} is held by another process")]
    Held { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`WriteError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WriteError {
    WriteError::Io {
        path: path.into(),
        source,
    }
}
