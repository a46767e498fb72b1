//! Remote side of an update, as seen by the runner.

use async_trait::async_trait;
use thiserror::Error;

use geoupdate_core::EditionId;
use geoupdate_sync::ReadResult;

/// Result of asking the update service for a newer edition.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The remote hash equals the known hash.
    NotModified,
    /// A newer database, ready to be streamed into the writer.
    Modified(ReadResult),
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeouts, dropped connections, 5xx responses.
    #[error("temporary error: {0}")]
    Transient(String),

    /// Rejected credentials or a response this client cannot interpret.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Source of edition payloads.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `edition` unless the service reports it unchanged from `known_hash`.
    async fn fetch(&self, edition: &EditionId, known_hash: &str)
        -> Result<FetchOutcome, FetchError>;
}
