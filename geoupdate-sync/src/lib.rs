//! # geoupdate-sync
//!
//! Local side of an update: the hash-verified atomic database writer and the
//! process lock that keeps two runs off the same database directory.
//!
//! Use [`LocalFileWriter`] through the [`DatabaseWriter`] trait to install a
//! fetched [`ReadResult`], and [`ProcessLock::acquire`] around a whole run.

pub mod error;
pub mod lock;
pub mod writer;

pub use error::{LockError, WriteError};
pub use lock::ProcessLock;
pub use writer::{DatabaseWriter, LocalFileWriter, ReadResult};
