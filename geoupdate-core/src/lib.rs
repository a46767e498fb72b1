//! geoupdate core library — domain types, configuration, errors.
//!
//! - [`types`] — [`EditionId`] and shared constants
//! - [`config`] — config file parsing and command-line overrides
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, ConfigOverrides};
pub use error::ConfigError;
pub use types::{EditionId, DATABASE_EXTENSION, ZERO_MD5};
