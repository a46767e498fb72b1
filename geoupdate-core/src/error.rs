//! Error types for geoupdate-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be opened or read.
    #[error("error reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A non-comment line with fewer than two fields.
    #[error("invalid format on line {line}")]
    InvalidFormat { line: usize },

    /// The same option (or one of its aliases) was given twice.
    #[error("`{key}' is in the config multiple times")]
    DuplicateKey { key: String },

    #[error("unknown option on line {line}")]
    UnknownOption { line: usize },

    #[error("the `{key}` option is required")]
    MissingKey { key: &'static str },

    /// A recognised option with a value that does not parse.
    #[error("invalid value for `{key}`: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("unsupported proxy type: {scheme}")]
    UnsupportedProxy { scheme: String },

    #[error("error parsing proxy URL: {0}")]
    ProxyUrl(#[from] url::ParseError),

    #[error("proxy user/password is malformed")]
    MalformedProxyCredentials,

    /// The historical free-download placeholder credentials.
    #[error("a valid AccountID and LicenseKey combination is required")]
    PlaceholderCredentials,
}
