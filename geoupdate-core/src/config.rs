//! Update client configuration.
//!
//! # File format
//!
//! ```text
//! # comment
//! AccountID 12345
//! LicenseKey 000000000000
//! EditionIDs GeoLite2-Country GeoLite2-City
//! ```
//!
//! One `Key value...` pair per line. Values are whitespace-joined, so
//! `EditionIDs` may list any number of editions. Command-line overrides are
//! applied after the file is parsed; the resulting [`Config`] is immutable and
//! passed explicitly to the runner.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::types::EditionId;

pub const DEFAULT_CONFIG_FILE: &str = "/usr/local/etc/GeoIP.conf";
pub const DEFAULT_DATABASE_DIRECTORY: &str = "/usr/local/share/GeoIP";
pub const DEFAULT_URL: &str = "https://updates.maxmind.com";
pub const DEFAULT_RETRY_FOR: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PARALLELISM: usize = 1;

/// Lock file name inside the database directory when `LockFile` is unset.
pub const LOCK_FILE_NAME: &str = ".lock";

const PLACEHOLDER_LICENSE_KEY: &str = "000000000000";
const DEFAULT_PROXY_PORT: u16 = 1080;

/// Parsed, validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub account_id: u64,
    /// Where database files are stored.
    pub database_directory: PathBuf,
    /// Editions to keep up to date, in configuration order.
    pub edition_ids: Vec<EditionId>,
    pub license_key: String,
    /// Guards against two update runs on the same directory.
    pub lock_file: PathBuf,
    /// Copy the remote modification time onto installed files.
    pub preserve_file_times: bool,
    /// Maximum number of editions updated concurrently.
    pub parallelism: usize,
    pub proxy: Option<Url>,
    /// Wall-clock retry budget per edition, measured from its first attempt.
    pub retry_for: Duration,
    /// Base URL of the update service.
    pub url: String,
    pub verbose: bool,
}

/// Values supplied on the command line that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub database_directory: Option<PathBuf>,
    /// `0` keeps the configured value.
    pub parallelism: usize,
    pub verbose: bool,
}

impl Config {
    /// Load and validate the config file at `path`, then apply `overrides`.
    pub fn load(path: &Path, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, overrides)
    }

    /// Parse config file contents. Pure; no filesystem access.
    pub fn parse(contents: &str, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = Config {
            account_id: 0,
            database_directory: PathBuf::from(DEFAULT_DATABASE_DIRECTORY),
            edition_ids: Vec::new(),
            license_key: String::new(),
            lock_file: PathBuf::new(),
            preserve_file_times: false,
            parallelism: DEFAULT_PARALLELISM,
            proxy: None,
            retry_for: DEFAULT_RETRY_FOR,
            url: DEFAULT_URL.to_string(),
            verbose: false,
        };

        let mut keys_seen = HashSet::<&str>::new();
        let mut lock_file = None;
        let mut proxy = String::new();
        let mut proxy_user_password = String::new();

        for (index, raw) in contents.lines().enumerate() {
            let line_number = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let Some(key) = fields.next() else { continue };
            let value = fields.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return Err(ConfigError::InvalidFormat { line: line_number });
            }

            if !keys_seen.insert(key) {
                return Err(ConfigError::DuplicateKey {
                    key: key.to_string(),
                });
            }

            match key {
                "AccountID" | "UserId" => {
                    config.account_id = value.parse().map_err(|e: std::num::ParseIntError| {
                        ConfigError::InvalidValue {
                            key: "AccountID",
                            message: e.to_string(),
                        }
                    })?;
                    keys_seen.extend(["AccountID", "UserId"]);
                }
                "DatabaseDirectory" => config.database_directory = PathBuf::from(&value),
                "EditionIDs" | "ProductIds" => {
                    config.edition_ids = value.split_whitespace().map(EditionId::from).collect();
                    keys_seen.extend(["EditionIDs", "ProductIds"]);
                }
                "Host" => config.url = service_url(&value),
                "LicenseKey" => config.license_key = value,
                "LockFile" => lock_file = Some(PathBuf::from(&value)),
                "PreserveFileTimes" => {
                    config.preserve_file_times = match value.as_str() {
                        "0" => false,
                        "1" => true,
                        _ => {
                            return Err(ConfigError::InvalidValue {
                                key: "PreserveFileTimes",
                                message: "must be 0 or 1".to_string(),
                            })
                        }
                    };
                }
                "Proxy" => proxy = value,
                "ProxyUserPassword" => proxy_user_password = value,
                // Deprecated; accepted for compatibility.
                "Protocol" | "SkipHostnameVerification" | "SkipPeerVerification" => {}
                "RetryFor" => {
                    config.retry_for = humantime::parse_duration(&value).map_err(|_| {
                        ConfigError::InvalidValue {
                            key: "RetryFor",
                            message: format!("'{value}' is not a valid duration"),
                        }
                    })?;
                }
                "Parallelism" => {
                    let parallelism: i64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "Parallelism",
                        message: format!("'{value}' is not a valid parallelism value"),
                    })?;
                    if parallelism <= 0 {
                        return Err(ConfigError::InvalidValue {
                            key: "Parallelism",
                            message: format!(
                                "parallelism should be greater than 0, got '{parallelism}'"
                            ),
                        });
                    }
                    config.parallelism = parallelism as usize;
                }
                _ => return Err(ConfigError::UnknownOption { line: line_number }),
            }
        }

        for required in ["EditionIDs", "AccountID", "LicenseKey"] {
            if !keys_seen.contains(required) {
                return Err(ConfigError::MissingKey { key: required });
            }
        }

        overrides.apply(&mut config);

        config.lock_file = lock_file
            .unwrap_or_else(|| config.database_directory.join(LOCK_FILE_NAME));
        config.proxy = parse_proxy(&proxy, &proxy_user_password)?;

        if (config.account_id == 0 || config.account_id == 999_999)
            && config.license_key == PLACEHOLDER_LICENSE_KEY
        {
            return Err(ConfigError::PlaceholderCredentials);
        }

        Ok(config)
    }
}

impl ConfigOverrides {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = self.database_directory.as_ref().filter(|d| !d.as_os_str().is_empty()) {
            config.database_directory = dir.clone();
        }
        if self.parallelism > 0 {
            config.parallelism = self.parallelism;
        }
        config.verbose = self.verbose;
    }
}

/// `Host` is a bare host name served over https, or a full base URL.
fn service_url(host: &str) -> String {
    if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{host}")
    }
}

/// Normalise the `Proxy` / `ProxyUserPassword` pair into a URL.
///
/// A missing scheme means `http`; a missing port means 1080. Credentials
/// embedded in `Proxy` take precedence over `ProxyUserPassword`.
fn parse_proxy(proxy: &str, proxy_user_password: &str) -> Result<Option<Url>, ConfigError> {
    if proxy.is_empty() {
        return Ok(None);
    }

    let raw = match proxy_scheme(proxy) {
        None => format!("http://{proxy}"),
        Some(scheme) => {
            let scheme = scheme.to_ascii_lowercase();
            if !matches!(scheme.as_str(), "http" | "https" | "socks5") {
                return Err(ConfigError::UnsupportedProxy { scheme });
            }
            proxy.to_string()
        }
    };

    let mut url = Url::parse(&raw)?;
    if !has_explicit_port(&raw) {
        url.set_port(Some(DEFAULT_PROXY_PORT))
            .map_err(|()| ConfigError::UnsupportedProxy {
                scheme: url.scheme().to_string(),
            })?;
    }

    if !url.username().is_empty() || proxy_user_password.is_empty() {
        return Ok(Some(url));
    }

    let (user, password) = proxy_user_password
        .split_once(':')
        .ok_or(ConfigError::MalformedProxyCredentials)?;
    url.set_username(user)
        .and_then(|()| url.set_password(Some(password)))
        .map_err(|()| ConfigError::MalformedProxyCredentials)?;

    Ok(Some(url))
}

/// The `scheme` of `scheme://rest`, if the prefix is a syntactically valid scheme.
fn proxy_scheme(proxy: &str) -> Option<&str> {
    let (scheme, _) = proxy.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

fn has_explicit_port(raw: &str) -> bool {
    let rest = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
    match host.rsplit_once(']') {
        Some((_, after_bracket)) => after_bracket.starts_with(':'),
        None => host.contains(':'),
    }
}
