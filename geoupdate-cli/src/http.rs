//! [`Fetcher`] over the update service's HTTP API.
//!
//! One request per edition:
//!
//! ```text
//! GET <url>/geoip/databases/<edition>/update?db_md5=<known hash>
//! Authorization: Basic base64(<account id>:<license key>)
//! ```
//!
//! `304` means the known hash is current. `200` carries the new hash in
//! `X-Database-MD5`, the build time in `Last-Modified`, and a gzip body.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use url::Url;

use geoupdate_core::{Config, EditionId};
use geoupdate_runner::{FetchError, FetchOutcome, Fetcher};
use geoupdate_sync::ReadResult;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpFetcher {
    agent: ureq::Agent,
    base_url: Url,
    authorization: String,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .with_context(|| format!("invalid update service URL '{}'", config.url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("update service URL '{}' cannot be a base", config.url);
        }

        let mut builder = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .user_agent(concat!("geoupdate/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy) = &config.proxy {
            let proxy = ureq::Proxy::new(proxy.as_str())
                .with_context(|| format!("unusable proxy '{}'", proxy.host_str().unwrap_or("")))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            agent: builder.build(),
            base_url,
            authorization: basic_auth(config.account_id, &config.license_key),
        })
    }

    fn update_url(&self, edition: &EditionId, known_hash: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["geoip", "databases", edition.as_str(), "update"]);
        }
        url.query_pairs_mut().append_pair("db_md5", known_hash);
        url
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        edition: &EditionId,
        known_hash: &str,
    ) -> Result<FetchOutcome, FetchError> {
        let url = self.update_url(edition, known_hash);
        let request = self
            .agent
            .get(url.as_str())
            .set("Authorization", &self.authorization);
        let edition = edition.clone();
        let known_hash = known_hash.to_string();

        tracing::debug!(edition = %edition, url = %url.path(), "requesting update");
        tokio::task::spawn_blocking(move || {
            let response = request.call().map_err(classify)?;
            read_response(response, edition, known_hash)
        })
        .await
        .map_err(|err| FetchError::Transient(format!("request task failed: {err}")))?
    }
}

fn read_response(
    response: ureq::Response,
    edition_id: EditionId,
    old_hash: String,
) -> Result<FetchOutcome, FetchError> {
    match response.status() {
        304 => return Ok(FetchOutcome::NotModified),
        200 => {}
        status => {
            return Err(FetchError::Fatal(format!(
                "unexpected HTTP status {status} for {edition_id}"
            )))
        }
    }

    let new_hash = response
        .header("X-Database-MD5")
        .filter(|hash| !hash.is_empty())
        .ok_or_else(|| FetchError::Fatal("no X-Database-MD5 header found".to_string()))?
        .to_string();
    let modified_at = response
        .header("Last-Modified")
        .ok_or_else(|| FetchError::Fatal("no Last-Modified header found".to_string()))
        .and_then(parse_last_modified)?;

    Ok(FetchOutcome::Modified(ReadResult {
        edition_id,
        reader: Box::new(GzDecoder::new(response.into_reader())),
        old_hash,
        new_hash,
        modified_at,
    }))
}

fn classify(err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            let detail = match body.trim() {
                "" => format!("HTTP status {status}"),
                text => format!("HTTP status {status}: {text}"),
            };
            if status >= 500 {
                FetchError::Transient(detail)
            } else {
                FetchError::Fatal(detail)
            }
        }
        ureq::Error::Transport(transport) => FetchError::Transient(transport.to_string()),
    }
}

fn parse_last_modified(value: &str) -> Result<DateTime<Utc>, FetchError> {
    DateTime::parse_from_rfc2822(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| FetchError::Fatal(format!("invalid Last-Modified '{value}': {err}")))
}

fn basic_auth(account_id: u64, license_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{account_id}:{license_key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoupdate_core::ConfigOverrides;

    fn fetcher(url: &str) -> HttpFetcher {
        let contents = format!("AccountID 42\nLicenseKey secret\nEditionIDs GeoIP2-City\nHost {url}\n");
        let config = Config::parse(&contents, &ConfigOverrides::default()).unwrap();
        HttpFetcher::new(&config).unwrap()
    }

    #[test]
    fn update_url_carries_edition_and_known_hash() {
        let url = fetcher("updates.example.com")
            .update_url(&EditionId::from("GeoIP2-City"), "00000000000000000000000000000000");
        assert_eq!(
            url.as_str(),
            "https://updates.example.com/geoip/databases/GeoIP2-City/update?db_md5=00000000000000000000000000000000"
        );
    }

    #[test]
    fn update_url_keeps_base_path() {
        let url = fetcher("http://127.0.0.1:8080/mirror/")
            .update_url(&EditionId::from("GeoLite2-ASN"), "abc");
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/mirror/geoip/databases/GeoLite2-ASN/update?db_md5=abc"
        );
    }

    #[test]
    fn authorization_is_basic_account_and_key() {
        assert_eq!(basic_auth(42, "secret"), "Basic NDI6c2VjcmV0");
    }

    #[test]
    fn http_dates_parse_as_utc() {
        let time = parse_last_modified("Mon, 10 Apr 2023 12:47:31 GMT").unwrap();
        assert_eq!(time.timestamp(), 1_681_130_851);
    }

    #[test]
    fn garbage_last_modified_is_fatal() {
        assert!(matches!(
            parse_last_modified("yesterday"),
            Err(FetchError::Fatal(_))
        ));
    }

    #[test]
    fn server_errors_are_transient_and_client_errors_fatal() {
        let status = |code: u16| {
            let response = ureq::Response::new(code, "status", "").unwrap();
            classify(ureq::Error::Status(code, response))
        };
        assert!(matches!(status(500), FetchError::Transient(_)));
        assert!(matches!(status(503), FetchError::Transient(_)));
        assert!(matches!(status(401), FetchError::Fatal(_)));
        assert!(matches!(status(403), FetchError::Fatal(_)));
        assert!(matches!(status(404), FetchError::Fatal(_)));
    }
}
