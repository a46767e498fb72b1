//! Domain types shared by the writer, the runner and the CLI.

use std::fmt;

use serde::{Deserialize, Serialize};

/// MD5 reported for an edition that has no local database file yet.
pub const ZERO_MD5: &str = "00000000000000000000000000000000";

/// File extension of an installed database.
pub const DATABASE_EXTENSION: &str = "mmdb";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for one database edition (e.g. `GeoLite2-City`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditionId(pub String);

impl EditionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<edition>.mmdb` — the file name this edition is installed under.
    pub fn file_name(&self) -> String {
        format!("{}.{DATABASE_EXTENSION}", self.0)
    }
}

impl fmt::Display for EditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EditionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EditionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_appends_mmdb_extension() {
        assert_eq!(EditionId::from("GeoIP2-City").file_name(), "GeoIP2-City.mmdb");
    }

    #[test]
    fn editions_sort_by_identifier() {
        let mut ids = vec![
            EditionId::from("GeoLite2-Country"),
            EditionId::from("GeoIP2-City"),
            EditionId::from("GeoLite2-ASN"),
        ];
        ids.sort();
        let names: Vec<_> = ids.iter().map(EditionId::as_str).collect();
        assert_eq!(names, ["GeoIP2-City", "GeoLite2-ASN", "GeoLite2-Country"]);
    }

    #[test]
    fn zero_md5_is_32_hex_zeroes() {
        assert_eq!(ZERO_MD5.len(), 32);
        assert!(ZERO_MD5.chars().all(|c| c == '0'));
    }
}
