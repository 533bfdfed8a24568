use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Feed author handle (screen name, without the leading `@`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorId(pub String);

impl AuthorId {
    pub fn new(handle: impl Into<String>) -> Self {
        let handle = handle.into();
        Self(handle.trim_start_matches('@').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable ledger key: SHA-256 hex of the lowercased handle.
    ///
    /// Handles are case-insensitive on the feed, so `PetaJKT` and `petajkt`
    /// map to the same record.
    pub fn ledger_key(&self) -> String {
        let digest = Sha256::digest(self.0.to_lowercase().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Point geometry as delivered by the feed: longitude first.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinates {
    /// `"lon lat"`, the form the report tables expect inside `POINT(...)`.
    pub fn to_point_text(self) -> String {
        format!("{} {}", self.lon, self.lat)
    }
}

/// Structured entities passed through to the report tables untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub hashtags: Value,
    #[serde(default)]
    pub urls: Value,
    #[serde(default)]
    pub user_mentions: Value,
}

/// A single feed message. Immutable once received.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub author: AuthorId,
    pub author_location: Option<String>,
    pub text: String,
    pub language: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub place: Option<String>,
    /// Source-native timestamp (e.g. `Wed Aug 12 00:42:51 -0100 2015`).
    pub created_at: String,
    pub entities: Entities,
}
