//! Remote catalog collaborator interface
//!
//! The reconciliation pipeline talks to the remote catalog only through
//! [`RemoteClient`]. Production uses [`super::MangaDexClient`]; tests plug in
//! scripted implementations.

use crate::reconcile::{CatalogRecord, ImportEntry, MatchInfo, RecordId};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Remote account credentials (OAuth password grant)
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    /// Names of required fields that are blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("username", &self.username),
            ("password", &self.password),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Result of searching the remote catalog for still-unmatched entries
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Records found (and followed, unless dry-run) by search
    pub new_matches: Vec<(RecordId, MatchInfo)>,
    pub still_unmatched: Vec<ImportEntry>,
}

/// Remote service errors
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials rejected or token expired (401/403)
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response or `result: "error"` envelope
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Remote rate limit hit (429)
    #[error("Rate limited by remote service")]
    RateLimited,

    /// Resource does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

/// Operations the reconciliation pipeline needs from the remote catalog
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Obtain an access token for subsequent calls
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), RemoteError>;

    /// Every record the authenticated user follows
    async fn fetch_all_followed(&self) -> Result<Vec<CatalogRecord>, RemoteError>;

    /// Search for each entry in order; follow the match when `follow` is set
    async fn search_and_follow(
        &self,
        entries: &[ImportEntry],
        follow: bool,
    ) -> Result<SearchOutcome, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields() {
        let creds = Credentials {
            username: "reader".into(),
            password: " ".into(),
            client_id: "personal-client".into(),
            client_secret: String::new(),
        };
        assert_eq!(creds.missing_fields(), vec!["password", "client_secret"]);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials {
            username: "reader".into(),
            password: "hunter2".into(),
            client_id: "id".into(),
            client_secret: "s3cret".into(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("reader"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("s3cret"));
    }
}
