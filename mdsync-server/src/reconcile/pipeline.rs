//! Follow job pipeline
//!
//! Reads the uploaded list, fetches the user's followed records, runs
//! direct then fuzzy matching, and searches the remote catalog for whatever
//! is left. Progress is reported through the session; failures are returned
//! as [`SyncError`] and turned into a terminal event by the worker.

use super::matcher::{match_direct, match_fuzzy};
use super::types::{ImportEntry, MatchType};
use crate::parsers::{self, ParseError};
use crate::services::remote_client::{Credentials, RemoteError};
use crate::services::session_manager::UserSession;
use mdsync_common::events::ProgressUpdate;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Failures of a running follow job
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to read import list: {0}")]
    Input(#[from] ParseError),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Remote service error: {0}")]
    Remote(RemoteError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Auth(msg) => SyncError::Auth(msg),
            other => SyncError::Remote(other),
        }
    }
}

impl SyncError {
    /// Failure category carried in the terminal event payload
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::Input(_) => "input",
            SyncError::Auth(_) => "auth",
            SyncError::Remote(_) => "remote",
            SyncError::Cancelled => "cancelled",
            SyncError::TimedOut(_) => "timeout",
        }
    }

    /// Terminal progress event describing this failure
    pub fn to_progress(&self) -> ProgressUpdate {
        ProgressUpdate::error(self.to_string()).with_payload(json!({ "reason": self.reason() }))
    }
}

/// Parameters of one follow job
#[derive(Debug, Clone)]
pub struct FollowRequest {
    pub credentials: Credentials,
    /// Raw uploaded list
    pub data: Vec<u8>,
    /// Uploaded filename; its extension selects the decoder
    pub filename: String,
    /// Match search results without following them
    pub dry_run: bool,
}

/// Counts reported with the `complete` event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FollowSummary {
    pub direct_matches: usize,
    pub fuzzy_matches: usize,
    pub new_matches: usize,
    pub still_unmatched: usize,
}

fn ensure_active(session: &UserSession) -> Result<(), SyncError> {
    if session.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run a follow job against `session`'s remote client
pub async fn run_follow(
    session: &UserSession,
    request: &FollowRequest,
) -> Result<FollowSummary, SyncError> {
    ensure_active(session)?;

    session.send_progress(ProgressUpdate::info("Reading import list..."));
    let titles = parsers::parse_titles(&request.data, &request.filename)?;
    let entries = ImportEntry::from_titles(titles);
    session.send_progress(
        ProgressUpdate::info(format!("Read {} titles", entries.len()))
            .with_payload(json!({ "count": entries.len() })),
    );

    ensure_active(session)?;
    session.send_progress(ProgressUpdate::info("Authenticating..."));
    session.client.authenticate(&request.credentials).await?;

    session.send_progress(ProgressUpdate::info("Fetching followed titles..."));
    let followed = session.client.fetch_all_followed().await?;
    session.send_progress(
        ProgressUpdate::info(format!("Fetched {} followed titles", followed.len()))
            .with_payload(json!({ "count": followed.len() })),
    );

    ensure_active(session)?;
    session.send_progress(ProgressUpdate::info("Matching titles..."));
    let direct = match_direct(&followed, &entries);
    let direct_matches = direct.matches.len();
    session.send_progress(
        ProgressUpdate::progress(format!("Matched {} titles directly", direct_matches))
            .with_payload(json!({ "direct_matches": direct_matches })),
    );

    let fuzzy = match_fuzzy(&direct);
    let fuzzy_matches = fuzzy.count(MatchType::Fuzzy);
    session.send_progress(
        ProgressUpdate::progress(format!("Fuzzy matched {} titles", fuzzy_matches))
            .with_payload(json!({ "fuzzy_matches": fuzzy_matches })),
    );

    ensure_active(session)?;
    let (new_matches, still_unmatched) = if fuzzy.unmatched_imports.is_empty() {
        (0, 0)
    } else {
        session.send_progress(ProgressUpdate::info(format!(
            "Searching for {} unmatched titles...",
            fuzzy.unmatched_imports.len()
        )));
        let outcome = session
            .client
            .search_and_follow(&fuzzy.unmatched_imports, !request.dry_run)
            .await?;
        (outcome.new_matches.len(), outcome.still_unmatched.len())
    };

    let summary = FollowSummary {
        direct_matches,
        fuzzy_matches,
        new_matches,
        still_unmatched,
    };
    info!(
        session_id = %session.id,
        direct_matches,
        fuzzy_matches,
        new_matches,
        still_unmatched,
        dry_run = request.dry_run,
        "Follow job finished"
    );

    session.send_progress(
        ProgressUpdate::complete("Operation completed").with_payload(json!(summary)),
    );
    Ok(summary)
}
