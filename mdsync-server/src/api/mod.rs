//! HTTP API handlers for mdsync-server
//!
//! REST endpoints plus two SSE streams (per-session progress and live queue
//! position).

pub mod cancel;
pub mod follow;
pub mod health;
pub mod progress;
pub mod queue;

pub use cancel::cancel_routes;
pub use follow::follow_routes;
pub use health::health_routes;
pub use progress::progress_routes;
pub use queue::queue_routes;

use crate::error::{ApiError, ApiResult};
use crate::services::{SessionManager, UserSession};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Parse an optional `session_id` query value
///
/// Blank counts as absent; anything else must be a UUID.
pub fn parse_session_id(raw: Option<&str>) -> ApiResult<Option<Uuid>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => Uuid::parse_str(value)
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Invalid session_id: {}", value))),
    }
}

/// Session selector accepted by lookup endpoints
///
/// `session_id` wins when both are given.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl SessionQuery {
    pub async fn resolve(&self, sessions: &SessionManager) -> ApiResult<Arc<UserSession>> {
        let session_id = parse_session_id(self.session_id.as_deref())?;
        let session = match (session_id, self.user_id.as_deref()) {
            (Some(session_id), _) => sessions.get_by_id(session_id).await,
            (None, Some(identity)) if !identity.trim().is_empty() => {
                sessions.get(identity.trim()).await
            }
            _ => {
                return Err(ApiError::BadRequest(
                    "session_id or user_id is required".to_string(),
                ))
            }
        };

        session.ok_or_else(|| ApiError::NotFound("No active session".to_string()))
    }
}
