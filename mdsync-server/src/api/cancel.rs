//! POST /cancel

use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{api::SessionQuery, error::ApiResult, AppState};

/// POST /cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
    #[serde(rename = "sessionID")]
    pub session_id: Uuid,
}

/// POST /cancel?session_id=|user_id=
///
/// Drops the session's queue entry and tears the session down. A running
/// job observes the cancellation and stops.
pub async fn cancel_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<CancelResponse>> {
    let session = query.resolve(&state.sessions).await?;

    let was_queued = state.tracker().remove(&session.id);
    state.sessions.remove_by_id(session.id).await;

    info!(
        session_id = %session.id,
        identity = %session.identity,
        was_queued,
        "Session cancelled"
    );

    Ok(Json(CancelResponse {
        status: "cancelled",
        session_id: session.id,
    }))
}

pub fn cancel_routes() -> Router<AppState> {
    Router::new().route("/cancel", post(cancel_session))
}
