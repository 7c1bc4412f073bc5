//! GET /progress - SSE stream of one session's progress updates

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use tracing::info;

use crate::{
    api::SessionQuery,
    error::{ApiError, ApiResult},
    services::progress_events,
    AppState,
};

/// GET /progress?session_id=|user_id=
///
/// Streams `info`, `progress`, `error` and `complete` events and ends after
/// the first terminal one. Only one listener may be attached at a time.
pub async fn progress_stream(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = query.resolve(&state.sessions).await?;
    let receiver = session.attach_listener().ok_or_else(|| {
        ApiError::Conflict("A progress listener is already attached".to_string())
    })?;

    info!(session_id = %session.id, identity = %session.identity, "Progress listener attached");

    Ok(Sse::new(progress_events(session.id, receiver)).keep_alive(mdsync_common::sse::keep_alive()))
}

pub fn progress_routes() -> Router<AppState> {
    Router::new().route("/progress", get(progress_stream))
}
