//! Queue position endpoints
//!
//! GET /queue returns a one-off position; GET /queue/subscribe streams the
//! position (or the whole order) as it changes.

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use mdsync_common::events::{QueueOrderView, QueuePosition, QueueSnapshot};
use mdsync_common::sse::{json_event, keep_alive, HEARTBEAT_INTERVAL};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{api::parse_session_id, error::ApiResult, services::QueueTracker, AppState};

/// SSE event name for queue updates
const QUEUE_EVENT: &str = "queue";

#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    pub session_id: Option<String>,
}

/// What one subscriber sees of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueueView {
    Position(QueuePosition),
    Order(QueueOrderView),
}

impl QueueView {
    pub fn of(snapshot: &QueueSnapshot, session_id: Option<&Uuid>) -> Self {
        match session_id {
            Some(id) => QueueView::Position(snapshot.position_view(Some(id))),
            None => QueueView::Order(snapshot.order_view()),
        }
    }
}

/// GET /queue?session_id=
///
/// Position 0 means the session has no pending job.
pub async fn queue_position(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Json<QueuePosition>> {
    let session_id = parse_session_id(query.session_id.as_deref())?;
    Ok(Json(
        state.tracker().snapshot().position_view(session_id.as_ref()),
    ))
}

/// Views of the queue for one subscriber
///
/// Yields the current view immediately, then one view per broadcast. The
/// tracker is re-read on every heartbeat so an update dropped from a full
/// mailbox is recovered; a resync only yields when the view changed.
pub fn queue_views(
    tracker: QueueTracker,
    session_id: Option<Uuid>,
) -> impl Stream<Item = QueueView> {
    let mut rx = tracker.subscribe();

    async_stream::stream! {
        let mut last = QueueView::of(&tracker.snapshot(), session_id.as_ref());
        yield last.clone();

        let mut resync = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );

        loop {
            let (view, broadcast) = tokio::select! {
                received = rx.recv() => match received {
                    Some(snapshot) => (QueueView::of(&snapshot, session_id.as_ref()), true),
                    None => break,
                },
                _ = resync.tick() => (QueueView::of(&tracker.snapshot(), session_id.as_ref()), false),
            };

            if broadcast || view != last {
                yield view.clone();
                last = view;
            }
        }

        debug!(session_id = ?session_id, "Queue subscriber stream ended");
    }
}

/// GET /queue/subscribe?session_id=
///
/// Without a session, subscribers see the whole pending order.
pub async fn queue_subscribe(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session_id = parse_session_id(query.session_id.as_deref())?;
    info!(session_id = ?session_id, "Queue subscriber connected");

    let events = queue_views(state.tracker().clone(), session_id).filter_map(|view| async move {
        json_event(QUEUE_EVENT, &view).map(Ok::<_, Infallible>)
    });

    Ok(Sse::new(events).keep_alive(keep_alive()))
}

pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/queue", get(queue_position))
        .route("/queue/subscribe", get(queue_subscribe))
}
