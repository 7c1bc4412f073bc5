//! Progress delivery to a single listener
//!
//! Forwards a session's progress updates in production order until a
//! terminal update, channel closure, or listener disconnect (the stream is
//! dropped, releasing the channel for a later listener).

use crate::services::session_manager::ProgressReceiver;
use axum::response::sse::Event;
use futures::stream::Stream;
use mdsync_common::events::ProgressUpdate;
use mdsync_common::sse::json_event;
use std::convert::Infallible;
use tracing::debug;
use uuid::Uuid;

/// Raw update stream ending after the first terminal update
pub fn progress_updates(receiver: ProgressReceiver) -> impl Stream<Item = ProgressUpdate> {
    async_stream::stream! {
        let mut rx = receiver;
        while let Some(update) = rx.recv().await {
            let terminal = update.is_terminal();
            yield update;
            if terminal {
                break;
            }
        }
    }
}

/// SSE rendering of [`progress_updates`]
pub fn progress_events(
    session_id: Uuid,
    receiver: ProgressReceiver,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        debug!(session_id = %session_id, "SSE: Progress stream started");

        let updates = progress_updates(receiver);
        futures::pin_mut!(updates);
        while let Some(update) = futures::StreamExt::next(&mut updates).await {
            if let Some(event) = json_event(update.kind.event_type(), &update) {
                yield Ok(event);
            }
        }

        debug!(session_id = %session_id, "SSE: Progress stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_manager::tests::NullClient;
    use crate::services::session_manager::UserSession;
    use futures::StreamExt;
    use mdsync_common::events::ProgressKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stream_ends_on_terminal_update() {
        let session = UserSession::new("alice", Arc::new(NullClient), 8);
        session.send_progress(ProgressUpdate::info("one"));
        session.send_progress(ProgressUpdate::progress("two"));
        session.send_progress(ProgressUpdate::complete("done"));

        let updates: Vec<_> = progress_updates(session.attach_listener().unwrap())
            .collect()
            .await;

        let kinds: Vec<_> = updates.iter().map(|u| u.kind).collect();
        assert_eq!(
            kinds,
            vec![ProgressKind::Info, ProgressKind::Progress, ProgressKind::Complete]
        );
    }

    #[tokio::test]
    async fn test_stream_ends_on_close() {
        let session = UserSession::new("bob", Arc::new(NullClient), 8);
        session.send_progress(ProgressUpdate::info("working"));
        session.close("Operation cancelled");

        let updates: Vec<_> = progress_updates(session.attach_listener().unwrap())
            .collect()
            .await;

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].payload.as_ref().unwrap()["reason"], "cancelled");
    }

    #[tokio::test]
    async fn test_dropped_listener_releases_channel() {
        let session = UserSession::new("carol", Arc::new(NullClient), 8);
        session.send_progress(ProgressUpdate::info("first"));

        {
            let stream = progress_updates(session.attach_listener().unwrap());
            futures::pin_mut!(stream);
            assert_eq!(stream.next().await.unwrap().message, "first");
            assert!(session.attach_listener().is_none());
        }

        session.send_progress(ProgressUpdate::complete("done"));
        let rest: Vec<_> = progress_updates(session.attach_listener().unwrap())
            .collect()
            .await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].kind, ProgressKind::Complete);
    }
}
