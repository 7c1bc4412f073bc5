//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE helpers for the progress and queue streams.

use axum::response::sse::{Event, KeepAlive};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Interval between keep-alive comments on every SSE stream
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Keep-alive configuration used by all mdsync SSE endpoints
pub fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(HEARTBEAT_INTERVAL)
        .text("heartbeat")
}

/// Serialize `payload` as the data of an SSE event named `event_type`
///
/// Returns `None` (and logs) if serialization fails, so a single bad payload
/// never tears down a stream.
pub fn json_event<T: Serialize>(event_type: &str, payload: &T) -> Option<Event> {
    match serde_json::to_string(payload) {
        Ok(data) => Some(Event::default().event(event_type).data(data)),
        Err(e) => {
            warn!("SSE: Failed to serialize {} event: {}", event_type, e);
            None
        }
    }
}
