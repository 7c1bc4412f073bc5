//! Event types shared by the mdsync services
//!
//! Progress updates are produced by the reconciliation worker and streamed to
//! exactly one listener per session. Queue views are broadcast to every queue
//! subscriber whenever queue membership changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Kind of a progress update
///
/// `Error` and `Complete` are terminal: a session produces nothing after
/// either of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    /// Informational status line
    Info,
    /// Measurable advancement (match counts etc.)
    Progress,
    /// Terminal failure
    Error,
    /// Terminal success
    Complete,
}

impl ProgressKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressKind::Error | ProgressKind::Complete)
    }

    /// SSE event name for this kind
    pub fn event_type(self) -> &'static str {
        match self {
            ProgressKind::Info => "info",
            ProgressKind::Progress => "progress",
            ProgressKind::Error => "error",
            ProgressKind::Complete => "complete",
        }
    }
}

/// One unit of a session's ordered status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub kind: ProgressKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ProgressUpdate {
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ProgressKind::Info, message)
    }

    pub fn progress(message: impl Into<String>) -> Self {
        Self::new(ProgressKind::Progress, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ProgressKind::Error, message)
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(ProgressKind::Complete, message)
    }

    /// Terminal error raised when a session is cancelled or evicted
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::error(message).with_payload(serde_json::json!({ "reason": "cancelled" }))
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Snapshot of the pending-job order at one instant
///
/// Shared between subscribers; never partially updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    order: Arc<[Uuid]>,
}

impl Default for QueueSnapshot {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl QueueSnapshot {
    pub fn new(order: Vec<Uuid>) -> Self {
        Self {
            order: order.into(),
        }
    }

    /// 1-based position of `session_id`, 0 if not queued
    pub fn position(&self, session_id: &Uuid) -> usize {
        self.order
            .iter()
            .position(|id| id == session_id)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[Uuid] {
        &self.order
    }
}

/// Queue status as seen by one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub position: usize,
    pub queued: usize,
}

/// Full queue order, sent to subscribers that did not name a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOrderView {
    #[serde(rename = "queueOrder")]
    pub queue_order: Vec<Uuid>,
    pub queued: usize,
}

impl QueueSnapshot {
    pub fn position_view(&self, session_id: Option<&Uuid>) -> QueuePosition {
        QueuePosition {
            position: session_id.map(|id| self.position(id)).unwrap_or(0),
            queued: self.len(),
        }
    }

    pub fn order_view(&self) -> QueueOrderView {
        QueueOrderView {
            queue_order: self.order.to_vec(),
            queued: self.len(),
        }
    }
}
