//! Queue order tracking
//!
//! Mirrors job queue membership as an ordered list of session ids and
//! broadcasts a fresh [`QueueSnapshot`] on every change. The lock is internal;
//! callers only see atomic operations.

use mdsync_common::events::QueueSnapshot;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Mailbox size per subscriber; a full mailbox drops the update
pub const SUBSCRIBER_MAILBOX: usize = 4;

#[derive(Default)]
struct TrackerState {
    order: VecDeque<Uuid>,
    subscribers: Vec<mpsc::Sender<QueueSnapshot>>,
}

impl TrackerState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::new(self.order.iter().copied().collect())
    }

    /// Non-blocking fan-out; closed subscribers are pruned
    fn broadcast(&mut self) {
        let snapshot = self.snapshot();
        self.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Queue subscriber mailbox full, dropping update");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Thread-safe pending-job order
#[derive(Clone, Default)]
pub struct QueueTracker {
    inner: Arc<Mutex<TrackerState>>,
}

impl QueueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `session_id` if `admit` succeeds, atomically
    ///
    /// `admit` runs under the tracker lock, so anything it hands to a
    /// consumer cannot be dequeued before the id is recorded.
    pub fn push_with<E>(
        &self,
        session_id: Uuid,
        admit: impl FnOnce() -> Result<(), E>,
    ) -> Result<usize, E> {
        let mut state = self.lock();
        admit()?;
        Ok(Self::append(&mut state, session_id))
    }

    #[cfg(test)]
    pub(crate) fn push(&self, session_id: Uuid) -> usize {
        Self::append(&mut self.lock(), session_id)
    }

    fn append(state: &mut TrackerState, session_id: Uuid) -> usize {
        state.order.push_back(session_id);
        state.broadcast();
        state.order.len()
    }

    /// Remove `session_id`; returns whether it was queued
    pub fn remove(&self, session_id: &Uuid) -> bool {
        let mut state = self.lock();

        let removed = if state.order.front() == Some(session_id) {
            state.order.pop_front().is_some()
        } else if let Some(index) = state.order.iter().position(|id| id == session_id) {
            state.order.remove(index).is_some()
        } else {
            false
        };

        if removed {
            state.broadcast();
        }
        removed
    }

    /// 1-based position of `session_id`, 0 if not queued
    pub fn position(&self, session_id: &Uuid) -> usize {
        self.lock()
            .order
            .iter()
            .position(|id| id == session_id)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn size(&self) -> usize {
        self.lock().order.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.lock().snapshot()
    }

    /// Register a subscriber for order changes
    pub fn subscribe(&self) -> mpsc::Receiver<QueueSnapshot> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_MAILBOX);
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
