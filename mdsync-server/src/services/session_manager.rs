//! Per-user sessions
//!
//! A session is one user's in-flight operation: a cancellation token, a
//! bounded progress channel and a remote client handle. At most one session
//! exists per identity.
//!
//! Closing a session cancels it first and only then drops the progress
//! sender. The sender lives behind a mutex so closing happens at most once
//! and a worker can never send after close.

use crate::services::remote_client::RemoteClient;
use chrono::{DateTime, Utc};
use mdsync_common::events::ProgressUpdate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds a fresh remote client for each new session
pub type ClientFactory = Arc<dyn Fn() -> Arc<dyn RemoteClient> + Send + Sync>;

/// Exclusive read access to a session's progress channel
pub type ProgressReceiver = OwnedMutexGuard<mpsc::Receiver<ProgressUpdate>>;

struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressUpdate>>,
    /// Set once a terminal update has been sent or dropped
    finished: bool,
}

/// One user's in-flight operation
pub struct UserSession {
    pub id: Uuid,
    pub identity: String,
    pub client: Arc<dyn RemoteClient>,
    pub cancel: CancellationToken,
    pub created_at: DateTime<Utc>,
    started: Instant,
    sender: Mutex<ProgressSender>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ProgressUpdate>>>,
}

impl UserSession {
    pub fn new(identity: &str, client: Arc<dyn RemoteClient>, progress_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(progress_capacity.max(1));
        Self {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            client,
            cancel: CancellationToken::new(),
            created_at: Utc::now(),
            started: Instant::now(),
            sender: Mutex::new(ProgressSender {
                tx: Some(tx),
                finished: false,
            }),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Time since the session was created
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Best-effort progress delivery
    ///
    /// Never blocks. Returns `false` if the update was dropped: channel full,
    /// session closed, or a terminal update was already sent.
    pub fn send_progress(&self, update: ProgressUpdate) -> bool {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.finished {
            return false;
        }
        // A terminal update ends the job even when the channel drops it
        if update.is_terminal() {
            sender.finished = true;
        }
        let Some(tx) = sender.tx.as_ref() else {
            return false;
        };

        match tx.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    session_id = %self.id,
                    kind = ?dropped.kind,
                    "Progress channel full, dropping update"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Attach the single progress listener
    ///
    /// Returns `None` while another listener holds the channel.
    pub fn attach_listener(&self) -> Option<ProgressReceiver> {
        self.receiver.clone().try_lock_owned().ok()
    }

    /// Cancel, emit a cancellation event if still running, close the channel
    pub fn close(&self, reason: &str) {
        self.cancel.cancel();

        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.tx.take() else {
            return;
        };
        if !sender.finished {
            sender.finished = true;
            let _ = tx.try_send(ProgressUpdate::cancelled(reason));
        }
        debug!(session_id = %self.id, reason, "Progress channel closed");
    }
}

/// Registry of live sessions keyed by identity
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<UserSession>>>,
    client_factory: ClientFactory,
    progress_capacity: usize,
}

/// A newly created session and the one it replaced, if any
pub struct CreatedSession {
    pub session: Arc<UserSession>,
    pub replaced: Option<Arc<UserSession>>,
}

impl SessionManager {
    pub fn new(client_factory: ClientFactory, progress_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            client_factory,
            progress_capacity,
        }
    }

    /// Create a session for `identity`, closing any previous one first
    pub async fn create(&self, identity: &str) -> CreatedSession {
        let session = Arc::new(UserSession::new(
            identity,
            (self.client_factory)(),
            self.progress_capacity,
        ));

        let mut sessions = self.sessions.write().await;
        let replaced = sessions.remove(identity);
        if let Some(old) = &replaced {
            old.close("Replaced by a newer request");
            info!(
                identity,
                old_session = %old.id,
                new_session = %session.id,
                "Replaced existing session"
            );
        }
        sessions.insert(identity.to_string(), session.clone());
        info!(identity, session_id = %session.id, "Session created");

        CreatedSession { session, replaced }
    }

    pub async fn get(&self, identity: &str) -> Option<Arc<UserSession>> {
        self.sessions.read().await.get(identity).cloned()
    }

    pub async fn get_by_id(&self, session_id: Uuid) -> Option<Arc<UserSession>> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.id == session_id)
            .cloned()
    }

    /// Close and forget the session held by `identity`
    pub async fn remove(&self, identity: &str) -> Option<Arc<UserSession>> {
        let removed = self.sessions.write().await.remove(identity);
        if let Some(session) = &removed {
            session.close("Operation cancelled");
            info!(identity, session_id = %session.id, "Session removed");
        }
        removed
    }

    /// Close and forget the session with `session_id`
    ///
    /// A newer session under the same identity is left alone.
    pub async fn remove_by_id(&self, session_id: Uuid) -> Option<Arc<UserSession>> {
        let mut sessions = self.sessions.write().await;
        let identity = sessions
            .iter()
            .find(|(_, s)| s.id == session_id)
            .map(|(identity, _)| identity.clone())?;
        let session = sessions.remove(&identity)?;
        drop(sessions);

        session.close("Operation cancelled");
        info!(identity = %session.identity, session_id = %session.id, "Session removed");
        Some(session)
    }

    /// Remove every session older than `max_age`, returning how many
    pub async fn cleanup_stale(&self, max_age: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.age() > max_age)
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &stale {
            if let Some(session) = sessions.remove(identity) {
                session.close("Session expired");
                info!(identity = %identity, session_id = %session.id, "Stale session removed");
            }
        }

        stale.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
