//! Bounded job queue and its single worker
//!
//! Exactly one worker drains the queue, so at most one job talks to the
//! rate-limited remote service at a time. Enqueue never blocks: a full queue
//! is reported to the caller immediately.

use crate::reconcile::{run_follow, FollowRequest, SyncError};
use crate::services::queue_tracker::QueueTracker;
use crate::services::session_manager::{SessionManager, UserSession};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Units of work the worker knows how to run
#[derive(Debug, Clone)]
pub enum Job {
    /// Reconcile an uploaded list against the followed records
    Follow(FollowRequest),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Follow(_) => "follow",
        }
    }
}

/// A job bound to the session it reports to
pub struct QueuedJob {
    pub session: Arc<UserSession>,
    pub job: Job,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity
    #[error("Job queue is full")]
    Busy,

    /// Worker has stopped
    #[error("Job queue is closed")]
    Closed,
}

/// Producer side of the job queue
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    tracker: QueueTracker,
    capacity: usize,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` pending jobs
    pub fn new(capacity: usize, tracker: QueueTracker) -> (Self, mpsc::Receiver<QueuedJob>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                tracker,
                capacity,
            },
            rx,
        )
    }

    /// Enqueue without blocking, returning the 1-based queue position
    ///
    /// On failure the queue order is unchanged.
    pub fn enqueue(&self, queued: QueuedJob) -> Result<usize, EnqueueError> {
        let session_id = queued.session.id;
        let kind = queued.job.kind();

        let position = self.tracker.push_with(session_id, || {
            self.tx.try_send(queued).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Busy,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            })
        })?;

        info!(session_id = %session_id, kind, position, "Job enqueued");
        Ok(position)
    }

    pub fn tracker(&self) -> &QueueTracker {
        &self.tracker
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer side: runs jobs one at a time until shutdown
pub struct JobWorker {
    rx: mpsc::Receiver<QueuedJob>,
    tracker: QueueTracker,
    sessions: Arc<SessionManager>,
    operation_timeout: Duration,
}

impl JobWorker {
    pub fn new(
        rx: mpsc::Receiver<QueuedJob>,
        tracker: QueueTracker,
        sessions: Arc<SessionManager>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            tracker,
            sessions,
            operation_timeout,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Job worker started");
        loop {
            let queued = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.process(queued) => {}
            }
        }
        info!("Job worker stopped");
    }

    async fn process(&self, queued: QueuedJob) {
        let QueuedJob { session, job } = queued;
        self.tracker.remove(&session.id);

        if session.is_cancelled() {
            debug!(session_id = %session.id, "Dropping job for cancelled session");
            return;
        }

        info!(session_id = %session.id, identity = %session.identity, kind = job.kind(), "Job started");
        match self.execute(&session, &job).await {
            Ok(()) => info!(session_id = %session.id, "Job completed"),
            Err(e) => {
                warn!(session_id = %session.id, reason = e.reason(), "Job failed: {}", e);
                session.send_progress(e.to_progress());
            }
        }

        self.sessions.remove_by_id(session.id).await;
    }

    /// Run `job`, bounded by session cancellation and the operation timeout
    async fn execute(&self, session: &UserSession, job: &Job) -> Result<(), SyncError> {
        let work = async {
            match job {
                Job::Follow(request) => run_follow(session, request).await.map(|_| ()),
            }
        };

        tokio::select! {
            _ = session.cancel.cancelled() => Err(SyncError::Cancelled),
            outcome = tokio::time::timeout(self.operation_timeout, work) => {
                outcome.unwrap_or(Err(SyncError::TimedOut(self.operation_timeout)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote_client::Credentials;
    use crate::services::session_manager::tests::null_factory;
    use mdsync_common::events::ProgressKind;

    fn follow_job() -> Job {
        Job::Follow(FollowRequest {
            credentials: Credentials::default(),
            data: b"hid,title\n1,Monster\n".to_vec(),
            filename: "list.csv".into(),
            dry_run: false,
        })
    }

    #[tokio::test]
    async fn test_enqueue_beyond_capacity() {
        let sessions = Arc::new(SessionManager::new(null_factory(), 8));
        let tracker = QueueTracker::new();
        let (queue, _rx) = JobQueue::new(2, tracker.clone());

        let mut ids = Vec::new();
        for identity in ["a", "b"] {
            let session = sessions.create(identity).await.session;
            ids.push(session.id);
            queue
                .enqueue(QueuedJob { session, job: follow_job() })
                .unwrap();
        }

        let overflow = sessions.create("c").await.session;
        let result = queue.enqueue(QueuedJob {
            session: overflow.clone(),
            job: follow_job(),
        });

        assert_eq!(result, Err(EnqueueError::Busy));
        assert_eq!(tracker.snapshot().order(), ids.as_slice());
        assert_eq!(tracker.position(&overflow.id), 0);
    }

    #[tokio::test]
    async fn test_worker_runs_job_and_removes_session() {
        let sessions = Arc::new(SessionManager::new(null_factory(), 32));
        let tracker = QueueTracker::new();
        let (queue, rx) = JobQueue::new(4, tracker.clone());
        let shutdown = CancellationToken::new();
        let handle = JobWorker::new(rx, tracker.clone(), sessions.clone(), Duration::from_secs(5))
            .spawn(shutdown.clone());

        let session = sessions.create("alice").await.session;
        let mut progress = session.attach_listener().unwrap();
        queue
            .enqueue(QueuedJob {
                session: session.clone(),
                job: follow_job(),
            })
            .unwrap();

        let mut last = None;
        while let Some(update) = progress.recv().await {
            last = Some(update);
        }
        assert_eq!(last.map(|u| u.kind), Some(ProgressKind::Complete));

        // Channel closes only after the worker removed the session
        assert!(sessions.get_by_id(session.id).await.is_none());
        assert_eq!(tracker.size(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_job_is_dropped() {
        let sessions = Arc::new(SessionManager::new(null_factory(), 8));
        let tracker = QueueTracker::new();
        let (queue, rx) = JobQueue::new(4, tracker.clone());

        let session = sessions.create("bob").await.session;
        queue
            .enqueue(QueuedJob {
                session: session.clone(),
                job: follow_job(),
            })
            .unwrap();
        sessions.remove("bob").await;

        let worker = JobWorker::new(rx, tracker.clone(), sessions.clone(), Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let handle = worker.spawn(shutdown.clone());

        let mut progress = session.attach_listener().unwrap();
        // Only the cancellation event pushed by remove
        let update = progress.recv().await.unwrap();
        assert_eq!(update.payload.unwrap()["reason"], "cancelled");
        assert!(progress.recv().await.is_none());

        // Wait for the worker to drain the queue
        while tracker.size() > 0 {
            tokio::task::yield_now().await;
        }

        shutdown.cancel();
        handle.await.unwrap();
    }
}
