//! Session, queue and remote-catalog services

pub mod job_queue;
pub mod mangadex_client;
pub mod progress_stream;
pub mod queue_tracker;
pub mod remote_client;
pub mod session_manager;

pub use job_queue::{EnqueueError, Job, JobQueue, JobWorker, QueuedJob};
pub use mangadex_client::{MangaDexClient, SearchQuery};
pub use progress_stream::{progress_events, progress_updates};
pub use queue_tracker::QueueTracker;
pub use remote_client::{Credentials, RemoteClient, RemoteError, SearchOutcome};
pub use session_manager::{ClientFactory, CreatedSession, ProgressReceiver, SessionManager, UserSession};
