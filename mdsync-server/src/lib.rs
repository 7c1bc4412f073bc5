//! mdsync-server library interface
//!
//! Exposes the reconciliation engine, services and router for the binary
//! and for integration testing.

pub mod api;
pub mod error;
pub mod parsers;
pub mod reconcile;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use mdsync_common::config::ServiceConfig;
use services::{ClientFactory, JobQueue, JobWorker, QueueTracker, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Live sessions keyed by identity
    pub sessions: Arc<SessionManager>,
    /// Producer side of the job queue
    pub queue: JobQueue,
    pub config: Arc<ServiceConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn tracker(&self) -> &QueueTracker {
        self.queue.tracker()
    }
}

/// Handler state plus the background tasks serving it
pub struct Services {
    pub state: AppState,
    pub worker: JoinHandle<()>,
    pub sweeper: JoinHandle<()>,
}

/// Create shared state and spawn the job worker and stale-session sweeper
///
/// Both tasks stop when `shutdown` is cancelled.
pub fn start_services(
    config: ServiceConfig,
    client_factory: ClientFactory,
    shutdown: CancellationToken,
) -> Services {
    let sessions = Arc::new(SessionManager::new(
        client_factory,
        config.sessions.progress_capacity,
    ));
    let tracker = QueueTracker::new();
    let (queue, rx) = JobQueue::new(config.queue.capacity, tracker.clone());

    let worker = JobWorker::new(
        rx,
        tracker,
        sessions.clone(),
        config.sessions.operation_timeout(),
    )
    .spawn(shutdown.clone());

    let sweeper = spawn_stale_sweeper(
        sessions.clone(),
        config.sessions.max_age(),
        config.sessions.cleanup_interval(),
        shutdown,
    );

    Services {
        state: AppState {
            sessions,
            queue,
            config: Arc::new(config),
            startup_time: Utc::now(),
        },
        worker,
        sweeper,
    }
}

fn spawn_stale_sweeper(
    sessions: Arc<SessionManager>,
    max_age: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = sessions.cleanup_stale(max_age).await;
                    if removed > 0 {
                        info!(removed, "Stale sessions swept");
                    }
                }
            }
        }
    })
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let static_assets = state.config.static_assets.clone();
    let max_upload_bytes = state.config.max_upload_bytes;

    let router = Router::new()
        .merge(api::follow_routes(max_upload_bytes))
        .merge(api::progress_routes())
        .merge(api::cancel_routes())
        .merge(api::queue_routes())
        .merge(api::health_routes())
        .with_state(state);

    let router = match static_assets {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
