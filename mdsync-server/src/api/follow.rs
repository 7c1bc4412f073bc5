//! POST /follow
//!
//! Accepts a multipart upload of a tracker export plus remote credentials,
//! creates the user's session and enqueues a follow job. Everything that can
//! be rejected synchronously is rejected here; later failures arrive on the
//! progress stream.

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    parsers::ListFormat,
    reconcile::FollowRequest,
    services::{Credentials, EnqueueError, Job, QueuedJob},
    AppState,
};

/// Multipart field carrying the uploaded list
pub const LIST_FIELD: &str = "manga_list";

/// POST /follow response
#[derive(Debug, Serialize)]
pub struct FollowResponse {
    #[serde(rename = "sessionID")]
    pub session_id: Uuid,
    pub identity: String,
    pub status: &'static str,
    /// 1-based queue position at enqueue time
    pub position: usize,
}

#[derive(Default)]
struct FollowForm {
    user_id: String,
    credentials: Credentials,
    filename: Option<String>,
    data: Option<Vec<u8>>,
    dry_run: bool,
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Length-limit failures become 413, everything else 400
fn multipart_error(context: &str, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("{}: {}", context, err.body_text()))
    } else {
        ApiError::BadRequest(format!("{}: {}", context, err.body_text()))
    }
}

async fn field_text(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map(|text| text.trim().to_string())
        .map_err(|e| multipart_error("Invalid form field", e))
}

async fn read_form(multipart: &mut Multipart) -> ApiResult<FollowForm> {
    let mut form = FollowForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Invalid multipart body", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            LIST_FIELD => {
                form.filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error("Failed to read upload", e))?;
                form.data = Some(bytes.to_vec());
            }
            "user_id" => form.user_id = field_text(field).await?,
            "username" => form.credentials.username = field_text(field).await?,
            "password" => form.credentials.password = field_text(field).await?,
            "client_id" => form.credentials.client_id = field_text(field).await?,
            "client_secret" => form.credentials.client_secret = field_text(field).await?,
            "dry_run" => form.dry_run = parse_flag(&field_text(field).await?),
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

/// Check the form and turn it into a job request
fn validate(form: FollowForm) -> ApiResult<(String, FollowRequest)> {
    if form.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }

    let missing = form.credentials.missing_fields();
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Missing credentials: {}",
            missing.join(", ")
        )));
    }

    let (Some(data), Some(filename)) = (form.data, form.filename) else {
        return Err(ApiError::BadRequest(format!(
            "A file upload named '{}' is required",
            LIST_FIELD
        )));
    };
    ListFormat::from_filename(&filename).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok((
        form.user_id,
        FollowRequest {
            credentials: form.credentials,
            data,
            filename,
            dry_run: form.dry_run,
        },
    ))
}

/// POST /follow
pub async fn start_follow(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<FollowResponse>> {
    let (identity, request) = validate(read_form(&mut multipart).await?)?;

    if state.tracker().size() >= state.queue.capacity() {
        warn!(identity = %identity, "Follow rejected: job queue full");
        return Err(ApiError::Busy("Job queue is full, try again later".to_string()));
    }

    let created = state.sessions.create(&identity).await;
    if let Some(old) = &created.replaced {
        state.tracker().remove(&old.id);
    }
    let session = created.session;

    let queued = QueuedJob {
        session: session.clone(),
        job: Job::Follow(request),
    };
    let position = match state.queue.enqueue(queued) {
        Ok(position) => position,
        Err(e) => {
            state.sessions.remove_by_id(session.id).await;
            return Err(match e {
                EnqueueError::Busy => {
                    ApiError::Busy("Job queue is full, try again later".to_string())
                }
                EnqueueError::Closed => ApiError::Internal(e.to_string()),
            });
        }
    };

    info!(
        identity = %identity,
        session_id = %session.id,
        position,
        "Follow job queued"
    );

    Ok(Json(FollowResponse {
        session_id: session.id,
        identity,
        status: "queued",
        position,
    }))
}

/// Build follow routes, accepting bodies up to `max_upload_bytes`
pub fn follow_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new().route(
        "/follow",
        post(start_follow).layer(DefaultBodyLimit::max(max_upload_bytes)),
    )
}
