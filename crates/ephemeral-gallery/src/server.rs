//! HTTP server for the gallery
//!
//! Provides /health, /api/images, /upload and /uploads/{filename}.

use crate::error::AppError;
use crate::types::{HealthResponse, UploadResponse};
use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use ephemeral_store::{
    content_type_for, FileAbsence, ImageStore, Record, Submission, UploadedFile, ValidationError,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub store: ImageStore,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(store: ImageStore) -> Self {
        Self {
            store,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/images", get(list_images))
        .route("/upload", post(upload))
        .route("/uploads/{filename}", get(get_upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, returning once `shutdown` resolves and in-flight
/// requests have finished
pub async fn start_server(
    state: SharedState,
    port: u16,
    max_upload_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state, max_upload_bytes);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let stats = state.store.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        images: stats.images,
        capacity: stats.capacity,
    })
}

/// All current images, oldest first
async fn list_images(State(state): State<SharedState>) -> Json<Vec<Record>> {
    Json(state.store.list().await)
}

/// Accept a multipart upload with an `image` file and optional `comment`
///
/// A request that is not `multipart/form-data` carries no file at all.
async fn upload(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let multipart = multipart.map_err(|rejection| {
        debug!(reason = %rejection.body_text(), "Upload is not multipart");
        AppError::Validation(ValidationError::MissingFile(FileAbsence::NotInRequest))
    })?;
    let submission = read_submission(multipart).await?;
    let record = state.store.submit(submission).await.map_err(|e| {
        let err = AppError::from(e);
        if let AppError::Validation(reason) = &err {
            debug!(reason = %reason, "Rejected upload");
        }
        err
    })?;

    debug!(filename = %record.filename, "Upload stored");
    Ok(Json(UploadResponse::ok()))
}

/// Collect the form fields relevant to a submission
///
/// The first `image` field carrying a `filename` attribute is the file. An
/// `image` field without one is a plain form value and is ignored.
async fn read_submission(mut multipart: Multipart) -> Result<Submission, AppError> {
    let mut submission = Submission::default();

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("image") if submission.file.is_none() => {
                let Some(filename) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let data = field.bytes().await?;
                submission.file = Some(UploadedFile {
                    filename,
                    data: data.to_vec(),
                });
            }
            Some("comment") if submission.comment.is_none() => {
                submission.comment = Some(field.text().await?);
            }
            _ => {}
        }
    }

    Ok(submission)
}

/// Serve a stored image
async fn get_upload(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let data = match state.store.blobs().read(&filename).await {
        Ok(Some(data)) => data,
        Ok(None) => return Err(AppError::NotFound),
        Err(e) => {
            warn!(filename = %filename, error = %e, "Failed to read upload");
            return Err(AppError::NotFound);
        }
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type_for(&filename))],
        Body::from(data),
    )
        .into_response())
}
