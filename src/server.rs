// HTTP surface: search/trending catalog, download jobs, cancellation and
// progress streaming
//
// Handlers stay thin; job semantics live in the orchestrator and registry.
// Served media files are deleted once the response body is done with them.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{FormatChoice, JobProgress, MediaSummary};
use crate::downloader::orchestrator::Orchestrator;
use crate::progress::progress_events;
use crate::registry::JobRegistry;

/// Non-standard status for a job the client itself tore down; distinguishes
/// "you cancelled it" from a real failure in access logs and clients.
const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

const LANDING_PAGE: &str = "<html><body>\
<h1>tubefetch</h1>\
<p>Media download service. Endpoints: /search, /trending, /download, \
/cancel, /progress/{client_id}</p>\
</body></html>";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub catalog: Arc<Catalog>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/search", get(search))
        .route("/trending", get(trending))
        .route("/download", post(download))
        .route("/cancel", post(cancel))
        .route("/progress/{client_id}", get(progress))
        .with_state(state)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let status = match err {
            DownloadError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DownloadError::Cancelled => StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListingResponse {
    results: Vec<MediaSummary>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<ListingResponse>> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing query parameter 'q'"))?;

    let results = state
        .catalog
        .search(query)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(ListingResponse { results }))
}

/// Degrades to an empty list on upstream failure so the landing view never
/// breaks over a transient listing error.
async fn trending(State(state): State<AppState>) -> Json<ListingResponse> {
    let results = match state.catalog.trending().await {
        Ok(results) => results,
        Err(err) => {
            warn!(error = %err, "trending listing failed, serving empty set");
            Vec::new()
        }
    };
    Json(ListingResponse { results })
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    url: String,
    client_id: Option<String>,
    format: Option<String>,
}

async fn download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> ApiResult<Response> {
    let session_id = payload
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or("anonymous")
        .to_string();
    let choice = FormatChoice::parse(payload.format.as_deref().unwrap_or("best"));

    let (path, mime) = match state
        .orchestrator
        .run(&payload.url, choice, &session_id)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            // The streamer only sees the registry, so the terminal state has
            // to land there before the error response goes out.
            let terminal = match &err {
                DownloadError::Cancelled => JobProgress::cancelled(),
                other => JobProgress::error(format!("Error: {}", other)),
            };
            state.registry.set_progress(&session_id, terminal);
            if !matches!(err, DownloadError::Cancelled) {
                error!(session = %session_id, error = %err, "download job failed");
            }
            return Err(ApiError::from(err));
        }
    };

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download")
        .replace('"', "_");
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|err| ApiError::internal(format!("opening output file: {}", err)))?;

    info!(session = %session_id, file = %filename, mime, "serving output file");
    let stream = ServedFile::new(file, path, Arc::clone(&state.registry), session_id);
    let mut response = Body::from_stream(stream).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    let disposition = format!("attachment; filename=\"{}\"", filename);
    // A title with non-ASCII characters cannot carry the filename in the
    // header; the attachment marker alone still triggers a save dialog.
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    client_id: Option<String>,
}

/// Sets the cancel flag and returns immediately; the running job notices on
/// its next callback. Idempotent, including for unknown sessions.
async fn cancel(
    State(state): State<AppState>,
    Json(payload): Json<CancelRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let session_id = payload
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing client_id"))?;

    info!(session = %session_id, "cancel requested");
    state.registry.request_cancel(session_id);
    Ok(Json(serde_json::json!({ "status": "cancelled" })))
}

async fn progress(
    State(state): State<AppState>,
    AxumPath(client_id): AxumPath<String>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    Sse::new(progress_events(Arc::clone(&state.registry), client_id))
        .keep_alive(KeepAlive::default())
}

/// Response body stream over a finished job's output file.
///
/// When the last chunk has been read the job is marked sent; when the body
/// is dropped, complete or not, the file is removed from scratch space.
struct ServedFile {
    inner: ReaderStream<tokio::fs::File>,
    path: PathBuf,
    registry: Arc<JobRegistry>,
    session_id: String,
    finished: bool,
}

impl ServedFile {
    fn new(
        file: tokio::fs::File,
        path: PathBuf,
        registry: Arc<JobRegistry>,
        session_id: String,
    ) -> Self {
        Self {
            inner: ReaderStream::new(file),
            path,
            registry,
            session_id,
            finished: false,
        }
    }
}

impl Stream for ServedFile {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(None) => {
                if !self.finished {
                    self.finished = true;
                    self.registry
                        .set_progress(&self.session_id, JobProgress::sent());
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for ServedFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove served file");
        }
        // The per-job directory is disposable too; ignore failure if another
        // file is still in it.
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::remove_dir(parent);
        }
    }
}
