//! Browser-facing HTTP routes in front of the inference service.
//!
//! `POST /api/predict` clears every subscriber, starts a prediction and relays
//! the service's event stream into the hub as it arrives.

use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::framer::Utf8Decoder;
use crate::hub::{Hub, Payload};
use crate::protocol::{A1Position, InvalidA1Position, FRAME_SEPARATOR};
use crate::state::AppState;
use crate::upstream::{ByteStream, ImageUpload, PredictRequest, UpstreamError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No file provided")]
    MissingImage,

    #[error(transparent)]
    InvalidA1Position(#[from] InvalidA1Position),

    #[error("Invalid form data: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Inference backend unavailable")]
    BackendUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingImage
            | ApiError::InvalidA1Position(_)
            | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::BackendUnavailable => StatusCode::BAD_GATEWAY,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictAccepted {
    pub success: bool,
}

/// Start a prediction.
///
/// POST /api/predict (multipart: `image`, `a1_pos`)
///
/// Responds as soon as the service accepts the upload; events follow over the relay.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<PredictAccepted>, ApiError> {
    // One run relays at a time; the lock is held until the new run is installed
    let mut active = state.active_run.lock().await;
    if let Some(previous) = active.take() {
        previous.stop().await;
    }

    // Previous run's output goes away before anything else happens
    state.hub.broadcast(Payload::clear()).await;

    let request = read_predict_form(multipart).await?;
    let stream = state
        .backend
        .predict_stream(request)
        .await
        .map_err(|e| {
            tracing::error!("Prediction request failed: {}", e);
            ApiError::BackendUnavailable
        })?;

    *active = Some(RelayRun::spawn(state.hub.clone(), stream));

    Ok(Json(PredictAccepted { success: true }))
}

async fn read_predict_form(mut multipart: Multipart) -> Result<PredictRequest, ApiError> {
    let mut image = None;
    let mut a1_pos = A1Position::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or("upload.jpg").to_string();
                let content_type = field.content_type().map(|ct| ct.to_string());
                let bytes = field.bytes().await?;
                image = Some(ImageUpload {
                    bytes,
                    file_name,
                    content_type,
                });
            }
            Some("a1_pos") => {
                a1_pos = field.text().await?.parse()?;
            }
            other => {
                tracing::debug!("Ignoring form field {:?}", other);
            }
        }
    }

    let image = image.ok_or(ApiError::MissingImage)?;
    Ok(PredictRequest { image, a1_pos })
}

/// A prediction stream being relayed into the hub
#[derive(Debug)]
pub struct RelayRun {
    stop: oneshot::Sender<()>,
    task: JoinHandle<usize>,
}

impl RelayRun {
    pub fn spawn(hub: Arc<Hub>, stream: ByteStream) -> Self {
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(relay_stream(hub, stream, stopped));
        Self { stop, task }
    }

    /// Stop relaying and wait until the task has broadcast its last payload
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::warn!("Relay task ended abnormally: {}", e);
        }
    }
}

/// Broadcast a prediction stream chunk by chunk, in arrival order.
///
/// Chunks are forwarded verbatim apart from holding back a multi-byte character
/// split across chunk boundaries. When the stream ends or `stop` fires in the
/// middle of a frame, a separator is broadcast so the partial frame cannot run
/// into the next run's output. Returns the number of payloads broadcast.
pub async fn relay_stream(
    hub: Arc<Hub>,
    mut stream: ByteStream,
    mut stop: oneshot::Receiver<()>,
) -> usize {
    let mut utf8 = Utf8Decoder::new();
    let mut boundary = FrameBoundary::default();
    let mut relayed = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = &mut stop => {
                tracing::info!("Prediction stream superseded");
                break;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                let text = utf8.decode(&bytes);
                if text.is_empty() {
                    continue;
                }
                boundary.observe(&text);
                hub.broadcast(Payload::text(text)).await;
                relayed += 1;
            }
            Some(Err(e)) => {
                tracing::warn!("Prediction stream aborted: {}", e);
                break;
            }
            None => break,
        }
    }

    if utf8.has_pending() {
        tracing::warn!("Prediction stream ended inside a UTF-8 sequence");
    }
    let tail = utf8.finish();
    if !tail.is_empty() {
        boundary.observe(&tail);
        hub.broadcast(Payload::text(tail)).await;
        relayed += 1;
    }

    if !boundary.is_clean() {
        hub.broadcast(Payload::text(FRAME_SEPARATOR)).await;
        relayed += 1;
    }

    tracing::info!(relayed, "Prediction stream ended");
    relayed
}

/// Tracks whether relayed text so far ends on a frame separator
#[derive(Debug, Default)]
struct FrameBoundary {
    tail: String,
}

impl FrameBoundary {
    fn observe(&mut self, text: &str) {
        self.tail.push_str(text);
        let keep = self
            .tail
            .char_indices()
            .rev()
            .nth(FRAME_SEPARATOR.len() - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.tail.replace_range(..keep, "");
    }

    fn is_clean(&self) -> bool {
        self.tail.is_empty() || self.tail.ends_with(FRAME_SEPARATOR)
    }
}

#[derive(Debug, Deserialize)]
pub struct DebugImageQuery {
    pub path: Option<String>,
}

/// Proxy a debug image from the inference service.
///
/// GET /api/debug-image?path=<path>
pub async fn debug_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DebugImageQuery>,
) -> Response {
    let Some(path) = query.path.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Path is required").into_response();
    };

    match state.backend.fetch_asset(&path).await {
        Ok(asset) => {
            let content_type = asset
                .content_type
                .unwrap_or_else(|| "image/jpeg".to_string());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                asset.bytes,
            )
                .into_response()
        }
        Err(UpstreamError::Status { status, reason }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, format!("Failed to fetch image: {}", reason)).into_response()
        }
        Err(UpstreamError::InvalidPath(path)) => {
            tracing::warn!(%path, "Rejected debug image path");
            (StatusCode::BAD_REQUEST, "Invalid path").into_response()
        }
        Err(e) => {
            tracing::error!("Error fetching image: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Current board as SVG markup.
///
/// GET /api/current-board
pub async fn current_board(State(state): State<Arc<AppState>>) -> Response {
    match state.backend.current_board_svg().await {
        Ok(svg) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/svg+xml")],
            svg,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Failed to fetch current board: {}", e);
            (StatusCode::BAD_GATEWAY, "Board snapshot unavailable").into_response()
        }
    }
}
