//! Ingest endpoint
//!
//! The upstream proxy POSTs pipeline output here. Clear control objects are
//! re-serialized as JSON; every other body is broadcast exactly as received.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::hub::Payload;
use crate::state::AppState;

/// POST <ingest path>
pub async fn ingest(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let payload = classify(body);
    let report = state.hub.broadcast(payload).await;

    tracing::debug!(
        delivered = report.delivered,
        skipped = report.skipped,
        removed = report.removed,
        "Ingested payload"
    );

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "OK")
}

/// Anything other than POST to the ingest path
pub async fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// Decide how an ingest body goes out to subscribers
pub fn classify(body: Bytes) -> Payload {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) {
        if value.get("type").and_then(|t| t.as_str()) == Some("clear") {
            return Payload::text(value.to_string());
        }
    }
    Payload::from_body(body)
}
