//! Client for the external inference service
//!
//! The service exposes:
//! - `POST /predict-stream`: multipart `image` + `a1_pos`, answers with a chunked
//!   stream of `data: ...\n\n` frames ending in `data: FINISHED\n\n`
//! - static debug images under arbitrary paths
//! - the current board as SVG markup

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use std::time::Duration;

use crate::config::RelayConfig;
use crate::protocol::A1Position;

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Body of a streaming prediction, chunk by chunk as the service sends it
pub type ByteStream = BoxStream<'static, UpstreamResult<Bytes>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to inference service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference service returned status {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("invalid upstream path: {0}")]
    InvalidPath(String),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Uploaded chessboard photo
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub image: ImageUpload,
    pub a1_pos: A1Position,
}

/// A fetched binary resource and its declared content type
#[derive(Debug, Clone)]
pub struct Asset {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Operations the relay needs from the inference service
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Start a prediction and return its event stream
    async fn predict_stream(&self, request: PredictRequest) -> UpstreamResult<ByteStream>;

    /// Fetch a debug image by path relative to the service root
    async fn fetch_asset(&self, path: &str) -> UpstreamResult<Asset>;

    /// Current board rendered as SVG markup
    async fn current_board_svg(&self) -> UpstreamResult<String>;
}

/// HTTP implementation backed by reqwest
pub struct HttpBackend {
    base_url: Url,
    board_path: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, board_path: &str, timeout: Duration) -> UpstreamResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| UpstreamError::InvalidBaseUrl(format!("{}: {}", base_url, e)))?;

        // No overall timeout: prediction streams run as long as the pipeline does
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            base_url,
            board_path: board_path.to_string(),
            timeout,
            client,
        })
    }

    pub fn from_config(config: &RelayConfig) -> UpstreamResult<Self> {
        Self::new(
            &config.chess_api_url,
            &config.board_path,
            config.upstream_timeout,
        )
    }

    /// Resolve `path` against the base URL, refusing anything that leaves its origin
    pub fn resolve(&self, path: &str) -> UpstreamResult<Url> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| UpstreamError::InvalidPath(format!("{}: {}", path, e)))?;

        if url.origin() != self.base_url.origin() {
            return Err(UpstreamError::InvalidPath(path.to_string()));
        }
        Ok(url)
    }

    fn check_status(response: &reqwest::Response) -> UpstreamResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UpstreamError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            })
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn predict_stream(&self, request: PredictRequest) -> UpstreamResult<ByteStream> {
        let url = self.resolve("/predict-stream")?;

        let mut part = Part::bytes(request.image.bytes.to_vec()).file_name(request.image.file_name);
        if let Some(ref content_type) = request.image.content_type {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new()
            .part("image", part)
            .text("a1_pos", request.a1_pos.as_str());

        tracing::info!(%url, a1_pos = %request.a1_pos, "Starting prediction");
        let response = self.client.post(url).multipart(form).send().await?;
        Self::check_status(&response)?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(UpstreamError::from))
            .boxed())
    }

    async fn fetch_asset(&self, path: &str) -> UpstreamResult<Asset> {
        let url = self.resolve(path)?;
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        Self::check_status(&response)?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response.bytes().await?;

        Ok(Asset {
            bytes,
            content_type,
        })
    }

    async fn current_board_svg(&self) -> UpstreamResult<String> {
        let url = self.resolve(&self.board_path)?;
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        Self::check_status(&response)?;
        Ok(response.text().await?)
    }
}
