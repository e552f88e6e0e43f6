//! Router assembly and listeners
//!
//! By default ingest and subscribers listen on separate ports. When both are
//! configured to the same address one listener serves both routes.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{api, ingest, state::AppState, ws};

/// Ingest listener: POST to the ingest path, 404 for everything else
pub fn ingest_router(state: Arc<AppState>) -> Router {
    let path = state.config.ingest_path.clone();
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route(&path, post(ingest::ingest).fallback(ingest::not_found))
        .fallback(ingest::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browser-facing listener: `/api` routes, and a WebSocket upgrade on any other path
pub fn subscriber_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_body_bytes;

    api_routes()
        .fallback(ws::ws_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Both roles behind one listener
pub fn unified_router(state: Arc<AppState>) -> Router {
    let path = state.config.ingest_path.clone();
    let body_limit = state.config.max_body_bytes;

    api_routes()
        .route(
            &path,
            post(ingest::ingest)
                .get(ws::ws_handler)
                .fallback(ingest::not_found),
        )
        .fallback(ws::ws_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/predict", post(api::predict))
        .route("/api/debug-image", get(api::debug_image))
        .route("/api/current-board", get(api::current_board))
}

/// Bind the configured addresses and serve until an error occurs
pub async fn run(state: Arc<AppState>) -> std::io::Result<()> {
    let config = state.config.clone();

    if config.single_listener() {
        let listener = TcpListener::bind(config.subscriber_addr).await?;
        tracing::info!("Relay listening on http://{}", listener.local_addr()?);
        return serve_unified(listener, state).await;
    }

    let subscriber = TcpListener::bind(config.subscriber_addr).await?;
    let ingest = TcpListener::bind(config.ingest_addr).await?;
    tracing::info!("Subscribers on ws://{}", subscriber.local_addr()?);
    tracing::info!(
        "Ingest on http://{}{}",
        ingest.local_addr()?,
        config.ingest_path
    );

    serve_split(ingest, subscriber, state).await
}

/// Serve ingest and subscribers on two already-bound listeners
pub async fn serve_split(
    ingest: TcpListener,
    subscriber: TcpListener,
    state: Arc<AppState>,
) -> std::io::Result<()> {
    let ingest_app = ingest_router(state.clone());
    let subscriber_app = subscriber_router(state);

    tokio::try_join!(
        async { axum::serve(ingest, ingest_app).await },
        async { axum::serve(subscriber, subscriber_app).await },
    )?;
    Ok(())
}

/// Serve both roles on one already-bound listener
pub async fn serve_unified(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(listener, unified_router(state)).await
}
