use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::hub::Subscription;
use crate::state::AppState;

/// WebSocket upgrade handler.
///
/// Mounted as a fallback: any path upgrades, anything that is not an upgrade is a 404.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(rejection) => {
            tracing::debug!("Not a WebSocket upgrade: {}", rejection);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Forward hub payloads to one subscriber until either side goes away
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let Subscription { id, mut receiver } = state.hub.subscribe().await;
    let (mut sender, mut inbound) = socket.split();

    tracing::info!(%id, "WebSocket subscriber connected");

    let mut ping = state.config.ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let idle_timeout = state.config.idle_timeout;
    let mut last_seen = Instant::now();

    loop {
        let idle_deadline = idle_timeout.map(|timeout| last_seen + timeout);

        tokio::select! {
            payload = receiver.recv() => {
                match payload {
                    Some(payload) => {
                        if sender.send(payload.into()).await.is_err() {
                            tracing::debug!(%id, "Send failed, dropping subscriber");
                            break;
                        }
                    }
                    // Hub dropped our queue
                    None => break,
                }
            }

            ws_msg = inbound.next() => {
                last_seen = Instant::now();
                match ws_msg {
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(%id, "WebSocket closed by client");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    // Subscribers only listen; pongs and stray messages just count as activity
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(%id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            _ = async {
                match ping.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            _ = async move {
                match idle_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                tracing::info!(%id, "Closing idle subscriber");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.hub.unsubscribe(id).await;
    tracing::info!(%id, "WebSocket subscriber disconnected");
}
