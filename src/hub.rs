//! Fan-out of relay payloads to every connected subscriber
//!
//! Each subscriber owns a bounded queue. Broadcasting pushes into every queue
//! without waiting: a full queue skips that subscriber for this payload, a
//! closed queue removes the subscriber from the registry.

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use ulid::Ulid;

use crate::protocol::ControlMessage;

/// Identity of one subscriber channel
pub type SubscriberId = Ulid;

/// Default bound for each subscriber's queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A payload as it will be written to subscriber sockets.
///
/// Both variants are reference counted, so cloning per subscriber is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(Utf8Bytes::from(text.into()))
    }

    pub fn clear() -> Self {
        Self::text(ControlMessage::Clear.to_json())
    }

    /// Text when the bytes are valid UTF-8, binary otherwise
    pub fn from_body(body: Bytes) -> Self {
        match Utf8Bytes::try_from(body.clone()) {
            Ok(text) => Payload::Text(text),
            Err(_) => Payload::Binary(body),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.as_str().len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text.as_str()),
            Payload::Binary(_) => None,
        }
    }
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Message::Text(text),
            Payload::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// A freshly registered subscriber: its identity and the receiving end of its queue
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Payload>,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the payload was queued for
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub skipped: usize,
    /// Subscribers found closed and removed from the registry
    pub removed: usize,
}

/// Registry of live subscribers.
///
/// Constructed once at startup and shared by handle. The registry lock is held
/// for the whole of a broadcast, so payloads reach every queue in the order
/// `broadcast` was called.
#[derive(Debug)]
pub struct Hub {
    channels: Mutex<HashMap<SubscriberId, mpsc::Sender<Payload>>>,
    queue_capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new subscriber with its own queue
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Ulid::new();
        self.register(id, tx).await;
        Subscription { id, receiver: rx }
    }

    /// Register an existing channel under `id`.
    ///
    /// Returns false if `id` is already registered; the existing channel is kept
    /// so a repeated registration never doubles delivery.
    pub async fn register(&self, id: SubscriberId, sender: mpsc::Sender<Payload>) -> bool {
        let mut channels = self.channels.lock().await;
        if channels.contains_key(&id) {
            tracing::debug!(%id, "Subscriber already registered");
            return false;
        }
        channels.insert(id, sender);
        tracing::info!(%id, subscribers = channels.len(), "Subscriber registered");
        true
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut channels = self.channels.lock().await;
        let removed = channels.remove(&id).is_some();
        if removed {
            tracing::info!(%id, subscribers = channels.len(), "Subscriber unregistered");
        }
        removed
    }

    /// Queue `payload` for every ready subscriber.
    ///
    /// Never waits on a slow subscriber and never fails; an empty registry is fine.
    pub async fn broadcast(&self, payload: Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut channels = self.channels.lock().await;

        channels.retain(|id, sender| match sender.try_send(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%id, "Subscriber queue full, skipping payload");
                report.skipped += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::info!(%id, "Subscriber closed, removing");
                report.removed += 1;
                false
            }
        });

        tracing::debug!(
            bytes = payload.len(),
            delivered = report.delivered,
            skipped = report.skipped,
            removed = report.removed,
            "Broadcast"
        );
        report
    }

    pub async fn subscriber_count(&self) -> usize {
        self.channels.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.channels.lock().await.contains_key(&id)
    }
}
