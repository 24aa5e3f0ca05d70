//! Subscription hub: connection registry and topic fan-out.
//!
//! The hub tracks active WebSocket connections and the topics each is
//! subscribed to, and fans published events out to every listener of a
//! topic. It is the engine's one piece of shared mutable state; all
//! mutations are serialized behind a single `RwLock`, and fan-out works
//! from a snapshot of listeners so publishing never blocks subscribe or
//! unsubscribe for longer than the snapshot takes.
//!
//! Delivery is best-effort: events go to connections that are attached and
//! subscribed at publish time, in registration order, and a full outbox
//! drops the event rather than blocking the publisher.

use crate::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

// =============================================================================
// Connection ID (UUID v7 Newtype)
// =============================================================================

/// A unique, time-ordered identifier for one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new connection ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse a connection ID from a string.
    ///
    /// Accepts both the prefixed (`conn_...`) and bare UUID forms.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid_str = s.strip_prefix("conn_").unwrap_or(s);
        Uuid::parse_str(uuid_str).map(Self)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// =============================================================================
// Wire Messages
// =============================================================================

/// Message received from a WebSocket client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Register for a topic and run the subscription procedure once.
    Subscribe {
        /// Concrete path, e.g. `"general"` for a `":channelId"` route.
        path: String,
        /// Input for the subscription procedure's schema.
        #[serde(default)]
        input: Value,
    },
    /// Remove the registration for a topic.
    Unsubscribe {
        /// Concrete path previously subscribed to.
        path: String,
    },
}

/// Message pushed to a WebSocket client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A value for one of the connection's topics.
    Data {
        /// Topic the payload belongs to.
        path: String,
        /// The payload.
        payload: Value,
    },
    /// A failure scoped to one subscription; the connection stays open.
    Error {
        /// Topic the failure belongs to.
        path: String,
        /// The failure.
        error: RpcError,
    },
}

impl ServerMessage {
    /// Build a data message.
    pub fn data(path: impl Into<String>, payload: Value) -> Self {
        Self::Data {
            path: path.into(),
            payload,
        }
    }

    /// Build an error message.
    pub fn error(path: impl Into<String>, error: RpcError) -> Self {
        Self::Error {
            path: path.into(),
            error,
        }
    }
}

// =============================================================================
// Hub
// =============================================================================

#[derive(Default)]
struct HubState {
    /// Outbox sender per attached connection.
    connections: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    /// Listening connections per topic, in registration order.
    topics: HashMap<String, Vec<ConnectionId>>,
}

/// Registry of active connections and their topic subscriptions.
///
/// Cheap to clone; all clones share the same state. Lifetime is explicit:
/// the hub lives inside a router and [`SubscriptionHub::shutdown`] clears
/// it, so multiple routers (each with their own hub) coexist in one
/// process.
#[derive(Clone, Default)]
pub struct SubscriptionHub {
    state: Arc<RwLock<HubState>>,
}

impl SubscriptionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for pushing events into topics from procedure bodies.
    pub fn publisher(&self) -> Publisher {
        Publisher { hub: self.clone() }
    }

    /// Attach a connection and its outbox sender.
    pub async fn attach(&self, id: ConnectionId, outbox: mpsc::Sender<ServerMessage>) {
        self.state.write().await.connections.insert(id, outbox);
        tracing::debug!(connection = %id, "connection attached");
    }

    /// Detach a connection, removing every registration it holds.
    ///
    /// Safe to call multiple times; detaching an unknown connection is a
    /// no-op.
    pub async fn detach(&self, id: ConnectionId) {
        let mut state = self.state.write().await;
        state.connections.remove(&id);
        for listeners in state.topics.values_mut() {
            listeners.retain(|c| *c != id);
        }
        state.topics.retain(|_, listeners| !listeners.is_empty());
        tracing::debug!(connection = %id, "connection detached");
    }

    /// Register a connection as a listener of a topic.
    ///
    /// Idempotent: re-registering keeps the original position in the
    /// topic's registration order. Returns false if the connection is not
    /// attached.
    pub async fn register(&self, id: ConnectionId, topic: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.connections.contains_key(&id) {
            return false;
        }
        let listeners = state.topics.entry(topic.to_string()).or_default();
        if !listeners.contains(&id) {
            listeners.push(id);
        }
        true
    }

    /// Remove a connection's registration for a topic. Idempotent.
    pub async fn unregister(&self, id: ConnectionId, topic: &str) {
        let mut state = self.state.write().await;
        if let Some(listeners) = state.topics.get_mut(topic) {
            listeners.retain(|c| *c != id);
            if listeners.is_empty() {
                state.topics.remove(topic);
            }
        }
    }

    /// Whether a connection is currently registered for a topic.
    pub async fn is_subscribed(&self, id: ConnectionId, topic: &str) -> bool {
        self.state
            .read()
            .await
            .topics
            .get(topic)
            .is_some_and(|listeners| listeners.contains(&id))
    }

    /// Fan an event out to every listener of a topic, in registration
    /// order. Returns how many outboxes accepted the event.
    pub async fn publish(&self, topic: &str, payload: Value) -> usize {
        // Stable snapshot so fan-out never holds the registry lock.
        let targets: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)> = {
            let state = self.state.read().await;
            match state.topics.get(topic) {
                Some(listeners) => listeners
                    .iter()
                    .filter_map(|id| state.connections.get(id).map(|tx| (*id, tx.clone())))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for (id, tx) in targets {
            let message = ServerMessage::data(topic, payload.clone());
            match tx.try_send(message) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(connection = %id, topic, "dropped event for slow or closed connection");
                }
            }
        }
        delivered
    }

    /// Send a data message to a single connection. Best-effort.
    pub async fn send_data(&self, id: ConnectionId, path: &str, payload: Value) -> bool {
        self.send(id, ServerMessage::data(path, payload)).await
    }

    /// Send an error message to a single connection. Best-effort; the
    /// error is scoped to `path` and never closes the connection.
    pub async fn send_error(&self, id: ConnectionId, path: &str, error: RpcError) -> bool {
        self.send(id, ServerMessage::error(path, error)).await
    }

    async fn send(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let sender = self.state.read().await.connections.get(&id).cloned();
        match sender {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Number of attached connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of listeners currently registered for a topic.
    pub async fn listener_count(&self, topic: &str) -> usize {
        self.state
            .read()
            .await
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Drop every connection and registration.
    ///
    /// Dropping the outbox senders closes each connection's receive loop.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        state.connections.clear();
        state.topics.clear();
        tracing::debug!("subscription hub shut down");
    }
}

/// Cloneable handle for publishing events into topics.
///
/// Obtainable from the router builder before routes are declared, so
/// query/mutation handlers can capture it and notify subscribers.
#[derive(Clone)]
pub struct Publisher {
    hub: SubscriptionHub,
}

impl Publisher {
    /// Publish a payload to every listener of a topic.
    pub async fn publish(&self, topic: &str, payload: impl Serialize) -> usize {
        let value = serde_json::to_value(payload).unwrap_or(Value::Null);
        self.hub.publish(topic, value).await
    }
}
