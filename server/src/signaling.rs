//! Peer-connection handshake relay.
//!
//! The server never looks inside a signal. It only tracks which connections
//! in a room have announced readiness and forwards payloads between them.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::game::ServerToClientMessage;
use crate::hub::ConnectionHub;

/// Per-room set of connections ready to open a direct peer link.
///
/// Soft state: losing it is fine because clients re-announce on reconnect.
#[async_trait]
pub trait ReadySet: Send + Sync {
    /// Adds the connection and returns the other connections that were
    /// already ready, as one atomic step.
    async fn register_ready(&self, room_code: &str, connection_id: Uuid) -> Vec<Uuid>;

    async fn list_ready(&self, room_code: &str) -> Vec<Uuid>;

    /// Removes the connection. Returns the remaining members if it was
    /// present, `None` otherwise. Empty sets are pruned.
    async fn unregister(&self, room_code: &str, connection_id: Uuid) -> Option<Vec<Uuid>>;
}

#[derive(Default)]
pub struct InMemoryReadySet {
    rooms: Mutex<HashMap<String, BTreeSet<Uuid>>>,
}

impl InMemoryReadySet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadySet for InMemoryReadySet {
    async fn register_ready(&self, room_code: &str, connection_id: Uuid) -> Vec<Uuid> {
        let mut rooms = self.rooms.lock().await;
        let members = rooms.entry(room_code.to_string()).or_default();
        let existing = members
            .iter()
            .copied()
            .filter(|id| *id != connection_id)
            .collect();
        members.insert(connection_id);
        existing
    }

    async fn list_ready(&self, room_code: &str) -> Vec<Uuid> {
        self.rooms
            .lock()
            .await
            .get(room_code)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn unregister(&self, room_code: &str, connection_id: Uuid) -> Option<Vec<Uuid>> {
        let mut rooms = self.rooms.lock().await;
        let members = rooms.get_mut(room_code)?;
        if !members.remove(&connection_id) {
            return None;
        }
        let remaining: Vec<Uuid> = members.iter().copied().collect();
        if remaining.is_empty() {
            rooms.remove(room_code);
        }
        Some(remaining)
    }
}

#[derive(Clone)]
pub struct SignalingRelay {
    ready_set: Arc<dyn ReadySet>,
    hub: ConnectionHub,
}

impl SignalingRelay {
    pub fn new(ready_set: Arc<dyn ReadySet>, hub: ConnectionHub) -> Self {
        Self { ready_set, hub }
    }

    /// Both sides learn about each other so each can decide locally who
    /// initiates the peer connection.
    #[tracing::instrument(skip(self), fields(room.code = %room_code, connection.id = %connection_id))]
    pub async fn ready(&self, room_code: &str, connection_id: Uuid) {
        let peers = self.ready_set.register_ready(room_code, connection_id).await;
        tracing::debug!(peers.count = peers.len(), "Connection ready for peer links");

        let announce_new = ServerToClientMessage::WebrtcReady {
            connection_id,
            room_code: room_code.to_string(),
        };
        for peer in &peers {
            self.hub.send_to(*peer, &announce_new).await;
        }
        for peer in peers {
            let announce_existing = ServerToClientMessage::WebrtcReady {
                connection_id: peer,
                room_code: room_code.to_string(),
            };
            self.hub.send_to(connection_id, &announce_existing).await;
        }
    }

    /// Forwards the payload verbatim. Dropped when the target is not a live
    /// member of the room.
    pub async fn relay(&self, room_code: &str, to: Uuid, from: Uuid, signal: JsonValue) -> bool {
        if !self.hub.is_subscribed(to, room_code).await {
            tracing::debug!(
                room.code = %room_code,
                signal.from = %from,
                signal.to = %to,
                "Dropping signal for connection outside room"
            );
            return false;
        }
        let delivered = self
            .hub
            .send_to(to, &ServerToClientMessage::WebrtcSignal { from, signal })
            .await;
        if !delivered {
            tracing::debug!(
                room.code = %room_code,
                signal.from = %from,
                signal.to = %to,
                "Signal target unreachable, dropped"
            );
        }
        delivered
    }

    #[tracing::instrument(skip(self), fields(room.code = %room_code, connection.id = %connection_id))]
    pub async fn leave(&self, room_code: &str, connection_id: Uuid) {
        let Some(remaining) = self.ready_set.unregister(room_code, connection_id).await else {
            return;
        };
        let notice = ServerToClientMessage::WebrtcPeerLeft {
            connection_id,
            room_code: room_code.to_string(),
        };
        for peer in remaining {
            self.hub.send_to(peer, &notice).await;
        }
    }

    pub async fn disconnect(&self, connection_id: Uuid, room_codes: &[String]) {
        for room_code in room_codes {
            self.leave(room_code, connection_id).await;
        }
    }

    pub async fn ready_peers(&self, room_code: &str) -> Vec<Uuid> {
        self.ready_set.list_ready(room_code).await
    }
}
