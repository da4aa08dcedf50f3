use axum::extract::ws;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::game::ServerToClientMessage;

#[derive(Default)]
struct HubInner {
    connections: HashMap<Uuid, mpsc::Sender<ws::Message>>,
    room_members: HashMap<String, HashSet<Uuid>>,
    subscriptions: HashMap<Uuid, HashSet<String>>,
}

/// Live connections and the rooms each one listens to.
///
/// This is soft state: it only knows about sockets held by this process.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    inner: Arc<RwLock<HubInner>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: Uuid, client_tx: mpsc::Sender<ws::Message>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(connection_id, client_tx);
        tracing::debug!(
            connection.id = %connection_id,
            connections.count = inner.connections.len(),
            "Connection registered"
        );
    }

    /// Drops the connection and returns the rooms it was subscribed to.
    pub async fn unregister(&self, connection_id: Uuid) -> Vec<String> {
        let mut inner = self.inner.write().await;
        inner.connections.remove(&connection_id);
        let rooms: Vec<String> = inner
            .subscriptions
            .remove(&connection_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        for room_code in &rooms {
            if let Some(members) = inner.room_members.get_mut(room_code) {
                members.remove(&connection_id);
                if members.is_empty() {
                    inner.room_members.remove(room_code);
                }
            }
        }
        rooms
    }

    pub async fn subscribe(&self, connection_id: Uuid, room_code: &str) {
        let mut inner = self.inner.write().await;
        inner
            .room_members
            .entry(room_code.to_string())
            .or_default()
            .insert(connection_id);
        inner
            .subscriptions
            .entry(connection_id)
            .or_default()
            .insert(room_code.to_string());
    }

    pub async fn unsubscribe(&self, connection_id: Uuid, room_code: &str) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.room_members.get_mut(room_code) {
            members.remove(&connection_id);
            if members.is_empty() {
                inner.room_members.remove(room_code);
            }
        }
        if let Some(rooms) = inner.subscriptions.get_mut(&connection_id) {
            rooms.remove(room_code);
            if rooms.is_empty() {
                inner.subscriptions.remove(&connection_id);
            }
        }
    }

    pub async fn is_connected(&self, connection_id: Uuid) -> bool {
        self.inner.read().await.connections.contains_key(&connection_id)
    }

    pub async fn is_subscribed(&self, connection_id: Uuid, room_code: &str) -> bool {
        self.inner
            .read()
            .await
            .room_members
            .get(room_code)
            .is_some_and(|members| members.contains(&connection_id))
    }

    /// Best-effort direct send. Returns false when the target is gone.
    pub async fn send_to(&self, connection_id: Uuid, message: &ServerToClientMessage) -> bool {
        let client_tx = self.inner.read().await.connections.get(&connection_id).cloned();
        let Some(client_tx) = client_tx else {
            return false;
        };
        match message.to_ws_text() {
            Ok(ws_msg) => client_tx.send(ws_msg).await.is_ok(),
            Err(e) => {
                tracing::error!(
                    connection.id = %connection_id,
                    error = %e,
                    "Failed to serialize message for connection"
                );
                false
            }
        }
    }

    /// Sends to every connection subscribed to the room.
    pub async fn broadcast(&self, room_code: &str, message: &ServerToClientMessage) {
        let targets: Vec<(Uuid, mpsc::Sender<ws::Message>)> = {
            let inner = self.inner.read().await;
            let Some(members) = inner.room_members.get(room_code) else {
                return;
            };
            members
                .iter()
                .filter_map(|id| inner.connections.get(id).map(|tx| (*id, tx.clone())))
                .collect()
        };

        let ws_msg = match message.to_ws_text() {
            Ok(ws_msg) => ws_msg,
            Err(e) => {
                tracing::error!(
                    room.code = %room_code,
                    error = %e,
                    "Failed to serialize broadcast"
                );
                return;
            }
        };

        for (connection_id, client_tx) in targets {
            if client_tx.send(ws_msg.clone()).await.is_err() {
                tracing::warn!(
                    room.code = %room_code,
                    connection.id = %connection_id,
                    "Failed to broadcast to connection"
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub async fn connect(hub: &ConnectionHub) -> (Uuid, mpsc::Receiver<ws::Message>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);
        hub.register(connection_id, tx).await;
        (connection_id, rx)
    }

    /// Drains everything already queued for a connection.
    pub fn drain(rx: &mut mpsc::Receiver<ws::Message>) -> Vec<ServerToClientMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ws::Message::Text(text) = msg {
                messages.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{connect, drain};
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = connect(&hub).await;
        let (_b, mut rx_b) = connect(&hub).await;
        hub.subscribe(a, "ROOM01").await;

        let msg = ServerToClientMessage::TurnChanged {
            current_turn_index: 1,
        };
        hub.broadcast("ROOM01", &msg).await;

        assert_eq!(drain(&mut rx_a), vec![msg]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn unregister_returns_subscribed_rooms() {
        let hub = ConnectionHub::new();
        let (a, _rx) = connect(&hub).await;
        hub.subscribe(a, "ROOM01").await;
        hub.subscribe(a, "ROOM02").await;

        let mut rooms = hub.unregister(a).await;
        rooms.sort();
        assert_eq!(rooms, vec!["ROOM01".to_string(), "ROOM02".to_string()]);
        assert!(!hub.is_subscribed(a, "ROOM01").await);
    }

    #[tokio::test]
    async fn send_to_missing_connection_is_dropped() {
        let hub = ConnectionHub::new();
        let delivered = hub
            .send_to(
                Uuid::new_v4(),
                &ServerToClientMessage::TurnChanged {
                    current_turn_index: 0,
                },
            )
            .await;
        assert!(!delivered);
    }
}
