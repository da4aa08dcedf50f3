use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::game::{GameError, Room};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Room {0} already exists")]
    AlreadyExists(String),
    #[error("Room {0} not found")]
    NotFound(String),
    #[error("Room {code} changed concurrently: expected version {expected}, found {found}")]
    Conflict {
        code: String,
        expected: u64,
        found: u64,
    },
    #[error("Room store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(code) => GameError::RoomNotFound(code),
            StoreError::Conflict { code, .. } => GameError::Contention(code),
            other => GameError::Store(other.to_string()),
        }
    }
}

/// Durable mapping from room code to room state.
///
/// Writes are conditional on the version the caller read, so two handlers
/// racing on the same room cannot both win.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Inserts a new room at version 1. Fails if the code is taken.
    async fn insert(&self, room: Room) -> Result<Room, StoreError>;

    async fn get(&self, code: &str) -> Result<Option<Room>, StoreError>;

    async fn list(&self) -> Result<Vec<Room>, StoreError>;

    /// Replaces the stored room only if its version still equals
    /// `expected_version`. The stored copy gets `expected_version + 1`.
    async fn compare_and_swap(&self, room: Room, expected_version: u64)
    -> Result<Room, StoreError>;

    async fn delete(&self, code: &str, expected_version: u64) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum RoomStoreMessage {
    Insert {
        room: Room,
        respond_to: oneshot::Sender<Result<Room, StoreError>>,
    },
    Get {
        code: String,
        respond_to: oneshot::Sender<Option<Room>>,
    },
    List {
        respond_to: oneshot::Sender<Vec<Room>>,
    },
    CompareAndSwap {
        room: Room,
        expected_version: u64,
        respond_to: oneshot::Sender<Result<Room, StoreError>>,
    },
    Delete {
        code: String,
        expected_version: u64,
        respond_to: oneshot::Sender<Result<(), StoreError>>,
    },
}

pub struct RoomStoreActor {
    receiver: mpsc::Receiver<RoomStoreMessage>,
    rooms: HashMap<String, Room>,
}

impl RoomStoreActor {
    fn new(receiver: mpsc::Receiver<RoomStoreMessage>) -> Self {
        RoomStoreActor {
            receiver,
            rooms: HashMap::new(),
        }
    }

    fn check_version(&self, code: &str, expected_version: u64) -> Result<(), StoreError> {
        match self.rooms.get(code) {
            None => Err(StoreError::NotFound(code.to_string())),
            Some(stored) if stored.version != expected_version => Err(StoreError::Conflict {
                code: code.to_string(),
                expected: expected_version,
                found: stored.version,
            }),
            Some(_) => Ok(()),
        }
    }

    fn handle_message(&mut self, msg: RoomStoreMessage) {
        match msg {
            RoomStoreMessage::Insert {
                mut room,
                respond_to,
            } => {
                let result = if self.rooms.contains_key(&room.code) {
                    Err(StoreError::AlreadyExists(room.code.clone()))
                } else {
                    room.version = 1;
                    tracing::debug!(room.code = %room.code, "Room inserted");
                    self.rooms.insert(room.code.clone(), room.clone());
                    Ok(room)
                };
                let _ = respond_to.send(result);
            }
            RoomStoreMessage::Get { code, respond_to } => {
                let _ = respond_to.send(self.rooms.get(&code).cloned());
            }
            RoomStoreMessage::List { respond_to } => {
                let _ = respond_to.send(self.rooms.values().cloned().collect());
            }
            RoomStoreMessage::CompareAndSwap {
                mut room,
                expected_version,
                respond_to,
            } => {
                let result = self
                    .check_version(&room.code, expected_version)
                    .map(|()| {
                        room.version = expected_version + 1;
                        self.rooms.insert(room.code.clone(), room.clone());
                        room
                    });
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "Conditional room update rejected");
                }
                let _ = respond_to.send(result);
            }
            RoomStoreMessage::Delete {
                code,
                expected_version,
                respond_to,
            } => {
                let result = self.check_version(&code, expected_version).map(|()| {
                    self.rooms.remove(&code);
                    tracing::debug!(room.code = %code, "Room deleted");
                });
                let _ = respond_to.send(result);
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_room_store_actor(mut actor: RoomStoreActor) {
    tracing::info!("RoomStore actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg);
    }
    tracing::info!("RoomStore actor stopped");
}

/// In-process room store. Each command is applied by a single actor task,
/// which makes every conditional write atomic.
#[derive(Clone, Debug)]
pub struct RoomStoreHandle {
    sender: mpsc::Sender<RoomStoreMessage>,
}

impl RoomStoreHandle {
    pub fn spawn(buffer_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        tokio::spawn(run_room_store_actor(RoomStoreActor::new(receiver)));
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomStoreMessage,
    ) -> Result<T, StoreError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to send to RoomStore: {}", e)))?;
        rx.await
            .map_err(|e| StoreError::Unavailable(format!("RoomStore no response: {}", e)))
    }
}

#[async_trait]
impl RoomStore for RoomStoreHandle {
    async fn insert(&self, room: Room) -> Result<Room, StoreError> {
        self.request(|respond_to| RoomStoreMessage::Insert { room, respond_to })
            .await?
    }

    async fn get(&self, code: &str) -> Result<Option<Room>, StoreError> {
        let code = code.to_string();
        self.request(|respond_to| RoomStoreMessage::Get { code, respond_to })
            .await
    }

    async fn list(&self) -> Result<Vec<Room>, StoreError> {
        self.request(|respond_to| RoomStoreMessage::List { respond_to })
            .await
    }

    async fn compare_and_swap(
        &self,
        room: Room,
        expected_version: u64,
    ) -> Result<Room, StoreError> {
        self.request(|respond_to| RoomStoreMessage::CompareAndSwap {
            room,
            expected_version,
            respond_to,
        })
        .await?
    }

    async fn delete(&self, code: &str, expected_version: u64) -> Result<(), StoreError> {
        let code = code.to_string();
        self.request(|respond_to| RoomStoreMessage::Delete {
            code,
            expected_version,
            respond_to,
        })
        .await?
    }
}
