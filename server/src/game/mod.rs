use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod error;
pub mod messages;
pub mod turn;

pub use error::GameError;
pub use messages::{ClientToServerMessage, ServerToClientMessage};

pub const MIN_PLAYERS_TO_START: usize = 2;
pub const ROOM_CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Changes on every reconnect. Only used to route traffic.
    pub connection_id: Uuid,
    pub persistent_identity: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_eliminated: bool,
}

impl Player {
    pub fn new(connection_id: Uuid, persistent_identity: String, display_name: String) -> Self {
        Self {
            connection_id,
            persistent_identity,
            display_name,
            is_host: false,
            is_eliminated: false,
        }
    }
}

/// Addresses a player either by its live connection or by its stable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerRef {
    ConnectionId(Uuid),
    PersistentIdentity(String),
}

impl PlayerRef {
    pub fn matches(&self, player: &Player) -> bool {
        match self {
            PlayerRef::ConnectionId(id) => player.connection_id == *id,
            PlayerRef::PersistentIdentity(identity) => player.persistent_identity == *identity,
        }
    }
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerRef::ConnectionId(id) => write!(f, "connection {}", id),
            PlayerRef::PersistentIdentity(identity) => write!(f, "identity {}", identity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomPhase {
    Lobby,
    Active,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: String,
    /// Insertion order. Defines the turn rotation and is never reordered.
    pub players: Vec<Player>,
    pub game_started: bool,
    pub current_word: Option<String>,
    pub expected_start_letter: Option<char>,
    pub current_turn_index: usize,
    pub winner_identity: Option<String>,
    /// Bumped on every turn change so deadlines can tell turns apart even
    /// when the index wraps back to the same seat.
    pub turn_number: u64,
    /// Bumped by the store on every successful write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(code: String) -> Self {
        Self {
            code,
            players: Vec::new(),
            game_started: false,
            current_word: None,
            expected_start_letter: None,
            current_turn_index: 0,
            winner_identity: None,
            turn_number: 0,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> RoomPhase {
        match (self.game_started, self.winner_identity.is_some()) {
            (false, _) => RoomPhase::Lobby,
            (true, false) => RoomPhase::Active,
            (true, true) => RoomPhase::Finished,
        }
    }

    pub fn position_of(&self, who: &PlayerRef) -> Option<usize> {
        self.players.iter().position(|player| who.matches(player))
    }

    pub fn player(&self, who: &PlayerRef) -> Option<&Player> {
        self.players.iter().find(|player| who.matches(player))
    }

    pub fn active_player(&self) -> Option<&Player> {
        if self.phase() != RoomPhase::Active {
            return None;
        }
        self.players.get(self.current_turn_index)
    }

    pub fn host_identity(&self) -> Option<&str> {
        self.players
            .iter()
            .find(|player| player.is_host)
            .map(|player| player.persistent_identity.as_str())
    }

    pub fn winner(&self) -> Option<&Player> {
        let identity = self.winner_identity.as_deref()?;
        self.players
            .iter()
            .find(|player| player.persistent_identity == identity)
    }

    pub fn remaining_count(&self) -> usize {
        self.players.iter().filter(|p| !p.is_eliminated).count()
    }
}

/// Summary row for the open-room listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRoomSummary {
    pub code: String,
    pub players: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Room> for OpenRoomSummary {
    fn from(room: &Room) -> Self {
        Self {
            code: room.code.clone(),
            players: room.players.len(),
            created_at: room.created_at,
        }
    }
}

pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn generate_room_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_CODE_LENGTH)
        .map(|byte| char::from(byte).to_ascii_uppercase())
        .collect()
}

pub fn random_start_letter() -> char {
    char::from(b'A' + rand::thread_rng().gen_range(0..26u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_uppercase_alphanumeric() {
        for _ in 0..50 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LENGTH);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
            );
        }
    }

    #[test]
    fn start_letter_is_in_alphabet() {
        for _ in 0..200 {
            assert!(random_start_letter().is_ascii_uppercase());
        }
    }

    #[test]
    fn phase_follows_started_and_winner() {
        let mut room = Room::new("ABC123".to_string());
        assert_eq!(room.phase(), RoomPhase::Lobby);
        room.game_started = true;
        assert_eq!(room.phase(), RoomPhase::Active);
        room.winner_identity = Some("p1".to_string());
        assert_eq!(room.phase(), RoomPhase::Finished);
    }

    #[test]
    fn room_codes_are_normalized() {
        assert_eq!(normalize_room_code("  ab12cd "), "AB12CD");
    }

    #[test]
    fn player_ref_serializes_as_tagged_field() {
        let by_identity: PlayerRef =
            serde_json::from_str(r#"{"persistentIdentity":"alice"}"#).unwrap();
        assert_eq!(
            by_identity,
            PlayerRef::PersistentIdentity("alice".to_string())
        );
    }
}
