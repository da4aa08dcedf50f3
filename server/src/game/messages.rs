use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{GameError, Player, Room};

/// Messages sent by a client over the persistent channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "messageType", content = "payload", rename_all = "kebab-case")]
pub enum ClientToServerMessage {
    /// Subscribes the connection to the room and registers (or refreshes) its seat.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        persistent_identity: String,
        display_name: Option<String>,
    },
    /// Explicit leave. Gives up the seat, unlike a dropped connection.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        room_code: String,
        persistent_identity: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StartGame { room_code: String },
    #[serde(rename_all = "camelCase")]
    SubmitMove {
        room_code: String,
        word: String,
        /// Turn index the client believed was current when it made the move.
        turn_index: Option<usize>,
    },
    /// Sent by a client when its local turn countdown runs out.
    #[serde(rename_all = "camelCase")]
    Eliminate {
        room_code: String,
        connection_id: Option<Uuid>,
        persistent_identity: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcReady { room_code: String },
    /// Opaque handshake payload. `from` is informational, the server stamps
    /// the sender's real connection id.
    #[serde(rename_all = "camelCase")]
    WebrtcSignal {
        room_code: String,
        to: Uuid,
        from: Option<Uuid>,
        signal: JsonValue,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WinnerInfo {
    pub connection_id: Uuid,
    pub persistent_identity: String,
    pub display_name: String,
}

impl From<&Player> for WinnerInfo {
    fn from(player: &Player) -> Self {
        Self {
            connection_id: player.connection_id,
            persistent_identity: player.persistent_identity.clone(),
            display_name: player.display_name.clone(),
        }
    }
}

/// Messages pushed from the server to clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "messageType", content = "payload", rename_all = "kebab-case")]
pub enum ServerToClientMessage {
    /// First message on every connection.
    #[serde(rename_all = "camelCase")]
    Connected { connection_id: Uuid },
    /// Sent only to the connection whose request failed.
    Error { code: String, message: String },
    /// Full snapshot for a connection that just joined or reconnected.
    RoomState { room: Room },
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        players: Vec<Player>,
        host_identity: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        players: Vec<Player>,
        host_identity: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GameStarted {
        expected_start_letter: char,
        current_turn_index: usize,
        players: Vec<Player>,
    },
    #[serde(rename_all = "camelCase")]
    MoveAccepted {
        word: String,
        expected_start_letter: Option<char>,
    },
    #[serde(rename_all = "camelCase")]
    TurnChanged { current_turn_index: usize },
    #[serde(rename_all = "camelCase")]
    PlayerEliminated {
        connection_id: Uuid,
        persistent_identity: String,
    },
    GameOver { winner: WinnerInfo },
    #[serde(rename_all = "camelCase")]
    WebrtcReady {
        connection_id: Uuid,
        room_code: String,
    },
    WebrtcSignal { from: Uuid, signal: JsonValue },
    #[serde(rename_all = "camelCase")]
    WebrtcPeerLeft {
        connection_id: Uuid,
        room_code: String,
    },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn from_error(error: &GameError) -> Self {
        ServerToClientMessage::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_join_room_with_kebab_tag() {
        let raw = r#"{"messageType":"join-room","payload":{"roomCode":"abc123","persistentIdentity":"user-1"}}"#;
        let parsed = client_message_from_ws_text(raw).unwrap();
        assert_eq!(
            parsed,
            ClientToServerMessage::JoinRoom {
                room_code: "abc123".to_string(),
                persistent_identity: "user-1".to_string(),
                display_name: None,
            }
        );
    }

    #[test]
    fn parses_webrtc_signal_with_opaque_payload() {
        let to = Uuid::new_v4();
        let raw = json!({
            "messageType": "webrtc-signal",
            "payload": {
                "roomCode": "ROOM01",
                "to": to,
                "signal": {"type": "offer", "sdp": "v=0..."}
            }
        })
        .to_string();
        match client_message_from_ws_text(&raw).unwrap() {
            ClientToServerMessage::WebrtcSignal {
                to: parsed_to,
                from,
                signal,
                ..
            } => {
                assert_eq!(parsed_to, to);
                assert!(from.is_none());
                assert_eq!(signal["type"], "offer");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_message_type() {
        let raw = r#"{"messageType":"teleport","payload":{}}"#;
        assert!(client_message_from_ws_text(raw).is_err());
    }

    #[test]
    fn server_messages_use_camel_case_payloads() {
        let message = ServerToClientMessage::TurnChanged {
            current_turn_index: 2,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"messageType": "turn-changed", "payload": {"currentTurnIndex": 2}})
        );
    }

    #[test]
    fn error_message_carries_machine_code() {
        let message = ServerToClientMessage::from_error(&GameError::NotYourTurn);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["messageType"], "error");
        assert_eq!(value["payload"]["code"], "NOT_YOUR_TURN");
    }
}
