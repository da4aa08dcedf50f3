use axum::extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game::messages::client_message_from_ws_text;
use crate::game::{
    ClientToServerMessage, GameError, PlayerRef, ServerToClientMessage, normalize_room_code,
};
use crate::state::AppState;

const CLIENT_CHANNEL_CAPACITY: usize = 64;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state))
}

pub async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    let (client_tx, mut client_rx) = mpsc::channel::<ws::Message>(CLIENT_CHANNEL_CAPACITY);
    app_state.hub.register(connection_id, client_tx).await;
    app_state
        .hub
        .send_to(connection_id, &ServerToClientMessage::Connected { connection_id })
        .await;
    tracing::info!(connection.id = %connection_id, "WebSocket connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(message_to_send) = client_rx.recv().await {
            if ws_sender.send(message_to_send).await.is_err() {
                tracing::debug!(connection.id = %connection_id, "WS send failed, client likely gone");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let (command_tx, command_rx) = mpsc::channel::<ClientToServerMessage>(CLIENT_CHANNEL_CAPACITY);
    let command_task = tokio::spawn(run_commands(app_state.clone(), connection_id, command_rx));

    let recv_state = app_state.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(ws::Message::Text(text_msg))) => {
                    tracing::trace!(connection.id = %connection_id, raw = %text_msg.as_str(), "WS message received");
                    match client_message_from_ws_text(&text_msg) {
                        Ok(message) => {
                            if command_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(connection.id = %connection_id, error = %e, "Unparseable client message");
                            let reply = ServerToClientMessage::Error {
                                code: "BAD_MESSAGE".to_string(),
                                message: format!("Invalid message format: {}", e),
                            };
                            recv_state.hub.send_to(connection_id, &reply).await;
                        }
                    }
                }
                Some(Ok(ws::Message::Binary(_))) => {
                    tracing::debug!(connection.id = %connection_id, "Binary message ignored");
                }
                Some(Ok(ws::Message::Ping(_))) | Some(Ok(ws::Message::Pong(_))) => {}
                Some(Ok(ws::Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!(connection.id = %connection_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    // Commands already read still run, so cleanup below sees every room
    // this connection joined.
    if let Err(e) = command_task.await {
        tracing::warn!(connection.id = %connection_id, error = %e, "Command task ended abnormally");
    }

    let rooms = app_state.hub.unregister(connection_id).await;
    app_state.relay.disconnect(connection_id, &rooms).await;
    tracing::info!(
        connection.id = %connection_id,
        rooms.count = rooms.len(),
        "WebSocket disconnected"
    );
    app_state.coordinator.connection_lost(connection_id, rooms);
}

/// Runs a connection's commands one at a time, in arrival order, until the
/// reading side hangs up. Not tied to the socket tasks, so a command in
/// flight is never cut off halfway.
pub async fn run_commands(
    app_state: AppState,
    connection_id: Uuid,
    mut commands: mpsc::Receiver<ClientToServerMessage>,
) {
    while let Some(message) = commands.recv().await {
        if let Err(e) = dispatch(&app_state, connection_id, message).await {
            tracing::debug!(connection.id = %connection_id, error = %e, "Command rejected");
            app_state
                .hub
                .send_to(connection_id, &ServerToClientMessage::from_error(&e))
                .await;
        }
    }
}

/// Routes one client message. Errors go back to the sender only.
pub async fn dispatch(
    app_state: &AppState,
    connection_id: Uuid,
    message: ClientToServerMessage,
) -> Result<(), GameError> {
    let this_connection = PlayerRef::ConnectionId(connection_id);
    match message {
        ClientToServerMessage::JoinRoom {
            room_code,
            persistent_identity,
            display_name,
        } => {
            app_state
                .coordinator
                .join(&room_code, &persistent_identity, display_name, connection_id)
                .await?;
        }
        ClientToServerMessage::LeaveRoom {
            room_code,
            persistent_identity,
        } => {
            let who = persistent_identity
                .map(PlayerRef::PersistentIdentity)
                .unwrap_or(this_connection);
            let departure = app_state.coordinator.leave(&room_code, who).await?;
            app_state
                .relay
                .leave(
                    &normalize_room_code(&room_code),
                    departure.removed.connection_id,
                )
                .await;
        }
        ClientToServerMessage::StartGame { room_code } => {
            app_state
                .coordinator
                .start_game(&room_code, this_connection)
                .await?;
        }
        ClientToServerMessage::SubmitMove {
            room_code,
            word,
            turn_index,
        } => {
            app_state
                .coordinator
                .submit_move(&room_code, this_connection, &word, turn_index)
                .await?;
        }
        ClientToServerMessage::Eliminate {
            room_code,
            connection_id: target_connection,
            persistent_identity,
        } => {
            let target = match (persistent_identity, target_connection) {
                (Some(identity), _) => PlayerRef::PersistentIdentity(identity),
                (None, Some(id)) => PlayerRef::ConnectionId(id),
                (None, None) => this_connection,
            };
            app_state.coordinator.eliminate(&room_code, target).await?;
        }
        ClientToServerMessage::WebrtcReady { room_code } => {
            let room_code = normalize_room_code(&room_code);
            ensure_member(app_state, connection_id, &room_code).await?;
            app_state.relay.ready(&room_code, connection_id).await;
        }
        ClientToServerMessage::WebrtcSignal {
            room_code,
            to,
            signal,
            ..
        } => {
            let room_code = normalize_room_code(&room_code);
            ensure_member(app_state, connection_id, &room_code).await?;
            app_state
                .relay
                .relay(&room_code, to, connection_id, signal)
                .await;
        }
    }
    Ok(())
}

async fn ensure_member(
    app_state: &AppState,
    connection_id: Uuid,
    room_code: &str,
) -> Result<(), GameError> {
    if app_state.hub.is_subscribed(connection_id, room_code).await {
        Ok(())
    } else {
        Err(GameError::PlayerNotFound(
            PlayerRef::ConnectionId(connection_id).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameSettings, ServerConfig};
    use crate::coordinator::RoomCoordinator;
    use crate::dictionary::Dictionary;
    use crate::hub::ConnectionHub;
    use crate::hub::test_support::{connect, drain};
    use crate::signaling::{InMemoryReadySet, SignalingRelay};
    use crate::store::RoomStoreHandle;
    use serde_json::json;
    use std::sync::Arc;

    fn app_state() -> AppState {
        let hub = ConnectionHub::new();
        let dictionary = Arc::new(Dictionary::from_words(["tiger", "rabbit"]));
        let coordinator = RoomCoordinator::new(
            Arc::new(RoomStoreHandle::spawn(32)),
            hub.clone(),
            dictionary.clone(),
            GameSettings::default(),
        );
        AppState {
            coordinator,
            relay: SignalingRelay::new(Arc::new(InMemoryReadySet::new()), hub.clone()),
            hub,
            dictionary,
            server_config: Arc::new(ServerConfig {
                port: 0,
                cors_origins: Vec::new(),
                admin_api_key: None,
            }),
        }
    }

    fn join(code: &str, identity: &str) -> ClientToServerMessage {
        ClientToServerMessage::JoinRoom {
            room_code: code.to_string(),
            persistent_identity: identity.to_string(),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn socket_commands_drive_the_room() {
        let state = app_state();
        let code = state.coordinator.create_room().await.unwrap().code;
        let (a, _a_rx) = connect(&state.hub).await;
        let (b, mut b_rx) = connect(&state.hub).await;

        dispatch(&state, a, join(&code, "alice")).await.unwrap();
        dispatch(&state, b, join(&code, "bob")).await.unwrap();

        assert_eq!(
            dispatch(
                &state,
                b,
                ClientToServerMessage::StartGame {
                    room_code: code.clone()
                }
            )
            .await,
            Err(GameError::NotHost)
        );
        dispatch(
            &state,
            a,
            ClientToServerMessage::StartGame {
                room_code: code.clone(),
            },
        )
        .await
        .unwrap();

        drain(&mut b_rx);
        dispatch(
            &state,
            a,
            ClientToServerMessage::Eliminate {
                room_code: code.clone(),
                connection_id: None,
                persistent_identity: None,
            },
        )
        .await
        .unwrap();

        let room = state.coordinator.get_room(&code).await.unwrap();
        assert!(room.players[0].is_eliminated);
        assert_eq!(room.winner_identity.as_deref(), Some("bob"));
        assert!(matches!(
            drain(&mut b_rx).last(),
            Some(ServerToClientMessage::GameOver { .. })
        ));
    }

    #[tokio::test]
    async fn queued_commands_finish_after_reader_hangs_up() {
        let state = app_state();
        let code = state.coordinator.create_room().await.unwrap().code;
        let (a, mut a_rx) = connect(&state.hub).await;

        let (tx, rx) = mpsc::channel(8);
        let commands = tokio::spawn(run_commands(state.clone(), a, rx));
        tx.send(join(&code, "alice")).await.unwrap();
        tx.send(ClientToServerMessage::StartGame {
            room_code: code.clone(),
        })
        .await
        .unwrap();
        drop(tx);
        commands.await.unwrap();

        assert_eq!(state.hub.unregister(a).await, vec![code.clone()]);
        let received = drain(&mut a_rx);
        assert!(matches!(
            received.last(),
            Some(ServerToClientMessage::Error { code, .. }) if code == "INSUFFICIENT_PLAYERS"
        ));
    }

    #[tokio::test]
    async fn signaling_requires_room_membership() {
        let state = app_state();
        let code = state.coordinator.create_room().await.unwrap().code;
        let (a, _a_rx) = connect(&state.hub).await;
        let (b, mut b_rx) = connect(&state.hub).await;
        let (outsider, _outsider_rx) = connect(&state.hub).await;

        dispatch(&state, a, join(&code, "alice")).await.unwrap();
        dispatch(&state, b, join(&code, "bob")).await.unwrap();
        drain(&mut b_rx);

        let signal = |from_room: &str| ClientToServerMessage::WebrtcSignal {
            room_code: from_room.to_string(),
            to: b,
            from: None,
            signal: json!({"type": "offer", "sdp": "v=0"}),
        };

        assert!(matches!(
            dispatch(&state, outsider, signal(&code)).await,
            Err(GameError::PlayerNotFound(_))
        ));
        assert!(drain(&mut b_rx).is_empty());

        dispatch(&state, a, signal(&code.to_lowercase())).await.unwrap();
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerToClientMessage::WebrtcSignal {
                from: a,
                signal: json!({"type": "offer", "sdp": "v=0"}),
            }]
        );
    }

    #[tokio::test]
    async fn leave_over_socket_notifies_ready_peers() {
        let state = app_state();
        let code = state.coordinator.create_room().await.unwrap().code;
        let (a, _a_rx) = connect(&state.hub).await;
        let (b, mut b_rx) = connect(&state.hub).await;

        dispatch(&state, a, join(&code, "alice")).await.unwrap();
        dispatch(&state, b, join(&code, "bob")).await.unwrap();
        for conn in [a, b] {
            dispatch(
                &state,
                conn,
                ClientToServerMessage::WebrtcReady {
                    room_code: code.clone(),
                },
            )
            .await
            .unwrap();
        }
        drain(&mut b_rx);

        dispatch(
            &state,
            a,
            ClientToServerMessage::LeaveRoom {
                room_code: code.clone(),
                persistent_identity: None,
            },
        )
        .await
        .unwrap();

        let received = drain(&mut b_rx);
        assert!(received.contains(&ServerToClientMessage::WebrtcPeerLeft {
            connection_id: a,
            room_code: code.clone(),
        }));
        assert_eq!(state.relay.ready_peers(&code).await, vec![b]);
    }
}
