use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::GameSettings;
use crate::dictionary::WordValidator;
use crate::game::messages::WinnerInfo;
use crate::game::turn::{self, Departure, EliminationOutcome};
use crate::game::{
    GameError, MIN_PLAYERS_TO_START, OpenRoomSummary, Player, PlayerRef, Room, RoomPhase,
    ServerToClientMessage, generate_room_code, normalize_room_code, random_start_letter,
};
use crate::hub::ConnectionHub;
use crate::store::{RoomStore, StoreError};

/// When each idle room was first seen idle, keyed by code, together with the
/// version it had then. A newer version restarts the clock.
pub type IdleRooms = HashMap<String, (u64, Instant)>;

/// Result of a pure transition, telling `update_room` what to persist.
enum Mutation<T> {
    Write(Room, T),
    Delete(Room, T),
    Unchanged(Room, T),
}

struct CoordinatorInner {
    store: Arc<dyn RoomStore>,
    hub: ConnectionHub,
    validator: Arc<dyn WordValidator>,
    settings: GameSettings,
}

/// Single mutation path for room state. Both the WebSocket and the HTTP
/// adapters call into this.
///
/// Every operation reads the room, runs a pure transition, and writes it
/// back conditionally on the version it read. Broadcasts only go out after
/// the write has landed.
#[derive(Clone)]
pub struct RoomCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RoomCoordinator {
    pub fn new(
        store: Arc<dyn RoomStore>,
        hub: ConnectionHub,
        validator: Arc<dyn WordValidator>,
        settings: GameSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                hub,
                validator,
                settings,
            }),
        }
    }

    async fn load(&self, code: &str) -> Result<Room, GameError> {
        self.inner
            .store
            .get(code)
            .await?
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))
    }

    async fn update_room<T, F>(&self, code: &str, mut apply: F) -> Result<(Room, T), GameError>
    where
        F: FnMut(Room) -> Result<Mutation<T>, GameError>,
    {
        for attempt in 1..=self.inner.settings.max_update_retries {
            let room = self.load(code).await?;
            let expected_version = room.version;
            let outcome = match apply(room)? {
                Mutation::Unchanged(room, out) => return Ok((room, out)),
                Mutation::Write(next, out) => self
                    .inner
                    .store
                    .compare_and_swap(next, expected_version)
                    .await
                    .map(|saved| (saved, out)),
                Mutation::Delete(last, out) => self
                    .inner
                    .store
                    .delete(code, expected_version)
                    .await
                    .map(|()| (last, out)),
            };
            match outcome {
                Ok(done) => return Ok(done),
                Err(StoreError::Conflict { found, .. }) => {
                    tracing::debug!(
                        room.code = %code,
                        attempt,
                        room.version.expected = expected_version,
                        room.version.found = found,
                        "Room changed concurrently, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::warn!(room.code = %code, "Giving up on contended room update");
        Err(GameError::Contention(code.to_string()))
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_room(&self) -> Result<Room, GameError> {
        for _ in 0..self.inner.settings.max_update_retries {
            match self.inner.store.insert(Room::new(generate_room_code())).await {
                Ok(room) => {
                    tracing::info!(room.code = %room.code, "Room created");
                    return Ok(room);
                }
                Err(StoreError::AlreadyExists(code)) => {
                    tracing::debug!(room.code = %code, "Room code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GameError::Store(
            "Could not allocate a unique room code".to_string(),
        ))
    }

    pub async fn get_room(&self, code: &str) -> Result<Room, GameError> {
        self.load(&normalize_room_code(code)).await
    }

    pub async fn list_open_rooms(&self) -> Result<Vec<OpenRoomSummary>, GameError> {
        let mut rooms: Vec<Room> = self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .filter(|room| room.phase() == RoomPhase::Lobby)
            .collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rooms.iter().map(OpenRoomSummary::from).collect())
    }

    /// Registers a new seat or moves an existing one to this connection.
    #[tracing::instrument(skip(self, display_name), fields(connection.id = %connection_id))]
    pub async fn join(
        &self,
        code: &str,
        persistent_identity: &str,
        display_name: Option<String>,
        connection_id: Uuid,
    ) -> Result<Room, GameError> {
        let code = normalize_room_code(code);
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let max_players = self.inner.settings.max_players;

        let (room, previous_connection) = self
            .update_room(&code, |mut room| {
                if let Some(index) = room
                    .players
                    .iter()
                    .position(|p| p.persistent_identity == persistent_identity)
                {
                    let seat = &mut room.players[index];
                    let previous = seat.connection_id;
                    seat.connection_id = connection_id;
                    if let Some(name) = &display_name {
                        seat.display_name = name.clone();
                    }
                    return Ok(Mutation::Write(room, Some(previous)));
                }

                match room.phase() {
                    RoomPhase::Lobby => {}
                    RoomPhase::Active => return Err(GameError::GameAlreadyStarted),
                    RoomPhase::Finished => return Err(GameError::GameFinished),
                }
                if room.players.len() >= max_players {
                    return Err(GameError::RoomFull(room.code.clone()));
                }

                let mut player = Player::new(
                    connection_id,
                    persistent_identity.to_string(),
                    display_name
                        .clone()
                        .unwrap_or_else(|| persistent_identity.to_string()),
                );
                player.is_host = room.players.is_empty();
                room.players.push(player);
                Ok(Mutation::Write(room, None))
            })
            .await?;

        let hub = &self.inner.hub;
        if let Some(previous) = previous_connection
            && previous != connection_id
        {
            hub.unsubscribe(previous, &code).await;
        }
        hub.subscribe(connection_id, &code).await;

        tracing::info!(
            room.code = %code,
            player.identity = %persistent_identity,
            reconnect = previous_connection.is_some(),
            players.count = room.players.len(),
            "Player joined room"
        );

        hub.send_to(
            connection_id,
            &ServerToClientMessage::RoomState { room: room.clone() },
        )
        .await;
        hub.broadcast(
            &code,
            &ServerToClientMessage::PlayerJoined {
                players: room.players.clone(),
                host_identity: room.host_identity().map(str::to_string),
            },
        )
        .await;

        Ok(room)
    }

    /// Explicit leave. Removes the seat and may end the game.
    #[tracing::instrument(skip(self))]
    pub async fn leave(&self, code: &str, who: PlayerRef) -> Result<Departure, GameError> {
        let code = normalize_room_code(code);
        let reassign_host = self.inner.settings.reassign_host;

        let (room, departure) = self
            .update_room(&code, |room| {
                let (next, departure) = turn::apply_departure(room, &who, reassign_host)?;
                if departure.room_empty {
                    Ok(Mutation::Delete(next, departure))
                } else {
                    Ok(Mutation::Write(next, departure))
                }
            })
            .await?;

        let hub = &self.inner.hub;
        hub.unsubscribe(departure.removed.connection_id, &code).await;

        tracing::info!(
            room.code = %code,
            player.identity = %departure.removed.persistent_identity,
            room.deleted = departure.room_empty,
            host.reassigned_to = ?departure.new_host,
            "Player left room"
        );

        if departure.room_empty {
            return Ok(departure);
        }

        hub.broadcast(
            &code,
            &ServerToClientMessage::PlayerLeft {
                players: room.players.clone(),
                host_identity: room.host_identity().map(str::to_string),
            },
        )
        .await;

        if departure.game_over {
            self.announce_winner(&room).await;
        } else if departure.turn_changed {
            hub.broadcast(
                &code,
                &ServerToClientMessage::TurnChanged {
                    current_turn_index: room.current_turn_index,
                },
            )
            .await;
            self.schedule_turn_deadline(&room);
        }

        Ok(departure)
    }

    pub async fn start_game(&self, code: &str, requester: PlayerRef) -> Result<Room, GameError> {
        self.start_game_with_letter(code, requester, random_start_letter())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub(crate) async fn start_game_with_letter(
        &self,
        code: &str,
        requester: PlayerRef,
        start_letter: char,
    ) -> Result<Room, GameError> {
        let code = normalize_room_code(code);

        let (room, ()) = self
            .update_room(&code, |room| {
                let is_host = room
                    .player(&requester)
                    .map(|player| player.is_host)
                    .ok_or_else(|| GameError::PlayerNotFound(requester.to_string()))?;
                match room.phase() {
                    RoomPhase::Lobby => {}
                    RoomPhase::Active => return Err(GameError::GameAlreadyStarted),
                    RoomPhase::Finished => return Err(GameError::GameFinished),
                }
                if room.players.len() < MIN_PLAYERS_TO_START {
                    return Err(GameError::InsufficientPlayers {
                        required: MIN_PLAYERS_TO_START,
                        present: room.players.len(),
                    });
                }
                if !is_host {
                    return Err(GameError::NotHost);
                }
                Ok(Mutation::Write(turn::start_game(room, start_letter), ()))
            })
            .await?;

        let expected_start_letter = room.expected_start_letter.unwrap_or(start_letter);
        tracing::info!(
            room.code = %code,
            players.count = room.players.len(),
            start_letter = %expected_start_letter,
            "Game started"
        );

        self.inner
            .hub
            .broadcast(
                &code,
                &ServerToClientMessage::GameStarted {
                    expected_start_letter,
                    current_turn_index: room.current_turn_index,
                    players: room.players.clone(),
                },
            )
            .await;
        self.schedule_turn_deadline(&room);

        Ok(room)
    }

    /// Attempts a move. `expected_turn` is the turn index the client saw; when
    /// absent the index read on the first attempt is used. Either way a move
    /// whose turn has moved on is rejected with `StaleTurn`.
    #[tracing::instrument(skip(self))]
    pub async fn submit_move(
        &self,
        code: &str,
        who: PlayerRef,
        word: &str,
        expected_turn: Option<usize>,
    ) -> Result<Room, GameError> {
        let code = normalize_room_code(code);
        let word = word.trim();
        let mut baseline: Option<(usize, u64)> = None;

        for attempt in 1..=self.inner.settings.max_update_retries {
            let room = self.load(&code).await?;
            match room.phase() {
                RoomPhase::Lobby => return Err(GameError::GameNotStarted),
                RoomPhase::Finished => return Err(GameError::GameFinished),
                RoomPhase::Active => {}
            }

            let (turn_index, turn_number) = *baseline.get_or_insert((
                expected_turn.unwrap_or(room.current_turn_index),
                room.turn_number,
            ));
            if room.current_turn_index != turn_index || room.turn_number != turn_number {
                tracing::debug!(
                    room.code = %code,
                    turn.submitted = turn_index,
                    turn.current = room.current_turn_index,
                    "Rejecting move for stale turn"
                );
                return Err(GameError::StaleTurn {
                    submitted: turn_index,
                    current: room.current_turn_index,
                });
            }

            let active = room.active_player().ok_or(GameError::NotYourTurn)?;
            if !who.matches(active) {
                if room.player(&who).is_none() {
                    return Err(GameError::PlayerNotFound(who.to_string()));
                }
                return Err(GameError::NotYourTurn);
            }
            if active.is_eliminated {
                return Err(GameError::NotYourTurn);
            }

            self.validate_word(&room, word).await?;

            let expected_version = room.version;
            let next = turn::apply_submission(room, word);
            match self
                .inner
                .store
                .compare_and_swap(next, expected_version)
                .await
            {
                Ok(saved) => {
                    tracing::info!(
                        room.code = %code,
                        word = %word,
                        turn.index = saved.current_turn_index,
                        "Move accepted"
                    );
                    let hub = &self.inner.hub;
                    hub.broadcast(
                        &code,
                        &ServerToClientMessage::MoveAccepted {
                            word: word.to_string(),
                            expected_start_letter: saved.expected_start_letter,
                        },
                    )
                    .await;
                    hub.broadcast(
                        &code,
                        &ServerToClientMessage::TurnChanged {
                            current_turn_index: saved.current_turn_index,
                        },
                    )
                    .await;
                    self.schedule_turn_deadline(&saved);
                    return Ok(saved);
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(room.code = %code, attempt, "Move raced another update, re-checking");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GameError::Contention(code))
    }

    async fn validate_word(&self, room: &Room, word: &str) -> Result<(), GameError> {
        let first = word
            .chars()
            .next()
            .ok_or_else(|| GameError::InvalidMove("Word is empty".to_string()))?;
        if let Some(expected) = room.expected_start_letter
            && !first.to_uppercase().eq(expected.to_uppercase())
        {
            return Err(GameError::InvalidMove(format!(
                "Word must start with \"{}\"",
                expected
            )));
        }
        if !self.inner.validator.contains(word).await {
            return Err(GameError::InvalidMove(format!(
                "\"{}\" is not in the word list",
                word
            )));
        }
        Ok(())
    }

    /// Marks a player eliminated. Repeating it is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn eliminate(
        &self,
        code: &str,
        target: PlayerRef,
    ) -> Result<EliminationOutcome, GameError> {
        let code = normalize_room_code(code);

        let (room, outcome) = self
            .update_room(&code, |room| {
                let already_out = room
                    .player(&target)
                    .map(|player| player.is_eliminated)
                    .ok_or_else(|| GameError::PlayerNotFound(target.to_string()))?;
                if already_out {
                    return Ok(Mutation::Unchanged(
                        room,
                        EliminationOutcome::AlreadyEliminated,
                    ));
                }
                match room.phase() {
                    RoomPhase::Lobby => return Err(GameError::GameNotStarted),
                    RoomPhase::Finished => return Err(GameError::GameFinished),
                    RoomPhase::Active => {}
                }
                let (next, outcome) = turn::apply_elimination(room, &target)?;
                Ok(Mutation::Write(next, outcome))
            })
            .await?;

        self.publish_elimination(&room, &target, outcome).await;
        Ok(outcome)
    }

    async fn publish_elimination(
        &self,
        room: &Room,
        target: &PlayerRef,
        outcome: EliminationOutcome,
    ) {
        if outcome == EliminationOutcome::AlreadyEliminated {
            tracing::debug!(
                room.code = %room.code,
                target = %target,
                "AlreadyEliminated, nothing to do"
            );
            return;
        }

        let hub = &self.inner.hub;
        if let Some(player) = room.player(target) {
            tracing::info!(
                room.code = %room.code,
                player.identity = %player.persistent_identity,
                players.remaining = room.remaining_count(),
                outcome = ?outcome,
                "Player eliminated"
            );
            hub.broadcast(
                &room.code,
                &ServerToClientMessage::PlayerEliminated {
                    connection_id: player.connection_id,
                    persistent_identity: player.persistent_identity.clone(),
                },
            )
            .await;
        }

        match outcome {
            EliminationOutcome::GameOver => self.announce_winner(room).await,
            EliminationOutcome::TurnAdvanced => {
                hub.broadcast(
                    &room.code,
                    &ServerToClientMessage::TurnChanged {
                        current_turn_index: room.current_turn_index,
                    },
                )
                .await;
                self.schedule_turn_deadline(room);
            }
            EliminationOutcome::TurnUnchanged | EliminationOutcome::AlreadyEliminated => {}
        }
    }

    async fn announce_winner(&self, room: &Room) {
        let Some(winner) = room.winner() else {
            tracing::warn!(room.code = %room.code, "Game over without a seated winner");
            return;
        };
        tracing::info!(
            room.code = %room.code,
            winner.identity = %winner.persistent_identity,
            "Game over"
        );
        self.inner
            .hub
            .broadcast(
                &room.code,
                &ServerToClientMessage::GameOver {
                    winner: WinnerInfo::from(winner),
                },
            )
            .await;
    }

    fn schedule_turn_deadline(&self, room: &Room) {
        let Some(timeout) = self.inner.settings.turn_timeout() else {
            return;
        };
        if room.phase() != RoomPhase::Active {
            return;
        }
        let coordinator = self.clone();
        let code = room.code.clone();
        let turn_number = room.turn_number;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = coordinator.expire_turn(&code, turn_number).await {
                tracing::debug!(room.code = %code, error = %e, "Turn deadline not applied");
            }
        });
    }

    /// Eliminates whoever holds the turn if the room is still on
    /// `turn_number`. Later turns make this a no-op.
    pub async fn expire_turn(
        &self,
        code: &str,
        turn_number: u64,
    ) -> Result<Option<EliminationOutcome>, GameError> {
        let (room, expired) = self
            .update_room(code, |room| {
                if room.phase() != RoomPhase::Active || room.turn_number != turn_number {
                    return Ok(Mutation::Unchanged(room, None));
                }
                let target = room
                    .active_player()
                    .map(|p| PlayerRef::PersistentIdentity(p.persistent_identity.clone()));
                let Some(target) = target else {
                    return Ok(Mutation::Unchanged(room, None));
                };
                let (next, outcome) = turn::apply_elimination(room, &target)?;
                Ok(Mutation::Write(next, Some((target, outcome))))
            })
            .await?;

        let Some((target, outcome)) = expired else {
            return Ok(None);
        };
        tracing::info!(room.code = %code, turn.number = turn_number, "Turn deadline expired");
        self.publish_elimination(&room, &target, outcome).await;
        Ok(Some(outcome))
    }

    /// Called when a socket drops without an explicit leave. The seat is
    /// released after the grace period unless the player reconnected.
    pub fn connection_lost(&self, connection_id: Uuid, room_codes: Vec<String>) {
        let Some(grace) = self.inner.settings.disconnect_grace() else {
            tracing::debug!(connection.id = %connection_id, "Keeping seats of dropped connection");
            return;
        };
        for code in room_codes {
            let coordinator = self.clone();
            tokio::spawn(async move {
                if !grace.is_zero() {
                    tokio::time::sleep(grace).await;
                }
                coordinator.release_abandoned_seat(&code, connection_id).await;
            });
        }
    }

    pub async fn release_abandoned_seat(&self, code: &str, connection_id: Uuid) {
        match self.leave(code, PlayerRef::ConnectionId(connection_id)).await {
            Ok(_) => tracing::info!(
                room.code = %code,
                connection.id = %connection_id,
                "Released seat after disconnect grace period"
            ),
            Err(GameError::PlayerNotFound(_)) | Err(GameError::RoomNotFound(_)) => {
                tracing::debug!(
                    room.code = %code,
                    connection.id = %connection_id,
                    "Seat already reclaimed or gone"
                );
            }
            Err(e) => tracing::warn!(
                room.code = %code,
                connection.id = %connection_id,
                error = %e,
                "Failed to release abandoned seat"
            ),
        }
    }

    /// Starts the periodic sweep that deletes idle rooms. Returns `None` when
    /// idle rooms are kept forever.
    pub fn spawn_idle_room_reaper(&self) -> Option<JoinHandle<()>> {
        let ttl = self.inner.settings.idle_room_ttl()?;
        let interval = self.inner.settings.room_sweep_interval();
        tracing::info!(
            reaper.ttl_seconds = ttl.as_secs(),
            reaper.interval_seconds = interval.as_secs(),
            "Idle room reaper started"
        );
        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            let mut idle = IdleRooms::new();
            loop {
                tokio::time::sleep(interval).await;
                coordinator.reap_idle_rooms(&mut idle, ttl).await;
            }
        }))
    }

    async fn is_idle(&self, room: &Room) -> bool {
        for player in &room.players {
            if self.inner.hub.is_connected(player.connection_id).await {
                return false;
            }
        }
        true
    }

    /// One sweep. A room is idle when it has no seats or none of its seats
    /// has a live connection; it is deleted once it has stayed idle, at the
    /// same version, for `ttl`. Returns how many rooms were deleted.
    pub async fn reap_idle_rooms(&self, idle: &mut IdleRooms, ttl: Duration) -> usize {
        let rooms = match self.inner.store.list().await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::warn!(error = %e, "Idle room sweep could not list rooms");
                return 0;
            }
        };

        let now = Instant::now();
        let mut seen = Vec::with_capacity(rooms.len());
        let mut reaped = 0;
        for room in rooms {
            if !self.is_idle(&room).await {
                idle.remove(&room.code);
                continue;
            }
            let since = idle.entry(room.code.clone()).or_insert((room.version, now));
            if since.0 != room.version {
                *since = (room.version, now);
            }
            if now.duration_since(since.1) < ttl {
                seen.push(room.code);
                continue;
            }

            match self.inner.store.delete(&room.code, room.version).await {
                Ok(()) => {
                    reaped += 1;
                    tracing::info!(
                        room.code = %room.code,
                        players.count = room.players.len(),
                        "Deleted idle room"
                    );
                }
                Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound(_)) => {
                    tracing::debug!(room.code = %room.code, "Idle room changed before delete");
                }
                Err(e) => {
                    tracing::warn!(room.code = %room.code, error = %e, "Failed to delete idle room");
                    seen.push(room.code);
                }
            }
        }
        idle.retain(|code, _| seen.contains(code));
        reaped
    }
}
