use thiserror::Error;

/// Errors returned to the connection or request that triggered an operation.
/// None of them are broadcast.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Room {0} not found")]
    RoomNotFound(String),
    #[error("At least {required} players are required to start, room has {present}")]
    InsufficientPlayers { required: usize, present: usize },
    #[error("Invalid move: {0}")]
    InvalidMove(String),
    #[error("It is not your turn")]
    NotYourTurn,
    #[error("Move was made against turn {submitted} but the room is on turn {current}")]
    StaleTurn { submitted: usize, current: usize },
    #[error("Player ({0}) is not in this room")]
    PlayerNotFound(String),
    #[error("Only the host can start the game")]
    NotHost,
    #[error("The game has not started yet")]
    GameNotStarted,
    #[error("The game is already in progress")]
    GameAlreadyStarted,
    #[error("The game has finished, create a new room to play again")]
    GameFinished,
    #[error("Room {0} is full")]
    RoomFull(String),
    #[error("Room {0} kept changing underneath the update, retry")]
    Contention(String),
    #[error("Room store error: {0}")]
    Store(String),
}

impl GameError {
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            GameError::InsufficientPlayers { .. } => "INSUFFICIENT_PLAYERS",
            GameError::InvalidMove(_) => "INVALID_MOVE",
            GameError::NotYourTurn => "NOT_YOUR_TURN",
            GameError::StaleTurn { .. } => "STALE_TURN",
            GameError::PlayerNotFound(_) => "PLAYER_NOT_FOUND",
            GameError::NotHost => "NOT_HOST",
            GameError::GameNotStarted => "GAME_NOT_STARTED",
            GameError::GameAlreadyStarted => "GAME_ALREADY_STARTED",
            GameError::GameFinished => "GAME_FINISHED",
            GameError::RoomFull(_) => "ROOM_FULL",
            GameError::Contention(_) => "CONTENTION",
            GameError::Store(_) => "STORE_ERROR",
        }
    }
}
