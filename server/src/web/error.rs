use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::game::GameError;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Game(#[from] GameError),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

fn game_status(error: &GameError) -> StatusCode {
    match error {
        GameError::RoomNotFound(_) | GameError::PlayerNotFound(_) => StatusCode::NOT_FOUND,
        GameError::InvalidMove(_) | GameError::InsufficientPlayers { .. } => {
            StatusCode::BAD_REQUEST
        }
        GameError::NotHost => StatusCode::FORBIDDEN,
        GameError::NotYourTurn
        | GameError::StaleTurn { .. }
        | GameError::GameNotStarted
        | GameError::GameAlreadyStarted
        | GameError::GameFinished
        | GameError::RoomFull(_)
        | GameError::Contention(_) => StatusCode::CONFLICT,
        GameError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebError::Forbidden(_) => StatusCode::FORBIDDEN,
            WebError::Game(err) => game_status(err),
            WebError::InternalServerError(_) | WebError::JsonSerialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            WebError::BadRequest(_) => "BAD_REQUEST",
            WebError::Unauthorized(_) => "UNAUTHORIZED",
            WebError::Forbidden(_) => "FORBIDDEN",
            WebError::Game(err) => err.code(),
            WebError::InternalServerError(_) | WebError::JsonSerialization(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T, E = WebError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_errors_map_to_http_statuses() {
        let cases = [
            (GameError::RoomNotFound("ABC123".into()), StatusCode::NOT_FOUND),
            (
                GameError::InvalidMove("nope".into()),
                StatusCode::BAD_REQUEST,
            ),
            (GameError::NotYourTurn, StatusCode::CONFLICT),
            (
                GameError::StaleTurn {
                    submitted: 0,
                    current: 1,
                },
                StatusCode::CONFLICT,
            ),
            (GameError::NotHost, StatusCode::FORBIDDEN),
            (
                GameError::Store("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(WebError::from(error).status(), status);
        }
    }

    #[test]
    fn response_carries_status() {
        let response = WebError::Unauthorized("Missing key".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
