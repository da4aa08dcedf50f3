use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{Result as WebResult, WebError};
use crate::dictionary::WordValidator;
use crate::game::turn::EliminationOutcome;
use crate::game::{OpenRoomSummary, PlayerRef, Room};
use crate::state::AppState;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRequest {
    pub persistent_identity: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMoveRequest {
    pub persistent_identity: String,
    pub word: String,
    #[serde(default)]
    pub turn_index: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct EliminateRequest {
    pub persistent_identity: Option<String>,
    pub connection_id: Option<Uuid>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EliminateResponse {
    pub outcome: &'static str,
    pub room: Room,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub word_count: usize,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CheckWordRequest {
    #[serde(default)]
    pub word: Option<String>,
    #[serde(default)]
    pub required_start_letter: Option<char>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct CheckWordResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Identity wins when both are given.
pub fn target_from(
    persistent_identity: Option<String>,
    connection_id: Option<Uuid>,
) -> WebResult<PlayerRef> {
    match (persistent_identity, connection_id) {
        (Some(identity), _) if !identity.trim().is_empty() => {
            Ok(PlayerRef::PersistentIdentity(identity))
        }
        (_, Some(id)) => Ok(PlayerRef::ConnectionId(id)),
        _ => Err(WebError::BadRequest(
            "Either persistentIdentity or connectionId is required".to_string(),
        )),
    }
}

fn outcome_label(outcome: EliminationOutcome) -> &'static str {
    match outcome {
        EliminationOutcome::AlreadyEliminated => "already-eliminated",
        EliminationOutcome::TurnUnchanged => "turn-unchanged",
        EliminationOutcome::TurnAdvanced => "turn-advanced",
        EliminationOutcome::GameOver => "game-over",
    }
}

pub async fn create_room_handler(
    State(app_state): State<AppState>,
) -> WebResult<(StatusCode, Json<Room>)> {
    let room = app_state.coordinator.create_room().await?;
    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn list_rooms_handler(
    State(app_state): State<AppState>,
) -> WebResult<Json<Vec<OpenRoomSummary>>> {
    Ok(Json(app_state.coordinator.list_open_rooms().await?))
}

pub async fn get_room_handler(
    State(app_state): State<AppState>,
    Path(code): Path<String>,
) -> WebResult<Json<Room>> {
    Ok(Json(app_state.coordinator.get_room(&code).await?))
}

pub async fn start_game_handler(
    State(app_state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<PlayerRequest>,
) -> WebResult<Json<Room>> {
    let room = app_state
        .coordinator
        .start_game(
            &code,
            PlayerRef::PersistentIdentity(payload.persistent_identity),
        )
        .await?;
    Ok(Json(room))
}

pub async fn submit_move_handler(
    State(app_state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<SubmitMoveRequest>,
) -> WebResult<Json<Room>> {
    let room = app_state
        .coordinator
        .submit_move(
            &code,
            PlayerRef::PersistentIdentity(payload.persistent_identity),
            &payload.word,
            payload.turn_index,
        )
        .await?;
    Ok(Json(room))
}

pub async fn eliminate_handler(
    State(app_state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<EliminateRequest>,
) -> WebResult<Json<EliminateResponse>> {
    let target = target_from(payload.persistent_identity, payload.connection_id)?;
    let outcome = app_state.coordinator.eliminate(&code, target).await?;
    let room = app_state.coordinator.get_room(&code).await?;
    Ok(Json(EliminateResponse {
        outcome: outcome_label(outcome),
        room,
    }))
}

pub async fn leave_room_handler(
    State(app_state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<PlayerRequest>,
) -> WebResult<StatusCode> {
    let departure = app_state
        .coordinator
        .leave(
            &code,
            PlayerRef::PersistentIdentity(payload.persistent_identity),
        )
        .await?;
    app_state
        .relay
        .leave(
            &crate::game::normalize_room_code(&code),
            departure.removed.connection_id,
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Dictionary lookup first, then the start letter.
pub async fn check_word(
    validator: &dyn WordValidator,
    word: &str,
    required_start_letter: Option<char>,
) -> CheckWordResponse {
    let word = word.trim();
    if !validator.contains(word).await {
        return CheckWordResponse {
            valid: false,
            message: Some("Word not in list".to_string()),
        };
    }
    if let Some(letter) = required_start_letter
        && !word
            .chars()
            .next()
            .is_some_and(|first| first.to_lowercase().eq(letter.to_lowercase()))
    {
        return CheckWordResponse {
            valid: false,
            message: Some(format!("Word must start with \"{}\"", letter)),
        };
    }
    CheckWordResponse {
        valid: true,
        message: None,
    }
}

pub async fn check_word_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<CheckWordRequest>,
) -> WebResult<Json<CheckWordResponse>> {
    let word = payload
        .word
        .filter(|word| !word.trim().is_empty())
        .ok_or_else(|| WebError::BadRequest("Word required".to_string()))?;
    Ok(Json(
        check_word(
            app_state.dictionary.as_ref(),
            &word,
            payload.required_start_letter,
        )
        .await,
    ))
}

/// Checks an `Authorization: ApiKey <key>` header against the configured key.
/// Without a configured key the endpoint is disabled.
pub fn authorize_admin(expected_key: Option<&str>, headers: &HeaderMap) -> WebResult<()> {
    let Some(expected_key) = expected_key else {
        return Err(WebError::Forbidden(
            "Admin endpoints are disabled".to_string(),
        ));
    };

    let Some(auth_header_val) = headers.get(http::header::AUTHORIZATION) else {
        tracing::warn!("Unauthorized admin request: missing Authorization header");
        return Err(WebError::Unauthorized(
            "Missing Authorization header".to_string(),
        ));
    };
    let auth_header_str = auth_header_val.to_str().unwrap_or("");
    let Some(provided_key) = auth_header_str.strip_prefix("ApiKey ") else {
        tracing::warn!("Unauthorized admin request: malformed Authorization header");
        return Err(WebError::Unauthorized(
            "Invalid Authorization header format. Expected 'ApiKey <key>'".to_string(),
        ));
    };
    if provided_key.trim() != expected_key {
        tracing::warn!("Unauthorized admin request: invalid API key");
        return Err(WebError::Unauthorized("Invalid API key".to_string()));
    }
    Ok(())
}

pub async fn refresh_dictionary_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> WebResult<Json<RefreshResponse>> {
    authorize_admin(app_state.server_config.admin_api_key.as_deref(), &headers)?;

    let word_count = app_state.dictionary.refresh().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to refresh dictionary");
        WebError::InternalServerError(format!("Failed to refresh dictionary: {}", e))
    })?;

    Ok(Json(RefreshResponse { word_count }))
}
