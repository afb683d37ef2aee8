use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Stable wire-level failure identifiers. The `Display` form of a variant is
/// exactly the identifier that appears in `{ok:false, error}` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    // Validation.
    #[error("invalid_json")]
    InvalidJson,
    #[error("body_too_large")]
    BodyTooLarge,
    #[error("invalid_size")]
    InvalidSize,
    #[error("invalid_draw_timeout_seconds")]
    InvalidDrawTimeoutSeconds,
    #[error("invalid_tooth")]
    InvalidTooth,
    #[error("invalid_tooth_count_per_jaw")]
    InvalidToothCountPerJaw,
    #[error("invalid_card_count")]
    InvalidCardCount,
    #[error("invalid_index")]
    InvalidIndex,
    #[error("invalid_number")]
    InvalidNumber,
    #[error("username_length")]
    UsernameLength,

    // Authorization.
    #[error("unauthorized")]
    Unauthorized,
    #[error("host_only")]
    HostOnly,
    #[error("not_in_room")]
    NotInRoom,
    #[error("not_your_turn")]
    NotYourTurn,

    // State.
    #[error("not_playing")]
    NotPlaying,
    #[error("room_not_joinable")]
    RoomNotJoinable,
    #[error("room_full")]
    RoomFull,
    #[error("need_two_players")]
    NeedTwoPlayers,
    #[error("no_players")]
    NoPlayers,
    #[error("number_already_called")]
    NumberAlreadyCalled,
    #[error("already_selected")]
    AlreadySelected,
    #[error("already_matched")]
    AlreadyMatched,
    #[error("already_revealed")]
    AlreadyRevealed,
    #[error("resolving")]
    Resolving,
    #[error("occupied")]
    Occupied,
    #[error("player_not_ready")]
    PlayerNotReady,

    // Not-found.
    #[error("room_not_found")]
    RoomNotFound,

    // Internal.
    #[error("room_code_collision")]
    RoomCodeCollision,
}

impl ApiError {
    fn status(self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::HostOnly | ApiError::NotInRoom | ApiError::NotYourTurn => {
                StatusCode::FORBIDDEN
            }
            ApiError::RoomNotFound => StatusCode::NOT_FOUND,
            ApiError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RoomCodeCollision => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotPlaying
            | ApiError::RoomNotJoinable
            | ApiError::RoomFull
            | ApiError::NeedTwoPlayers
            | ApiError::NoPlayers
            | ApiError::NumberAlreadyCalled
            | ApiError::AlreadySelected
            | ApiError::AlreadyMatched
            | ApiError::AlreadyRevealed
            | ApiError::Resolving
            | ApiError::Occupied
            | ApiError::PlayerNotReady => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "ok": false, "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_wire_identifier() {
        assert_eq!(ApiError::NotYourTurn.to_string(), "not_your_turn");
        assert_eq!(
            ApiError::InvalidDrawTimeoutSeconds.to_string(),
            "invalid_draw_timeout_seconds"
        );
        assert_eq!(ApiError::RoomNotFound.to_string(), "room_not_found");
    }
}
