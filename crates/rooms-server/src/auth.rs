use std::sync::atomic::Ordering;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;

use rooms_core::Identity;
use rooms_core::codes;

use crate::error::ApiError;
use crate::state::AppState;

const TOKEN_LEN: usize = 32;
const MAX_USERNAME_CHARS: usize = 16;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

/// Mint an in-memory session for `username`, returning the bearer token and
/// the identity it resolves to. User ids are positive and monotonically
/// increasing, so they never collide with the bot sentinel.
pub fn login(state: &AppState, username: &str) -> Result<(String, Identity), ApiError> {
    let username = username.trim();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::UsernameLength);
    }

    let user_id = state.next_user_id.fetch_add(1, Ordering::Relaxed);
    let identity = Identity {
        user_id,
        username: username.to_string(),
    };
    let token = codes::random_code(TOKEN_LEN);
    state.sessions.insert(token.clone(), identity.clone());
    tracing::info!(user_id, username, "session created");
    Ok((token, identity))
}

/// Resolve the caller identity from a bearer header or, for transports that
/// cannot set headers (EventSource), a `token` query parameter.
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    token_query: Option<&str>,
) -> Result<Identity, ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let token = bearer.or(token_query).ok_or(ApiError::Unauthorized)?;

    state
        .sessions
        .get(token)
        .map(|entry| entry.value().clone())
        .ok_or(ApiError::Unauthorized)
}
