pub mod auth;
pub mod error;
pub mod rooms;
pub mod routes;
pub mod state;
pub mod subs;
pub mod turns;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build a fully configured Router + shared state.
pub fn build_app() -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new());

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/auth/login", post(routes::login))
        .route("/create/bingo", post(routes::bingo_create))
        .route("/create/croc", post(routes::croc_create))
        .route("/create/memory", post(routes::memory_create))
        .route("/create/gomoku", post(routes::gomoku_create))
        .route("/bingo/{code}/join", post(routes::bingo_join))
        .route("/bingo/{code}/leave", post(routes::bingo_leave))
        .route("/bingo/{code}/start", post(routes::bingo_start))
        .route("/bingo/{code}/draw", post(routes::bingo_draw))
        .route("/croc/{code}/join", post(routes::croc_join))
        .route("/croc/{code}/leave", post(routes::croc_leave))
        .route("/croc/{code}/start", post(routes::croc_start))
        .route("/croc/{code}/pick", post(routes::croc_pick))
        .route("/memory/{code}/join", post(routes::memory_join))
        .route("/memory/{code}/leave", post(routes::memory_leave))
        .route("/memory/{code}/start", post(routes::memory_start))
        .route("/memory/{code}/pick", post(routes::memory_pick))
        .route("/gomoku/{code}/join", post(routes::gomoku_join))
        .route("/gomoku/{code}/leave", post(routes::gomoku_leave))
        .route("/gomoku/{code}/start", post(routes::gomoku_start))
        .route("/gomoku/{code}/move", post(routes::gomoku_move))
        .route("/stream/{game}/{code}", get(routes::stream))
        .layer(DefaultBodyLimit::max(routes::MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}
