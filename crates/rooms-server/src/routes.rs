use std::convert::Infallible;
use std::future::ready;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use rooms_core::codes;

use crate::auth::{self, LoginRequest};
use crate::error::ApiError;
use crate::rooms::{bingo, croc, gomoku, memory};
use crate::state::AppState;
use crate::subs::{self, Sink};

/// Request bodies larger than this are rejected outright.
pub const MAX_BODY_BYTES: usize = 32 * 1024;

// ── Shared plumbing ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Decode a JSON request body. Absent bodies deserialize as `{}` so that
/// operations with all-optional options accept an empty POST.
fn parse_body<T: serde::de::DeserializeOwned>(
    body: Result<Bytes, BytesRejection>,
) -> Result<T, ApiError> {
    let bytes = body.map_err(|rejection| {
        if rejection.into_response().status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::BodyTooLarge
        } else {
            ApiError::InvalidJson
        }
    })?;
    let raw: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
    serde_json::from_slice(raw).map_err(|_| ApiError::InvalidJson)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GameKind {
    Bingo,
    Croc,
    Memory,
    Gomoku,
}

impl GameKind {
    fn parse(s: &str) -> Option<GameKind> {
        match s {
            "bingo" => Some(GameKind::Bingo),
            "croc" => Some(GameKind::Croc),
            "memory" => Some(GameKind::Memory),
            "gomoku" => Some(GameKind::Gomoku),
            _ => None,
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Auth ────────────────────────────────────────────────────────────────

pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let request: LoginRequest = parse_body(body)?;
    let (token, identity) = auth::login(&state, &request.username)?;
    Ok(Json(json!({
        "ok": true,
        "token": token,
        "userId": identity.user_id,
        "username": identity.username,
    })))
}

// ── Bingo ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DrawRequest {
    number: i64,
}

pub async fn bingo_create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let opts: bingo::CreateOptions = parse_body(body)?;
    let code = bingo::create(&state, &identity, opts)?;
    Ok(Json(json!({ "ok": true, "code": code })))
}

pub async fn bingo_join(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let (room, board) = bingo::join(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true, "room": room, "board": board })))
}

pub async fn bingo_leave(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    bingo::leave(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn bingo_start(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let opts: bingo::StartOptions = parse_body(body)?;
    bingo::start(&state, &identity, &code, opts)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn bingo_draw(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let request: DrawRequest = parse_body(body)?;
    let number = bingo::draw(&state, &identity, &code, request.number)?;
    Ok(Json(json!({ "ok": true, "number": number })))
}

// ── Croc ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PickToothRequest {
    tooth: i64,
}

pub async fn croc_create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let opts: croc::CreateOptions = parse_body(body)?;
    let code = croc::create(&state, &identity, opts)?;
    Ok(Json(json!({ "ok": true, "code": code })))
}

pub async fn croc_join(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let room = croc::join(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true, "room": room })))
}

pub async fn croc_leave(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    croc::leave(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn croc_start(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    croc::start(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn croc_pick(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let request: PickToothRequest = parse_body(body)?;
    let outcome = croc::pick(&state, &identity, &code, request.tooth)?;
    Ok(Json(json!({ "ok": true, "trap": outcome.trap })))
}

// ── Memory ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PickCardRequest {
    index: i64,
}

pub async fn memory_create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let opts: memory::CreateOptions = parse_body(body)?;
    let code = memory::create(&state, &identity, opts)?;
    Ok(Json(json!({ "ok": true, "code": code })))
}

pub async fn memory_join(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let room = memory::join(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true, "room": room })))
}

pub async fn memory_leave(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    memory::leave(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn memory_start(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let opts: memory::StartOptions = parse_body(body)?;
    memory::start(&state, &identity, &code, opts)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn memory_pick(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let request: PickCardRequest = parse_body(body)?;
    let outcome = memory::pick(&state, &identity, &code, request.index)?;

    let mut body = serde_json::Map::new();
    body.insert("ok".to_string(), Value::Bool(true));
    if let Some(matched) = outcome.matched {
        body.insert("matched".to_string(), Value::Bool(matched));
    }
    if outcome.ended {
        body.insert("ended".to_string(), Value::Bool(true));
    }
    Ok(Json(Value::Object(body)))
}

// ── Gomoku ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MoveRequest {
    index: i64,
}

pub async fn gomoku_create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let code = gomoku::create(&state, &identity)?;
    Ok(Json(json!({ "ok": true, "code": code })))
}

pub async fn gomoku_join(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let room = gomoku::join(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true, "room": room })))
}

pub async fn gomoku_leave(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    gomoku::leave(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn gomoku_start(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    gomoku::start(&state, &identity, &code)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn gomoku_move(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let request: MoveRequest = parse_body(body)?;
    let outcome = gomoku::place(&state, &identity, &code, request.index)?;

    let mut body = serde_json::Map::new();
    body.insert("ok".to_string(), Value::Bool(true));
    if outcome.ended {
        body.insert("ended".to_string(), Value::Bool(true));
    }
    if outcome.draw {
        body.insert("draw".to_string(), Value::Bool(true));
    }
    Ok(Json(Value::Object(body)))
}

// ── Event stream ────────────────────────────────────────────────────────

/// Releases a subscription when the client's stream winds down, however it
/// ends: presence is reference-counted, so only the matching sink goes.
struct StreamGuard {
    state: Arc<AppState>,
    kind: GameKind,
    code: String,
    user_id: i64,
    sink_id: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        match self.kind {
            GameKind::Bingo => {
                bingo::unsubscribe(&self.state, &self.code, self.user_id, self.sink_id)
            }
            GameKind::Croc => croc::unsubscribe(&self.state, &self.code, self.user_id, self.sink_id),
            GameKind::Memory => {
                memory::unsubscribe(&self.state, &self.code, self.user_id, self.sink_id)
            }
            GameKind::Gomoku => {
                gomoku::unsubscribe(&self.state, &self.code, self.user_id, self.sink_id)
            }
        }
    }
}

pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Path((game, code)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let identity = auth::authenticate(&state, &headers, query.token.as_deref())?;
    let kind = GameKind::parse(&game).ok_or(ApiError::RoomNotFound)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Sink {
        id: state.next_sink_id.fetch_add(1, Ordering::Relaxed),
        user_id: identity.user_id,
        tx: tx.clone(),
    };
    let sink_id = sink.id;

    match kind {
        GameKind::Bingo => bingo::subscribe(&state, &identity, &code, sink)?,
        GameKind::Croc => croc::subscribe(&state, &identity, &code, sink)?,
        GameKind::Memory => memory::subscribe(&state, &identity, &code, sink)?,
        GameKind::Gomoku => gomoku::subscribe(&state, &identity, &code, sink)?,
    }
    subs::spawn_heartbeat(tx);

    let guard = StreamGuard {
        state,
        kind,
        code: codes::normalize(&code),
        user_id: identity.user_id,
        sink_id,
    };
    let stream = UnboundedReceiverStream::new(rx)
        .map(move |payload| {
            let _keep = &guard;
            payload.into_event()
        })
        .take_while(|event| ready(event.is_some()))
        .filter_map(|event| ready(event.map(Ok::<_, Infallible>)));

    Ok(Sse::new(stream))
}
