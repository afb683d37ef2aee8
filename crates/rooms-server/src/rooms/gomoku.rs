use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use rooms_core::gomoku;
use rooms_core::{Identity, Stone, codes};

use crate::error::ApiError;
use crate::rooms::{RoomCore, RoomStatus, now_iso};
use crate::state::AppState;
use crate::subs::{self, Sink};

/// Exactly two seats.
const MAX_PLAYERS: usize = 2;

#[derive(Debug)]
pub struct GomokuRoom {
    pub core: RoomCore,
    pub board: Vec<Option<Stone>>,
    pub winner: Option<(i64, String, Stone)>,
    pub draw: bool,
    pub last_move_index: Option<usize>,
    pub last_move_by_user_id: Option<i64>,
    pub players: Vec<GomokuPlayer>,
}

#[derive(Debug, Clone)]
pub struct GomokuPlayer {
    pub user_id: i64,
    pub username: String,
    pub joined_at: String,
    pub stone: Option<Stone>,
}

impl GomokuPlayer {
    fn new(identity: &Identity, stone: Option<Stone>) -> Self {
        GomokuPlayer {
            user_id: identity.user_id,
            username: identity.username.clone(),
            joined_at: now_iso(),
            stone,
        }
    }
}

/// Result of a move, surfaced in the response payload.
pub struct MoveOutcome {
    pub ended: bool,
    pub draw: bool,
}

// ── Operations ──────────────────────────────────────────────────────────

pub fn create(state: &Arc<AppState>, identity: &Identity) -> Result<String, ApiError> {
    state.gomoku.create_with(|code| GomokuRoom {
        core: RoomCore::new(code, identity.user_id),
        board: vec![None; gomoku::CELL_COUNT],
        winner: None,
        draw: false,
        last_move_index: None,
        last_move_by_user_id: None,
        players: vec![GomokuPlayer::new(identity, Some(Stone::Black))],
    })
}

pub fn join(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<Value, ApiError> {
    let mut room = state.gomoku.lock(code)?;
    let room = &mut *room;

    if room.players.iter().any(|p| p.user_id == identity.user_id) {
        return Ok(snapshot_value(room));
    }
    if room.core.status != RoomStatus::Lobby {
        return Err(ApiError::RoomNotJoinable);
    }
    if room.players.len() >= MAX_PLAYERS {
        return Err(ApiError::RoomFull);
    }

    // Deterministic assignment: the newcomer takes whichever color is free,
    // black if both somehow are.
    let black_taken = room
        .players
        .iter()
        .any(|p| p.stone == Some(Stone::Black));
    let stone = if black_taken { Stone::White } else { Stone::Black };
    room.players.push(GomokuPlayer::new(identity, Some(stone)));
    broadcast(room);
    Ok(snapshot_value(room))
}

pub fn leave(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<(), ApiError> {
    let canonical = codes::normalize(code);
    let emptied = {
        let mut room = state.gomoku.lock(code)?;
        let room = &mut *room;

        let Some(pos) = room
            .players
            .iter()
            .position(|p| p.user_id == identity.user_id)
        else {
            return Ok(());
        };
        room.players.remove(pos);
        room.core.evict_presence(identity.user_id);

        if room.core.host_user_id == Some(identity.user_id) {
            room.core.host_user_id = room.players.first().map(|p| p.user_id);
        }

        if room.core.status == RoomStatus::Playing {
            room.core.turns.remove(identity.user_id);
            // Winner by forfeit: a game cannot continue one-handed.
            if room.players.len() < MAX_PLAYERS {
                room.winner = room.players.first().and_then(|p| {
                    p.stone.map(|stone| (p.user_id, p.username.clone(), stone))
                });
                room.core.status = RoomStatus::Ended;
                room.core.turns.clear();
            }
        }

        if room.players.is_empty() {
            room.core.close_all();
            true
        } else {
            broadcast(room);
            false
        }
    };

    if emptied {
        state.gomoku.remove_if_empty(&canonical, |room| room.players.is_empty());
    }
    Ok(())
}

pub fn start(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<(), ApiError> {
    let mut room = state.gomoku.lock(code)?;
    let room = &mut *room;

    if room.core.host_user_id != Some(identity.user_id) {
        return Err(ApiError::HostOnly);
    }
    if room.core.status != RoomStatus::Lobby {
        return Err(ApiError::RoomNotJoinable);
    }
    if room.players.len() != MAX_PLAYERS {
        return Err(ApiError::NeedTwoPlayers);
    }

    room.board = vec![None; gomoku::CELL_COUNT];
    room.winner = None;
    room.draw = false;
    room.last_move_index = None;
    room.last_move_by_user_id = None;
    room.core.status = RoomStatus::Playing;
    let ids: Vec<i64> = room.players.iter().map(|p| p.user_id).collect();
    room.core.turns.seed(ids);
    // First in join order opens with black.
    for (i, player) in room.players.iter_mut().enumerate() {
        player.stone = Some(if i == 0 { Stone::Black } else { Stone::White });
    }
    broadcast(room);
    Ok(())
}

pub fn place(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    index: i64,
) -> Result<MoveOutcome, ApiError> {
    let mut room = state.gomoku.lock(code)?;
    let room = &mut *room;

    if !room
        .players
        .iter()
        .any(|p| p.user_id == identity.user_id)
    {
        return Err(ApiError::NotInRoom);
    }
    if room.core.status != RoomStatus::Playing {
        return Err(ApiError::NotPlaying);
    }
    let stone = room
        .players
        .iter()
        .find(|p| p.user_id == identity.user_id)
        .and_then(|p| p.stone)
        .ok_or(ApiError::PlayerNotReady)?;
    if room.core.turn_user_id() != Some(identity.user_id) {
        return Err(ApiError::NotYourTurn);
    }
    if !(0..gomoku::CELL_COUNT as i64).contains(&index) {
        return Err(ApiError::InvalidIndex);
    }
    let index = index as usize;
    if room.board[index].is_some() {
        return Err(ApiError::Occupied);
    }

    room.board[index] = Some(stone);
    room.last_move_index = Some(index);
    room.last_move_by_user_id = Some(identity.user_id);

    let won = gomoku::is_winning_move(&room.board, index);
    let full = !won && gomoku::is_full(&room.board);
    if won {
        room.winner = Some((identity.user_id, identity.username.clone(), stone));
        room.core.status = RoomStatus::Ended;
        room.core.turns.clear();
    } else if full {
        room.draw = true;
        room.core.status = RoomStatus::Ended;
        room.core.turns.clear();
    } else {
        room.core.turns.advance();
    }

    broadcast(room);
    Ok(MoveOutcome {
        ended: won || full,
        draw: full,
    })
}

pub fn subscribe(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    sink: Sink,
) -> Result<(), ApiError> {
    let mut room = state.gomoku.lock(code)?;
    let room = &mut *room;

    if !room
        .players
        .iter()
        .any(|p| p.user_id == identity.user_id)
    {
        return Err(ApiError::NotInRoom);
    }

    let handle = sink.clone();
    room.core.attach(sink);
    let snapshot = snapshot_string(room);
    handle.send_event("state", &snapshot);
    subs::broadcast(&room.core.subscribers, "state", &snapshot);
    Ok(())
}

pub fn unsubscribe(state: &AppState, code: &str, user_id: i64, sink_id: u64) {
    let Ok(mut room) = state.gomoku.lock(code) else {
        return;
    };
    let room = &mut *room;
    if room.core.detach(user_id, sink_id) {
        broadcast(room);
    }
}

// ── Snapshot ────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSnapshot<'a> {
    user_id: i64,
    username: &'a str,
    joined_at: &'a str,
    online: bool,
    stone: Option<Stone>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomSnapshot<'a> {
    code: &'a str,
    status: RoomStatus,
    host_user_id: Option<i64>,
    created_at: &'a str,
    board_size: usize,
    board: &'a [Option<Stone>],
    winner_user_id: Option<i64>,
    winner_username: Option<&'a str>,
    winner_stone: Option<Stone>,
    draw: bool,
    last_move_index: Option<usize>,
    last_move_by_user_id: Option<i64>,
    turn_user_id: Option<i64>,
    turn_order: &'a [i64],
    players: Vec<PlayerSnapshot<'a>>,
}

fn build_snapshot(room: &GomokuRoom) -> RoomSnapshot<'_> {
    RoomSnapshot {
        code: &room.core.code,
        status: room.core.status,
        host_user_id: room.core.host_user_id,
        created_at: &room.core.created_at,
        board_size: gomoku::BOARD_SIZE,
        board: &room.board,
        winner_user_id: room.winner.as_ref().map(|(id, _, _)| *id),
        winner_username: room.winner.as_ref().map(|(_, name, _)| name.as_str()),
        winner_stone: room.winner.as_ref().map(|(_, _, stone)| *stone),
        draw: room.draw,
        last_move_index: room.last_move_index,
        last_move_by_user_id: room.last_move_by_user_id,
        turn_user_id: room.core.turn_user_id(),
        turn_order: room.core.turns.order(),
        players: room
            .players
            .iter()
            .map(|p| PlayerSnapshot {
                user_id: p.user_id,
                username: &p.username,
                joined_at: &p.joined_at,
                online: room.core.online(p.user_id),
                stone: p.stone,
            })
            .collect(),
    }
}

pub fn snapshot_value(room: &GomokuRoom) -> Value {
    serde_json::to_value(build_snapshot(room)).unwrap_or_default()
}

fn snapshot_string(room: &GomokuRoom) -> String {
    serde_json::to_string(&build_snapshot(room)).unwrap_or_default()
}

fn broadcast(room: &GomokuRoom) {
    let snapshot = snapshot_string(room);
    subs::broadcast(&room.core.subscribers, "state", &snapshot);
}
