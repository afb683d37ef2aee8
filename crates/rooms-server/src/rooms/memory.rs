use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use rooms_core::memory;
use rooms_core::{Card, Identity, codes};

use crate::error::ApiError;
use crate::rooms::{RoomCore, RoomStatus, now_iso};
use crate::state::AppState;
use crate::subs::{self, Sink};

/// How long a mismatched pair stays face-up before it is hidden again.
pub const RESOLVE_DELAY: Duration = Duration::from_millis(1100);

const MAX_PLAYERS: usize = 8;
const DEFAULT_CARD_COUNT: u32 = 20;

#[derive(Debug)]
pub struct MemoryRoom {
    pub core: RoomCore,
    pub card_count: u32,
    pub cards: Vec<Card>,
    pub matched_count: u32,
    pub revealed: Vec<usize>,
    pub resolving: bool,
    pub winners: Vec<MemoryWinner>,
    pub players: Vec<MemoryPlayer>,
}

#[derive(Debug, Clone)]
pub struct MemoryPlayer {
    pub user_id: i64,
    pub username: String,
    pub joined_at: String,
    pub score: u32,
}

impl MemoryPlayer {
    fn new(identity: &Identity) -> Self {
        MemoryPlayer {
            user_id: identity.user_id,
            username: identity.username.clone(),
            joined_at: now_iso(),
            score: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWinner {
    pub user_id: i64,
    pub username: String,
    pub score: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptions {
    #[serde(default = "default_card_count")]
    pub card_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub card_count: Option<u32>,
}

fn default_card_count() -> u32 {
    DEFAULT_CARD_COUNT
}

/// Result of a pick, surfaced in the response payload.
pub struct PickOutcome {
    pub matched: Option<bool>,
    pub ended: bool,
}

// ── Operations ──────────────────────────────────────────────────────────

pub fn create(
    state: &Arc<AppState>,
    identity: &Identity,
    opts: CreateOptions,
) -> Result<String, ApiError> {
    if !memory::valid_card_count(opts.card_count) {
        return Err(ApiError::InvalidCardCount);
    }

    state.memory.create_with(|code| MemoryRoom {
        core: RoomCore::new(code, identity.user_id),
        card_count: opts.card_count,
        cards: Vec::new(),
        matched_count: 0,
        revealed: Vec::new(),
        resolving: false,
        winners: Vec::new(),
        players: vec![MemoryPlayer::new(identity)],
    })
}

pub fn join(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<Value, ApiError> {
    let mut room = state.memory.lock(code)?;
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

    room.players.push(MemoryPlayer::new(identity));
    broadcast(room);
    Ok(snapshot_value(room))
}

pub fn leave(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<(), ApiError> {
    let canonical = codes::normalize(code);
    let emptied = {
        let mut room = state.memory.lock(code)?;
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
            let held_turn = room.core.turns.current() == Some(identity.user_id);
            if held_turn {
                // The leaver's half-finished turn is abandoned wholesale.
                room.core.cancel_timer();
                room.revealed.clear();
                room.resolving = false;
            }
            room.core.turns.remove(identity.user_id);
            if room.core.turns.is_empty() {
                end_game(room);
            }
        }

        if room.players.is_empty() {
            room.core.cancel_timer();
            room.core.close_all();
            true
        } else {
            broadcast(room);
            false
        }
    };

    if emptied {
        state.memory.remove_if_empty(&canonical, |room| room.players.is_empty());
    }
    Ok(())
}

pub fn start(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    opts: StartOptions,
) -> Result<(), ApiError> {
    let mut room = state.memory.lock(code)?;
    let room = &mut *room;

    if room.core.host_user_id != Some(identity.user_id) {
        return Err(ApiError::HostOnly);
    }
    if room.core.status != RoomStatus::Lobby {
        return Err(ApiError::RoomNotJoinable);
    }
    let card_count = opts.card_count.unwrap_or(room.card_count);
    if !memory::valid_card_count(card_count) {
        return Err(ApiError::InvalidCardCount);
    }
    if room.players.is_empty() {
        return Err(ApiError::NoPlayers);
    }

    room.card_count = card_count;
    room.cards = memory::build_deck(card_count);
    room.matched_count = 0;
    room.revealed.clear();
    room.resolving = false;
    room.winners.clear();
    for player in &mut room.players {
        player.score = 0;
    }
    room.core.status = RoomStatus::Playing;
    let ids: Vec<i64> = room.players.iter().map(|p| p.user_id).collect();
    room.core.turns.seed(ids);
    broadcast(room);
    Ok(())
}

pub fn pick(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    index: i64,
) -> Result<PickOutcome, ApiError> {
    let mut room = state.memory.lock(code)?;
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
    if room.core.turn_user_id() != Some(identity.user_id) {
        return Err(ApiError::NotYourTurn);
    }
    if room.resolving {
        return Err(ApiError::Resolving);
    }
    if !(0..room.cards.len() as i64).contains(&index) {
        return Err(ApiError::InvalidIndex);
    }
    let index = index as usize;
    if room.cards[index].matched {
        return Err(ApiError::AlreadyMatched);
    }
    if room.revealed.contains(&index) {
        return Err(ApiError::AlreadyRevealed);
    }

    room.revealed.push(index);
    if room.revealed.len() < 2 {
        broadcast(room);
        return Ok(PickOutcome {
            matched: None,
            ended: false,
        });
    }

    let first = room.revealed[0];
    let second = room.revealed[1];
    let matched = room.cards[first].country_key == room.cards[second].country_key;

    if matched {
        room.cards[first].matched = true;
        room.cards[second].matched = true;
        room.matched_count += 1;
        room.revealed.clear();
        if let Some(player) = room
            .players
            .iter_mut()
            .find(|p| p.user_id == identity.user_id)
        {
            player.score += 1;
        }

        let ended = room.matched_count == room.card_count / 2;
        if ended {
            room.winners = compute_winners(&room.players);
            end_game(room);
        }
        broadcast(room);
        return Ok(PickOutcome {
            matched: Some(true),
            ended,
        });
    }

    // Mismatch: both cards stay face-up until the deferred resolution hides
    // them and passes the turn.
    room.resolving = true;
    let r#gen = room.core.cancel_timer();
    schedule_resolve(state, &room.core.code, r#gen);
    broadcast(room);
    Ok(PickOutcome {
        matched: Some(false),
        ended: false,
    })
}

pub fn subscribe(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    sink: Sink,
) -> Result<(), ApiError> {
    let mut room = state.memory.lock(code)?;
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
    let Ok(mut room) = state.memory.lock(code) else {
        return;
    };
    let room = &mut *room;
    if room.core.detach(user_id, sink_id) {
        broadcast(room);
    }
}

// ── Internals ───────────────────────────────────────────────────────────

fn compute_winners(players: &[MemoryPlayer]) -> Vec<MemoryWinner> {
    let top = players.iter().map(|p| p.score).max().unwrap_or(0);
    players
        .iter()
        .filter(|p| p.score == top)
        .map(|p| MemoryWinner {
            user_id: p.user_id,
            username: p.username.clone(),
            score: p.score,
        })
        .collect()
}

fn end_game(room: &mut MemoryRoom) {
    room.core.status = RoomStatus::Ended;
    room.core.cancel_timer();
    room.core.turns.clear();
    room.revealed.clear();
    room.resolving = false;
}

/// Arm the deferred mismatch resolution. The task re-checks status and its
/// own generation under the room lock; a turn change in the meantime makes
/// it a no-op.
fn schedule_resolve(state: &Arc<AppState>, code: &str, r#gen: u64) {
    let state = state.clone();
    let code = code.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(RESOLVE_DELAY).await;
        let Ok(mut room) = state.memory.lock(&code) else {
            return;
        };
        let room = &mut *room;
        if room.core.status != RoomStatus::Playing || !room.core.timer_is_current(r#gen) {
            return;
        }
        if !room.resolving {
            return;
        }
        room.revealed.clear();
        room.resolving = false;
        room.core.turns.advance();
        broadcast(room);
    });
}

// ── Snapshot ────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CardSnapshot<'a> {
    uid: u32,
    matched: bool,
    visible: bool,
    country_key: Option<&'a str>,
    flag: Option<&'a str>,
    name_ko: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSnapshot<'a> {
    user_id: i64,
    username: &'a str,
    joined_at: &'a str,
    online: bool,
    score: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomSnapshot<'a> {
    code: &'a str,
    status: RoomStatus,
    host_user_id: Option<i64>,
    created_at: &'a str,
    card_count: u32,
    cards: Vec<CardSnapshot<'a>>,
    matched_count: u32,
    revealed_indices: &'a [usize],
    resolving: bool,
    turn_user_id: Option<i64>,
    turn_order: &'a [i64],
    winners: &'a [MemoryWinner],
    players: Vec<PlayerSnapshot<'a>>,
}

/// A card's face is visible iff it is currently revealed or already
/// matched; everything else is dealt face-down on the wire.
fn build_snapshot(room: &MemoryRoom) -> RoomSnapshot<'_> {
    let cards = room
        .cards
        .iter()
        .enumerate()
        .map(|(i, card)| {
            let visible = card.matched || room.revealed.contains(&i);
            CardSnapshot {
                uid: card.uid,
                matched: card.matched,
                visible,
                country_key: visible.then_some(card.country_key),
                flag: visible.then_some(card.flag),
                name_ko: visible.then_some(card.name_ko),
            }
        })
        .collect();

    RoomSnapshot {
        code: &room.core.code,
        status: room.core.status,
        host_user_id: room.core.host_user_id,
        created_at: &room.core.created_at,
        card_count: room.card_count,
        cards,
        matched_count: room.matched_count,
        revealed_indices: &room.revealed,
        resolving: room.resolving,
        turn_user_id: room.core.turn_user_id(),
        turn_order: room.core.turns.order(),
        winners: &room.winners,
        players: room
            .players
            .iter()
            .map(|p| PlayerSnapshot {
                user_id: p.user_id,
                username: &p.username,
                joined_at: &p.joined_at,
                online: room.core.online(p.user_id),
                score: p.score,
            })
            .collect(),
    }
}

pub fn snapshot_value(room: &MemoryRoom) -> Value {
    serde_json::to_value(build_snapshot(room)).unwrap_or_default()
}

fn snapshot_string(room: &MemoryRoom) -> String {
    serde_json::to_string(&build_snapshot(room)).unwrap_or_default()
}

fn broadcast(room: &MemoryRoom) {
    let snapshot = snapshot_string(room);
    subs::broadcast(&room.core.subscribers, "state", &snapshot);
}
