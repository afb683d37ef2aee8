use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rooms_core::bingo;
use rooms_core::identity::{BOT_USER_ID, BOT_USERNAME};
use rooms_core::{Identity, codes};

use crate::error::ApiError;
use crate::rooms::{RoomCore, RoomStatus, now_iso};
use crate::state::AppState;
use crate::subs::{self, Sink};

/// Delay before the bot takes the draw it was handed.
pub const BOT_DRAW_DELAY: Duration = Duration::from_millis(1200);

/// Human seats per room.
const MAX_HUMANS: usize = 8;

const DEFAULT_SIZE: u32 = 5;
const DEFAULT_DRAW_TIMEOUT: u32 = 10;

#[derive(Debug)]
pub struct BingoRoom {
    pub core: RoomCore,
    pub size: u32,
    pub target_lines: u32,
    pub bot_enabled: bool,
    pub draw_timeout_seconds: u32,
    pub called_numbers: HashSet<u32>,
    pub last_number: Option<u32>,
    pub last_draw_by: Option<(i64, String)>,
    pub last_draw_reason: Option<DrawReason>,
    pub turn_ends_at: Option<String>,
    pub winners: Vec<BingoWinner>,
    pub players: Vec<BingoPlayer>,
}

#[derive(Debug, Clone)]
pub struct BingoPlayer {
    pub user_id: i64,
    pub username: String,
    pub joined_at: String,
    pub is_bot: bool,
    pub board: Vec<Vec<u32>>,
}

impl BingoPlayer {
    fn human(identity: &Identity, size: u32) -> Self {
        BingoPlayer {
            user_id: identity.user_id,
            username: identity.username.clone(),
            joined_at: now_iso(),
            is_bot: false,
            board: bingo::generate_board(size),
        }
    }

    fn bot(size: u32) -> Self {
        BingoPlayer {
            user_id: BOT_USER_ID,
            username: BOT_USERNAME.to_string(),
            joined_at: now_iso(),
            is_bot: true,
            board: bingo::generate_board(size),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawReason {
    ManualPick,
    BotPick,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BingoWinner {
    pub user_id: i64,
    pub username: String,
    pub lines: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptions {
    #[serde(default = "default_size")]
    pub size: u32,
    #[serde(default)]
    pub vs_computer: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    #[serde(default = "default_draw_timeout")]
    pub draw_timeout_seconds: u32,
}

fn default_size() -> u32 {
    DEFAULT_SIZE
}

fn default_draw_timeout() -> u32 {
    DEFAULT_DRAW_TIMEOUT
}

// ── Operations ──────────────────────────────────────────────────────────

pub fn create(
    state: &Arc<AppState>,
    identity: &Identity,
    opts: CreateOptions,
) -> Result<String, ApiError> {
    if !bingo::valid_size(opts.size) {
        return Err(ApiError::InvalidSize);
    }

    state.bingo.create_with(|code| {
        let mut room = BingoRoom {
            core: RoomCore::new(code, identity.user_id),
            size: opts.size,
            target_lines: bingo::TARGET_LINES,
            bot_enabled: opts.vs_computer,
            draw_timeout_seconds: DEFAULT_DRAW_TIMEOUT,
            called_numbers: HashSet::new(),
            last_number: None,
            last_draw_by: None,
            last_draw_reason: None,
            turn_ends_at: None,
            winners: Vec::new(),
            players: vec![BingoPlayer::human(identity, opts.size)],
        };
        reconcile_bot(&mut room);
        room
    })
}

/// Join is idempotent: a caller who is already a member gets the current
/// snapshot and their own board back.
pub fn join(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
) -> Result<(Value, Value), ApiError> {
    let mut room = state.bingo.lock(code)?;
    let room = &mut *room;

    if let Some(player) = room.players.iter().find(|p| p.user_id == identity.user_id) {
        let board = serde_json::to_value(&player.board).unwrap_or_default();
        return Ok((snapshot_value(room), board));
    }
    if room.core.status != RoomStatus::Lobby {
        return Err(ApiError::RoomNotJoinable);
    }
    if human_count(room) >= MAX_HUMANS {
        return Err(ApiError::RoomFull);
    }

    let player = BingoPlayer::human(identity, room.size);
    let board = serde_json::to_value(&player.board).unwrap_or_default();
    room.players.push(player);
    reconcile_bot(room);
    broadcast(room);
    Ok((snapshot_value(room), board))
}

pub fn leave(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<(), ApiError> {
    let canonical = codes::normalize(code);
    let emptied = {
        let mut room = state.bingo.lock(code)?;
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
            // Host transfer prefers surviving humans in join order.
            room.core.host_user_id = room.players.iter().find(|p| !p.is_bot).map(|p| p.user_id);
        }

        match room.core.status {
            RoomStatus::Playing => {
                let held_turn = room.core.turns.current() == Some(identity.user_id);
                room.core.turns.remove(identity.user_id);
                if room.core.turns.is_empty() {
                    end_game(room);
                } else if held_turn {
                    room.core.cancel_timer();
                    room.turn_ends_at = None;
                    if room.core.turn_user_id() == Some(BOT_USER_ID) {
                        schedule_bot_draw(state, room);
                    }
                }
            }
            RoomStatus::Lobby => reconcile_bot(room),
            RoomStatus::Ended => {}
        }

        if human_count(room) == 0 {
            // A room kept alive only by the bot is garbage.
            room.core.cancel_timer();
            room.core.close_all();
            true
        } else {
            broadcast(room);
            false
        }
    };

    if emptied {
        state.bingo.remove_if_empty(&canonical, |room| human_count(room) == 0);
    }
    Ok(())
}

pub fn start(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    opts: StartOptions,
) -> Result<(), ApiError> {
    let mut room = state.bingo.lock(code)?;
    let room = &mut *room;

    if room.core.host_user_id != Some(identity.user_id) {
        return Err(ApiError::HostOnly);
    }
    if room.core.status != RoomStatus::Lobby {
        return Err(ApiError::RoomNotJoinable);
    }
    if !bingo::valid_draw_timeout(opts.draw_timeout_seconds) {
        return Err(ApiError::InvalidDrawTimeoutSeconds);
    }
    if room.players.is_empty() {
        return Err(ApiError::NoPlayers);
    }

    room.draw_timeout_seconds = opts.draw_timeout_seconds;
    room.called_numbers.clear();
    room.last_number = None;
    room.last_draw_by = None;
    room.last_draw_reason = None;
    room.winners.clear();
    room.turn_ends_at = None;
    room.core.status = RoomStatus::Playing;
    let ids: Vec<i64> = room.players.iter().map(|p| p.user_id).collect();
    room.core.turns.seed(ids);
    if room.core.turn_user_id() == Some(BOT_USER_ID) {
        schedule_bot_draw(state, room);
    }
    broadcast(room);
    Ok(())
}

pub fn draw(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    number: i64,
) -> Result<u32, ApiError> {
    let mut room = state.bingo.lock(code)?;
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
    let max = (room.size * room.size) as i64;
    if !(1..=max).contains(&number) {
        return Err(ApiError::InvalidNumber);
    }
    let number = number as u32;
    if room.called_numbers.contains(&number) {
        return Err(ApiError::NumberAlreadyCalled);
    }

    apply_draw(
        room,
        identity.user_id,
        &identity.username,
        DrawReason::ManualPick,
        number,
    );
    finish_draw(state, room);
    broadcast(room);
    Ok(number)
}

pub fn subscribe(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    sink: Sink,
) -> Result<(), ApiError> {
    let mut room = state.bingo.lock(code)?;
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
    let Ok(mut room) = state.bingo.lock(code) else {
        return;
    };
    let room = &mut *room;
    if room.core.detach(user_id, sink_id) {
        broadcast(room);
    }
}

// ── Internals ───────────────────────────────────────────────────────────

fn human_count(room: &BingoRoom) -> usize {
    room.players.iter().filter(|p| !p.is_bot).count()
}

/// Lobby-only bot seat management: the bot fills a seat while at most one
/// human is present, and yields it once a second human joins. During play
/// the bot stays put so the turn order is stable.
fn reconcile_bot(room: &mut BingoRoom) {
    if room.core.status != RoomStatus::Lobby {
        return;
    }
    let humans = human_count(room);
    let bot_seated = room.players.iter().any(|p| p.is_bot);
    if room.bot_enabled && humans <= 1 && !bot_seated {
        room.players.push(BingoPlayer::bot(room.size));
    } else if bot_seated && (humans >= 2 || !room.bot_enabled) {
        room.players.retain(|p| !p.is_bot);
    }
}

fn apply_draw(room: &mut BingoRoom, by: i64, by_name: &str, reason: DrawReason, number: u32) {
    room.called_numbers.insert(number);
    room.last_number = Some(number);
    room.last_draw_by = Some((by, by_name.to_string()));
    room.last_draw_reason = Some(reason);
}

/// Post-draw bookkeeping: winner evaluation across all players, exhaustion,
/// or turn advancement (handing off to the bot when it is next).
fn finish_draw(state: &Arc<AppState>, room: &mut BingoRoom) {
    let winners: Vec<BingoWinner> = room
        .players
        .iter()
        .filter_map(|p| {
            let lines = bingo::count_lines(&p.board, &room.called_numbers);
            (lines >= room.target_lines).then(|| BingoWinner {
                user_id: p.user_id,
                username: p.username.clone(),
                lines,
            })
        })
        .collect();

    if !winners.is_empty() {
        room.winners = winners;
        end_game(room);
    } else if room.called_numbers.len() as u32 == room.size * room.size {
        // Every number called with nobody at the target: ends with no winner.
        end_game(room);
    } else {
        room.core.cancel_timer();
        room.core.turns.advance();
        room.turn_ends_at = None;
        if room.core.turn_user_id() == Some(BOT_USER_ID) {
            schedule_bot_draw(state, room);
        }
    }
}

fn end_game(room: &mut BingoRoom) {
    room.core.status = RoomStatus::Ended;
    room.core.cancel_timer();
    room.core.turns.clear();
    room.turn_ends_at = None;
}

/// Hand the turn to the bot: arm the deferred draw and advertise when it
/// will land. The task re-checks status, turn and its own generation under
/// the room lock before acting, since any later turn change cancels it.
fn schedule_bot_draw(state: &Arc<AppState>, room: &mut BingoRoom) {
    let r#gen = room.core.cancel_timer();
    let deadline = Utc::now() + chrono::Duration::milliseconds(BOT_DRAW_DELAY.as_millis() as i64);
    room.turn_ends_at = Some(deadline.to_rfc3339_opts(SecondsFormat::Millis, true));

    let state = state.clone();
    let code = room.core.code.clone();
    tokio::spawn(async move {
        tokio::time::sleep(BOT_DRAW_DELAY).await;
        let Ok(mut room) = state.bingo.lock(&code) else {
            return;
        };
        let room = &mut *room;
        if room.core.status != RoomStatus::Playing || !room.core.timer_is_current(r#gen) {
            return;
        }
        if room.core.turn_user_id() != Some(BOT_USER_ID) {
            return;
        }

        let remaining: Vec<u32> = (1..=room.size * room.size)
            .filter(|n| !room.called_numbers.contains(n))
            .collect();
        if remaining.is_empty() {
            return;
        }
        let number = remaining[rand::rng().random_range(0..remaining.len())];

        apply_draw(room, BOT_USER_ID, BOT_USERNAME, DrawReason::BotPick, number);
        finish_draw(&state, room);
        broadcast(room);
    });
}

// ── Snapshot ────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSnapshot<'a> {
    user_id: i64,
    username: &'a str,
    joined_at: &'a str,
    online: bool,
    is_bot: bool,
    board: &'a [Vec<u32>],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomSnapshot<'a> {
    code: &'a str,
    status: RoomStatus,
    host_user_id: Option<i64>,
    created_at: &'a str,
    size: u32,
    target_lines: u32,
    bot_enabled: bool,
    draw_timeout_seconds: u32,
    called_numbers: Vec<u32>,
    last_number: Option<u32>,
    last_draw_by_user_id: Option<i64>,
    last_draw_by_username: Option<&'a str>,
    last_draw_reason: Option<DrawReason>,
    turn_user_id: Option<i64>,
    turn_order: &'a [i64],
    turn_ends_at: Option<&'a str>,
    winners: &'a [BingoWinner],
    players: Vec<PlayerSnapshot<'a>>,
}

fn build_snapshot(room: &BingoRoom) -> RoomSnapshot<'_> {
    let mut called: Vec<u32> = room.called_numbers.iter().copied().collect();
    called.sort_unstable();

    RoomSnapshot {
        code: &room.core.code,
        status: room.core.status,
        host_user_id: room.core.host_user_id,
        created_at: &room.core.created_at,
        size: room.size,
        target_lines: room.target_lines,
        bot_enabled: room.bot_enabled,
        draw_timeout_seconds: room.draw_timeout_seconds,
        called_numbers: called,
        last_number: room.last_number,
        last_draw_by_user_id: room.last_draw_by.as_ref().map(|(id, _)| *id),
        last_draw_by_username: room.last_draw_by.as_ref().map(|(_, name)| name.as_str()),
        last_draw_reason: room.last_draw_reason,
        turn_user_id: room.core.turn_user_id(),
        turn_order: room.core.turns.order(),
        turn_ends_at: room.turn_ends_at.as_deref(),
        winners: &room.winners,
        players: room
            .players
            .iter()
            .map(|p| PlayerSnapshot {
                user_id: p.user_id,
                username: &p.username,
                joined_at: &p.joined_at,
                online: room.core.online(p.user_id),
                is_bot: p.is_bot,
                board: &p.board,
            })
            .collect(),
    }
}

pub fn snapshot_value(room: &BingoRoom) -> Value {
    serde_json::to_value(build_snapshot(room)).unwrap_or_default()
}

fn snapshot_string(room: &BingoRoom) -> String {
    serde_json::to_string(&build_snapshot(room)).unwrap_or_default()
}

fn broadcast(room: &BingoRoom) {
    let snapshot = snapshot_string(room);
    subs::broadcast(&room.core.subscribers, "state", &snapshot);
}
