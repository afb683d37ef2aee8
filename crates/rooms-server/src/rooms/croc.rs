use std::collections::HashSet;
use std::sync::Arc;

use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rooms_core::croc;
use rooms_core::{Identity, codes};

use crate::error::ApiError;
use crate::rooms::{RoomCore, RoomStatus, now_iso};
use crate::state::AppState;
use crate::subs::{self, Sink};

const DEFAULT_TEETH_PER_JAW: u32 = 10;

#[derive(Debug)]
pub struct CrocRoom {
    pub core: RoomCore,
    pub tooth_count_per_jaw: u32,
    pub trap_tooth: Option<u32>,
    pub selected_teeth: HashSet<u32>,
    pub last_picked_tooth: Option<u32>,
    pub last_picker_user_id: Option<i64>,
    pub loser: Option<(i64, String)>,
    pub winner: Option<(i64, String)>,
    pub players: Vec<CrocPlayer>,
}

#[derive(Debug, Clone)]
pub struct CrocPlayer {
    pub user_id: i64,
    pub username: String,
    pub joined_at: String,
    pub alive: bool,
}

impl CrocPlayer {
    fn new(identity: &Identity) -> Self {
        CrocPlayer {
            user_id: identity.user_id,
            username: identity.username.clone(),
            joined_at: now_iso(),
            alive: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptions {
    #[serde(default = "default_teeth")]
    pub tooth_count_per_jaw: u32,
}

fn default_teeth() -> u32 {
    DEFAULT_TEETH_PER_JAW
}

/// Result of a pick, surfaced in the response payload.
pub struct PickOutcome {
    pub trap: bool,
}

// ── Operations ──────────────────────────────────────────────────────────

pub fn create(
    state: &Arc<AppState>,
    identity: &Identity,
    opts: CreateOptions,
) -> Result<String, ApiError> {
    if !croc::valid_tooth_count_per_jaw(opts.tooth_count_per_jaw) {
        return Err(ApiError::InvalidToothCountPerJaw);
    }

    state.croc.create_with(|code| CrocRoom {
        core: RoomCore::new(code, identity.user_id),
        tooth_count_per_jaw: opts.tooth_count_per_jaw,
        trap_tooth: None,
        selected_teeth: HashSet::new(),
        last_picked_tooth: None,
        last_picker_user_id: None,
        loser: None,
        winner: None,
        players: vec![CrocPlayer::new(identity)],
    })
}

pub fn join(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<Value, ApiError> {
    let mut room = state.croc.lock(code)?;
    let room = &mut *room;

    if room.players.iter().any(|p| p.user_id == identity.user_id) {
        return Ok(snapshot_value(room));
    }
    if room.core.status != RoomStatus::Lobby {
        return Err(ApiError::RoomNotJoinable);
    }

    room.players.push(CrocPlayer::new(identity));
    broadcast(room);
    Ok(snapshot_value(room))
}

pub fn leave(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<(), ApiError> {
    let canonical = codes::normalize(code);
    let emptied = {
        let mut room = state.croc.lock(code)?;
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
            if room.core.turns.is_empty() {
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
        state.croc.remove_if_empty(&canonical, |room| room.players.is_empty());
    }
    Ok(())
}

pub fn start(state: &Arc<AppState>, identity: &Identity, code: &str) -> Result<(), ApiError> {
    let mut room = state.croc.lock(code)?;
    let room = &mut *room;

    if room.core.host_user_id != Some(identity.user_id) {
        return Err(ApiError::HostOnly);
    }
    if room.core.status != RoomStatus::Lobby {
        return Err(ApiError::RoomNotJoinable);
    }
    if room.players.len() < 2 {
        return Err(ApiError::NeedTwoPlayers);
    }
    if !croc::valid_tooth_count_per_jaw(room.tooth_count_per_jaw) {
        return Err(ApiError::InvalidToothCountPerJaw);
    }

    let total = croc::total_teeth(room.tooth_count_per_jaw);
    room.trap_tooth = Some(rand::rng().random_range(1..=total));
    room.selected_teeth.clear();
    room.last_picked_tooth = None;
    room.last_picker_user_id = None;
    room.loser = None;
    room.winner = None;
    for player in &mut room.players {
        player.alive = true;
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
    tooth: i64,
) -> Result<PickOutcome, ApiError> {
    let mut room = state.croc.lock(code)?;
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
    let total = croc::total_teeth(room.tooth_count_per_jaw) as i64;
    if !(1..=total).contains(&tooth) {
        return Err(ApiError::InvalidTooth);
    }
    let tooth = tooth as u32;
    if room.selected_teeth.contains(&tooth) {
        return Err(ApiError::AlreadySelected);
    }

    room.selected_teeth.insert(tooth);
    room.last_picked_tooth = Some(tooth);
    room.last_picker_user_id = Some(identity.user_id);

    let trap = room.trap_tooth == Some(tooth);
    if trap {
        // Snapped shut: the picker loses, the first other player in turn
        // order takes the win.
        let winner = room
            .core
            .turns
            .order()
            .iter()
            .copied()
            .find(|&id| id != identity.user_id)
            .and_then(|id| {
                room.players
                    .iter()
                    .find(|p| p.user_id == id)
                    .map(|p| (p.user_id, p.username.clone()))
            });
        if let Some(picker) = room
            .players
            .iter_mut()
            .find(|p| p.user_id == identity.user_id)
        {
            picker.alive = false;
        }
        room.loser = Some((identity.user_id, identity.username.clone()));
        room.winner = winner;
        room.core.status = RoomStatus::Ended;
        room.core.turns.clear();
    } else {
        room.core.turns.advance();
    }

    broadcast(room);
    Ok(PickOutcome { trap })
}

pub fn subscribe(
    state: &Arc<AppState>,
    identity: &Identity,
    code: &str,
    sink: Sink,
) -> Result<(), ApiError> {
    let mut room = state.croc.lock(code)?;
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
    let Ok(mut room) = state.croc.lock(code) else {
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
    alive: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomSnapshot<'a> {
    code: &'a str,
    status: RoomStatus,
    host_user_id: Option<i64>,
    created_at: &'a str,
    tooth_count_per_jaw: u32,
    /// Revealed only once the game has ended; the trap stays server-secret
    /// while picks are still being made.
    trap_tooth: Option<u32>,
    selected_teeth: Vec<u32>,
    last_picked_tooth: Option<u32>,
    last_picker_user_id: Option<i64>,
    loser_user_id: Option<i64>,
    loser_username: Option<&'a str>,
    winner_user_id: Option<i64>,
    winner_username: Option<&'a str>,
    turn_user_id: Option<i64>,
    turn_order: &'a [i64],
    players: Vec<PlayerSnapshot<'a>>,
}

fn build_snapshot(room: &CrocRoom) -> RoomSnapshot<'_> {
    let mut selected: Vec<u32> = room.selected_teeth.iter().copied().collect();
    selected.sort_unstable();

    RoomSnapshot {
        code: &room.core.code,
        status: room.core.status,
        host_user_id: room.core.host_user_id,
        created_at: &room.core.created_at,
        tooth_count_per_jaw: room.tooth_count_per_jaw,
        trap_tooth: (room.core.status == RoomStatus::Ended)
            .then_some(room.trap_tooth)
            .flatten(),
        selected_teeth: selected,
        last_picked_tooth: room.last_picked_tooth,
        last_picker_user_id: room.last_picker_user_id,
        loser_user_id: room.loser.as_ref().map(|(id, _)| *id),
        loser_username: room.loser.as_ref().map(|(_, name)| name.as_str()),
        winner_user_id: room.winner.as_ref().map(|(id, _)| *id),
        winner_username: room.winner.as_ref().map(|(_, name)| name.as_str()),
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
                alive: p.alive,
            })
            .collect(),
    }
}

pub fn snapshot_value(room: &CrocRoom) -> Value {
    serde_json::to_value(build_snapshot(room)).unwrap_or_default()
}

fn snapshot_string(room: &CrocRoom) -> String {
    serde_json::to_string(&build_snapshot(room)).unwrap_or_default()
}

fn broadcast(room: &CrocRoom) {
    let snapshot = snapshot_string(room);
    subs::broadcast(&room.core.subscribers, "state", &snapshot);
}
