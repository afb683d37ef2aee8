use std::sync::atomic::{AtomicI64, AtomicU64};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;

use rooms_core::Identity;
use rooms_core::codes;

use crate::error::ApiError;
use crate::rooms::bingo::BingoRoom;
use crate::rooms::croc::CrocRoom;
use crate::rooms::gomoku::GomokuRoom;
use crate::rooms::memory::MemoryRoom;

/// How many fresh codes to try before giving up on a collision.
const CODE_ALLOCATION_ATTEMPTS: usize = 10;

/// Shared application state: one registry per game kind plus the session
/// table. Rooms never share mutable state with each other.
pub struct AppState {
    pub sessions: DashMap<String, Identity>,
    pub next_user_id: AtomicI64,
    pub next_sink_id: AtomicU64,
    pub bingo: Registry<BingoRoom>,
    pub croc: Registry<CrocRoom>,
    pub memory: Registry<MemoryRoom>,
    pub gomoku: Registry<GomokuRoom>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            sessions: DashMap::new(),
            next_user_id: AtomicI64::new(1),
            next_sink_id: AtomicU64::new(1),
            bingo: Registry::new("bingo"),
            croc: Registry::new("croc"),
            memory: Registry::new("memory"),
            gomoku: Registry::new("gomoku"),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// One keyed room namespace. The map itself is concurrent; the `RefMut`
/// returned by [`Registry::lock`] is the room's exclusive lock, so every
/// operation on a room is serialized.
pub struct Registry<R> {
    rooms: DashMap<String, R>,
    label: &'static str,
}

impl<R> Registry<R> {
    pub fn new(label: &'static str) -> Self {
        Registry {
            rooms: DashMap::new(),
            label,
        }
    }

    /// Allocate a fresh code and insert the room built by `build` under it,
    /// atomically per attempt. Retries on collision.
    pub fn create_with(&self, build: impl FnOnce(&str) -> R) -> Result<String, ApiError> {
        let mut build = Some(build);
        for _ in 0..CODE_ALLOCATION_ATTEMPTS {
            let code = codes::random_code(codes::CODE_LEN);
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let build = build.take().ok_or(ApiError::RoomCodeCollision)?;
                    slot.insert(build(&code));
                    tracing::info!(game = self.label, %code, "room created");
                    return Ok(code);
                }
            }
        }
        tracing::warn!(game = self.label, "code allocation exhausted");
        Err(ApiError::RoomCodeCollision)
    }

    /// Acquire the room lock for `code` (case-insensitive lookup).
    pub fn lock(&self, code: &str) -> Result<RefMut<'_, String, R>, ApiError> {
        self.rooms
            .get_mut(&codes::normalize(code))
            .ok_or(ApiError::RoomNotFound)
    }

    /// Remove a room that was observed empty. The emptiness predicate runs
    /// again under the map lock, so a join that slipped in after the caller
    /// released the room keeps the room alive.
    pub fn remove_if_empty(&self, code: &str, is_empty: impl FnOnce(&R) -> bool) {
        let removed = self.rooms.remove_if(code, |_, room| is_empty(room));
        if removed.is_some() {
            tracing::info!(game = self.label, %code, "room closed");
        }
    }
}
