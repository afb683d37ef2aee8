pub mod bingo;
pub mod croc;
pub mod gomoku;
pub mod memory;

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::subs::Sink;
use crate::turns::TurnOrder;

/// Room lifecycle status. Transitions only move forward:
/// lobby → playing → ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Lobby,
    Playing,
    Ended,
}

/// Current wall-clock time as an RFC 3339 string, the timestamp format used
/// everywhere on the wire.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Bookkeeping every game room carries: identity of the room, membership
/// and presence state, live streams, the turn scheduler, and the generation
/// counter that invalidates deferred tasks.
#[derive(Debug)]
pub struct RoomCore {
    pub code: String,
    pub status: RoomStatus,
    pub host_user_id: Option<i64>,
    pub created_at: String,
    pub subscribers: Vec<Sink>,
    pub connections: HashMap<i64, u32>,
    pub turns: TurnOrder,
    pub timer_gen: u64,
}

impl RoomCore {
    pub fn new(code: &str, host_user_id: i64) -> Self {
        RoomCore {
            code: code.to_string(),
            status: RoomStatus::Lobby,
            host_user_id: Some(host_user_id),
            created_at: now_iso(),
            subscribers: Vec::new(),
            connections: HashMap::new(),
            turns: TurnOrder::default(),
            timer_gen: 0,
        }
    }

    /// A player is online iff they have at least one live stream.
    pub fn online(&self, user_id: i64) -> bool {
        self.connections.get(&user_id).copied().unwrap_or(0) > 0
    }

    /// The player holding the turn, or null outside of play.
    pub fn turn_user_id(&self) -> Option<i64> {
        if self.status == RoomStatus::Playing {
            self.turns.current()
        } else {
            None
        }
    }

    /// Attach a live stream. Returns true if this brought the player online.
    pub fn attach(&mut self, sink: Sink) -> bool {
        let count = self.connections.entry(sink.user_id).or_insert(0);
        *count += 1;
        self.subscribers.push(sink);
        *count == 1
    }

    /// Detach one stream. Returns true if the player just went offline.
    pub fn detach(&mut self, user_id: i64, sink_id: u64) -> bool {
        self.subscribers.retain(|sink| sink.id != sink_id);
        match self.connections.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.connections.remove(&user_id);
                true
            }
            None => false,
        }
    }

    /// Drop every trace of a departing player's presence: their streams are
    /// closed and their connection count is removed.
    pub fn evict_presence(&mut self, user_id: i64) {
        for sink in self.subscribers.iter().filter(|s| s.user_id == user_id) {
            sink.close();
        }
        self.subscribers.retain(|sink| sink.user_id != user_id);
        self.connections.remove(&user_id);
    }

    /// Close every stream; called when the room is destroyed.
    pub fn close_all(&mut self) {
        for sink in &self.subscribers {
            sink.close();
        }
        self.subscribers.clear();
        self.connections.clear();
    }

    /// Invalidate any outstanding deferred task and return the generation a
    /// newly scheduled task must carry.
    pub fn cancel_timer(&mut self) -> u64 {
        self.timer_gen += 1;
        self.timer_gen
    }

    /// Whether a deferred task scheduled at `gen` is still the current one.
    pub fn timer_is_current(&self, r#gen: u64) -> bool {
        self.timer_gen == r#gen
    }
}
