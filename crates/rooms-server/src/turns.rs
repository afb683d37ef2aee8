/// Insertion-ordered turn scheduler state: the player sequence snapshotted
/// at game start plus a cursor into it.
#[derive(Debug, Clone, Default)]
pub struct TurnOrder {
    order: Vec<i64>,
    cursor: usize,
}

impl TurnOrder {
    /// Snapshot the turn order from player ids in join order; the cursor
    /// points at the first entry.
    pub fn seed(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.order = ids.into_iter().collect();
        self.cursor = 0;
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.cursor = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[i64] {
        &self.order
    }

    /// The player currently holding the turn, if anyone does.
    pub fn current(&self) -> Option<i64> {
        if self.order.is_empty() {
            None
        } else {
            Some(self.order[self.cursor % self.order.len()])
        }
    }

    pub fn advance(&mut self) {
        if !self.order.is_empty() {
            self.cursor = (self.cursor + 1) % self.order.len();
        }
    }

    /// Drop a departing player. If the leaver held the turn, the next player
    /// in order inherits it; the cursor is clamped so `current` stays valid.
    pub fn remove(&mut self, user_id: i64) {
        let Some(pos) = self.order.iter().position(|&id| id == user_id) else {
            return;
        };
        self.order.remove(pos);
        if self.order.is_empty() {
            self.cursor = 0;
            return;
        }
        if pos < self.cursor {
            self.cursor -= 1;
        }
        self.cursor %= self.order.len();
    }
}
