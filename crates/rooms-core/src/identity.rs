use serde::{Deserialize, Serialize};

/// Reserved id for the server-controlled Bingo participant. Human ids are
/// positive, so the sentinel can never collide with a real user.
pub const BOT_USER_ID: i64 = -1;

/// Display name shown for the server-controlled participant.
pub const BOT_USERNAME: &str = "BOT";

/// Authenticated caller. Value-typed and immutable once issued; every room
/// operation carries one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

impl Identity {
    pub fn bot() -> Self {
        Identity {
            user_id: BOT_USER_ID,
            username: BOT_USERNAME.to_string(),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.user_id == BOT_USER_ID
    }
}
