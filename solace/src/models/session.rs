//! Session model representing one user's conversation memory.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::turn::{Role, Turn};

/// A conversation session. `turns[0]` is always the system preamble.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSession {
    /// Generation id (`UUIDv7`), fresh every time the session is seeded.
    pub id: String,
    /// Ordered turns, preamble first.
    turns: Vec<Turn>,
    /// When the session was seeded.
    pub created_at: DateTime<Utc>,
    /// Last time a turn was appended.
    pub last_active: DateTime<Utc>,
}

impl ConversationSession {
    /// Seed a new session with the system preamble.
    pub fn seeded(preamble: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            turns: vec![Turn::system(preamble)],
            created_at: now,
            last_active: now,
        }
    }

    /// Append a turn. Returns the new turn count.
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> usize {
        self.turns.push(Turn::new(role, content));
        self.last_active = Utc::now();
        self.turns.len()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Never true for a seeded session.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
