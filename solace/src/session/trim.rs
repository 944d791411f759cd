//! Bounds the history sent upstream.

use crate::models::{Role, Turn};

/// Keeps the system preamble plus the most recent `max_pairs`
/// user/assistant pairs.
#[derive(Debug, Clone, Copy)]
pub struct HistoryTrimmer {
    max_pairs: usize,
}

impl HistoryTrimmer {
    /// `max_pairs` is clamped to at least one so the newest message is always sent.
    pub fn new(max_pairs: usize) -> Self {
        Self {
            max_pairs: max_pairs.max(1),
        }
    }

    /// Largest number of turns `trim` returns.
    pub const fn bound(&self) -> usize {
        1 + 2 * self.max_pairs
    }

    /// Trim `turns` to the bound. `turns[0]` is always kept; a history already
    /// within bound comes back unchanged. The kept window starts on a user
    /// turn, so a history ending in the pending question keeps one fewer turn.
    pub fn trim(&self, turns: &[Turn]) -> Vec<Turn> {
        if turns.len() <= self.bound() {
            return turns.to_vec();
        }

        let mut from = turns.len() - 2 * self.max_pairs;
        if turns[from].role == Role::Assistant {
            from += 1;
        }

        let mut trimmed = Vec::with_capacity(self.bound());
        trimmed.push(turns[0].clone());
        trimmed.extend_from_slice(&turns[from..]);
        trimmed
    }
}

impl Default for HistoryTrimmer {
    fn default() -> Self {
        Self::new(10)
    }
}
