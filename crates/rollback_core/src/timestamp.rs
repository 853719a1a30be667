//! Ordering key for Call Log entries.

use serde::{Deserialize, Serialize};

/// A totally ordered `(time, offset, player_id)` triple.
///
/// Ordering compares `(time, player_id, offset)` lexicographically — the
/// `player_id` component preceding `offset` is load-bearing: it
/// deterministically interleaves concurrent peers so every host agrees on
/// a single total order regardless of arrival sequence. Do not "simplify"
/// this to `(time, offset, player_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub time: i64,
    pub offset: u32,
    pub player_id: u32,
}

impl Timestamp {
    pub fn new(time: i64, offset: u32, player_id: u32) -> Self {
        Self {
            time,
            offset,
            player_id,
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.player_id, self.offset).cmp(&(other.time, other.player_id, other.offset))
    }
}
