// Leaderboard derivation. Pure: sorts a snapshot, never mutates players.

use serde::Serialize;

use crate::model::Player;

/// A player with its 1-based leaderboard position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPlayer {
    pub rank: usize,
    #[serde(flatten)]
    pub player: Player,
}

/// Sort by rating descending. Equal ratings keep their input order.
pub fn leaderboard(players: &[Player]) -> Vec<RankedPlayer> {
    let mut sorted: Vec<&Player> = players.iter().collect();
    // `sort_by` is stable, which keeps ties deterministic.
    sorted.sort_by(|a, b| b.rating.total_cmp(&a.rating));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, p)| RankedPlayer {
            rank: i + 1,
            player: p.clone(),
        })
        .collect()
}

/// Rank of one player without building the whole board.
pub fn rank_of(players: &[Player], id: &str) -> Option<usize> {
    let (index, target) = players.iter().enumerate().find(|(_, p)| p.id == id)?;
    let ahead = players
        .iter()
        .enumerate()
        .filter(|(i, p)| p.rating > target.rating || (p.rating == target.rating && *i < index))
        .count();
    Some(ahead + 1)
}
