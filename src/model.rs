// Core data types shared by the matchmaking, rating and session layers.

use serde::{Deserialize, Serialize};

pub const DEFAULT_RATING: f64 = 1500.0;
pub const DEFAULT_RATING_DEVIATION: f64 = 350.0;
pub const DEFAULT_VOLATILITY: f64 = 0.06;

/// A ranked participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub profile_image_url: Option<String>,
    pub rating: f64,
    pub rating_deviation: f64,
    pub volatility: f64,
    pub exposure_count: i64,
    pub win_count: i64,
    pub loss_count: i64,
}

impl Player {
    /// A fresh player with default rating state and no history.
    pub fn new(id: impl Into<String>, name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: icon.into(),
            profile_image_url: None,
            rating: DEFAULT_RATING,
            rating_deviation: DEFAULT_RATING_DEVIATION,
            volatility: DEFAULT_VOLATILITY,
            exposure_count: 0,
            win_count: 0,
            loss_count: 0,
        }
    }
}

/// Unordered combination of two player ids. `PairKey::new(a, b) == PairKey::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey(String, String);

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

/// One transient matchup. Participants are snapshots taken when the pair was generated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pair {
    pub id: String,
    pub player_a: Player,
    pub player_b: Player,
}

impl Pair {
    pub fn key(&self) -> PairKey {
        PairKey::new(&self.player_a.id, &self.player_b.id)
    }

    /// Whether `winner_id`/`loser_id` are exactly this pair's two participants.
    pub fn matches(&self, winner_id: &str, loser_id: &str) -> bool {
        let (a, b) = (self.player_a.id.as_str(), self.player_b.id.as_str());
        (winner_id == a && loser_id == b) || (winner_id == b && loser_id == a)
    }
}

/// A resolved contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub pair_id: String,
    pub winner_id: String,
    pub loser_id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Rating change for one side of a resolved vote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantUpdate {
    pub id: String,
    pub old_rating: f64,
    pub new_rating: f64,
    pub delta: f64,
    pub new_rating_deviation: f64,
    pub new_volatility: f64,
    pub old_rank: usize,
    pub new_rank: usize,
}

/// Everything the caller learns from a committed vote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingUpdate {
    pub pair_id: String,
    pub vote_id: String,
    pub winner: ParticipantUpdate,
    pub loser: ParticipantUpdate,
}
