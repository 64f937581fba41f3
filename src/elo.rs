// Elo rating calculation.
//
// Self-contained variant of the rating engine: a pure function of the two
// pre-ratings and the two exposure counts.

use serde::{Deserialize, Serialize};

/// K-factor for a participant with no history.
pub const K_MAX: f64 = 24.0;
/// Lowest K-factor an experienced participant can reach.
pub const BASE_K: f64 = 16.0;

/// K drops by one for every this many exposures.
const K_DECAY_EXPOSURES: i64 = 50;

/// Which rating model the store applies to votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingModel {
    Elo,
    Glicko2,
}

impl RatingModel {
    /// Parse a config string (`elo`, `glicko2`, `glicko-2`).
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elo" => Some(Self::Elo),
            "glicko2" | "glicko-2" | "glicko" => Some(Self::Glicko2),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Elo => "elo",
            Self::Glicko2 => "glicko2",
        }
    }
}

/// New ratings for both sides of one contest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloResult {
    pub winner_new_rating: f64,
    pub loser_new_rating: f64,
}

/// K-factor for a participant, decaying with exposure and clamped to `[BASE_K, K_MAX]`.
pub fn k_factor(exposure_count: i64) -> f64 {
    let decay = exposure_count.max(0) / K_DECAY_EXPOSURES;
    (K_MAX - decay as f64).clamp(BASE_K, K_MAX)
}

/// Calculate expected score for player A against player B.
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) / 400.0))
}

/// Rate one decided contest. New ratings are rounded to whole points.
pub fn calculate(
    winner_rating: f64,
    winner_exposure: i64,
    loser_rating: f64,
    loser_exposure: i64,
) -> EloResult {
    let expected_winner = expected_score(winner_rating, loser_rating);
    let expected_loser = 1.0 - expected_winner;

    let winner_change = k_factor(winner_exposure) * (1.0 - expected_winner);
    let loser_change = k_factor(loser_exposure) * (0.0 - expected_loser);

    EloResult {
        winner_new_rating: (winner_rating + winner_change).round(),
        loser_new_rating: (loser_rating + loser_change).round(),
    }
}
