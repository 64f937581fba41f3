// Boundary to the rating store: request/response shapes and the trait the
// session talks through.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::elo::RatingModel;
use crate::error::StoreError;
use crate::model::{Player, Vote};

/// Page size used when loading the vote history.
pub const VOTE_PAGE_SIZE: i64 = 1000;

/// Glicko-2 delegate request: the store computes the new ratings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastVoteRequest {
    pub winner_id: String,
    pub loser_id: String,
    pub pair_id: String,
}

/// Store response for a delegated vote. Checked with [`CastVoteResponse::validate`]
/// before anything reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastVoteResponse {
    pub winner_old_rating: f64,
    pub winner_new_rating: f64,
    pub winner_new_rating_deviation: f64,
    pub winner_new_volatility: f64,
    pub loser_old_rating: f64,
    pub loser_new_rating: f64,
    pub loser_new_rating_deviation: f64,
    pub loser_new_volatility: f64,
    pub vote_id: String,
}

impl CastVoteResponse {
    pub fn validate(self) -> Result<Self, StoreError> {
        let ratings = [
            ("winner_old_rating", self.winner_old_rating),
            ("winner_new_rating", self.winner_new_rating),
            ("loser_old_rating", self.loser_old_rating),
            ("loser_new_rating", self.loser_new_rating),
        ];
        for (field, value) in ratings {
            if !value.is_finite() {
                return Err(StoreError::MalformedResponse(format!(
                    "{field} is not finite"
                )));
            }
        }

        let positives = [
            ("winner_new_rating_deviation", self.winner_new_rating_deviation),
            ("winner_new_volatility", self.winner_new_volatility),
            ("loser_new_rating_deviation", self.loser_new_rating_deviation),
            ("loser_new_volatility", self.loser_new_volatility),
        ];
        for (field, value) in positives {
            if !(value.is_finite() && value > 0.0) {
                return Err(StoreError::MalformedResponse(format!(
                    "{field} must be positive, got {value}"
                )));
            }
        }

        if self.vote_id.trim().is_empty() {
            return Err(StoreError::MalformedResponse("vote_id is empty".into()));
        }
        Ok(self)
    }
}

/// Elo request: ratings were computed locally, the store persists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EloVoteRequest {
    pub winner_id: String,
    pub winner_new_rating: f64,
    pub loser_id: String,
    pub loser_new_rating: f64,
    pub pair_id: String,
}

/// One player's result from a bulk recalculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationRow {
    pub player_id: String,
    pub old_rating: f64,
    pub new_rating: f64,
    pub new_rating_deviation: f64,
    pub new_volatility: f64,
}

/// Persistent store of players and vote history.
///
/// Vote operations must be atomic: both players and the vote record commit
/// together or not at all.
pub trait RatingStore: Send + Sync + 'static {
    /// All players ordered by rating descending.
    fn load_players(&self) -> impl Future<Output = Result<Vec<Player>, StoreError>> + Send;

    /// One page of votes ordered by timestamp.
    fn load_votes_page(
        &self,
        offset: i64,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Vote>, StoreError>> + Send;

    fn cast_vote(
        &self,
        request: CastVoteRequest,
    ) -> impl Future<Output = Result<CastVoteResponse, StoreError>> + Send;

    /// Persist a locally computed Elo result. Returns the vote id.
    fn record_elo_vote(
        &self,
        request: EloVoteRequest,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Recompute every player's rating from the full vote history.
    fn recalculate_all(
        &self,
        model: RatingModel,
    ) -> impl Future<Output = Result<Vec<RecalculationRow>, StoreError>> + Send;
}

/// Load the whole vote history in pages until a short page comes back.
/// A non-positive `page_size` is treated as 1.
pub async fn load_all_votes<S: RatingStore>(
    store: &S,
    page_size: i64,
) -> Result<Vec<Vote>, StoreError> {
    let page_size = page_size.max(1);
    let mut votes = Vec::new();
    let mut offset = 0;
    loop {
        let page = store.load_votes_page(offset, page_size).await?;
        let short = (page.len() as i64) < page_size;
        offset += page.len() as i64;
        votes.extend(page);
        if short {
            break;
        }
    }
    Ok(votes)
}
