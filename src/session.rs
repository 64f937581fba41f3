// Vote session controller.
//
// The only mutator of the in-memory players, vote history and recent-pair
// memory. State changes happen only after the store confirms a vote; a
// failed vote leaves everything as it was and the same pair stays displayed.
//
// The state mutex is never held across an await. The in-flight flag inside
// it makes a second vote issued before the first resolves a rejection rather
// than a queued update.
//
// An accepted vote is resolved on its own task, so dropping the caller's
// future never strands the in-flight flag or loses a committed vote. The
// store gate serializes vote resolution with reloads: a reload never
// observes a vote the store committed but the session has not applied yet.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::elo::{self, RatingModel};
use crate::error::{SessionError, StoreError};
use crate::leaderboard::{self, rank_of, RankedPlayer};
use crate::metrics;
use crate::model::{Pair, PairKey, ParticipantUpdate, Player, RatingUpdate, Vote};
use crate::pairing::{generate_pairs, RecentPairs};
use crate::queue::{spawn_refill, PairQueue, QueueStatus};
use crate::store::{
    load_all_votes, CastVoteRequest, EloVoteRequest, RatingStore, RecalculationRow,
    VOTE_PAGE_SIZE,
};

/// Why a vote was turned away without contacting the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Nothing is on screen to vote on.
    NoPairDisplayed,
    /// The displayed pair was already resolved.
    AlreadyVoted,
    /// Another vote on this session has not resolved yet.
    VoteInFlight,
    /// Winner and loser are not the displayed pair's participants.
    NotInPair,
    /// The vote names a pair that is no longer displayed.
    StalePair,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPairDisplayed => "no_pair_displayed",
            Self::AlreadyVoted => "already_voted",
            Self::VoteInFlight => "vote_in_flight",
            Self::NotInPair => "not_in_pair",
            Self::StalePair => "stale_pair",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VoteOutcome {
    Applied(RatingUpdate),
    Rejected { reason: RejectReason },
}

/// Counters for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_votes: usize,
    pub session_votes: usize,
    pub players: usize,
    pub queue_depth: usize,
    pub queue_target: usize,
    pub rating_model: RatingModel,
}

#[derive(Debug, Default)]
struct SessionState {
    players: Vec<Player>,
    votes: Vec<Vote>,
    recent: RecentPairs,
    current_pair: Option<Pair>,
    session_votes: usize,
    vote_in_flight: bool,
}

impl SessionState {
    fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Keys the queue must not produce: recent pairs and the displayed pair.
    fn avoid_keys(&self) -> HashSet<PairKey> {
        let mut keys: HashSet<PairKey> = self.recent.keys().cloned().collect();
        if let Some(pair) = &self.current_pair {
            keys.insert(pair.key());
        }
        keys
    }

    fn apply(&mut self, side: &SideResult, won: bool) {
        if let Some(p) = self.players.iter_mut().find(|p| p.id == side.id) {
            p.rating = side.new_rating;
            p.rating_deviation = side.new_rating_deviation;
            p.volatility = side.new_volatility;
            p.exposure_count += 1;
            if won {
                p.win_count += 1;
            } else {
                p.loss_count += 1;
            }
        }
    }
}

/// Store-confirmed result for one participant.
#[derive(Debug, Clone)]
struct SideResult {
    id: String,
    old_rating: f64,
    new_rating: f64,
    new_rating_deviation: f64,
    new_volatility: f64,
}

#[derive(Debug, Clone)]
struct Confirmed {
    vote_id: String,
    winner: SideResult,
    loser: SideResult,
}

/// Accepted vote waiting on the store.
struct Pending {
    pair: Pair,
    winner: Player,
    loser: Player,
    winner_old_rank: usize,
    loser_old_rank: usize,
}

pub struct VoteSession<S> {
    store: Arc<S>,
    model: RatingModel,
    state: Arc<Mutex<SessionState>>,
    queue: PairQueue,
    store_gate: Arc<tokio::sync::Mutex<()>>,
}

impl<S> Clone for VoteSession<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            model: self.model,
            state: self.state.clone(),
            queue: self.queue.clone(),
            store_gate: self.store_gate.clone(),
        }
    }
}

impl<S: RatingStore> VoteSession<S> {
    pub fn new(store: Arc<S>, model: RatingModel, queue_target: usize) -> Self {
        Self {
            store,
            model,
            state: Arc::new(Mutex::new(SessionState::default())),
            queue: PairQueue::new(queue_target),
            store_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn model(&self) -> RatingModel {
        self.model
    }

    pub fn queue(&self) -> &PairQueue {
        &self.queue
    }

    // ── Loading ───────────────────────────────────────────────────────

    /// Replace the in-memory players and vote history with the store's.
    /// Waits for an in-flight vote to be applied first.
    pub async fn load(&self) -> Result<(), SessionError> {
        let _gate = self.store_gate.lock().await;
        self.load_gated().await
    }

    async fn load_gated(&self) -> Result<(), SessionError> {
        let (players, votes) = tokio::try_join!(
            self.store.load_players(),
            load_all_votes(self.store.as_ref(), VOTE_PAGE_SIZE),
        )
        .map_err(|e| {
            tracing::error!("Failed to load session state: {e}");
            e
        })?;

        tracing::info!("Loaded {} players and {} votes", players.len(), votes.len());
        let mut state = self.lock();
        state.players = players;
        state.votes = votes;
        // Queued pairs carry snapshots of the old ratings.
        self.queue.clear();
        Ok(())
    }

    /// Ask the store to recompute all ratings from the history, then reload.
    pub async fn recalculate(&self) -> Result<Vec<RecalculationRow>, SessionError> {
        let _gate = self.store_gate.lock().await;
        let rows = self
            .store
            .recalculate_all(self.model)
            .await
            .map_err(|e| {
                tracing::error!("Rating recalculation failed: {e}");
                e
            })?;
        tracing::info!(
            "Recalculated {} player ratings under {}",
            rows.len(),
            self.model.as_str()
        );
        self.load_gated().await?;
        Ok(rows)
    }

    // ── Pairs ─────────────────────────────────────────────────────────

    /// Fill the queue synchronously, e.g. right after startup.
    pub fn prefill(&self) -> Result<usize, SessionError> {
        let (players, avoid) = {
            let state = self.lock();
            (state.players.clone(), state.avoid_keys())
        };
        Ok(self.queue.fill(&players, &avoid)?)
    }

    pub fn current_pair(&self) -> Option<Pair> {
        self.lock().current_pair.clone()
    }

    /// The displayed pair, taking the next one from the queue when nothing is shown.
    ///
    /// `Ok(None)` means every possible matchup was resolved recently.
    pub fn present_pair(&self) -> Result<Option<Pair>, SessionError> {
        let mut state = self.lock();
        if let Some(pair) = &state.current_pair {
            return Ok(Some(pair.clone()));
        }
        self.advance(&mut state)?;
        Ok(state.current_pair.clone())
    }

    /// Display the next pair and schedule a background refill.
    fn advance(&self, state: &mut SessionState) -> Result<(), SessionError> {
        // A refill running from an older snapshot may have queued a key
        // that was resolved since; skip those.
        let queued = std::iter::from_fn(|| self.queue.take())
            .find(|pair| !state.recent.contains_key(&pair.key()));
        let next = match queued {
            Some(pair) => Some(pair),
            None => {
                // Queue ran dry: generate exactly one pair synchronously.
                generate_pairs(
                    &state.players,
                    &state.avoid_keys(),
                    1,
                    &mut rand::thread_rng(),
                )?
                .into_iter()
                .next()
            }
        };
        state.current_pair = next;
        spawn_refill(self.queue.clone(), state.players.clone(), state.avoid_keys());
        Ok(())
    }

    // ── Voting ────────────────────────────────────────────────────────

    /// Vote on whatever pair is displayed.
    pub async fn cast_vote(
        &self,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<VoteOutcome, SessionError> {
        self.cast(None, winner_id, loser_id).await
    }

    /// Vote on a specific pair. Rejected when that pair is no longer displayed.
    pub async fn cast_vote_on(
        &self,
        pair_id: &str,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<VoteOutcome, SessionError> {
        self.cast(Some(pair_id), winner_id, loser_id).await
    }

    async fn cast(
        &self,
        pair_id: Option<&str>,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<VoteOutcome, SessionError> {
        let pending = match self.accept(pair_id, winner_id, loser_id) {
            Ok(p) => p,
            Err(reason) => {
                tracing::debug!("Vote rejected: {}", reason.as_str());
                metrics::VOTES_REJECTED_TOTAL
                    .with_label_values(&[reason.as_str()])
                    .inc();
                return Ok(VoteOutcome::Rejected { reason });
            }
        };

        let session = self.clone();
        let handle = tokio::spawn(async move { session.resolve(pending).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Vote task aborted: {e}");
                self.lock().vote_in_flight = false;
                Err(SessionError::VoteTaskFailed(e.to_string()))
            }
        }
    }

    /// Submit an accepted vote and apply the store's answer.
    /// Runs to completion even when the caller stops waiting.
    async fn resolve(&self, pending: Pending) -> Result<VoteOutcome, SessionError> {
        let _gate = self.store_gate.lock().await;
        let pending = self.refresh(pending);

        metrics::VOTES_IN_FLIGHT.inc();
        let timer = metrics::VOTE_LATENCY_SECONDS.start_timer();
        let result = self.submit(&pending).await;
        timer.observe_duration();
        metrics::VOTES_IN_FLIGHT.dec();

        match result {
            Ok(confirmed) => Ok(VoteOutcome::Applied(self.commit(pending, confirmed))),
            Err(e) => {
                tracing::error!("Vote on pair {} failed: {e}", pending.pair.id);
                metrics::VOTES_FAILED_TOTAL.inc();
                self.lock().vote_in_flight = false;
                Err(SessionError::RemoteUpdateFailure(e))
            }
        }
    }

    /// Re-read both participants in case a reload finished while the vote
    /// waited for the store gate.
    fn refresh(&self, mut pending: Pending) -> Pending {
        let state = self.lock();
        if let (Some(winner), Some(loser)) = (
            state.player(&pending.winner.id).cloned(),
            state.player(&pending.loser.id).cloned(),
        ) {
            pending.winner_old_rank = rank_of(&state.players, &winner.id).unwrap_or(0);
            pending.loser_old_rank = rank_of(&state.players, &loser.id).unwrap_or(0);
            pending.winner = winner;
            pending.loser = loser;
        }
        pending
    }

    /// Guard checks. On success the session is marked busy.
    fn accept(
        &self,
        pair_id: Option<&str>,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<Pending, RejectReason> {
        let mut state = self.lock();

        let pair = match (&state.current_pair, pair_id) {
            (_, Some(id)) if state.recent.contains_pair_id(id) => {
                return Err(RejectReason::AlreadyVoted)
            }
            (None, _) => return Err(RejectReason::NoPairDisplayed),
            (Some(current), Some(id)) if current.id != id => {
                return Err(RejectReason::StalePair)
            }
            (Some(current), _) => current.clone(),
        };

        if state.recent.contains_pair_id(&pair.id) {
            return Err(RejectReason::AlreadyVoted);
        }
        if state.vote_in_flight {
            return Err(RejectReason::VoteInFlight);
        }
        if winner_id == loser_id || !pair.matches(winner_id, loser_id) {
            return Err(RejectReason::NotInPair);
        }

        let (Some(winner), Some(loser)) = (
            state.player(winner_id).cloned(),
            state.player(loser_id).cloned(),
        ) else {
            return Err(RejectReason::NotInPair);
        };

        let winner_old_rank = rank_of(&state.players, winner_id).unwrap_or(0);
        let loser_old_rank = rank_of(&state.players, loser_id).unwrap_or(0);

        state.vote_in_flight = true;
        Ok(Pending {
            pair,
            winner,
            loser,
            winner_old_rank,
            loser_old_rank,
        })
    }

    /// Send the vote to the store under the configured rating model.
    async fn submit(&self, pending: &Pending) -> Result<Confirmed, StoreError> {
        let (winner, loser) = (&pending.winner, &pending.loser);
        match self.model {
            RatingModel::Elo => {
                let result = elo::calculate(
                    winner.rating,
                    winner.exposure_count,
                    loser.rating,
                    loser.exposure_count,
                );
                let vote_id = self
                    .store
                    .record_elo_vote(EloVoteRequest {
                        winner_id: winner.id.clone(),
                        winner_new_rating: result.winner_new_rating,
                        loser_id: loser.id.clone(),
                        loser_new_rating: result.loser_new_rating,
                        pair_id: pending.pair.id.clone(),
                    })
                    .await?;
                Ok(Confirmed {
                    vote_id,
                    winner: SideResult {
                        id: winner.id.clone(),
                        old_rating: winner.rating,
                        new_rating: result.winner_new_rating,
                        new_rating_deviation: winner.rating_deviation,
                        new_volatility: winner.volatility,
                    },
                    loser: SideResult {
                        id: loser.id.clone(),
                        old_rating: loser.rating,
                        new_rating: result.loser_new_rating,
                        new_rating_deviation: loser.rating_deviation,
                        new_volatility: loser.volatility,
                    },
                })
            }
            RatingModel::Glicko2 => {
                let response = self
                    .store
                    .cast_vote(CastVoteRequest {
                        winner_id: winner.id.clone(),
                        loser_id: loser.id.clone(),
                        pair_id: pending.pair.id.clone(),
                    })
                    .await?
                    .validate()?;
                Ok(Confirmed {
                    vote_id: response.vote_id,
                    winner: SideResult {
                        id: winner.id.clone(),
                        old_rating: response.winner_old_rating,
                        new_rating: response.winner_new_rating,
                        new_rating_deviation: response.winner_new_rating_deviation,
                        new_volatility: response.winner_new_volatility,
                    },
                    loser: SideResult {
                        id: loser.id.clone(),
                        old_rating: response.loser_old_rating,
                        new_rating: response.loser_new_rating,
                        new_rating_deviation: response.loser_new_rating_deviation,
                        new_volatility: response.loser_new_volatility,
                    },
                })
            }
        }
    }

    /// Apply a store-confirmed vote to the in-memory state and move on to the next pair.
    fn commit(&self, pending: Pending, confirmed: Confirmed) -> RatingUpdate {
        let mut state = self.lock();

        state.apply(&confirmed.winner, true);
        state.apply(&confirmed.loser, false);
        state.votes.push(Vote {
            pair_id: pending.pair.id.clone(),
            winner_id: confirmed.winner.id.clone(),
            loser_id: confirmed.loser.id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        state.recent.push(pending.pair.key(), pending.pair.id.clone());
        state.session_votes += 1;
        state.vote_in_flight = false;

        let winner_new_rank = rank_of(&state.players, &confirmed.winner.id).unwrap_or(0);
        let loser_new_rank = rank_of(&state.players, &confirmed.loser.id).unwrap_or(0);

        // Only the pair that was voted on is cleared; anything else on screen stays.
        let still_current = state
            .current_pair
            .as_ref()
            .is_some_and(|p| p.id == pending.pair.id);
        if still_current {
            state.current_pair = None;
            if let Err(e) = self.advance(&mut state) {
                tracing::warn!("No next pair after vote: {e}");
            }
        }

        metrics::VOTES_COMMITTED_TOTAL
            .with_label_values(&[self.model.as_str()])
            .inc();
        tracing::debug!(
            "Vote {} committed: {} beat {}",
            confirmed.vote_id,
            confirmed.winner.id,
            confirmed.loser.id
        );

        RatingUpdate {
            pair_id: pending.pair.id,
            vote_id: confirmed.vote_id,
            winner: participant_update(confirmed.winner, pending.winner_old_rank, winner_new_rank),
            loser: participant_update(confirmed.loser, pending.loser_old_rank, loser_new_rank),
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub fn leaderboard(&self) -> Vec<RankedPlayer> {
        leaderboard::leaderboard(&self.lock().players)
    }

    pub fn players(&self) -> Vec<Player> {
        self.lock().players.clone()
    }

    pub fn votes(&self) -> Vec<Vote> {
        self.lock().votes.clone()
    }

    pub fn has_voted_recently(&self, pair_id: &str) -> bool {
        self.lock().recent.contains_pair_id(pair_id)
    }

    pub fn is_voting(&self) -> bool {
        self.lock().vote_in_flight
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.lock();
        let QueueStatus { depth, target } = self.queue.status();
        SessionStats {
            total_votes: state.votes.len(),
            session_votes: state.session_votes,
            players: state.players.len(),
            queue_depth: depth,
            queue_target: target,
            rating_model: self.model,
        }
    }
}

fn participant_update(side: SideResult, old_rank: usize, new_rank: usize) -> ParticipantUpdate {
    ParticipantUpdate {
        delta: side.new_rating - side.old_rating,
        id: side.id,
        old_rating: side.old_rating,
        new_rating: side.new_rating,
        new_rating_deviation: side.new_rating_deviation,
        new_volatility: side.new_volatility,
        old_rank,
        new_rank,
    }
}
