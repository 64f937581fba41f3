// Integration tests for the vote session against the SQLite store:
// failure handling, interleaving with in-flight votes, repeat avoidance
// over many votes, and recalculation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use duel_ranker::db::Database;
use duel_ranker::elo::RatingModel;
use duel_ranker::error::{SessionError, StoreError};
use duel_ranker::model::{Player, Vote};
use duel_ranker::pairing::RECENT_PAIRS_CAPACITY;
use duel_ranker::session::{RejectReason, VoteOutcome, VoteSession};
use duel_ranker::store::{
    CastVoteRequest, CastVoteResponse, EloVoteRequest, RatingStore, RecalculationRow,
};

/// Store wrapper whose vote calls can be switched to fail, or held after
/// the vote is committed until the test releases them.
struct FlakyStore {
    inner: Database,
    failing: AtomicBool,
    holding: AtomicBool,
    committed: Notify,
    release: Notify,
}

impl FlakyStore {
    fn new(inner: Database) -> Self {
        FlakyStore {
            inner,
            failing: AtomicBool::new(false),
            holding: AtomicBool::new(false),
            committed: Notify::new(),
            release: Notify::new(),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_holding(&self, holding: bool) {
        self.holding.store(holding, Ordering::SeqCst);
    }

    async fn hold_after_commit(&self) {
        if self.holding.load(Ordering::SeqCst) {
            self.committed.notify_one();
            self.release.notified().await;
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::MalformedResponse("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

impl RatingStore for FlakyStore {
    async fn load_players(&self) -> Result<Vec<Player>, StoreError> {
        self.inner.load_players().await
    }

    async fn load_votes_page(&self, offset: i64, limit: i64) -> Result<Vec<Vote>, StoreError> {
        self.inner.load_votes_page(offset, limit).await
    }

    async fn cast_vote(&self, request: CastVoteRequest) -> Result<CastVoteResponse, StoreError> {
        self.check()?;
        let response = self.inner.cast_vote(request).await?;
        self.hold_after_commit().await;
        Ok(response)
    }

    async fn record_elo_vote(&self, request: EloVoteRequest) -> Result<String, StoreError> {
        self.check()?;
        let vote_id = self.inner.record_elo_vote(request).await?;
        self.hold_after_commit().await;
        Ok(vote_id)
    }

    async fn recalculate_all(
        &self,
        model: RatingModel,
    ) -> Result<Vec<RecalculationRow>, StoreError> {
        self.inner.recalculate_all(model).await
    }
}

async fn test_db(players: usize) -> Database {
    let db = Database::new("sqlite::memory:").await.unwrap();
    for i in 0..players {
        db.create_player(&format!("Player {i}"), "⚽", None)
            .await
            .unwrap();
    }
    db
}

async fn flaky_session(model: RatingModel) -> (Arc<FlakyStore>, VoteSession<FlakyStore>) {
    let store = Arc::new(FlakyStore::new(test_db(4).await));
    let session = VoteSession::new(store.clone(), model, 5);
    session.load().await.unwrap();
    (store, session)
}

// ── Failure handling ─────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_vote_changes_nothing() {
    for model in [RatingModel::Elo, RatingModel::Glicko2] {
        let (store, session) = flaky_session(model).await;
        let pair = session.present_pair().unwrap().unwrap();
        let before = session.players();

        store.set_failing(true);
        let err = session
            .cast_vote(&pair.player_a.id, &pair.player_b.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::RemoteUpdateFailure(_)));

        assert_eq!(session.players(), before);
        assert!(session.votes().is_empty());
        assert!(!session.has_voted_recently(&pair.id));
        assert!(!session.is_voting());
        assert_eq!(session.current_pair().unwrap().id, pair.id);
        assert_eq!(session.stats().session_votes, 0);
        assert_eq!(store.inner.count_votes().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_retry_after_failure_succeeds() {
    let (store, session) = flaky_session(RatingModel::Glicko2).await;
    let pair = session.present_pair().unwrap().unwrap();

    store.set_failing(true);
    assert!(session
        .cast_vote(&pair.player_a.id, &pair.player_b.id)
        .await
        .is_err());

    store.set_failing(false);
    let outcome = session
        .cast_vote(&pair.player_a.id, &pair.player_b.id)
        .await
        .unwrap();
    let VoteOutcome::Applied(update) = outcome else {
        panic!("retry should apply");
    };
    assert_eq!(update.pair_id, pair.id);
    assert_eq!(store.inner.count_votes().await.unwrap(), 1);
}

/// Wait for a detached vote task to finish applying.
async fn settle<S: RatingStore>(session: &VoteSession<S>) {
    for _ in 0..200 {
        if !session.is_voting() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("vote never resolved");
}

// ── Interleaving with an in-flight vote ──────────────────────────────

#[tokio::test]
async fn test_reload_during_vote_applies_it_once() {
    let (store, session) = flaky_session(RatingModel::Elo).await;
    let pair = session.present_pair().unwrap().unwrap();
    let (w, l) = (pair.player_a.id.clone(), pair.player_b.id.clone());
    store.set_holding(true);

    let voter = {
        let s = session.clone();
        let (w, l) = (w.clone(), l.clone());
        tokio::spawn(async move { s.cast_vote(&w, &l).await })
    };
    // The store has the vote; the session has not applied it yet.
    store.committed.notified().await;

    let loader = {
        let s = session.clone();
        tokio::spawn(async move { s.load().await })
    };
    tokio::task::yield_now().await;
    store.release.notify_one();

    assert!(matches!(
        voter.await.unwrap().unwrap(),
        VoteOutcome::Applied(_)
    ));
    loader.await.unwrap().unwrap();

    let winner = session.players().into_iter().find(|p| p.id == w).unwrap();
    let stored = store.inner.get_player(&w).await.unwrap().unwrap();
    assert_eq!(winner.exposure_count, 1);
    assert_eq!(winner.win_count, 1);
    assert_eq!(winner.exposure_count, stored.exposure_count);
    assert_eq!(winner.rating, stored.rating);
    let for_pair = session
        .votes()
        .iter()
        .filter(|v| v.pair_id == pair.id)
        .count();
    assert_eq!(for_pair, 1);
    assert_eq!(store.inner.count_votes().await.unwrap(), 1);
}

#[tokio::test]
async fn test_reads_during_vote_show_pre_vote_state() {
    let (store, session) = flaky_session(RatingModel::Glicko2).await;
    let pair = session.present_pair().unwrap().unwrap();
    let before = session.leaderboard();
    store.set_holding(true);

    let voter = {
        let s = session.clone();
        let (w, l) = (pair.player_a.id.clone(), pair.player_b.id.clone());
        tokio::spawn(async move { s.cast_vote(&w, &l).await })
    };
    store.committed.notified().await;

    assert!(session.is_voting());
    assert_eq!(session.leaderboard(), before);
    assert!(session.votes().is_empty());
    assert_eq!(session.current_pair().unwrap().id, pair.id);
    assert_eq!(
        session
            .cast_vote(&pair.player_a.id, &pair.player_b.id)
            .await
            .unwrap(),
        VoteOutcome::Rejected {
            reason: RejectReason::VoteInFlight
        }
    );

    store.release.notify_one();
    assert!(matches!(
        voter.await.unwrap().unwrap(),
        VoteOutcome::Applied(_)
    ));
    assert_eq!(session.votes().len(), 1);
    assert!(!session.is_voting());
}

#[tokio::test]
async fn test_abandoned_vote_still_applies() {
    let (store, session) = flaky_session(RatingModel::Elo).await;
    let pair = session.present_pair().unwrap().unwrap();
    store.set_holding(true);

    // The caller gives up while the store still holds the response.
    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        session.cast_vote(&pair.player_a.id, &pair.player_b.id),
    )
    .await;
    assert!(waited.is_err());
    assert!(session.is_voting());

    store.set_holding(false);
    store.release.notify_one();
    settle(&session).await;

    assert_eq!(store.inner.count_votes().await.unwrap(), 1);
    assert_eq!(session.votes().len(), 1);
    assert!(session.has_voted_recently(&pair.id));

    let next = session.present_pair().unwrap().unwrap();
    assert_ne!(next.id, pair.id);
    let retry = session
        .cast_vote(&next.player_a.id, &next.player_b.id)
        .await
        .unwrap();
    assert!(matches!(retry, VoteOutcome::Applied(_)));
}

#[tokio::test]
async fn test_abandoned_failing_vote_clears_busy_flag() {
    let (store, session) = flaky_session(RatingModel::Glicko2).await;
    let pair = session.present_pair().unwrap().unwrap();
    store.set_failing(true);

    // The caller may or may not see the failure before giving up.
    let _ = tokio::time::timeout(
        Duration::from_millis(1),
        session.cast_vote(&pair.player_a.id, &pair.player_b.id),
    )
    .await;
    settle(&session).await;

    assert!(session.votes().is_empty());
    assert_eq!(session.current_pair().unwrap().id, pair.id);
    store.set_failing(false);
    assert!(matches!(
        session
            .cast_vote(&pair.player_a.id, &pair.player_b.id)
            .await
            .unwrap(),
        VoteOutcome::Applied(_)
    ));
}

// ── Repeat avoidance ─────────────────────────────────────────────────

#[tokio::test]
async fn test_displayed_pairs_avoid_recent_keys() {
    let db = test_db(12).await;
    let session = VoteSession::new(Arc::new(db), RatingModel::Elo, 5);
    session.load().await.unwrap();
    session.prefill().unwrap();

    let mut history = Vec::new();
    for _ in 0..40 {
        let pair = session.present_pair().unwrap().unwrap();
        let recent: HashSet<_> = history
            .iter()
            .rev()
            .take(RECENT_PAIRS_CAPACITY)
            .cloned()
            .collect();
        assert!(
            !recent.contains(&pair.key()),
            "pair {:?} repeated within the recent window",
            pair.key()
        );
        let outcome = session
            .cast_vote(&pair.player_a.id, &pair.player_b.id)
            .await
            .unwrap();
        assert!(matches!(outcome, VoteOutcome::Applied(_)));
        history.push(pair.key());
    }
    assert_eq!(session.votes().len(), 40);
}

#[tokio::test]
async fn test_exposure_totals_match_votes() {
    let db = test_db(6).await;
    let session = VoteSession::new(Arc::new(db), RatingModel::Glicko2, 3);
    session.load().await.unwrap();

    for _ in 0..15 {
        let pair = session.present_pair().unwrap().unwrap();
        session
            .cast_vote(&pair.player_b.id, &pair.player_a.id)
            .await
            .unwrap();
    }

    let players = session.players();
    let exposures: i64 = players.iter().map(|p| p.exposure_count).sum();
    let wins: i64 = players.iter().map(|p| p.win_count).sum();
    let losses: i64 = players.iter().map(|p| p.loss_count).sum();
    assert_eq!(exposures, 30);
    assert_eq!(wins, 15);
    assert_eq!(losses, 15);
}

// ── Reload and recalculation ─────────────────────────────────────────

#[tokio::test]
async fn test_reload_matches_in_memory_state() {
    let db = test_db(5).await;
    let session = VoteSession::new(Arc::new(db), RatingModel::Glicko2, 5);
    session.load().await.unwrap();

    for _ in 0..6 {
        let pair = session.present_pair().unwrap().unwrap();
        session
            .cast_vote(&pair.player_a.id, &pair.player_b.id)
            .await
            .unwrap();
    }
    let board: Vec<(String, f64)> = session
        .leaderboard()
        .into_iter()
        .map(|r| (r.player.id, r.player.rating))
        .collect();

    session.load().await.unwrap();
    let reloaded: Vec<(String, f64)> = session
        .leaderboard()
        .into_iter()
        .map(|r| (r.player.id, r.player.rating))
        .collect();
    assert_eq!(board.len(), reloaded.len());
    for ((id, rating), (rid, rrating)) in board.iter().zip(&reloaded) {
        assert_eq!(id, rid);
        assert!((rating - rrating).abs() < 1e-9);
    }
    assert_eq!(session.stats().total_votes, 6);
}

#[tokio::test]
async fn test_recalculate_keeps_history() {
    let db = test_db(4).await;
    let session = VoteSession::new(Arc::new(db), RatingModel::Elo, 5);
    session.load().await.unwrap();

    let pair = session.present_pair().unwrap().unwrap();
    session
        .cast_vote(&pair.player_a.id, &pair.player_b.id)
        .await
        .unwrap();

    let rows = session.recalculate().await.unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(session.votes().len(), 1);
    let top = &session.leaderboard()[0];
    assert_eq!(top.player.id, pair.player_a.id);
    assert_eq!(top.player.rating, 1512.0);
}

#[tokio::test]
async fn test_stale_vote_after_advance_rejected() {
    let db = test_db(6).await;
    let session = VoteSession::new(Arc::new(db), RatingModel::Elo, 5);
    session.load().await.unwrap();

    let first = session.present_pair().unwrap().unwrap();
    session
        .cast_vote_on(&first.id, &first.player_a.id, &first.player_b.id)
        .await
        .unwrap();
    let outcome = session
        .cast_vote_on(&first.id, &first.player_b.id, &first.player_a.id)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        VoteOutcome::Rejected {
            reason: RejectReason::AlreadyVoted
        }
    );
    assert_eq!(session.votes().len(), 1);
}
