// Rating store backed by SQLite via sqlx.

pub mod glicko2;

use std::collections::HashMap;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use crate::elo::{self, RatingModel};
use crate::error::StoreError;
use crate::model::{
    Player, Vote, DEFAULT_RATING, DEFAULT_RATING_DEVIATION, DEFAULT_VOLATILITY,
};
use crate::store::{
    CastVoteRequest, CastVoteResponse, EloVoteRequest, RatingStore, RecalculationRow,
};
use glicko2::GlickoState;

const PLAYER_COLUMNS: &str = "id, name, icon, profile_image_url, rating, rating_deviation, volatility, exposure_count, win_count, loss_count";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Every connection to `:memory:` opens its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                icon TEXT NOT NULL DEFAULT '',
                profile_image_url TEXT,
                rating REAL NOT NULL DEFAULT 1500,
                rating_deviation REAL NOT NULL DEFAULT 350,
                volatility REAL NOT NULL DEFAULT 0.06,
                exposure_count INTEGER NOT NULL DEFAULT 0,
                win_count INTEGER NOT NULL DEFAULT 0,
                loss_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                pair_id TEXT NOT NULL UNIQUE,
                winner_id TEXT NOT NULL REFERENCES players(id),
                loser_id TEXT NOT NULL REFERENCES players(id),
                timestamp INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_timestamp ON votes(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ── Players ───────────────────────────────────────────────────────

    pub async fn create_player(
        &self,
        name: &str,
        icon: &str,
        profile_image_url: Option<&str>,
    ) -> Result<Player, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let row = sqlx::query_as::<_, Player>(&format!(
            "INSERT INTO players (id, name, icon, profile_image_url) VALUES (?, ?, ?, ?) RETURNING {PLAYER_COLUMNS}"
        ))
        .bind(&id)
        .bind(name)
        .bind(icon)
        .bind(profile_image_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn count_players(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM players")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn get_player(&self, id: &str) -> Result<Option<Player>, sqlx::Error> {
        sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn count_votes(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM votes")
            .fetch_one(&self.pool)
            .await
    }

    // ── Vote application ──────────────────────────────────────────────

    async fn player_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Player, StoreError> {
        sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::PlayerNotFound(id.to_string()))
    }

    async fn write_result_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        state: GlickoState,
        won: bool,
    ) -> Result<(), StoreError> {
        let (wins, losses) = if won { (1, 0) } else { (0, 1) };
        sqlx::query(
            "UPDATE players SET rating = ?, rating_deviation = ?, volatility = ?, exposure_count = exposure_count + 1, win_count = win_count + ?, loss_count = loss_count + ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(state.rating)
        .bind(state.deviation)
        .bind(state.volatility)
        .bind(wins)
        .bind(losses)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_vote_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        pair_id: &str,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<String, StoreError> {
        let vote_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO votes (id, pair_id, winner_id, loser_id, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&vote_id)
        .bind(pair_id)
        .bind(winner_id)
        .bind(loser_id)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut **tx)
        .await?;
        Ok(vote_id)
    }

    // ── Recalculation ─────────────────────────────────────────────────

    async fn replay_history(&self, model: RatingModel) -> Result<Vec<RecalculationRow>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let players = sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players ORDER BY created_at, id"
        ))
        .fetch_all(&mut *tx)
        .await?;
        let votes = sqlx::query_as::<_, Vote>(
            "SELECT pair_id, winner_id, loser_id, timestamp FROM votes ORDER BY timestamp, rowid",
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut replay: HashMap<&str, Replayed> = players
            .iter()
            .map(|p| (p.id.as_str(), Replayed::default()))
            .collect();

        for vote in &votes {
            let (Some(winner), Some(loser)) = (
                replay.get(vote.winner_id.as_str()).copied(),
                replay.get(vote.loser_id.as_str()).copied(),
            ) else {
                tracing::warn!("Skipping vote {} with unknown participant", vote.pair_id);
                continue;
            };

            let (new_winner, new_loser) = match model {
                RatingModel::Elo => {
                    let r = elo::calculate(
                        winner.state.rating,
                        winner.exposure,
                        loser.state.rating,
                        loser.exposure,
                    );
                    (
                        GlickoState { rating: r.winner_new_rating, ..winner.state },
                        GlickoState { rating: r.loser_new_rating, ..loser.state },
                    )
                }
                RatingModel::Glicko2 => glicko2::rate_game(winner.state, loser.state),
            };

            if let Some(w) = replay.get_mut(vote.winner_id.as_str()) {
                w.state = new_winner;
                w.exposure += 1;
                w.wins += 1;
            }
            if let Some(l) = replay.get_mut(vote.loser_id.as_str()) {
                l.state = new_loser;
                l.exposure += 1;
                l.losses += 1;
            }
        }

        let mut rows = Vec::with_capacity(players.len());
        for player in &players {
            let r = replay
                .get(player.id.as_str())
                .copied()
                .unwrap_or_default();
            sqlx::query(
                "UPDATE players SET rating = ?, rating_deviation = ?, volatility = ?, exposure_count = ?, win_count = ?, loss_count = ?, updated_at = datetime('now') WHERE id = ?",
            )
            .bind(r.state.rating)
            .bind(r.state.deviation)
            .bind(r.state.volatility)
            .bind(r.exposure)
            .bind(r.wins)
            .bind(r.losses)
            .bind(&player.id)
            .execute(&mut *tx)
            .await?;

            rows.push(RecalculationRow {
                player_id: player.id.clone(),
                old_rating: player.rating,
                new_rating: r.state.rating,
                new_rating_deviation: r.state.deviation,
                new_volatility: r.state.volatility,
            });
        }

        tx.commit().await?;
        Ok(rows)
    }
}

/// Per-player running state while replaying the vote history.
#[derive(Debug, Clone, Copy)]
struct Replayed {
    state: GlickoState,
    exposure: i64,
    wins: i64,
    losses: i64,
}

impl Default for Replayed {
    fn default() -> Self {
        Self {
            state: GlickoState {
                rating: DEFAULT_RATING,
                deviation: DEFAULT_RATING_DEVIATION,
                volatility: DEFAULT_VOLATILITY,
            },
            exposure: 0,
            wins: 0,
            losses: 0,
        }
    }
}

impl RatingStore for Database {
    async fn load_players(&self) -> Result<Vec<Player>, StoreError> {
        let rows = sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players ORDER BY rating DESC, created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_votes_page(&self, offset: i64, limit: i64) -> Result<Vec<Vote>, StoreError> {
        let rows = sqlx::query_as::<_, Vote>(
            "SELECT pair_id, winner_id, loser_id, timestamp FROM votes ORDER BY timestamp, rowid LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn cast_vote(&self, request: CastVoteRequest) -> Result<CastVoteResponse, StoreError> {
        let mut tx = self.pool.begin().await?;

        let winner = Self::player_in_tx(&mut tx, &request.winner_id).await?;
        let loser = Self::player_in_tx(&mut tx, &request.loser_id).await?;
        let (new_winner, new_loser) = glicko2::rate_game(
            GlickoState {
                rating: winner.rating,
                deviation: winner.rating_deviation,
                volatility: winner.volatility,
            },
            GlickoState {
                rating: loser.rating,
                deviation: loser.rating_deviation,
                volatility: loser.volatility,
            },
        );

        Self::write_result_in_tx(&mut tx, &winner.id, new_winner, true).await?;
        Self::write_result_in_tx(&mut tx, &loser.id, new_loser, false).await?;
        let vote_id =
            Self::insert_vote_in_tx(&mut tx, &request.pair_id, &winner.id, &loser.id).await?;

        tx.commit().await?;

        Ok(CastVoteResponse {
            winner_old_rating: winner.rating,
            winner_new_rating: new_winner.rating,
            winner_new_rating_deviation: new_winner.deviation,
            winner_new_volatility: new_winner.volatility,
            loser_old_rating: loser.rating,
            loser_new_rating: new_loser.rating,
            loser_new_rating_deviation: new_loser.deviation,
            loser_new_volatility: new_loser.volatility,
            vote_id,
        })
    }

    async fn record_elo_vote(&self, request: EloVoteRequest) -> Result<String, StoreError> {
        let mut tx = self.pool.begin().await?;

        let winner = Self::player_in_tx(&mut tx, &request.winner_id).await?;
        let loser = Self::player_in_tx(&mut tx, &request.loser_id).await?;

        Self::write_result_in_tx(
            &mut tx,
            &winner.id,
            GlickoState {
                rating: request.winner_new_rating,
                deviation: winner.rating_deviation,
                volatility: winner.volatility,
            },
            true,
        )
        .await?;
        Self::write_result_in_tx(
            &mut tx,
            &loser.id,
            GlickoState {
                rating: request.loser_new_rating,
                deviation: loser.rating_deviation,
                volatility: loser.volatility,
            },
            false,
        )
        .await?;
        let vote_id =
            Self::insert_vote_in_tx(&mut tx, &request.pair_id, &winner.id, &loser.id).await?;

        tx.commit().await?;
        Ok(vote_id)
    }

    async fn recalculate_all(
        &self,
        model: RatingModel,
    ) -> Result<Vec<RecalculationRow>, StoreError> {
        self.replay_history(model).await
    }
}
