// HTTP API routes (pairs, votes, leaderboard, stats)

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::db::Database;
use crate::error::SessionError;
use crate::metrics;
use crate::session::{VoteOutcome, VoteSession};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct VoteRequest {
    pub winner_id: String,
    pub loser_id: String,
    /// When given, the vote only counts if this pair is still displayed.
    pub pair_id: Option<String>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub session: VoteSession<Database>,
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn session_error(e: SessionError, failure: &str) -> Response {
    match e {
        SessionError::InsufficientPopulation { available } => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "not enough players to build a pair",
                "available": available,
            })),
        )
            .into_response(),
        SessionError::RemoteUpdateFailure(e) => {
            tracing::error!("Store error: {e}");
            json_error(StatusCode::BAD_GATEWAY, failure).into_response()
        }
        SessionError::VoteTaskFailed(e) => {
            tracing::error!("Vote task error: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(session: VoteSession<Database>) -> Router {
    let state = AppState { session };

    Router::new()
        // Pairs
        .route("/api/pair", get(get_pair))
        .route("/api/votes", post(cast_vote))
        // Leaderboard
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/leaderboard/reload", post(reload_leaderboard))
        // Stats
        .route("/api/stats", get(get_stats))
        .route("/api/queue/status", get(queue_status))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

// ── Pair and vote handlers ────────────────────────────────────────────

async fn get_pair(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.present_pair() {
        Ok(Some(pair)) => (StatusCode::OK, Json(json!(pair))).into_response(),
        Ok(None) => {
            json_error(StatusCode::NOT_FOUND, "No fresh pair available").into_response()
        }
        Err(e) => session_error(e, "pair unavailable"),
    }
}

async fn cast_vote(
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> impl IntoResponse {
    let result = match req.pair_id.as_deref() {
        Some(pair_id) => {
            state
                .session
                .cast_vote_on(pair_id, &req.winner_id, &req.loser_id)
                .await
        }
        None => state.session.cast_vote(&req.winner_id, &req.loser_id).await,
    };

    match result {
        Ok(VoteOutcome::Applied(update)) => (
            StatusCode::OK,
            Json(json!({
                "update": update,
                "next_pair": state.session.current_pair(),
            })),
        )
            .into_response(),
        Ok(VoteOutcome::Rejected { reason }) => (
            StatusCode::CONFLICT,
            Json(json!({ "rejected": reason })),
        )
            .into_response(),
        Err(e) => session_error(e, "vote failed"),
    }
}

// ── Leaderboard handlers ──────────────────────────────────────────────

async fn get_leaderboard(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!(state.session.leaderboard()))).into_response()
}

async fn reload_leaderboard(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.load().await {
        Ok(()) => (StatusCode::OK, Json(json!(state.session.leaderboard()))).into_response(),
        Err(e) => session_error(e, "reload failed"),
    }
}

// ── Stats handlers ────────────────────────────────────────────────────

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!(state.session.stats()))).into_response()
}

async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.session.queue().status();
    (StatusCode::OK, Json(json!(status))).into_response()
}

async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}
