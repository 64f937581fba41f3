use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use duel_ranker::config::Config;
use duel_ranker::db::Database;
use duel_ranker::session::VoteSession;
use duel_ranker::{api, metrics, seed};

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "duel-ranker" }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");

    if let Some(path) = &config.players_file {
        match seed::read_roster(path) {
            Ok(roster) => {
                if let Err(e) = seed::seed_if_empty(&db, &roster).await {
                    tracing::error!("Failed to seed players from {}: {e}", path.display());
                }
            }
            Err(e) => tracing::error!("Failed to read {}: {e}", path.display()),
        }
    }

    let session = VoteSession::new(Arc::new(db), config.rating_model, config.queue_target);

    // Recalculation reloads on success; fall back to a plain load otherwise.
    let recalculated = if config.recalculate_on_start {
        match session.recalculate().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Startup recalculation failed, loading stored ratings: {e}");
                false
            }
        }
    } else {
        false
    };
    if !recalculated {
        session
            .load()
            .await
            .expect("Failed to load players and votes");
    }

    match session.prefill() {
        Ok(added) => tracing::info!("Pair queue primed with {added} pairs"),
        Err(e) => tracing::warn!("Pair queue not primed: {e}"),
    }

    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(api::router(session))
        .layer(CorsLayer::permissive());

    if let Some(dir) = &config.static_dir {
        tracing::info!("Serving static files from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(
        "Duel ranker listening on port {} ({} ratings)",
        config.port,
        config.rating_model.as_str()
    );
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
