// Seeding an empty database from a JSON roster file.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::db::Database;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read roster: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid roster JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One roster entry: `{"name": "...", "icon": "...", "profile_image_url": "..."}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeedPlayer {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

pub fn parse_roster(json: &str) -> Result<Vec<SeedPlayer>, SeedError> {
    Ok(serde_json::from_str(json)?)
}

pub fn read_roster(path: &Path) -> Result<Vec<SeedPlayer>, SeedError> {
    parse_roster(&std::fs::read_to_string(path)?)
}

/// Insert the roster when the players table is empty. Returns how many were inserted.
pub async fn seed_if_empty(db: &Database, roster: &[SeedPlayer]) -> Result<usize, SeedError> {
    let existing = db.count_players().await?;
    if existing > 0 {
        tracing::debug!("Skipping seed, {existing} players already present");
        return Ok(0);
    }
    for entry in roster {
        db.create_player(&entry.name, &entry.icon, entry.profile_image_url.as_deref())
            .await?;
    }
    tracing::info!("Seeded {} players", roster.len());
    Ok(roster.len())
}
